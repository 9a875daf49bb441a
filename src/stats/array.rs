//! Fixed-shape numeric arrays as stored in stats logs

use crate::storage::jsonl;
use crate::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Number, Value};

/// Row-major `f64` array with an explicit shape
///
/// Stats logs encode arrays as nested JSON lists. A bare number is a
/// scalar and becomes shape `[1]`, so every feature has at least one axis.
#[derive(Debug, Clone, PartialEq)]
pub struct StatArray {
    shape: Vec<usize>,
    data: Vec<f64>,
}

impl StatArray {
    /// Array from a shape and row-major data
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the data length does not match the shape
    pub fn new(shape: Vec<usize>, data: Vec<f64>) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if shape.is_empty() || expected != data.len() {
            return Err(Error::InvalidInput(format!(
                "shape {shape:?} needs {expected} values, got {}",
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }

    /// Shape `[1]` array
    #[must_use]
    pub fn scalar(value: f64) -> Self {
        Self {
            shape: vec![1],
            data: vec![value],
        }
    }

    /// One-axis array
    #[must_use]
    pub fn vector(values: Vec<f64>) -> Self {
        Self {
            shape: vec![values.len()],
            data: values,
        }
    }

    /// Parse a nested JSON list (or a bare number)
    ///
    /// Tagged non-finite tokens from the log reader are accepted so the
    /// caller can reject them with feature context.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for non-numeric leaves or ragged lists
    pub fn from_json(value: &Value) -> Result<Self> {
        if !value.is_array() {
            return Ok(Self::scalar(leaf(value)?));
        }
        let mut shape = Vec::new();
        let mut data = Vec::new();
        flatten(value, 0, &mut shape, &mut data)?;
        Ok(Self { shape, data })
    }

    /// Nested JSON lists; non-finite values become `null`
    #[must_use]
    pub fn to_json(&self) -> Value {
        nest(&self.shape, &self.data)
    }

    /// Dimensions
    #[must_use]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Row-major values
    #[must_use]
    pub fn data(&self) -> &[f64] {
        &self.data
    }

    /// Number of elements
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// No elements
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Every element is finite
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.data.iter().all(|v| v.is_finite())
    }

    /// First non-finite element and its flat position
    #[must_use]
    pub fn first_non_finite(&self) -> Option<(usize, f64)> {
        self.data
            .iter()
            .copied()
            .enumerate()
            .find(|(_, v)| !v.is_finite())
    }
}

fn leaf(value: &Value) -> Result<f64> {
    value
        .as_f64()
        .or_else(|| jsonl::non_finite(value))
        .ok_or_else(|| Error::InvalidInput(format!("expected a number, got {value}")))
}

/// Depth-first walk recording the shape on first visit of each depth
fn flatten(value: &Value, depth: usize, shape: &mut Vec<usize>, data: &mut Vec<f64>) -> Result<()> {
    let Value::Array(items) = value else {
        if depth != shape.len() {
            return Err(Error::InvalidInput("ragged nested list".to_string()));
        }
        data.push(leaf(value)?);
        return Ok(());
    };

    match shape.get(depth) {
        Some(&len) if len != items.len() => {
            return Err(Error::InvalidInput(format!(
                "ragged nested list: axis {depth} has lengths {len} and {}",
                items.len()
            )));
        }
        Some(_) => {}
        None if data.is_empty() && depth == shape.len() => shape.push(items.len()),
        None => return Err(Error::InvalidInput("ragged nested list".to_string())),
    }
    for item in items {
        flatten(item, depth + 1, shape, data)?;
    }
    Ok(())
}

fn nest(shape: &[usize], data: &[f64]) -> Value {
    match shape {
        [] | [_] => Value::Array(
            data.iter()
                .map(|&v| Number::from_f64(v).map_or(Value::Null, Value::Number))
                .collect(),
        ),
        [_, rest @ ..] => {
            let stride: usize = rest.iter().product();
            if stride == 0 {
                return Value::Array(vec![nest(rest, &[]); shape[0]]);
            }
            Value::Array(data.chunks(stride).map(|part| nest(rest, part)).collect())
        }
    }
}

impl Serialize for StatArray {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for StatArray {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_json(&value).map_err(serde::de::Error::custom)
    }
}
