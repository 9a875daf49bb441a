//! Normalization table and its consumers

use super::array::StatArray;
use super::feature::FeatureStat;
use crate::storage::atomic::write_atomic;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

/// Dataset-level statistics keyed by feature name
///
/// Serialized as a plain JSON object of feature name to
/// `{min, max, mean, std, count}` nested lists.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AggregatedStats {
    features: BTreeMap<String, FeatureStat>,
}

/// Receives normalization statistics for one named buffer
///
/// Implemented by whatever owns the model's normalization buffers.
pub trait NormalizationSink {
    /// Copy `mean` and `std` into `buffer`
    ///
    /// Returns `Ok(false)` if the sink has no such buffer.
    ///
    /// # Errors
    ///
    /// Returns error if the buffer exists but cannot accept the values
    fn set_normalization_stats(&mut self, buffer: &str, mean: &StatArray, std: &StatArray) -> Result<bool>;
}

/// Buffer name for a feature: `buffer_` + name with `.` replaced by `_`
#[must_use]
pub fn buffer_name(feature: &str) -> String {
    format!("buffer_{}", feature.replace('.', "_"))
}

impl AggregatedStats {
    /// Add or replace one feature
    pub fn insert(&mut self, feature: impl Into<String>, stat: FeatureStat) {
        self.features.insert(feature.into(), stat);
    }

    /// Statistics for `feature`
    #[must_use]
    pub fn get(&self, feature: &str) -> Option<&FeatureStat> {
        self.features.get(feature)
    }

    /// Number of features
    #[must_use]
    pub fn len(&self) -> usize {
        self.features.len()
    }

    /// No features
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// `(feature, stats)` in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FeatureStat)> {
        self.features.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Every value finite and every std non-negative
    ///
    /// # Errors
    ///
    /// Returns [`Error::NumericInvariant`] for the first offending feature
    pub fn validate(&self) -> Result<()> {
        for (feature, stat) in self.iter() {
            for (name, array) in stat.fields() {
                if let Some((i, value)) = array.first_non_finite() {
                    return Err(Error::numeric(feature, format!("{name}[{i}] is {value}")));
                }
            }
            if stat.std.data().iter().any(|&s| s < 0.0) {
                return Err(Error::numeric(feature, "negative std"));
            }
        }
        Ok(())
    }

    /// Write as pretty JSON, atomically
    ///
    /// # Errors
    ///
    /// Returns [`Error::NumericInvariant`] if the table holds a non-finite
    /// value, or an IO error
    pub fn write_json(&self, path: &Path) -> Result<()> {
        self.validate()?;
        let mut text = serde_json::to_string_pretty(self)?;
        text.push('\n');
        write_atomic(path, text.as_bytes())?;
        info!(path = %path.display(), features = self.len(), "wrote normalization table");
        Ok(())
    }

    /// Read a table written by [`Self::write_json`]
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the file is missing, or a parse error
    pub fn read_json(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::NotFound(format!("normalization table {}", path.display()))
            } else {
                e.into()
            }
        })?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Push every feature's mean and std into `sink`
    ///
    /// The whole table is validated first, so a non-finite value never
    /// reaches any buffer. Returns how many buffers accepted values.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NumericInvariant`] before touching the sink if any
    /// value is non-finite, or the first error the sink reports
    pub fn apply_to<S: NormalizationSink + ?Sized>(&self, sink: &mut S) -> Result<usize> {
        self.validate()?;
        let mut applied = 0;
        for (feature, stat) in self.iter() {
            let buffer = buffer_name(feature);
            if sink.set_normalization_stats(&buffer, &stat.mean, &stat.std)? {
                debug!(feature, buffer = %buffer, "applied normalization stats");
                applied += 1;
            } else {
                debug!(feature, buffer = %buffer, "sink has no buffer for feature");
            }
        }
        Ok(applied)
    }
}
