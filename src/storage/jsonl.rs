//! Newline-delimited JSON metadata logs
//!
//! `episodes.jsonl` and `episodes_stats.jsonl` hold one JSON object per line,
//! each carrying an `episode_index`. Logs are append-only in normal
//! operation; edits copy every surviving line into a temporary and rename it
//! over the original (single writer, see [`super::atomic`]).
//!
//! A malformed line is reported and skipped. It is never a deletion target
//! and never aborts a rewrite: when a log is edited in place the malformed
//! text is carried over untouched.
//!
//! Stats logs written by Python tooling may contain the bare tokens `NaN`,
//! `Infinity` and `-Infinity`, which are not JSON. They are accepted here as
//! tagged strings (see [`non_finite`]) so that the numeric layer can reject
//! them per feature instead of the whole line being dropped as malformed.

use super::atomic::write_atomic;
use crate::{Error, Result};
use serde_json::Value;
use std::borrow::Cow;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Field every log record is keyed by
pub const EPISODE_INDEX_KEY: &str = "episode_index";

const NON_FINITE_TAG: &str = "__non_finite__:";
const NON_FINITE_TOKENS: [&str; 3] = ["-Infinity", "Infinity", "NaN"];

/// A line that could not be parsed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedLine {
    /// Log file
    pub path: PathBuf,
    /// 1-based line number
    pub line_number: usize,
    /// Parser message
    pub detail: String,
}

/// One parsed record
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    /// 1-based line number
    pub line_number: usize,
    /// Parsed object
    pub value: Value,
}

/// Everything read from one log
#[derive(Debug, Default)]
pub struct LogContents {
    /// Parsed records in file order
    pub records: Vec<LogRecord>,
    /// Lines that were skipped
    pub malformed: Vec<MalformedLine>,
}

/// Outcome of an in-place edit
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LogEdit {
    /// Records written
    pub kept: usize,
    /// Records dropped
    pub removed: usize,
    /// Lines that could not be parsed
    pub malformed: Vec<MalformedLine>,
}

/// `episode_index` of a record, if it has a non-negative integer one
#[must_use]
pub fn episode_index(record: &Value) -> Option<u64> {
    record.get(EPISODE_INDEX_KEY)?.as_u64()
}

/// Predicate matching records for one episode
pub fn is_episode(episode: u64) -> impl Fn(&Value) -> bool {
    move |record| episode_index(record) == Some(episode)
}

/// Value of a tagged non-finite token, if `value` is one
#[must_use]
pub fn non_finite(value: &Value) -> Option<f64> {
    match value.as_str()?.strip_prefix(NON_FINITE_TAG)? {
        "NaN" => Some(f64::NAN),
        "Infinity" => Some(f64::INFINITY),
        "-Infinity" => Some(f64::NEG_INFINITY),
        _ => None,
    }
}

/// Parse one log line
///
/// # Errors
///
/// Returns the JSON error if the line is not an object even after
/// non-finite tokens are accepted
pub fn parse_line(raw: &str) -> Result<Value> {
    let value: Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(strict) => match tag_non_finite(raw) {
            Cow::Owned(tagged) => serde_json::from_str(&tagged)?,
            Cow::Borrowed(_) => return Err(strict.into()),
        },
    };
    if !value.is_object() {
        return Err(Error::Inconsistent(format!(
            "expected a JSON object per line, got {}",
            kind_of(&value)
        )));
    }
    Ok(value)
}

/// Serialize a record as one log line (no trailing newline)
///
/// # Errors
///
/// Returns error if the value cannot be serialized
pub fn to_line(record: &Value) -> Result<String> {
    let line = serde_json::to_string(record)?;
    if !line.contains(NON_FINITE_TAG) {
        return Ok(line);
    }
    let mut restored = line;
    for token in NON_FINITE_TOKENS {
        restored = restored.replace(&format!("\"{NON_FINITE_TAG}{token}\""), token);
    }
    Ok(restored)
}

/// Read and parse a whole log
///
/// # Errors
///
/// Returns [`Error::NotFound`] if the log does not exist, or an IO error
pub fn read_log(path: &Path) -> Result<LogContents> {
    let text = read_text(path)?;
    let mut contents = LogContents::default();

    for (index, raw) in text.lines().enumerate() {
        let line_number = index + 1;
        if raw.trim().is_empty() {
            continue;
        }
        match parse_line(raw) {
            Ok(value) => contents.records.push(LogRecord { line_number, value }),
            Err(e) => contents.malformed.push(report_malformed(path, line_number, &e)),
        }
    }

    debug!(
        path = %path.display(),
        records = contents.records.len(),
        malformed = contents.malformed.len(),
        "read metadata log"
    );
    Ok(contents)
}

/// Append `record` unless an existing record matches `predicate`
///
/// Returns `false` (and leaves the log untouched) when a match exists. A
/// missing log is created.
///
/// # Errors
///
/// Returns error if the log cannot be read or rewritten
pub fn append_record_to_log<P>(path: &Path, record: &Value, predicate: P) -> Result<bool>
where
    P: Fn(&Value) -> bool,
{
    let existing = match read_text(path) {
        Ok(text) => text,
        Err(e) if e.is_not_found() => String::new(),
        Err(e) => return Err(e),
    };

    let mut lines = Vec::new();
    for (index, raw) in existing.lines().enumerate() {
        if raw.trim().is_empty() {
            continue;
        }
        match parse_line(raw) {
            Ok(value) if predicate(&value) => {
                debug!(path = %path.display(), line = index + 1, "matching record exists, not appending");
                return Ok(false);
            }
            Ok(_) => {}
            Err(e) => {
                report_malformed(path, index + 1, &e);
            }
        }
        lines.push(raw.trim_end().to_string());
    }
    lines.push(to_line(record)?);

    write_atomic(path, join_lines(&lines).as_bytes())?;
    Ok(true)
}

/// Drop every record matching `predicate`, rewriting the log atomically
///
/// Nothing is written when no record matches.
///
/// # Errors
///
/// Returns [`Error::NotFound`] if the log does not exist, or an IO error
pub fn remove_records_from_log<P>(path: &Path, predicate: P) -> Result<LogEdit>
where
    P: Fn(&Value) -> bool,
{
    let text = read_text(path)?;
    let mut edit = LogEdit::default();
    let mut lines = Vec::new();

    for (index, raw) in text.lines().enumerate() {
        if raw.trim().is_empty() {
            continue;
        }
        match parse_line(raw) {
            Ok(value) if predicate(&value) => {
                edit.removed += 1;
                continue;
            }
            Ok(_) => edit.kept += 1,
            Err(e) => edit.malformed.push(report_malformed(path, index + 1, &e)),
        }
        lines.push(raw.trim_end().to_string());
    }

    if edit.removed > 0 {
        write_atomic(path, join_lines(&lines).as_bytes())?;
    }
    Ok(edit)
}

/// Write `records` as a fresh log at `path`, atomically
///
/// # Errors
///
/// Returns error if a record cannot be serialized or the file written
pub fn write_log(path: &Path, records: &[Value]) -> Result<()> {
    let lines = records.iter().map(to_line).collect::<Result<Vec<_>>>()?;
    write_atomic(path, join_lines(&lines).as_bytes())
}

fn read_text(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::NotFound(format!("metadata log {}", path.display()))
        } else {
            e.into()
        }
    })
}

fn join_lines(lines: &[String]) -> String {
    let mut out = String::with_capacity(lines.iter().map(|l| l.len() + 1).sum());
    for line in lines {
        out.push_str(line);
        out.push('\n');
    }
    out
}

fn report_malformed(path: &Path, line_number: usize, error: &Error) -> MalformedLine {
    warn!(
        path = %path.display(),
        line = line_number,
        error = %error,
        "skipping malformed metadata line"
    );
    MalformedLine {
        path: path.to_path_buf(),
        line_number,
        detail: error.to_string(),
    }
}

const fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Quote bare `NaN` / `Infinity` / `-Infinity` tokens outside strings
fn tag_non_finite(raw: &str) -> Cow<'_, str> {
    let mut out = String::new();
    let mut last = 0;
    let mut in_string = false;
    let mut escaped = false;
    let bytes = raw.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        if in_string {
            match (escaped, b) {
                (true, _) => escaped = false,
                (false, b'\\') => escaped = true,
                (false, b'"') => in_string = false,
                _ => {}
            }
            i += 1;
            continue;
        }
        if b == b'"' {
            in_string = true;
            i += 1;
            continue;
        }
        let rest = &bytes[i..];
        if let Some(token) = NON_FINITE_TOKENS.iter().find(|t| rest.starts_with(t.as_bytes())) {
            out.push_str(&raw[last..i]);
            out.push('"');
            out.push_str(NON_FINITE_TAG);
            out.push_str(token);
            out.push('"');
            i += token.len();
            last = i;
            continue;
        }
        i += 1;
    }

    if last == 0 {
        Cow::Borrowed(raw)
    } else {
        out.push_str(&raw[last..]);
        Cow::Owned(out)
    }
}
