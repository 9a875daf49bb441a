//! `meta/info.json` dataset summary
//!
//! Only the counters curation maintains are typed; every other field is
//! carried through untouched.

use super::atomic::write_atomic;
use crate::{Error, Result};
use serde_json::{Map, Value};
use std::path::Path;

const TOTAL_EPISODES: &str = "total_episodes";
const TOTAL_FRAMES: &str = "total_frames";
const TOTAL_VIDEOS: &str = "total_videos";
const TOTAL_CHUNKS: &str = "total_chunks";
const CHUNKS_SIZE: &str = "chunks_size";
const SPLITS: &str = "splits";
const TRAIN_SPLIT: &str = "train";

/// Parsed `info.json`
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DatasetInfo {
    fields: Map<String, Value>,
}

impl DatasetInfo {
    /// Load from disk
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the file is missing, or
    /// [`Error::Inconsistent`] if it is not a JSON object
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::NotFound(format!("dataset info {}", path.display()))
            } else {
                e.into()
            }
        })?;
        match serde_json::from_str(&text)? {
            Value::Object(fields) => Ok(Self { fields }),
            _ => Err(Error::Inconsistent(format!(
                "{} is not a JSON object",
                path.display()
            ))),
        }
    }

    /// Write atomically, pretty-printed
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be written
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut text = serde_json::to_string_pretty(&self.fields)?;
        text.push('\n');
        write_atomic(path, text.as_bytes())
    }

    /// Raw field access
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// `total_episodes`
    #[must_use]
    pub fn total_episodes(&self) -> Option<u64> {
        self.u64_field(TOTAL_EPISODES)
    }

    /// `total_frames`
    #[must_use]
    pub fn total_frames(&self) -> Option<u64> {
        self.u64_field(TOTAL_FRAMES)
    }

    /// `total_videos`
    #[must_use]
    pub fn total_videos(&self) -> Option<u64> {
        self.u64_field(TOTAL_VIDEOS)
    }

    /// `total_chunks`
    #[must_use]
    pub fn total_chunks(&self) -> Option<u64> {
        self.u64_field(TOTAL_CHUNKS)
    }

    /// `chunks_size` (episodes per chunk)
    #[must_use]
    pub fn chunks_size(&self) -> Option<u64> {
        self.u64_field(CHUNKS_SIZE)
    }

    /// `splits.train`
    #[must_use]
    pub fn train_split(&self) -> Option<&str> {
        self.fields.get(SPLITS)?.get(TRAIN_SPLIT)?.as_str()
    }

    /// Set `total_episodes`
    pub fn set_total_episodes(&mut self, value: u64) {
        self.fields.insert(TOTAL_EPISODES.to_string(), value.into());
    }

    /// Set `total_frames`
    pub fn set_total_frames(&mut self, value: u64) {
        self.fields.insert(TOTAL_FRAMES.to_string(), value.into());
    }

    /// Set `total_videos`
    pub fn set_total_videos(&mut self, value: u64) {
        self.fields.insert(TOTAL_VIDEOS.to_string(), value.into());
    }

    /// Set `total_chunks`
    pub fn set_total_chunks(&mut self, value: u64) {
        self.fields.insert(TOTAL_CHUNKS.to_string(), value.into());
    }

    /// Point `splits.train` at `0:<episodes>` if the dataset declares splits
    pub fn set_train_split(&mut self, episodes: u64) {
        if let Some(Value::Object(splits)) = self.fields.get_mut(SPLITS) {
            splits.insert(TRAIN_SPLIT.to_string(), format!("0:{episodes}").into());
        }
    }

    fn u64_field(&self, key: &str) -> Option<u64> {
        self.fields.get(key)?.as_u64()
    }
}
