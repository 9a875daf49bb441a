//! Per-episode feature statistics and the stats log reader

use super::array::StatArray;
use crate::storage::jsonl::{self, MalformedLine};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Field of a stats record holding the per-feature map
pub const STATS_KEY: &str = "stats";

/// Summary of one feature: `{min, max, mean, std, count}`
///
/// `min`, `max`, `mean` and `std` share the feature's shape. `count` is a
/// scalar (shape `[1]`), the same shape, or a leading prefix of it (one
/// count per channel).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureStat {
    /// Elementwise minimum
    pub min: StatArray,
    /// Elementwise maximum
    pub max: StatArray,
    /// Elementwise mean
    pub mean: StatArray,
    /// Elementwise (population) standard deviation
    pub std: StatArray,
    /// Number of samples
    pub count: StatArray,
}

impl FeatureStat {
    /// Statistics of raw samples, one `Vec` per frame
    ///
    /// Uses the population standard deviation, matching how recorders write
    /// per-episode stats.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if there are no samples or frames differ in width
    pub fn from_samples(samples: &[Vec<f64>]) -> Result<Self> {
        let width = samples
            .first()
            .map(Vec::len)
            .filter(|&w| w > 0)
            .ok_or_else(|| Error::InvalidInput("no samples".to_string()))?;
        if samples.iter().any(|s| s.len() != width) {
            return Err(Error::InvalidInput("samples differ in width".to_string()));
        }

        let n = samples.len() as f64;
        let mut min = vec![f64::INFINITY; width];
        let mut max = vec![f64::NEG_INFINITY; width];
        let mut sum = vec![0.0; width];
        for frame in samples {
            for (j, &x) in frame.iter().enumerate() {
                min[j] = min[j].min(x);
                max[j] = max[j].max(x);
                sum[j] += x;
            }
        }
        let mean: Vec<f64> = sum.into_iter().map(|s| s / n).collect();
        let mut squares = vec![0.0; width];
        for frame in samples {
            for (j, &x) in frame.iter().enumerate() {
                squares[j] += (x - mean[j]).powi(2);
            }
        }

        Ok(Self {
            min: StatArray::vector(min),
            max: StatArray::vector(max),
            mean: StatArray::vector(mean),
            std: StatArray::vector(squares.into_iter().map(|s| (s / n).sqrt()).collect()),
            count: StatArray::scalar(n),
        })
    }

    /// Parse one feature entry of a stats record
    ///
    /// # Errors
    ///
    /// Returns error if a field is missing or is not a numeric array
    pub fn from_json(value: &Value) -> Result<Self> {
        let field = |name: &str| -> Result<StatArray> {
            let raw = value
                .get(name)
                .ok_or_else(|| Error::InvalidInput(format!("missing `{name}`")))?;
            StatArray::from_json(raw).map_err(|e| Error::InvalidInput(format!("`{name}`: {e}")))
        };
        Ok(Self {
            min: field("min")?,
            max: field("max")?,
            mean: field("mean")?,
            std: field("std")?,
            count: field("count")?,
        })
    }

    /// Fields with their names, in a fixed order
    pub fn fields(&self) -> [(&'static str, &StatArray); 5] {
        [
            ("min", &self.min),
            ("max", &self.max),
            ("mean", &self.mean),
            ("std", &self.std),
            ("count", &self.count),
        ]
    }
}

/// Statistics of every feature of one episode
pub type EpisodeStats = BTreeMap<String, FeatureStat>;

/// Per-episode statistics keyed by episode index
pub type PerEpisodeStats = BTreeMap<u64, EpisodeStats>;

/// A stats log line, or one feature of it, that was not loaded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedStats {
    /// Log file
    pub path: PathBuf,
    /// 1-based line number
    pub line_number: usize,
    /// Episode, when the line had one
    pub episode: Option<u64>,
    /// Feature, when only that feature was skipped
    pub feature: Option<String>,
    /// Why
    pub detail: String,
}

impl From<MalformedLine> for SkippedStats {
    fn from(line: MalformedLine) -> Self {
        Self {
            path: line.path,
            line_number: line.line_number,
            episode: None,
            feature: None,
            detail: line.detail,
        }
    }
}

/// Contents of `episodes_stats.jsonl`
#[derive(Debug, Default)]
pub struct EpisodeStatsLog {
    /// Loaded statistics
    pub stats: PerEpisodeStats,
    /// Lines and features that were not loaded
    pub skipped: Vec<SkippedStats>,
}

/// Read per-episode statistics from a stats log
///
/// Malformed lines, lines without `episode_index` or `stats`, duplicate
/// episodes and unparseable features are skipped and listed.
///
/// # Errors
///
/// Returns [`Error::NotFound`] if the log does not exist, or an IO error
pub fn load_episode_stats(path: &Path) -> Result<EpisodeStatsLog> {
    let contents = jsonl::read_log(path)?;
    let mut log = EpisodeStatsLog {
        stats: PerEpisodeStats::new(),
        skipped: contents.malformed.into_iter().map(SkippedStats::from).collect(),
    };

    for record in contents.records {
        let skip = |episode: Option<u64>, feature: Option<&str>, detail: String| {
            warn!(
                path = %path.display(),
                line = record.line_number,
                episode,
                feature,
                "skipping stats: {detail}"
            );
            SkippedStats {
                path: path.to_path_buf(),
                line_number: record.line_number,
                episode,
                feature: feature.map(str::to_string),
                detail,
            }
        };

        let Some(episode) = jsonl::episode_index(&record.value) else {
            log.skipped.push(skip(None, None, format!("no {}", jsonl::EPISODE_INDEX_KEY)));
            continue;
        };
        let Some(Value::Object(features)) = record.value.get(STATS_KEY) else {
            log.skipped.push(skip(Some(episode), None, format!("no `{STATS_KEY}` object")));
            continue;
        };
        if log.stats.contains_key(&episode) {
            log.skipped.push(skip(Some(episode), None, "duplicate episode".to_string()));
            continue;
        }

        let mut parsed = EpisodeStats::new();
        for (name, value) in features {
            match FeatureStat::from_json(value) {
                Ok(stat) => {
                    parsed.insert(name.clone(), stat);
                }
                Err(e) => log.skipped.push(skip(Some(episode), Some(name), e.to_string())),
            }
        }
        log.stats.insert(episode, parsed);
    }

    debug!(
        path = %path.display(),
        episodes = log.stats.len(),
        skipped = log.skipped.len(),
        "loaded episode stats"
    );
    Ok(log)
}
