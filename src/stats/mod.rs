//! Dataset-level statistics for input normalization
//!
//! Per-episode `{min, max, mean, std, count}` summaries are read from
//! `meta/episodes_stats.jsonl`, merged per feature, and emitted as a
//! normalization table keyed by feature name. Image-valued features are
//! skipped.
//!
//! ```rust,no_run
//! use episode_db::stats::{load_episode_stats, StatsAggregator};
//!
//! let log = load_episode_stats("datasets/pick-place/meta/episodes_stats.jsonl".as_ref())?;
//! let aggregation = StatsAggregator::default().aggregate(&log.stats)?;
//! aggregation.table.write_json("stats.json".as_ref())?;
//! # Ok::<(), episode_db::Error>(())
//! ```
//!
//! # Toyota Way: Poka-Yoke
//!
//! A non-finite value fails its feature at aggregation time and again at
//! output time. It can never reach a normalization buffer.

mod aggregate;
mod array;
mod feature;
mod table;

pub use aggregate::{aggregate_feature, Aggregation, FeatureFailure, StatsAggregator};
pub use array::StatArray;
pub use feature::{load_episode_stats, EpisodeStats, EpisodeStatsLog, FeatureStat, PerEpisodeStats, SkippedStats, STATS_KEY};
pub use table::{buffer_name, AggregatedStats, NormalizationSink};
