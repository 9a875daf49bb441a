//! Dataset-level statistics from per-episode summaries
//!
//! Episodes are merged with Chan's parallel-variance identity:
//!
//! ```text
//! N     = Σ nᵢ
//! μ     = Σ nᵢ·μᵢ / N
//! σ²    = Σ nᵢ·(σᵢ² + (μᵢ − μ)²) / N
//! ```
//!
//! Averaging the per-episode standard deviations instead would ignore the
//! spread between episode means and understate dataset-level variance.

use super::array::StatArray;
use super::feature::{FeatureStat, PerEpisodeStats};
use super::table::AggregatedStats;
use crate::config::{DatasetConfig, DEFAULT_IMAGE_FEATURE_PREFIX};
use crate::{Error, Result};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

#[cfg(feature = "rayon")]
use rayon::prelude::*;

/// A feature that could not be aggregated
#[derive(Debug)]
pub struct FeatureFailure {
    /// Feature name
    pub feature: String,
    /// Why
    pub error: Error,
}

/// Outcome of [`StatsAggregator::aggregate`]
#[derive(Debug)]
pub struct Aggregation {
    /// Features that aggregated cleanly
    pub table: AggregatedStats,
    /// Features that did not, with the reason
    pub failures: Vec<FeatureFailure>,
}

impl Aggregation {
    /// Every eligible feature aggregated
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Merges per-episode feature statistics
///
/// Stateless apart from the image-feature exclusion rule; one instance can
/// serve any number of datasets.
#[derive(Debug, Clone)]
pub struct StatsAggregator {
    image_prefix: String,
}

impl Default for StatsAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_IMAGE_FEATURE_PREFIX)
    }
}

impl StatsAggregator {
    /// Aggregator skipping features whose name starts with `image_prefix`
    pub fn new(image_prefix: impl Into<String>) -> Self {
        Self {
            image_prefix: image_prefix.into(),
        }
    }

    /// Aggregator using the dataset's image-feature prefix
    #[must_use]
    pub fn from_config(config: &DatasetConfig) -> Self {
        Self::new(config.image_feature_prefix())
    }

    /// Whether `feature` is image-valued and excluded from normalization
    #[must_use]
    pub fn is_image_feature(&self, feature: &str) -> bool {
        feature.starts_with(&self.image_prefix)
    }

    /// Aggregate every non-image feature present in at least one episode
    ///
    /// A feature that fails (non-finite input, shape mismatch, zero total
    /// count) is listed in [`Aggregation::failures`] and does not affect
    /// the others.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoStatistics`] if `stats` is empty or no feature
    /// could be aggregated
    pub fn aggregate(&self, stats: &PerEpisodeStats) -> Result<Aggregation> {
        if stats.is_empty() {
            return Err(Error::NoStatistics("no per-episode statistics".to_string()));
        }

        let mut by_feature: BTreeMap<&str, Vec<(u64, &FeatureStat)>> = BTreeMap::new();
        for (&episode, features) in stats {
            for (name, stat) in features {
                if self.is_image_feature(name) {
                    continue;
                }
                by_feature.entry(name.as_str()).or_default().push((episode, stat));
            }
        }
        debug!(
            episodes = stats.len(),
            features = by_feature.len(),
            "aggregating feature statistics"
        );

        #[cfg(feature = "rayon")]
        let merged: Vec<_> = by_feature.into_par_iter().map(merge_entries).collect();
        #[cfg(not(feature = "rayon"))]
        let merged: Vec<_> = by_feature.into_iter().map(merge_entries).collect();

        let mut aggregation = Aggregation {
            table: AggregatedStats::default(),
            failures: Vec::new(),
        };
        for (feature, result) in merged {
            match result {
                Ok(stat) => aggregation.table.insert(feature, stat),
                Err(error) => {
                    warn!(feature, error = %error, "feature not aggregated");
                    aggregation.failures.push(FeatureFailure {
                        feature: feature.to_string(),
                        error,
                    });
                }
            }
        }

        if aggregation.table.is_empty() {
            return Err(Error::NoStatistics(format!(
                "{} episodes but no feature could be aggregated ({} failed)",
                stats.len(),
                aggregation.failures.len()
            )));
        }
        info!(
            features = aggregation.table.len(),
            failed = aggregation.failures.len(),
            "aggregated statistics"
        );
        Ok(aggregation)
    }
}

/// Merge one feature across episodes
///
/// A single episode is returned unchanged after validation.
///
/// # Errors
///
/// - [`Error::ShapeMismatch`] if an episode's arrays disagree in shape with
///   each other or with the first episode, or its count cannot be broadcast
/// - [`Error::NumericInvariant`] for non-finite input, negative std or
///   count, a zero total count, or a non-finite result
pub fn aggregate_feature(feature: &str, entries: &[(u64, &FeatureStat)]) -> Result<FeatureStat> {
    let Some(&(first_episode, first)) = entries.first() else {
        return Err(Error::numeric(feature, "no episodes to aggregate"));
    };
    let shape = first.mean.shape();
    let width = first.mean.len();
    if width == 0 {
        return Err(Error::numeric(
            feature,
            format!("episode {first_episode}: mean has no elements"),
        ));
    }

    let mut count_maps = Vec::with_capacity(entries.len());
    for &(episode, stat) in entries {
        validate(feature, episode, stat, shape)?;
        count_maps.push(count_broadcast(feature, episode, stat)?);
    }

    let mut total = vec![0.0; width];
    let mut weighted = vec![0.0; width];
    for ((_, stat), counts) in entries.iter().zip(&count_maps) {
        for i in 0..width {
            let n = counts.at(stat, i);
            total[i] += n;
            weighted[i] += stat.mean.data()[i] * n;
        }
    }
    if let Some(i) = total.iter().position(|&n| n <= 0.0) {
        return Err(Error::numeric(
            feature,
            format!("total count is zero at element {i}"),
        ));
    }
    if entries.len() == 1 {
        debug!(feature, episode = first_episode, "single episode, stats passed through");
        return Ok(first.clone());
    }

    let mean: Vec<f64> = weighted.iter().zip(&total).map(|(s, n)| s / n).collect();

    let mut spread = vec![0.0; width];
    for ((_, stat), counts) in entries.iter().zip(&count_maps) {
        for i in 0..width {
            let n = counts.at(stat, i);
            let delta = stat.mean.data()[i] - mean[i];
            spread[i] += stat.std.data()[i].mul_add(stat.std.data()[i], delta * delta) * n;
        }
    }
    let std: Vec<f64> = spread.iter().zip(&total).map(|(s, n)| (s / n).sqrt()).collect();
    if let Some(i) = std.iter().chain(&mean).position(|v| !v.is_finite()) {
        return Err(Error::numeric(
            feature,
            format!("aggregated value at flat position {i} is not finite"),
        ));
    }

    let mut min = first.min.data().to_vec();
    let mut max = first.max.data().to_vec();
    for (_, stat) in &entries[1..] {
        for i in 0..width {
            min[i] = min[i].min(stat.min.data()[i]);
            max[i] = max[i].max(stat.max.data()[i]);
        }
    }

    let count = merged_count(entries, &total);
    let to_array = |data: Vec<f64>| StatArray::new(shape.to_vec(), data);
    Ok(FeatureStat {
        min: to_array(min)?,
        max: to_array(max)?,
        mean: to_array(mean)?,
        std: to_array(std)?,
        count,
    })
}

/// One feature's merge, keyed by its name
fn merge_entries<'a>(
    (feature, entries): (&'a str, Vec<(u64, &FeatureStat)>),
) -> (&'a str, Result<FeatureStat>) {
    (feature, aggregate_feature(feature, &entries))
}

/// Reject malformed or non-finite episode stats before any arithmetic
fn validate(feature: &str, episode: u64, stat: &FeatureStat, shape: &[usize]) -> Result<()> {
    for (name, array) in stat.fields() {
        if let Some((i, value)) = array.first_non_finite() {
            return Err(Error::numeric(
                feature,
                format!("episode {episode}: {name}[{i}] is {value}"),
            ));
        }
        if name != "count" && array.shape() != shape {
            return Err(Error::ShapeMismatch {
                episode,
                feature: feature.to_string(),
                detail: format!("{name} has shape {:?}, expected {shape:?}", array.shape()),
            });
        }
    }
    if stat.std.data().iter().any(|&s| s < 0.0) {
        return Err(Error::numeric(feature, format!("episode {episode}: negative std")));
    }
    if stat.count.data().iter().any(|&n| n < 0.0) {
        return Err(Error::numeric(feature, format!("episode {episode}: negative count")));
    }
    Ok(())
}

/// How an episode's count array maps onto its mean's flat positions
#[derive(Debug, Clone, Copy)]
enum CountBroadcast {
    /// One count for every element
    Scalar,
    /// Count `i / stride` applies to element `i`
    Leading { stride: usize },
}

impl CountBroadcast {
    fn at(self, stat: &FeatureStat, i: usize) -> f64 {
        match self {
            Self::Scalar => stat.count.data()[0],
            Self::Leading { stride } => stat.count.data()[i / stride],
        }
    }
}

/// Counts are scalar, mean-shaped, or a leading prefix of the mean's shape
fn count_broadcast(feature: &str, episode: u64, stat: &FeatureStat) -> Result<CountBroadcast> {
    let count = stat.count.shape();
    let mean = stat.mean.shape();
    if stat.count.len() == 1 {
        return Ok(CountBroadcast::Scalar);
    }
    if count.len() <= mean.len() && mean.starts_with(count) {
        let stride = mean[count.len()..].iter().product::<usize>().max(1);
        return Ok(CountBroadcast::Leading { stride });
    }
    Err(Error::ShapeMismatch {
        episode,
        feature: feature.to_string(),
        detail: format!("count shape {count:?} cannot broadcast to mean shape {mean:?}"),
    })
}

/// Total count, kept in the episodes' count shape when they all agree
fn merged_count(entries: &[(u64, &FeatureStat)], per_element: &[f64]) -> StatArray {
    let first = &entries[0].1.count;
    let uniform = entries.iter().all(|(_, s)| s.count.shape() == first.shape());
    if !uniform {
        return StatArray::new(entries[0].1.mean.shape().to_vec(), per_element.to_vec())
            .unwrap_or_else(|_| StatArray::vector(per_element.to_vec()));
    }
    let mut sum = vec![0.0; first.len()];
    for (_, stat) in entries {
        for (acc, n) in sum.iter_mut().zip(stat.count.data()) {
            *acc += n;
        }
    }
    StatArray::new(first.shape().to_vec(), sum).unwrap_or_else(|_| StatArray::vector(per_element.to_vec()))
}
