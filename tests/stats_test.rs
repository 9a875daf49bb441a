//! Statistics aggregation from stats logs to normalization buffers

mod common;

use common::{append_line, frames_of, DatasetFixture};
use episode_db::stats::{
    buffer_name, load_episode_stats, AggregatedStats, NormalizationSink, StatArray, StatsAggregator,
};
use episode_db::{Error, Result};
use serde_json::json;
use std::collections::BTreeMap;
use std::fs;

#[derive(Default)]
struct PolicyBuffers {
    buffers: BTreeMap<String, (Vec<f64>, Vec<f64>)>,
}

impl NormalizationSink for PolicyBuffers {
    fn set_normalization_stats(&mut self, buffer: &str, mean: &StatArray, std: &StatArray) -> Result<bool> {
        self.buffers
            .insert(buffer.to_string(), (mean.data().to_vec(), std.data().to_vec()));
        Ok(true)
    }
}

fn scalar_feature(mean: f64, std: f64, count: u64) -> serde_json::Value {
    json!({"min": [mean - std], "max": [mean + std], "mean": [mean], "std": [std], "count": [count]})
}

#[test]
fn test_between_episode_spread_from_log() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("episodes_stats.jsonl");
    append_line(&path, &json!({"episode_index": 0, "stats": {"action": scalar_feature(0.0, 0.0, 10)}}));
    append_line(&path, &json!({"episode_index": 1, "stats": {"action": scalar_feature(10.0, 0.0, 10)}}));

    let log = load_episode_stats(&path).unwrap();
    let aggregation = StatsAggregator::default().aggregate(&log.stats).unwrap();

    let action = aggregation.table.get("action").unwrap();
    assert_eq!(action.mean.data(), &[5.0]);
    assert_eq!(action.std.data(), &[5.0]);
    assert_eq!(action.count.data(), &[20.0]);
    assert_eq!(action.min.data(), &[0.0]);
    assert_eq!(action.max.data(), &[10.0]);
}

#[test]
fn test_fixture_dataset_to_normalization_buffers() {
    let fixture = DatasetFixture::with_episodes(&["top"], 1000, 3);
    let store = fixture.store();
    let output = fixture.target().with_extension("json");

    let log = load_episode_stats(&store.episodes_stats_log()).unwrap();
    assert!(log.skipped.is_empty());
    let aggregation = StatsAggregator::from_config(store.config()).aggregate(&log.stats).unwrap();

    assert!(aggregation.is_complete());
    assert_eq!(aggregation.table.len(), 1, "image features are excluded");
    let action = aggregation.table.get("action").unwrap();
    let counts: Vec<f64> = (0..3).map(|e| frames_of(e) as f64).collect();
    let total: f64 = counts.iter().sum();
    let mean = (0..3).map(|e| e as f64 * counts[e]).sum::<f64>() / total;
    let variance = (0..3)
        .map(|e| (1.0 + (e as f64 - mean).powi(2)) * counts[e])
        .sum::<f64>()
        / total;
    assert!((action.mean.data()[0] - mean).abs() < 1e-12);
    assert!((action.std.data()[0] - variance.sqrt()).abs() < 1e-12);
    assert_eq!(action.std.data()[1], 0.0);
    assert_eq!(action.count.data(), &[total]);

    aggregation.table.write_json(&output).unwrap();
    let table = AggregatedStats::read_json(&output).unwrap();
    assert_eq!(table, aggregation.table);

    let mut policy = PolicyBuffers::default();
    assert_eq!(table.apply_to(&mut policy).unwrap(), 1);
    let (buffer_mean, buffer_std) = &policy.buffers[&buffer_name("action")];
    assert_eq!(buffer_mean, &action.mean.data().to_vec());
    assert_eq!(buffer_std, &action.std.data().to_vec());
}

#[test]
fn test_single_episode_passes_through_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("episodes_stats.jsonl");
    let feature = json!({"min": [-0.3, 0.1], "max": [0.7, 0.9], "mean": [0.1, 0.3], "std": [0.2, 0.05], "count": [3]});
    append_line(&path, &json!({"episode_index": 4, "stats": {"observation.state": feature}}));

    let log = load_episode_stats(&path).unwrap();
    let aggregation = StatsAggregator::default().aggregate(&log.stats).unwrap();

    let stat = aggregation.table.get("observation.state").unwrap();
    assert_eq!(stat, &log.stats[&4]["observation.state"]);
    assert_eq!(stat.mean.data(), &[0.1, 0.3]);
    assert_eq!(stat.std.data(), &[0.2, 0.05]);
}

#[test]
fn test_infinite_std_fails_only_that_feature() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("episodes_stats.jsonl");
    fs::write(
        &path,
        concat!(
            r#"{"episode_index": 0, "stats": {"action": {"min": [0], "max": [1], "mean": [0.5], "std": [Infinity], "count": [10]}, "observation.state": {"min": [0], "max": [1], "mean": [0.5], "std": [0.1], "count": [10]}}}"#,
            "\n",
            r#"{"episode_index": 1, "stats": {"action": {"min": [0], "max": [1], "mean": [0.5], "std": [0.1], "count": [10]}, "observation.state": {"min": [0], "max": [1], "mean": [0.5], "std": [0.1], "count": [10]}}}"#,
            "\n",
        ),
    )
    .unwrap();

    let log = load_episode_stats(&path).unwrap();
    let aggregation = StatsAggregator::default().aggregate(&log.stats).unwrap();

    assert!(!aggregation.is_complete());
    assert_eq!(aggregation.failures.len(), 1);
    assert_eq!(aggregation.failures[0].feature, "action");
    assert!(matches!(aggregation.failures[0].error, Error::NumericInvariant { .. }));
    assert!(aggregation.table.get("action").is_none());
    assert!(aggregation.table.get("observation.state").unwrap().std.is_finite());
}

#[test]
fn test_shape_mismatch_names_episode_and_feature() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("episodes_stats.jsonl");
    append_line(&path, &json!({"episode_index": 0, "stats": {"action": scalar_feature(1.0, 0.5, 10)}}));
    append_line(
        &path,
        &json!({"episode_index": 5, "stats": {"action": {"min": [0, 0], "max": [1, 1], "mean": [0.5, 0.5], "std": [0.1, 0.1], "count": [10]}}}),
    );

    let log = load_episode_stats(&path).unwrap();
    let err = StatsAggregator::default().aggregate(&log.stats).unwrap_err();

    // the only feature failed, so nothing could be aggregated
    assert!(matches!(err, Error::NoStatistics(_)));
    let err = episode_db::stats::aggregate_feature(
        "action",
        &[(0, &log.stats[&0]["action"]), (5, &log.stats[&5]["action"])],
    )
    .unwrap_err();
    let message = err.to_string();
    assert!(message.contains("episode 5"));
    assert!(message.contains("action"));
}

#[test]
fn test_image_prefix_is_configurable() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("episodes_stats.jsonl");
    append_line(
        &path,
        &json!({"episode_index": 0, "stats": {"camera.front": scalar_feature(1.0, 0.5, 10), "action": scalar_feature(1.0, 0.5, 10)}}),
    );
    let log = load_episode_stats(&path).unwrap();

    let aggregation = StatsAggregator::new("camera.").aggregate(&log.stats).unwrap();

    assert!(aggregation.table.get("camera.front").is_none());
    assert!(aggregation.table.get("action").is_some());
}

#[test]
fn test_zero_counts_fail_feature() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("episodes_stats.jsonl");
    append_line(&path, &json!({"episode_index": 0, "stats": {"action": scalar_feature(1.0, 0.5, 0), "state": scalar_feature(1.0, 0.5, 4)}}));
    append_line(&path, &json!({"episode_index": 1, "stats": {"action": scalar_feature(2.0, 0.5, 0), "state": scalar_feature(2.0, 0.5, 4)}}));

    let log = load_episode_stats(&path).unwrap();
    let aggregation = StatsAggregator::default().aggregate(&log.stats).unwrap();

    assert_eq!(aggregation.failures.len(), 1);
    assert_eq!(aggregation.failures[0].feature, "action");
    assert_eq!(aggregation.table.get("state").unwrap().mean.data(), &[1.5]);
}

#[test]
fn test_single_episode_zero_count_is_not_emitted() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("episodes_stats.jsonl");
    append_line(
        &path,
        &json!({"episode_index": 0, "stats": {"action": scalar_feature(1.0, 0.0, 0), "state": scalar_feature(2.0, 0.5, 4)}}),
    );

    let log = load_episode_stats(&path).unwrap();
    let aggregation = StatsAggregator::default().aggregate(&log.stats).unwrap();

    assert!(aggregation.table.get("action").is_none());
    assert_eq!(aggregation.failures.len(), 1);
    assert_eq!(aggregation.failures[0].feature, "action");
    assert!(matches!(aggregation.failures[0].error, Error::NumericInvariant { .. }));
    assert_eq!(aggregation.table.get("state").unwrap().count.data(), &[4.0]);
}

#[test]
fn test_empty_arrays_are_not_emitted() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("episodes_stats.jsonl");
    let empty = json!({"min": [], "max": [], "mean": [], "std": [], "count": []});
    let no_count = json!({"min": [0.0], "max": [1.0], "mean": [0.5], "std": [0.1], "count": []});
    append_line(
        &path,
        &json!({"episode_index": 0, "stats": {"action": empty, "effort": no_count, "state": scalar_feature(2.0, 0.5, 4)}}),
    );

    let log = load_episode_stats(&path).unwrap();
    let aggregation = StatsAggregator::default().aggregate(&log.stats).unwrap();

    assert!(aggregation.table.get("action").is_none());
    assert!(aggregation.table.get("effort").is_none());
    assert_eq!(aggregation.table.len(), 1);
    assert!(aggregation.table.get("state").is_some());
}
