//! End-to-end curation on fixture datasets
//!
//! Toyota Way: Jidoka (every artifact checked against the one mapping)

mod common;

use common::{all_files, episode_index_column, frames_of, read_lines, DatasetFixture};
use episode_db::config::{DatasetConfig, FrameCountPolicy};
use episode_db::curation::{EpisodeCurator, IssueKind};
use episode_db::oracle::Mp4BoxProbe;
use episode_db::storage::DatasetInfo;
use episode_db::Error;
use std::fs;
use std::path::Path;

fn indices(path: &Path) -> Vec<u64> {
    read_lines(path)
        .iter()
        .map(|r| r["episode_index"].as_u64().unwrap())
        .collect()
}

#[test]
fn test_corrupted_episode_dropped_and_survivors_renumbered() {
    let fixture = DatasetFixture::with_episodes(&["top", "wrist"], 1000, 5);
    fixture.corrupt(2, "wrist");
    fs::write(fixture.root().join("meta/tasks.jsonl"), "{\"task_index\": 0, \"task\": \"pick the cube\"}\n").unwrap();
    let target = fixture.target();

    let report = EpisodeCurator::new(Mp4BoxProbe::default())
        .curate(&fixture.store(), &target)
        .unwrap();

    assert!(report.is_success());
    assert_eq!(report.kept_count, 4);
    assert_eq!(report.dropped_count, 1);
    assert_eq!(report.corrupted, vec![2]);
    assert_eq!(report.files_migrated, 12);
    assert_eq!(report.logs_rewritten, 2);
    assert!(report.failures.is_empty());
    assert!(report.missing.is_empty());
    let pairs: Vec<_> = report.mapping.iter().collect();
    assert_eq!(pairs, vec![(0, 0), (1, 1), (3, 2), (4, 3)]);

    // metadata logs: exactly four lines, dense indices
    let episodes = read_lines(&target.join("meta/episodes.jsonl"));
    assert_eq!(episodes.len(), 4);
    assert_eq!(indices(&target.join("meta/episodes.jsonl")), vec![0, 1, 2, 3]);
    assert_eq!(episodes[2]["length"], frames_of(3));
    assert_eq!(episodes[2]["tasks"][0], "pick the cube");
    let stats = read_lines(&target.join("meta/episodes_stats.jsonl"));
    assert_eq!(indices(&target.join("meta/episodes_stats.jsonl")), vec![0, 1, 2, 3]);
    assert_eq!(stats[2]["stats"]["action"]["mean"][0], 3.0);

    // info.json
    let info = DatasetInfo::load(&target.join("meta/info.json")).unwrap();
    assert_eq!(info.total_episodes(), Some(4));
    assert_eq!(info.total_videos(), Some(8));
    assert_eq!(info.total_chunks(), Some(1));
    assert_eq!(info.total_frames(), Some(48));
    assert_eq!(report.total_frames, Some(48));
    assert_eq!(info.train_split(), Some("0:4"));
    assert_eq!(info.get("robot_type").unwrap(), "so100");

    // other metadata carried over
    assert!(target.join("meta/tasks.jsonl").is_file());

    // new episode 2 holds old episode 3's frames; nothing numbered past 3
    let new_two = target.join("data/chunk-000/episode-000002.parquet");
    assert_eq!(episode_index_column(&new_two), vec![2; frames_of(3) as usize]);
    let names: Vec<String> = all_files(&target)
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert!(!names.iter().any(|n| n.starts_with("episode-000004")));
    assert!(!names.iter().any(|n| n.ends_with(".partial")));
    assert_eq!(names.iter().filter(|n| n.ends_with(".mp4")).count(), 8);

    // the source is untouched
    assert_eq!(read_lines(&fixture.root().join("meta/episodes.jsonl")).len(), 5);
    assert!(fixture.data_path(2).is_file());
}

#[test]
fn test_survivor_moves_across_chunk_boundary() {
    let fixture = DatasetFixture::with_episodes(&["top"], 10, 13);
    fixture.corrupt(3, "top");
    let target = fixture.target();

    let report = EpisodeCurator::new(Mp4BoxProbe::default())
        .curate(&fixture.store(), &target)
        .unwrap();

    assert_eq!(report.mapping.get(10), Some(9));
    assert_eq!(report.mapping.get(12), Some(11));

    // old 10 lived in chunk 1; new 9 lives in chunk 0
    let moved = target.join("data/chunk-000/episode-000009.parquet");
    assert_eq!(episode_index_column(&moved), vec![9; frames_of(10) as usize]);
    assert!(target.join("videos/chunk-000/top/episode-000009.mp4").is_file());

    // old 11 and 12 stay in chunk 1 as new 10 and 11
    let ten = target.join("data/chunk-001/episode-000010.parquet");
    assert_eq!(episode_index_column(&ten), vec![10; frames_of(11) as usize]);
    let eleven = target.join("data/chunk-001/episode-000011.parquet");
    assert_eq!(episode_index_column(&eleven), vec![11; frames_of(12) as usize]);
    assert!(!target.join("data/chunk-001/episode-000012.parquet").exists());
    assert!(!target.join("videos/chunk-001/top/episode-000012.mp4").exists());

    let info = DatasetInfo::load(&target.join("meta/info.json")).unwrap();
    assert_eq!(info.total_episodes(), Some(12));
    assert_eq!(info.total_chunks(), Some(2));
}

#[test]
fn test_missing_artifacts_reported_not_fatal() {
    let fixture = DatasetFixture::with_episodes(&["top", "wrist"], 1000, 4);
    fs::remove_file(fixture.video_path("wrist", 1)).unwrap();
    fs::remove_file(fixture.data_path(3)).unwrap();
    let target = fixture.target();

    let report = EpisodeCurator::new(Mp4BoxProbe::default())
        .curate(&fixture.store(), &target)
        .unwrap();

    assert!(report.is_success());
    assert_eq!(report.kept_count, 4);
    let missing: Vec<_> = report.missing.iter().map(|i| (i.episode, i.artifact.as_str())).collect();
    assert_eq!(missing, vec![(Some(1), "video[wrist]"), (Some(3), "data")]);
    let partial: Vec<_> = report.inconsistencies.iter().map(|i| i.episode).collect();
    assert_eq!(partial, vec![Some(1), Some(3)]);
    assert_eq!(report.unmigrated().count(), 2);

    assert!(!target.join("data/chunk-000/episode-000003.parquet").exists());
    assert!(target.join("videos/chunk-000/top/episode-000003.mp4").is_file());

    // row counts where available, descriptor lengths otherwise
    let info = DatasetInfo::load(&target.join("meta/info.json")).unwrap();
    assert_eq!(info.total_frames(), Some(10 + 11 + 12 + 13));
    assert_eq!(info.total_videos(), Some(7));
}

#[test]
fn test_dry_run_writes_nothing() {
    let fixture = DatasetFixture::with_episodes(&["top"], 1000, 5);
    fixture.corrupt(4, "top");
    let target = fixture.target();

    let report = EpisodeCurator::new(Mp4BoxProbe::default())
        .dry_run(true)
        .curate(&fixture.store(), &target)
        .unwrap();

    assert!(report.dry_run);
    assert!(report.is_success());
    assert_eq!(report.corrupted, vec![4]);
    assert_eq!(report.planned.len(), 8);
    assert_eq!(report.files_migrated, 0);
    assert_eq!(report.logs_rewritten, 0);
    assert_eq!(report.total_frames, Some(10 + 11 + 12 + 13));
    assert!(!target.exists());
}

#[test]
fn test_keep_stale_frame_count() {
    let fixture = DatasetFixture::with_episodes(&["top"], 1000, 5);
    fixture.corrupt(2, "top");
    let target = fixture.target();
    let store = fixture.store_with(
        DatasetConfig::builder()
            .root(fixture.root())
            .frame_count_policy(FrameCountPolicy::KeepStale),
    );

    let report = EpisodeCurator::new(Mp4BoxProbe::default())
        .curate(&store, &target)
        .unwrap();

    let info = DatasetInfo::load(&target.join("meta/info.json")).unwrap();
    assert_eq!(info.total_episodes(), Some(4));
    assert_eq!(info.total_frames(), Some(60));
    assert_eq!(report.total_frames, None);
}

#[test]
fn test_keep_episode_index_column_copies_bytes() {
    let fixture = DatasetFixture::with_episodes(&["top"], 1000, 3);
    fixture.corrupt(0, "top");
    let target = fixture.target();
    let store = fixture.store_with(
        DatasetConfig::builder()
            .root(fixture.root())
            .keep_episode_index_column(true),
    );

    EpisodeCurator::new(Mp4BoxProbe::default())
        .curate(&store, &target)
        .unwrap();

    let copied = target.join("data/chunk-000/episode-000000.parquet");
    assert_eq!(fs::read(&copied).unwrap(), fs::read(fixture.data_path(1)).unwrap());
}

#[test]
fn test_closure_oracle_and_total_override() {
    let fixture = DatasetFixture::with_episodes(&["top"], 1000, 6);
    let target = fixture.target();
    let oracle = |path: &Path| path.ends_with("episode-000001.mp4");

    let report = EpisodeCurator::new(oracle)
        .total_episodes(4)
        .curate(&fixture.store(), &target)
        .unwrap();

    assert_eq!(report.total_episodes, 4);
    assert_eq!(report.kept_count, 3);
    assert_eq!(report.corrupted, vec![1]);
    assert_eq!(indices(&target.join("meta/episodes.jsonl")), vec![0, 1, 2]);
    assert!(!target.join("data/chunk-000/episode-000003.parquet").exists());
}

#[test]
fn test_failed_clip_copy_not_counted_in_info() {
    let fixture = DatasetFixture::with_episodes(&["top", "wrist"], 1000, 3);
    let vanishing = fixture.video_path("wrist", 1);
    let target = fixture.target();
    // clip disappears after the layout scan, so its copy fails
    let oracle = move |path: &Path| {
        if path == vanishing {
            let _ = fs::remove_file(path);
        }
        false
    };

    let report = EpisodeCurator::new(oracle)
        .curate(&fixture.store(), &target)
        .unwrap();

    assert!(report.is_success());
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].artifact, "video[wrist]");
    assert_eq!(report.files_migrated, 8);
    assert_eq!(report.videos_migrated, 5);
    let info = DatasetInfo::load(&target.join("meta/info.json")).unwrap();
    assert_eq!(info.total_videos(), Some(5));
}

#[test]
fn test_malformed_log_line_reported_and_skipped() {
    let fixture = DatasetFixture::with_episodes(&["top"], 1000, 3);
    let log = fixture.root().join("meta/episodes.jsonl");
    let mut text = fs::read_to_string(&log).unwrap();
    text.push_str("{\"episode_index\": 2, \"length\"\n");
    fs::write(&log, text).unwrap();
    let target = fixture.target();

    let report = EpisodeCurator::new(Mp4BoxProbe::default())
        .curate(&fixture.store(), &target)
        .unwrap();

    assert!(report.is_success());
    assert!(report
        .inconsistencies
        .iter()
        .any(|i| i.kind == IssueKind::Inconsistent && i.detail.starts_with("line 4")));
    assert_eq!(read_lines(&target.join("meta/episodes.jsonl")).len(), 3);
}

#[test]
fn test_every_episode_corrupted_is_an_error() {
    let fixture = DatasetFixture::with_episodes(&["top"], 1000, 3);
    for episode in 0..3 {
        fixture.corrupt(episode, "top");
    }

    let err = EpisodeCurator::new(Mp4BoxProbe::default())
        .curate(&fixture.store(), &fixture.target())
        .unwrap_err();

    assert!(matches!(err, Error::NoGoodEpisodes { total: 3 }));
    assert!(!fixture.target().exists());
}

#[test]
fn test_non_empty_target_refused() {
    let fixture = DatasetFixture::with_episodes(&["top"], 1000, 2);
    let target = fixture.target();
    fs::create_dir_all(&target).unwrap();
    fs::write(target.join("leftover"), b"x").unwrap();

    let err = EpisodeCurator::new(Mp4BoxProbe::default())
        .curate(&fixture.store(), &target)
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));

    let err = EpisodeCurator::new(Mp4BoxProbe::default())
        .curate(&fixture.store(), &fixture.root())
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
}

#[test]
fn test_missing_info_falls_back_to_scanned_episodes() {
    let fixture = DatasetFixture::new(&["top"], 1000);
    for episode in 0..3 {
        fixture.add_episode(episode);
    }
    fixture.corrupt(1, "top");
    let target = fixture.target();

    let report = EpisodeCurator::new(Mp4BoxProbe::default())
        .curate(&fixture.store(), &target)
        .unwrap();

    assert_eq!(report.total_episodes, 3);
    assert_eq!(report.kept_count, 2);
    let info = DatasetInfo::load(&target.join("meta/info.json")).unwrap();
    assert_eq!(info.total_episodes(), Some(2));
    assert_eq!(info.total_frames(), Some(10 + 12));
}
