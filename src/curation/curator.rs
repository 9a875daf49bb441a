//! Corruption-driven curation with dense renumbering

use super::report::{ArtifactIssue, CurationReport, IssueKind, PlannedCopy};
use super::EpisodeIndexMapping;
use crate::config::FrameCountPolicy;
use crate::oracle::CorruptionOracle;
use crate::stats::STATS_KEY;
use crate::storage::atomic::copy_atomic;
use crate::storage::jsonl::{self, EPISODE_INDEX_KEY};
use crate::storage::layout::{EPISODES_LOG, EPISODES_STATS_LOG, INFO_FILE};
use crate::storage::tabular::{self, migrate_data_file};
use crate::storage::{ArtifactKind, ChunkedEpisodeStore, DatasetInfo, VideoFile};
use crate::{Error, Result};
use chrono::Utc;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[cfg(feature = "rayon")]
use rayon::prelude::*;

/// Field in `episodes.jsonl` holding an episode's frame count
const LENGTH_KEY: &str = "length";

/// Copies surviving episodes into a fresh dataset under dense new indices
///
/// The run is best-effort per artifact: a file that cannot be copied is
/// reported and the batch continues. Only dataset-level problems (missing
/// source, nothing survives) are errors.
///
/// ```rust,no_run
/// use episode_db::config::DatasetConfig;
/// use episode_db::curation::EpisodeCurator;
/// use episode_db::oracle::Mp4BoxProbe;
/// use episode_db::storage::ChunkedEpisodeStore;
///
/// let source = ChunkedEpisodeStore::open(DatasetConfig::at("datasets/raw"))?;
/// let report = EpisodeCurator::new(Mp4BoxProbe::default())
///     .curate(&source, "datasets/clean".as_ref())?;
/// println!("kept {} dropped {}", report.kept_count, report.dropped_count);
/// # Ok::<(), episode_db::Error>(())
/// ```
pub struct EpisodeCurator<O> {
    oracle: O,
    total_episodes: Option<u64>,
    cameras: Option<Vec<String>>,
    dry_run: bool,
}

/// Result of one artifact copy
struct CopyOutcome {
    index: usize,
    result: Result<Option<u64>>,
}

/// A metadata log remapped onto new indices
struct RemappedLog {
    records: Vec<Value>,
    issues: Vec<ArtifactIssue>,
    lengths: BTreeMap<u64, u64>,
}

impl<O: CorruptionOracle> EpisodeCurator<O> {
    /// Curator asking `oracle` about every clip
    pub const fn new(oracle: O) -> Self {
        Self {
            oracle,
            total_episodes: None,
            cameras: None,
            dry_run: false,
        }
    }

    /// Consider episodes `0..total` instead of `info.json`'s count
    #[must_use]
    pub const fn total_episodes(mut self, total: u64) -> Self {
        self.total_episodes = Some(total);
        self
    }

    /// Migrate exactly these cameras instead of those found on disk
    #[must_use]
    pub fn cameras(mut self, cameras: Vec<String>) -> Self {
        self.cameras = Some(cameras);
        self
    }

    /// Report what would happen without writing anything
    #[must_use]
    pub const fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Source indices with at least one corrupted clip
    ///
    /// Probes run in parallel with the `rayon` feature.
    #[must_use]
    pub fn find_corrupted(&self, videos: &[VideoFile]) -> BTreeSet<u64> {
        let is_bad = |video: &&VideoFile| {
            let bad = self.oracle.is_corrupted(&video.path);
            if bad {
                warn!(episode = video.episode, path = %video.path.display(), "corrupted clip");
            }
            bad
        };

        #[cfg(feature = "rayon")]
        let corrupted = videos.par_iter().filter(is_bad).map(|v| v.episode).collect();
        #[cfg(not(feature = "rayon"))]
        let corrupted = videos.iter().filter(is_bad).map(|v| v.episode).collect();

        corrupted
    }

    /// Curate `source` into a new dataset at `target_root`
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidInput`] if the target is the source or is a
    ///   non-empty directory
    /// - [`Error::NotFound`] if the episode count cannot be determined
    /// - [`Error::NoGoodEpisodes`] if every episode is rejected
    /// - IO errors while enumerating the source layout
    pub fn curate(&self, source: &ChunkedEpisodeStore, target_root: &Path) -> Result<CurationReport> {
        let started_at = Utc::now();
        check_target(source.root(), target_root)?;

        let data_files = source.scan_data_files()?;
        let videos = source.scan_video_files()?;
        let total = self.resolve_total(source, &data_files, &videos)?;

        info!(
            root = %source.root().display(),
            total,
            clips = videos.len(),
            "checking clips for corruption"
        );
        let corrupted: Vec<u64> = self
            .find_corrupted(&videos)
            .into_iter()
            .filter(|&episode| episode < total)
            .collect();

        let corrupted_set: BTreeSet<u64> = corrupted.iter().copied().collect();
        let mapping =
            EpisodeIndexMapping::from_survivors((0..total).filter(|e| !corrupted_set.contains(e)));
        if mapping.is_empty() {
            return Err(Error::NoGoodEpisodes { total });
        }
        info!(
            kept = mapping.len(),
            dropped = corrupted.len(),
            "computed episode mapping"
        );

        let cameras = match &self.cameras {
            Some(cameras) => cameras.clone(),
            None => source.discover_cameras()?,
        };

        let mut report = CurationReport {
            source_root: source.root().to_path_buf(),
            target_root: target_root.to_path_buf(),
            dry_run: self.dry_run,
            total_episodes: total,
            kept_count: mapping.len(),
            dropped_count: corrupted.len(),
            corrupted,
            mapping,
            cameras,
            planned: Vec::new(),
            files_migrated: 0,
            videos_migrated: 0,
            logs_rewritten: 0,
            missing: Vec::new(),
            inconsistencies: Vec::new(),
            failures: Vec::new(),
            total_frames: None,
            started_at,
            finished_at: started_at,
        };

        plan_copies(source, target_root, &data_files, &videos, &mut report);

        let rows: BTreeMap<u64, Option<u64>> = if self.dry_run {
            report
                .planned
                .iter()
                .filter(|copy| copy.kind == ArtifactKind::Data)
                .map(|copy| (copy.new_episode, tabular::row_count(&copy.src).ok()))
                .collect()
        } else {
            let target_config = source.config().with_root(target_root);
            ChunkedEpisodeStore::create(target_config, source.layout().clone())?;
            execute_copies(source, &mut report)
        };

        self.migrate_metadata(source, target_root, &rows, &mut report);

        report.finished_at = Utc::now();
        info!(
            kept = report.kept_count,
            dropped = report.dropped_count,
            migrated = report.files_migrated,
            logs = report.logs_rewritten,
            missing = report.missing.len(),
            failures = report.failures.len(),
            dry_run = report.dry_run,
            "curation finished"
        );
        Ok(report)
    }

    fn resolve_total(
        &self,
        source: &ChunkedEpisodeStore,
        data_files: &BTreeMap<u64, PathBuf>,
        videos: &[VideoFile],
    ) -> Result<u64> {
        if let Some(total) = self.total_episodes {
            return Ok(total);
        }
        if let Some(total) = source.info().and_then(DatasetInfo::total_episodes) {
            return Ok(total);
        }

        let highest = data_files
            .keys()
            .copied()
            .chain(videos.iter().map(|v| v.episode))
            .max()
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "episode count for {}: no info.json and no episode files",
                    source.root().display()
                ))
            })?;
        warn!(
            total = highest + 1,
            "info.json has no total_episodes, using highest episode file found"
        );
        Ok(highest + 1)
    }

    fn migrate_metadata(
        &self,
        source: &ChunkedEpisodeStore,
        target_root: &Path,
        rows: &BTreeMap<u64, Option<u64>>,
        report: &mut CurationReport,
    ) {
        let target_meta = target_root.join(crate::storage::layout::META_DIR);
        let mut lengths = BTreeMap::new();

        for (src, name) in [
            (source.episodes_log(), EPISODES_LOG),
            (source.episodes_stats_log(), EPISODES_STATS_LOG),
        ] {
            let rewrite = source.config().rewrite_episode_index_column();
            let remapped = match remap_log(&src, &report.mapping, rewrite) {
                Ok(remapped) => remapped,
                Err(e) if e.is_not_found() => {
                    warn!(path = %src.display(), "metadata log missing");
                    report.missing.push(meta_issue(IssueKind::Missing, &src, "not found"));
                    continue;
                }
                Err(e) => {
                    warn!(path = %src.display(), error = %e, "cannot read metadata log");
                    report.failures.push(ArtifactIssue::io_failure(None, "meta", &src, &e));
                    continue;
                }
            };
            report.inconsistencies.extend(remapped.issues);
            if name == EPISODES_LOG {
                lengths = remapped.lengths;
            }
            if self.dry_run {
                continue;
            }

            let dst = target_meta.join(name);
            match jsonl::write_log(&dst, &remapped.records) {
                Ok(()) => {
                    info!(path = %dst.display(), records = remapped.records.len(), "rebuilt metadata log");
                    report.logs_rewritten += 1;
                }
                Err(e) => {
                    warn!(path = %dst.display(), error = %e, "cannot write metadata log");
                    report.failures.push(ArtifactIssue::io_failure(None, "meta", &dst, &e));
                }
            }
        }

        if !self.dry_run {
            copy_other_metadata(&source.meta_dir(), &target_meta, report);
        }
        self.update_info(source, &target_meta, rows, &lengths, report);
    }

    fn update_info(
        &self,
        source: &ChunkedEpisodeStore,
        target_meta: &Path,
        rows: &BTreeMap<u64, Option<u64>>,
        lengths: &BTreeMap<u64, u64>,
        report: &mut CurationReport,
    ) {
        let mut info = source.info().cloned().unwrap_or_else(|| {
            report
                .missing
                .push(meta_issue(IssueKind::Missing, &source.info_path(), "not found, writing a fresh one"));
            DatasetInfo::default()
        });

        let kept = report.kept_count as u64;
        info.set_total_episodes(kept);
        info.set_total_chunks(source.layout().chunks_for(kept));
        info.set_train_split(kept);
        let videos = if self.dry_run {
            report
                .planned
                .iter()
                .filter(|copy| copy.kind != ArtifactKind::Data)
                .count()
        } else {
            report.videos_migrated
        };
        info.set_total_videos(videos as u64);

        if source.config().frame_count_policy() == FrameCountPolicy::Recompute {
            match recount_frames(&report.mapping, rows, lengths) {
                Ok(frames) => {
                    info.set_total_frames(frames);
                    report.total_frames = Some(frames);
                }
                Err(unknown) => {
                    warn!(episodes = ?unknown, "frame count unknown for some episodes, leaving total_frames stale");
                    report.inconsistencies.push(meta_issue(
                        IssueKind::Inconsistent,
                        &source.info_path(),
                        &format!("total_frames left stale: no frame count for new episodes {unknown:?}"),
                    ));
                }
            }
        }

        if self.dry_run {
            return;
        }
        let dst = target_meta.join(INFO_FILE);
        if let Err(e) = info.save(&dst) {
            warn!(path = %dst.display(), error = %e, "cannot write dataset info");
            report.failures.push(ArtifactIssue::io_failure(None, "meta", &dst, &e));
        }
    }
}

fn check_target(source_root: &Path, target_root: &Path) -> Result<()> {
    let same = match (source_root.canonicalize(), target_root.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => source_root == target_root,
    };
    if same {
        return Err(Error::InvalidInput(format!(
            "curation target {} is the source dataset",
            target_root.display()
        )));
    }
    if let Ok(mut entries) = fs::read_dir(target_root) {
        if entries.next().is_some() {
            return Err(Error::InvalidInput(format!(
                "curation target {} is not empty",
                target_root.display()
            )));
        }
    }
    Ok(())
}

/// Fill `report.planned` and `report.missing` for every surviving episode
fn plan_copies(
    source: &ChunkedEpisodeStore,
    target_root: &Path,
    data_files: &BTreeMap<u64, PathBuf>,
    videos: &[VideoFile],
    report: &mut CurationReport,
) {
    let layout = source.layout();
    let clips: BTreeMap<(u64, &str), &Path> = videos
        .iter()
        .map(|v| ((v.episode, v.camera.as_str()), v.path.as_path()))
        .collect();

    for (old, new) in report.mapping.iter() {
        let mut wanted = vec![(
            ArtifactKind::Data,
            data_files.get(&old).map(PathBuf::as_path),
            layout.data_path(source.root(), old),
            layout.data_path(target_root, new),
        )];
        for camera in &report.cameras {
            wanted.push((
                ArtifactKind::Video {
                    camera: camera.clone(),
                },
                clips.get(&(old, camera.as_str())).copied(),
                layout.video_path(source.root(), camera, old),
                layout.video_path(target_root, camera, new),
            ));
        }

        let expected = wanted.len();
        let mut found = 0;
        for (kind, src, expected_src, dst) in wanted {
            if let Some(src) = src {
                found += 1;
                report.planned.push(PlannedCopy {
                    old_episode: old,
                    new_episode: new,
                    kind,
                    src: src.to_path_buf(),
                    dst,
                });
            } else {
                debug!(episode = old, artifact = %kind, "artifact missing");
                report.missing.push(ArtifactIssue::missing(old, &kind, expected_src));
            }
        }

        if found == 0 {
            warn!(episode = old, "surviving episode has no artifacts at all");
        } else if found < expected {
            warn!(episode = old, found, expected, "surviving episode is only partially present");
            report.inconsistencies.push(ArtifactIssue::inconsistent(
                Some(old),
                "episode",
                layout.data_path(source.root(), old),
                format!("{found} of {expected} artifacts present"),
            ));
        }
    }
}

/// Run every planned copy; returns frame counts of migrated data files
fn execute_copies(source: &ChunkedEpisodeStore, report: &mut CurationReport) -> BTreeMap<u64, Option<u64>> {
    let rewrite = source.config().rewrite_episode_index_column();
    let copy_one = |(index, copy): (usize, &PlannedCopy)| {
        let result = match copy.kind {
            ArtifactKind::Data => {
                migrate_data_file(&copy.src, &copy.dst, copy.new_episode, rewrite).map(|m| m.rows)
            }
            ArtifactKind::Video { .. } => copy_atomic(&copy.src, &copy.dst).map(|_| None),
        };
        CopyOutcome { index, result }
    };

    #[cfg(feature = "rayon")]
    let outcomes: Vec<CopyOutcome> = report.planned.par_iter().enumerate().map(copy_one).collect();
    #[cfg(not(feature = "rayon"))]
    let outcomes: Vec<CopyOutcome> = report.planned.iter().enumerate().map(copy_one).collect();

    let mut rows = BTreeMap::new();
    for outcome in outcomes {
        let copy = &report.planned[outcome.index];
        match outcome.result {
            Ok(frames) => {
                info!(
                    src = %copy.src.display(),
                    dst = %copy.dst.display(),
                    "migrated {}", copy.kind
                );
                report.files_migrated += 1;
                if copy.kind == ArtifactKind::Data {
                    rows.insert(copy.new_episode, frames);
                } else {
                    report.videos_migrated += 1;
                }
            }
            Err(e) => {
                warn!(src = %copy.src.display(), error = %e, "failed to migrate {}", copy.kind);
                report.failures.push(ArtifactIssue::io_failure(
                    Some(copy.old_episode),
                    &copy.kind,
                    &copy.src,
                    &e,
                ));
            }
        }
    }
    rows
}

/// Keep surviving records, rewriting `episode_index` to the new index
///
/// With `rewrite_index_stats`, a record's `stats.episode_index` summary is
/// rewritten too so it agrees with the rewritten data column.
fn remap_log(path: &Path, mapping: &EpisodeIndexMapping, rewrite_index_stats: bool) -> Result<RemappedLog> {
    let contents = jsonl::read_log(path)?;
    let mut remapped = RemappedLog {
        records: Vec::new(),
        issues: contents.malformed.into_iter().map(ArtifactIssue::from).collect(),
        lengths: BTreeMap::new(),
    };
    let mut seen = BTreeSet::new();

    for record in contents.records {
        let mut value = record.value;
        let Some(old) = jsonl::episode_index(&value) else {
            remapped.issues.push(meta_issue(
                IssueKind::Inconsistent,
                path,
                &format!("line {}: record has no {EPISODE_INDEX_KEY}", record.line_number),
            ));
            continue;
        };
        let Some(new) = mapping.get(old) else {
            continue;
        };
        if !seen.insert(old) {
            remapped.issues.push(ArtifactIssue::inconsistent(
                Some(old),
                "meta",
                path,
                format!("line {}: duplicate record, keeping the first", record.line_number),
            ));
            continue;
        }
        if let Some(length) = value.get(LENGTH_KEY).and_then(Value::as_u64) {
            remapped.lengths.insert(new, length);
        }
        value[EPISODE_INDEX_KEY] = new.into();
        if rewrite_index_stats {
            rewrite_index_stat(&mut value, new);
        }
        remapped.records.push(value);
    }

    for old in mapping.survivors().filter(|old| !seen.contains(old)) {
        remapped.issues.push(ArtifactIssue::inconsistent(
            Some(old),
            "meta",
            path,
            "surviving episode has no record",
        ));
    }
    remapped.records.sort_by_key(|r| jsonl::episode_index(r).unwrap_or(u64::MAX));
    Ok(remapped)
}

/// Point min, max and mean of the `episode_index` feature at `new`
///
/// Std and count of a constant column need no change.
fn rewrite_index_stat(record: &mut Value, new: u64) {
    let Some(stat) = record
        .get_mut(STATS_KEY)
        .and_then(|stats| stats.get_mut(EPISODE_INDEX_KEY))
        .and_then(Value::as_object_mut)
    else {
        return;
    };
    for field in ["min", "max", "mean"] {
        if let Some(value) = stat.get_mut(field) {
            fill(value, new);
        }
    }
}

fn fill(value: &mut Value, new: u64) {
    match value {
        Value::Array(items) => items.iter_mut().for_each(|item| fill(item, new)),
        _ => *value = Value::from(new),
    }
}

/// Copy `meta/*.json*` other than the logs and `info.json` verbatim
fn copy_other_metadata(src_meta: &Path, dst_meta: &Path, report: &mut CurationReport) {
    let Ok(entries) = fs::read_dir(src_meta) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let handled = [EPISODES_LOG, EPISODES_STATS_LOG, INFO_FILE].contains(&name);
        if handled || !name.contains(".json") || !path.is_file() {
            continue;
        }
        if let Err(e) = copy_atomic(&path, &dst_meta.join(name)) {
            warn!(path = %path.display(), error = %e, "cannot copy metadata file");
            report.failures.push(ArtifactIssue::io_failure(None, "meta", &path, &e));
        }
    }
}

/// Sum of frames over new episodes, or the episodes whose count is unknown
fn recount_frames(
    mapping: &EpisodeIndexMapping,
    rows: &BTreeMap<u64, Option<u64>>,
    lengths: &BTreeMap<u64, u64>,
) -> std::result::Result<u64, Vec<u64>> {
    let mut total = 0;
    let mut unknown = Vec::new();
    for (_, new) in mapping.iter() {
        match rows.get(&new).copied().flatten().or_else(|| lengths.get(&new).copied()) {
            Some(frames) => total += frames,
            None => unknown.push(new),
        }
    }
    if unknown.is_empty() {
        Ok(total)
    } else {
        Err(unknown)
    }
}

fn meta_issue(kind: IssueKind, path: &Path, detail: &str) -> ArtifactIssue {
    ArtifactIssue {
        kind,
        episode: None,
        artifact: "meta".to_string(),
        path: path.to_path_buf(),
        detail: detail.to_string(),
    }
}
