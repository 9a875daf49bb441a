//! Single-episode deletion

use super::report::{ArtifactIssue, DeletionReport};
use crate::storage::jsonl;
use crate::storage::ChunkedEpisodeStore;
use crate::Result;
use std::fs;
use tracing::{debug, info, warn};

/// Remove every artifact and log record belonging to `episode`
///
/// Other episodes keep their indices: deletion leaves a gap, and
/// `info.json` is not touched. Running it twice is safe; the second run
/// finds nothing and reports zero deletions.
///
/// In a dry run nothing is removed and `logs_updated` lists the logs that
/// currently hold a record for the episode.
///
/// # Errors
///
/// Returns error only if the video layout cannot be listed. Per-file and
/// per-log problems are collected in the report.
pub fn delete_episode(store: &ChunkedEpisodeStore, episode: u64, dry_run: bool) -> Result<DeletionReport> {
    let location = store.locate(episode)?;
    let mut report = DeletionReport {
        root: store.root().to_path_buf(),
        episode,
        dry_run,
        found: location.present().map(|a| a.path.clone()).collect(),
        deleted: Vec::new(),
        missing: location
            .missing()
            .map(|a| ArtifactIssue::missing(episode, &a.kind, &a.path))
            .collect(),
        failures: Vec::new(),
        logs_updated: Vec::new(),
        malformed: Vec::new(),
    };

    if report.found.is_empty() {
        warn!(episode, chunk = location.chunk, "no files found for episode");
        return Ok(report);
    }
    info!(episode, files = report.found.len(), dry_run, "deleting episode");

    if dry_run {
        for log in store.metadata_logs() {
            match jsonl::read_log(&log) {
                Ok(contents) => {
                    report.malformed.extend(contents.malformed.into_iter().map(ArtifactIssue::from));
                    let is_target = jsonl::is_episode(episode);
                    if contents.records.iter().any(|r| is_target(&r.value)) {
                        report.logs_updated.push(log);
                    }
                }
                Err(e) => record_log_error(&mut report, &log, &e),
            }
        }
        return Ok(report);
    }

    for artifact in location.present() {
        match fs::remove_file(&artifact.path) {
            Ok(()) => {
                debug!(path = %artifact.path.display(), "removed {}", artifact.kind);
                report.deleted.push(artifact.path.clone());
            }
            Err(e) => {
                warn!(path = %artifact.path.display(), error = %e, "cannot remove {}", artifact.kind);
                report
                    .failures
                    .push(ArtifactIssue::io_failure(Some(episode), &artifact.kind, &artifact.path, &e.into()));
            }
        }
    }

    for log in store.metadata_logs() {
        match jsonl::remove_records_from_log(&log, jsonl::is_episode(episode)) {
            Ok(edit) => {
                report.malformed.extend(edit.malformed.into_iter().map(ArtifactIssue::from));
                if edit.removed > 0 {
                    info!(path = %log.display(), removed = edit.removed, "removed log records");
                    report.logs_updated.push(log);
                } else {
                    debug!(path = %log.display(), "no record for episode");
                }
            }
            Err(e) => record_log_error(&mut report, &log, &e),
        }
    }

    info!(
        episode,
        deleted = report.deleted.len(),
        logs = report.logs_updated.len(),
        failures = report.failures.len(),
        "episode deletion finished"
    );
    Ok(report)
}

fn record_log_error(report: &mut DeletionReport, log: &std::path::Path, error: &crate::Error) {
    if error.is_not_found() {
        warn!(path = %log.display(), "metadata log missing");
        report.missing.push(ArtifactIssue::missing(report.episode, "meta", log));
    } else {
        warn!(path = %log.display(), error = %error, "cannot update metadata log");
        report
            .failures
            .push(ArtifactIssue::io_failure(Some(report.episode), "meta", log, error));
    }
}
