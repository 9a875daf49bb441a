//! Structured outcomes of curation and deletion
//!
//! Per-artifact problems never abort a batch. They are collected here so the
//! caller can audit exactly what could not be migrated or removed.

use super::EpisodeIndexMapping;
use crate::storage::jsonl::MalformedLine;
use crate::storage::ArtifactKind;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;

/// Category of a per-artifact problem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    /// Expected artifact is absent
    Missing,
    /// Partial artifacts or a malformed metadata line
    Inconsistent,
    /// Copy/write/rename/delete failed
    IoFailure,
}

/// One problem with one artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactIssue {
    /// Category
    pub kind: IssueKind,
    /// Episode (source index), when attributable
    pub episode: Option<u64>,
    /// `data`, `video[<camera>]` or `meta`
    pub artifact: String,
    /// File involved
    pub path: PathBuf,
    /// Human-readable detail
    pub detail: String,
}

impl ArtifactIssue {
    /// Expected artifact absent
    pub fn missing(episode: u64, artifact: impl ToString, path: impl Into<PathBuf>) -> Self {
        Self {
            kind: IssueKind::Missing,
            episode: Some(episode),
            artifact: artifact.to_string(),
            path: path.into(),
            detail: "not found".to_string(),
        }
    }

    /// IO failure on one artifact
    pub fn io_failure(
        episode: Option<u64>,
        artifact: impl ToString,
        path: impl Into<PathBuf>,
        error: &crate::Error,
    ) -> Self {
        Self {
            kind: IssueKind::IoFailure,
            episode,
            artifact: artifact.to_string(),
            path: path.into(),
            detail: error.to_string(),
        }
    }

    /// Inconsistency attributable to one artifact
    pub fn inconsistent(
        episode: Option<u64>,
        artifact: impl ToString,
        path: impl Into<PathBuf>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            kind: IssueKind::Inconsistent,
            episode,
            artifact: artifact.to_string(),
            path: path.into(),
            detail: detail.into(),
        }
    }
}

impl From<MalformedLine> for ArtifactIssue {
    fn from(line: MalformedLine) -> Self {
        Self {
            kind: IssueKind::Inconsistent,
            episode: None,
            artifact: "meta".to_string(),
            detail: format!("line {}: {}", line.line_number, line.detail),
            path: line.path,
        }
    }
}

/// One artifact copy, planned or performed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedCopy {
    /// Index in the source dataset
    pub old_episode: u64,
    /// Index in the curated dataset
    pub new_episode: u64,
    /// Data file or which camera's clip
    pub kind: ArtifactKind,
    /// Source file
    pub src: PathBuf,
    /// Destination file
    pub dst: PathBuf,
}

/// Outcome of [`super::EpisodeCurator::curate`]
#[derive(Debug, Clone, Serialize)]
pub struct CurationReport {
    /// Dataset curated from
    pub source_root: PathBuf,
    /// Dataset written to
    pub target_root: PathBuf,
    /// Nothing was written
    pub dry_run: bool,
    /// Episodes considered (`0..total_episodes`)
    pub total_episodes: u64,
    /// Surviving episodes
    pub kept_count: usize,
    /// Dropped episodes
    pub dropped_count: usize,
    /// Source indices with at least one corrupted clip, ascending
    pub corrupted: Vec<u64>,
    /// Old → new index mapping
    pub mapping: EpisodeIndexMapping,
    /// Cameras migrated
    pub cameras: Vec<String>,
    /// Every artifact copy planned for the surviving episodes
    pub planned: Vec<PlannedCopy>,
    /// Artifact files successfully written
    pub files_migrated: usize,
    /// Video clips among `files_migrated`
    pub videos_migrated: usize,
    /// Metadata logs successfully rebuilt
    pub logs_rewritten: usize,
    /// Expected artifacts that did not exist
    pub missing: Vec<ArtifactIssue>,
    /// Partial artifacts and malformed metadata
    pub inconsistencies: Vec<ArtifactIssue>,
    /// Artifacts that could not be written
    pub failures: Vec<ArtifactIssue>,
    /// `total_frames` written to `info.json`, when recomputed
    pub total_frames: Option<u64>,
    /// Run start
    pub started_at: DateTime<Utc>,
    /// Run end
    pub finished_at: DateTime<Utc>,
}

impl CurationReport {
    /// Whether the curated dataset can be trusted
    ///
    /// A real run needs at least one migrated file and at least one rebuilt
    /// metadata log. A dry run needs a non-empty plan.
    #[must_use]
    pub fn is_success(&self) -> bool {
        if self.dry_run {
            !self.planned.is_empty()
        } else {
            self.files_migrated > 0 && self.logs_rewritten > 0
        }
    }

    /// Every artifact that could not be migrated, for whatever reason
    pub fn unmigrated(&self) -> impl Iterator<Item = &ArtifactIssue> {
        self.missing.iter().chain(&self.failures)
    }
}

/// Outcome of [`super::delete_episode`]
#[derive(Debug, Clone, Serialize)]
pub struct DeletionReport {
    /// Dataset root
    pub root: PathBuf,
    /// Episode targeted
    pub episode: u64,
    /// Nothing was removed
    pub dry_run: bool,
    /// Artifact files that existed
    pub found: Vec<PathBuf>,
    /// Artifact files removed
    pub deleted: Vec<PathBuf>,
    /// Expected artifact files that were absent
    pub missing: Vec<ArtifactIssue>,
    /// Files or logs that could not be updated
    pub failures: Vec<ArtifactIssue>,
    /// Logs that contained (and lost, unless dry run) the episode
    pub logs_updated: Vec<PathBuf>,
    /// Malformed log lines encountered
    pub malformed: Vec<ArtifactIssue>,
}

impl DeletionReport {
    /// Artifact files that existed for the episode
    #[must_use]
    pub fn artifacts_found(&self) -> usize {
        self.found.len()
    }

    /// At least one file removed and at least one log entry removed
    ///
    /// A dry run succeeds when there is something to delete.
    #[must_use]
    pub fn is_success(&self) -> bool {
        if self.dry_run {
            !self.found.is_empty()
        } else {
            !self.deleted.is_empty() && !self.logs_updated.is_empty()
        }
    }
}
