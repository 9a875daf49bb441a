//! Dataset curation
//!
//! Two operations edit a dataset's episode set:
//!
//! - [`EpisodeCurator::curate`] drops every episode with a corrupted clip and
//!   writes the survivors into a *new* dataset, renumbered densely from zero
//!   in their original order. The source is never modified.
//! - [`delete_episode`] removes one episode in place, leaving a gap.
//!
//! Both are best-effort per artifact and return a report rather than failing
//! on the first bad file.
//!
//! # Toyota Way: Jidoka
//!
//! The renumbering is computed once, before any file is copied, and every
//! artifact and log record is moved through that single mapping. Data files,
//! clips and metadata can therefore never disagree about an episode's index.

mod curator;
mod delete;
mod mapping;
pub mod report;

pub use curator::EpisodeCurator;
pub use delete::delete_episode;
pub use mapping::EpisodeIndexMapping;
pub use report::{ArtifactIssue, CurationReport, DeletionReport, IssueKind, PlannedCopy};
