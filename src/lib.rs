//! # episode-db: Curation and Statistics for Chunked Episode Datasets
//!
//! **Version**: 0.1.0
//!
//! episode-db maintains datasets of recorded robot demonstrations laid out as
//! fixed-capacity chunks of per-episode Parquet data, per-camera MP4 clips,
//! and newline-delimited JSON metadata logs. It provides two operations with
//! real invariants:
//!
//! - **Curation** ([`curation`]): drop episodes with corrupted clips and
//!   renumber the survivors densely, keeping data files, clips, metadata logs
//!   and `info.json` in agreement.
//! - **Statistics aggregation** ([`stats`]): merge per-episode feature
//!   statistics into a dataset-level normalization table with Chan's
//!   parallel-variance identity.
//!
//! ## Design Principles (Toyota Way Aligned)
//!
//! - **Jidoka**: the index mapping is fixed before any file moves
//! - **Poka-Yoke safety**: every write goes to a temporary and is renamed into place
//! - **Genchi Genbutsu**: every skipped artifact or feature is reported, never hidden
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use episode_db::config::DatasetConfig;
//! use episode_db::curation::EpisodeCurator;
//! use episode_db::oracle::Mp4BoxProbe;
//! use episode_db::storage::ChunkedEpisodeStore;
//!
//! let config = DatasetConfig::builder().repo_id("lab/pick-place").build()?;
//! let store = ChunkedEpisodeStore::open(config)?;
//!
//! let report = EpisodeCurator::new(Mp4BoxProbe::default())
//!     .curate(&store, "/data/pick-place-clean".as_ref())?;
//! println!("kept {}, dropped {}", report.kept_count, report.dropped_count);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod config;
pub mod curation;
pub mod error;
pub mod logging;
pub mod oracle;
pub mod stats;
pub mod storage;

pub use error::{Error, Result};
