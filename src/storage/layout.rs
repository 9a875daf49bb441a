//! On-disk layout convention
//!
//! ```text
//! <root>/data/chunk-###/<prefix>######.parquet
//! <root>/videos/chunk-###/<camera>/<prefix>######.mp4
//! <root>/meta/{info.json, episodes.jsonl, episodes_stats.jsonl}
//! ```
//!
//! Every name is produced and parsed here, so the chunk/episode ↔ path
//! relationship is invertible instead of being re-derived by string slicing
//! at each call site.

use std::path::{Path, PathBuf};

/// Tabular data directory
pub const DATA_DIR: &str = "data";
/// Video directory
pub const VIDEOS_DIR: &str = "videos";
/// Metadata directory
pub const META_DIR: &str = "meta";
/// Tabular data file extension
pub const DATA_EXT: &str = "parquet";
/// Video clip extension
pub const VIDEO_EXT: &str = "mp4";
/// Episode descriptor log
pub const EPISODES_LOG: &str = "episodes.jsonl";
/// Per-episode statistics log
pub const EPISODES_STATS_LOG: &str = "episodes_stats.jsonl";
/// Dataset summary metadata
pub const INFO_FILE: &str = "info.json";

const CHUNK_PREFIX: &str = "chunk-";
/// Episode file prefix used when nothing on disk says otherwise
pub const DEFAULT_EPISODE_PREFIX: &str = "episode-";
/// Episode file prefix used by existing recordings
pub const UNDERSCORE_EPISODE_PREFIX: &str = "episode_";

/// Chunk/episode naming for one dataset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpisodeLayout {
    capacity: u64,
    prefix: &'static str,
}

impl EpisodeLayout {
    /// Layout with the default `episode-` prefix
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero
    #[must_use]
    pub fn new(capacity: u64) -> Self {
        assert!(capacity > 0, "chunk capacity must be positive");
        Self {
            capacity,
            prefix: DEFAULT_EPISODE_PREFIX,
        }
    }

    /// Layout using the `episode_` prefix
    #[must_use]
    pub fn underscored(capacity: u64) -> Self {
        Self {
            prefix: UNDERSCORE_EPISODE_PREFIX,
            ..Self::new(capacity)
        }
    }

    /// Pick the prefix actually used under `root`
    ///
    /// Looks at the first episode-like file in `data/` (then `videos/`).
    /// Falls back to the default prefix for empty or new datasets.
    #[must_use]
    pub fn detect(root: &Path, capacity: u64) -> Self {
        let underscored = Self::first_episode_name(root)
            .is_some_and(|name| name.starts_with(UNDERSCORE_EPISODE_PREFIX));
        if underscored {
            Self::underscored(capacity)
        } else {
            Self::new(capacity)
        }
    }

    fn first_episode_name(root: &Path) -> Option<String> {
        let chunk_dirs = |dir: PathBuf| -> Vec<PathBuf> {
            std::fs::read_dir(dir)
                .into_iter()
                .flatten()
                .flatten()
                .map(|entry| entry.path())
                .filter(|path| {
                    path.is_dir()
                        && path
                            .file_name()
                            .and_then(|n| n.to_str())
                            .and_then(Self::parse_chunk_dir)
                            .is_some()
                })
                .collect()
        };
        let names_in = |dir: &Path| -> Option<String> {
            std::fs::read_dir(dir)
                .ok()?
                .flatten()
                .filter_map(|entry| entry.file_name().into_string().ok())
                .find(|name| {
                    name.starts_with(DEFAULT_EPISODE_PREFIX)
                        || name.starts_with(UNDERSCORE_EPISODE_PREFIX)
                })
        };

        for chunk in chunk_dirs(root.join(DATA_DIR)) {
            if let Some(name) = names_in(&chunk) {
                return Some(name);
            }
        }
        for chunk in chunk_dirs(root.join(VIDEOS_DIR)) {
            let cameras = std::fs::read_dir(&chunk).into_iter().flatten().flatten();
            for camera in cameras {
                if let Some(name) = names_in(&camera.path()) {
                    return Some(name);
                }
            }
        }
        None
    }

    /// Episodes per chunk
    #[must_use]
    pub const fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Episode file prefix
    #[must_use]
    pub const fn prefix(&self) -> &'static str {
        self.prefix
    }

    /// Chunk holding `episode` (a pure function of its current index)
    #[must_use]
    pub const fn chunk_of(&self, episode: u64) -> u64 {
        episode / self.capacity
    }

    /// Number of chunks needed for `episodes` dense episodes
    #[must_use]
    pub const fn chunks_for(&self, episodes: u64) -> u64 {
        episodes.div_ceil(self.capacity)
    }

    /// `chunk-###`
    #[must_use]
    pub fn chunk_dir_name(chunk: u64) -> String {
        format!("{CHUNK_PREFIX}{chunk:03}")
    }

    /// Inverse of [`Self::chunk_dir_name`]
    #[must_use]
    pub fn parse_chunk_dir(name: &str) -> Option<u64> {
        let digits = name.strip_prefix(CHUNK_PREFIX)?;
        parse_padded(digits, 3)
    }

    /// `<prefix>######.<ext>`
    #[must_use]
    pub fn episode_file_name(&self, episode: u64, ext: &str) -> String {
        format!("{}{episode:06}.{ext}", self.prefix)
    }

    /// Inverse of [`Self::episode_file_name`]
    ///
    /// In-flight `.partial` files never parse.
    #[must_use]
    pub fn parse_episode_file(&self, name: &str, ext: &str) -> Option<u64> {
        let stem = name.strip_prefix(self.prefix)?.strip_suffix(ext)?.strip_suffix('.')?;
        parse_padded(stem, 6)
    }

    /// `<root>/data/chunk-###/<prefix>######.parquet`
    #[must_use]
    pub fn data_path(&self, root: &Path, episode: u64) -> PathBuf {
        root.join(DATA_DIR)
            .join(Self::chunk_dir_name(self.chunk_of(episode)))
            .join(self.episode_file_name(episode, DATA_EXT))
    }

    /// `<root>/videos/chunk-###/<camera>/<prefix>######.mp4`
    #[must_use]
    pub fn video_path(&self, root: &Path, camera: &str, episode: u64) -> PathBuf {
        self.video_chunk_dir(root, self.chunk_of(episode))
            .join(camera)
            .join(self.episode_file_name(episode, VIDEO_EXT))
    }

    /// `<root>/data/chunk-###`
    #[must_use]
    pub fn data_chunk_dir(&self, root: &Path, chunk: u64) -> PathBuf {
        root.join(DATA_DIR).join(Self::chunk_dir_name(chunk))
    }

    /// `<root>/videos/chunk-###`
    #[must_use]
    pub fn video_chunk_dir(&self, root: &Path, chunk: u64) -> PathBuf {
        root.join(VIDEOS_DIR).join(Self::chunk_dir_name(chunk))
    }
}

fn parse_padded(digits: &str, min_width: usize) -> Option<u64> {
    if digits.len() < min_width || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}
