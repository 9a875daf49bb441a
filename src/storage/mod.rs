//! Chunked episode storage
//!
//! Read/write access to one dataset on disk. Episodes are bucketed into
//! fixed-capacity chunks by `episode_index / capacity`; each episode owns one
//! Parquet data file, one MP4 clip per camera, and one line in each of the
//! two metadata logs.
//!
//! This layer only locates and enumerates artifacts. Whether a missing
//! artifact is fatal is the caller's decision: lookups report absence instead
//! of failing.
//!
//! ```rust,no_run
//! use episode_db::config::DatasetConfig;
//! use episode_db::storage::ChunkedEpisodeStore;
//!
//! let store = ChunkedEpisodeStore::open(DatasetConfig::at("datasets/pick-place"))?;
//! let location = store.locate(1500)?;
//! println!("chunk {} data present: {}", location.chunk, location.data.exists);
//! # Ok::<(), episode_db::Error>(())
//! ```

pub mod atomic;
pub mod info;
pub mod jsonl;
pub mod layout;
pub mod tabular;

pub use info::DatasetInfo;
pub use layout::EpisodeLayout;

use crate::config::{DatasetConfig, DEFAULT_CHUNK_CAPACITY};
use crate::{Error, Result};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Which artifact of an episode a path refers to
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Parquet data file
    Data,
    /// Clip for one camera
    Video {
        /// Camera directory name
        camera: String,
    },
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Data => write!(f, "data"),
            Self::Video { camera } => write!(f, "video[{camera}]"),
        }
    }
}

/// Expected location of one artifact and whether it is on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Data or which camera
    pub kind: ArtifactKind,
    /// Path dictated by the layout
    pub path: PathBuf,
    /// Whether the file exists
    pub exists: bool,
}

impl Artifact {
    fn probe(kind: ArtifactKind, path: PathBuf) -> Self {
        let exists = path.is_file();
        Self { kind, path, exists }
    }
}

/// Every artifact belonging to one episode index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpisodeLocation {
    /// Episode index
    pub episode: u64,
    /// Chunk number implied by the index
    pub chunk: u64,
    /// Parquet data file
    pub data: Artifact,
    /// One clip per known camera
    pub videos: Vec<Artifact>,
}

impl EpisodeLocation {
    /// All artifacts, data first
    pub fn artifacts(&self) -> impl Iterator<Item = &Artifact> {
        std::iter::once(&self.data).chain(&self.videos)
    }

    /// Artifacts present on disk
    pub fn present(&self) -> impl Iterator<Item = &Artifact> {
        self.artifacts().filter(|a| a.exists)
    }

    /// Artifacts expected but absent
    pub fn missing(&self) -> impl Iterator<Item = &Artifact> {
        self.artifacts().filter(|a| !a.exists)
    }

    /// No artifact exists for this index
    #[must_use]
    pub fn is_absent(&self) -> bool {
        self.present().next().is_none()
    }
}

/// A video clip found by scanning the layout
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct VideoFile {
    /// Episode index parsed from the file name
    pub episode: u64,
    /// Camera directory name
    pub camera: String,
    /// Chunk directory the clip was found in
    pub chunk: u64,
    /// Full path
    pub path: PathBuf,
}

/// Read/write access to one dataset root
#[derive(Debug, Clone)]
pub struct ChunkedEpisodeStore {
    config: DatasetConfig,
    layout: EpisodeLayout,
    info: Option<DatasetInfo>,
}

impl ChunkedEpisodeStore {
    /// Open an existing dataset
    ///
    /// Chunk capacity comes from the config override, else `info.json`'s
    /// `chunks_size`, else the default. The episode file prefix is detected
    /// from files already on disk.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the root does not exist, or an error if
    /// `info.json` exists but cannot be parsed
    pub fn open(config: DatasetConfig) -> Result<Self> {
        let root = config.root();
        if !root.is_dir() {
            return Err(Error::NotFound(format!("dataset root {}", root.display())));
        }

        let info_path = root.join(layout::META_DIR).join(layout::INFO_FILE);
        let info = match DatasetInfo::load(&info_path) {
            Ok(info) => Some(info),
            Err(e) if e.is_not_found() => {
                debug!(path = %info_path.display(), "no dataset info");
                None
            }
            Err(e) => return Err(e),
        };

        let capacity = config
            .chunk_capacity()
            .or_else(|| info.as_ref().and_then(DatasetInfo::chunks_size))
            .unwrap_or(DEFAULT_CHUNK_CAPACITY);
        if capacity == 0 {
            return Err(Error::Inconsistent(format!(
                "{} declares a chunk size of zero",
                info_path.display()
            )));
        }

        let layout = EpisodeLayout::detect(root, capacity);
        debug!(
            root = %root.display(),
            capacity,
            prefix = layout.prefix(),
            "opened dataset"
        );
        Ok(Self { config, layout, info })
    }

    /// Start an empty dataset at `config.root()` with an explicit layout
    ///
    /// # Errors
    ///
    /// Returns error if the root directory cannot be created
    pub fn create(config: DatasetConfig, layout: EpisodeLayout) -> Result<Self> {
        fs::create_dir_all(config.root())?;
        Ok(Self {
            config,
            layout,
            info: None,
        })
    }

    /// Dataset root
    #[must_use]
    pub fn root(&self) -> &Path {
        self.config.root()
    }

    /// Configuration this store was opened with
    #[must_use]
    pub const fn config(&self) -> &DatasetConfig {
        &self.config
    }

    /// Naming convention in use
    #[must_use]
    pub const fn layout(&self) -> &EpisodeLayout {
        &self.layout
    }

    /// `info.json`, if present
    #[must_use]
    pub const fn info(&self) -> Option<&DatasetInfo> {
        self.info.as_ref()
    }

    /// `<root>/meta`
    #[must_use]
    pub fn meta_dir(&self) -> PathBuf {
        self.root().join(layout::META_DIR)
    }

    /// `<root>/meta/episodes.jsonl`
    #[must_use]
    pub fn episodes_log(&self) -> PathBuf {
        self.meta_dir().join(layout::EPISODES_LOG)
    }

    /// `<root>/meta/episodes_stats.jsonl`
    #[must_use]
    pub fn episodes_stats_log(&self) -> PathBuf {
        self.meta_dir().join(layout::EPISODES_STATS_LOG)
    }

    /// `<root>/meta/info.json`
    #[must_use]
    pub fn info_path(&self) -> PathBuf {
        self.meta_dir().join(layout::INFO_FILE)
    }

    /// Both metadata logs, descriptor log first
    #[must_use]
    pub fn metadata_logs(&self) -> [PathBuf; 2] {
        [self.episodes_log(), self.episodes_stats_log()]
    }

    /// Where every artifact of `episode` lives and which ones exist
    ///
    /// Cameras are those discovered anywhere in the layout, so a camera
    /// missing from this episode's chunk is still reported as missing.
    ///
    /// # Errors
    ///
    /// Returns error if the video directory cannot be listed
    pub fn locate(&self, episode: u64) -> Result<EpisodeLocation> {
        let cameras = self.discover_cameras()?;
        Ok(self.locate_with(episode, &cameras))
    }

    /// [`Self::locate`] with a known camera list
    #[must_use]
    pub fn locate_with(&self, episode: u64, cameras: &[String]) -> EpisodeLocation {
        let root = self.root();
        EpisodeLocation {
            episode,
            chunk: self.layout.chunk_of(episode),
            data: Artifact::probe(ArtifactKind::Data, self.layout.data_path(root, episode)),
            videos: cameras
                .iter()
                .map(|camera| {
                    Artifact::probe(
                        ArtifactKind::Video {
                            camera: camera.clone(),
                        },
                        self.layout.video_path(root, camera, episode),
                    )
                })
                .collect(),
        }
    }

    /// Camera directory names found under any video chunk, sorted
    ///
    /// # Errors
    ///
    /// Returns error if a directory cannot be listed
    pub fn discover_cameras(&self) -> Result<Vec<String>> {
        let mut cameras = BTreeSet::new();
        for (_, chunk_dir) in list_chunks(&self.root().join(layout::VIDEOS_DIR))? {
            for entry in fs::read_dir(&chunk_dir)? {
                let entry = entry?;
                if entry.file_type()?.is_dir() {
                    if let Ok(name) = entry.file_name().into_string() {
                        cameras.insert(name);
                    }
                }
            }
        }
        Ok(cameras.into_iter().collect())
    }

    /// Every episode data file, keyed by the index in its file name
    ///
    /// # Errors
    ///
    /// Returns error if a directory cannot be listed
    pub fn scan_data_files(&self) -> Result<BTreeMap<u64, PathBuf>> {
        let mut files = BTreeMap::new();
        for (chunk, chunk_dir) in list_chunks(&self.root().join(layout::DATA_DIR))? {
            for (episode, path) in self.list_episode_files(&chunk_dir, layout::DATA_EXT)? {
                self.warn_if_misplaced(episode, chunk, &path);
                if let Some(previous) = files.insert(episode, path) {
                    warn!(
                        episode,
                        path = %previous.display(),
                        "episode data file appears in more than one chunk"
                    );
                }
            }
        }
        Ok(files)
    }

    /// Every video clip under `videos/chunk-*/<camera>/`, sorted by episode
    ///
    /// # Errors
    ///
    /// Returns error if a directory cannot be listed
    pub fn scan_video_files(&self) -> Result<Vec<VideoFile>> {
        let mut files = Vec::new();
        for (chunk, chunk_dir) in list_chunks(&self.root().join(layout::VIDEOS_DIR))? {
            for entry in fs::read_dir(&chunk_dir)? {
                let entry = entry?;
                if !entry.file_type()?.is_dir() {
                    continue;
                }
                let Ok(camera) = entry.file_name().into_string() else {
                    continue;
                };
                for (episode, path) in self.list_episode_files(&entry.path(), layout::VIDEO_EXT)? {
                    self.warn_if_misplaced(episode, chunk, &path);
                    files.push(VideoFile {
                        episode,
                        camera: camera.clone(),
                        chunk,
                        path,
                    });
                }
            }
        }
        files.sort();
        Ok(files)
    }

    fn list_episode_files(&self, dir: &Path, ext: &str) -> Result<Vec<(u64, PathBuf)>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let path = entry.path();
            if atomic::is_partial(&path) {
                debug!(path = %path.display(), "skipping leftover temporary");
                continue;
            }
            let name = entry.file_name();
            if let Some(episode) = name
                .to_str()
                .and_then(|name| self.layout.parse_episode_file(name, ext))
            {
                files.push((episode, path));
            }
        }
        Ok(files)
    }

    fn warn_if_misplaced(&self, episode: u64, chunk: u64, path: &Path) {
        let expected = self.layout.chunk_of(episode);
        if expected != chunk {
            warn!(
                episode,
                chunk,
                expected,
                path = %path.display(),
                "episode file sits in the wrong chunk"
            );
        }
    }
}

/// `chunk-###` directories directly under `dir`, sorted by chunk number
///
/// A missing `dir` yields no chunks.
fn list_chunks(dir: &Path) -> Result<Vec<(u64, PathBuf)>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut chunks = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        if let Some(chunk) = entry.file_name().to_str().and_then(EpisodeLayout::parse_chunk_dir) {
            chunks.push((chunk, entry.path()));
        }
    }
    chunks.sort();
    Ok(chunks)
}
