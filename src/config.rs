//! Dataset configuration
//!
//! The default dataset location (the shared recording cache) is resolved once,
//! in [`DatasetConfigBuilder::build`]. Nothing below this layer reads the
//! environment.

use crate::{Error, Result};
use std::path::{Path, PathBuf};

/// Episodes per chunk directory when `info.json` does not say otherwise
pub const DEFAULT_CHUNK_CAPACITY: u64 = 1000;

/// Feature names starting with this prefix are never normalized
pub const DEFAULT_IMAGE_FEATURE_PREFIX: &str = "observation.images";

/// Top-level MP4 boxes inspected per clip by the container probe
pub const DEFAULT_PROBE_BUDGET: usize = 10;

/// Environment variable overriding the dataset cache home
pub const HOME_ENV_VAR: &str = "HF_LEROBOT_HOME";

/// What curation does with `total_frames` in `info.json`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameCountPolicy {
    /// Sum the row counts of the migrated data files
    #[default]
    Recompute,
    /// Leave the source value untouched
    KeepStale,
}

/// Resolved configuration for one dataset
#[derive(Debug, Clone)]
pub struct DatasetConfig {
    repo_id: Option<String>,
    root: PathBuf,
    chunk_capacity: Option<u64>,
    image_feature_prefix: String,
    frame_count_policy: FrameCountPolicy,
    rewrite_episode_index_column: bool,
    probe_budget: usize,
}

impl DatasetConfig {
    /// Create a new configuration builder
    #[must_use]
    pub fn builder() -> DatasetConfigBuilder {
        DatasetConfigBuilder::default()
    }

    /// Configuration rooted at an explicit path with all defaults
    #[must_use]
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self {
            repo_id: None,
            root: root.into(),
            chunk_capacity: None,
            image_feature_prefix: DEFAULT_IMAGE_FEATURE_PREFIX.to_string(),
            frame_count_policy: FrameCountPolicy::default(),
            rewrite_episode_index_column: true,
            probe_budget: DEFAULT_PROBE_BUDGET,
        }
    }

    /// Repository identifier, if one was given
    #[must_use]
    pub fn repo_id(&self) -> Option<&str> {
        self.repo_id.as_deref()
    }

    /// Dataset root directory
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Explicit chunk capacity override
    #[must_use]
    pub const fn chunk_capacity(&self) -> Option<u64> {
        self.chunk_capacity
    }

    /// Prefix identifying image-valued features
    #[must_use]
    pub fn image_feature_prefix(&self) -> &str {
        &self.image_feature_prefix
    }

    /// Frame count policy applied by curation
    #[must_use]
    pub const fn frame_count_policy(&self) -> FrameCountPolicy {
        self.frame_count_policy
    }

    /// Whether migrated Parquet files get their `episode_index` column rewritten
    #[must_use]
    pub const fn rewrite_episode_index_column(&self) -> bool {
        self.rewrite_episode_index_column
    }

    /// Container probe budget
    #[must_use]
    pub const fn probe_budget(&self) -> usize {
        self.probe_budget
    }

    /// Same settings, different root (used for curation targets)
    #[must_use]
    pub fn with_root(&self, root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..self.clone()
        }
    }
}

/// Builder for [`DatasetConfig`]
#[derive(Debug, Default)]
pub struct DatasetConfigBuilder {
    repo_id: Option<String>,
    root: Option<PathBuf>,
    home: Option<PathBuf>,
    chunk_capacity: Option<u64>,
    image_feature_prefix: Option<String>,
    frame_count_policy: FrameCountPolicy,
    keep_episode_index_column: bool,
    probe_budget: Option<usize>,
}

impl DatasetConfigBuilder {
    /// Repository identifier (e.g. `user/dataset`)
    #[must_use]
    pub fn repo_id(mut self, repo_id: impl Into<String>) -> Self {
        self.repo_id = Some(repo_id.into());
        self
    }

    /// Explicit dataset root; bypasses cache-home resolution
    #[must_use]
    pub fn root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    /// Optional explicit root (convenience for CLI flags)
    #[must_use]
    pub fn root_opt(mut self, root: Option<PathBuf>) -> Self {
        self.root = root;
        self
    }

    /// Cache home used with `repo_id` when no root is given
    #[must_use]
    pub fn home(mut self, home: impl Into<PathBuf>) -> Self {
        self.home = Some(home.into());
        self
    }

    /// Episodes per chunk
    #[must_use]
    pub const fn chunk_capacity(mut self, capacity: u64) -> Self {
        self.chunk_capacity = Some(capacity);
        self
    }

    /// Prefix identifying image-valued features
    #[must_use]
    pub fn image_feature_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.image_feature_prefix = Some(prefix.into());
        self
    }

    /// Frame count policy for curation
    #[must_use]
    pub const fn frame_count_policy(mut self, policy: FrameCountPolicy) -> Self {
        self.frame_count_policy = policy;
        self
    }

    /// Copy Parquet files byte-for-byte instead of rewriting `episode_index`
    #[must_use]
    pub const fn keep_episode_index_column(mut self, keep: bool) -> Self {
        self.keep_episode_index_column = keep;
        self
    }

    /// Container probe budget (top-level boxes per clip)
    #[must_use]
    pub const fn probe_budget(mut self, budget: usize) -> Self {
        self.probe_budget = Some(budget);
        self
    }

    /// Build the configuration
    ///
    /// # Errors
    ///
    /// Returns error if neither a root nor a repository id is given, if the
    /// chunk capacity is zero, or if no cache home can be determined
    pub fn build(self) -> Result<DatasetConfig> {
        if self.chunk_capacity == Some(0) {
            return Err(Error::InvalidInput("chunk capacity must be positive".to_string()));
        }
        if self.probe_budget == Some(0) {
            return Err(Error::InvalidInput("probe budget must be positive".to_string()));
        }

        let root = match (self.root, &self.repo_id) {
            (Some(root), _) => root,
            (None, Some(repo_id)) => {
                let home = match self.home {
                    Some(home) => home,
                    None => default_home()?,
                };
                home.join(repo_id)
            }
            (None, None) => {
                return Err(Error::InvalidInput(
                    "either a dataset root or a repository id is required".to_string(),
                ))
            }
        };

        Ok(DatasetConfig {
            repo_id: self.repo_id,
            root,
            chunk_capacity: self.chunk_capacity,
            image_feature_prefix: self
                .image_feature_prefix
                .unwrap_or_else(|| DEFAULT_IMAGE_FEATURE_PREFIX.to_string()),
            frame_count_policy: self.frame_count_policy,
            rewrite_episode_index_column: !self.keep_episode_index_column,
            probe_budget: self.probe_budget.unwrap_or(DEFAULT_PROBE_BUDGET),
        })
    }
}

fn default_home() -> Result<PathBuf> {
    if let Some(home) = std::env::var_os(HOME_ENV_VAR) {
        return Ok(PathBuf::from(home));
    }
    std::env::var_os("HOME")
        .map(|home| PathBuf::from(home).join(".cache/huggingface/lerobot"))
        .ok_or_else(|| {
            Error::InvalidInput(format!(
                "cannot resolve dataset home: set {HOME_ENV_VAR} or pass an explicit root"
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_root_wins() {
        let config = DatasetConfig::builder()
            .repo_id("user/set")
            .home("/cache")
            .root("/data/set")
            .build()
            .unwrap();
        assert_eq!(config.root(), Path::new("/data/set"));
        assert_eq!(config.repo_id(), Some("user/set"));
    }

    #[test]
    fn test_repo_id_joins_home() {
        let config = DatasetConfig::builder()
            .repo_id("user/set")
            .home("/cache")
            .build()
            .unwrap();
        assert_eq!(config.root(), Path::new("/cache/user/set"));
    }

    #[test]
    fn test_defaults() {
        let config = DatasetConfig::at("/x");
        assert_eq!(config.chunk_capacity(), None);
        assert_eq!(config.image_feature_prefix(), "observation.images");
        assert_eq!(config.frame_count_policy(), FrameCountPolicy::Recompute);
        assert!(config.rewrite_episode_index_column());
        assert_eq!(config.probe_budget(), DEFAULT_PROBE_BUDGET);
    }

    #[test]
    fn test_missing_root_and_repo_rejected() {
        let err = DatasetConfig::builder().build().unwrap_err();
        assert!(err.to_string().contains("Invalid input"));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let result = DatasetConfig::builder().root("/x").chunk_capacity(0).build();
        assert!(result.is_err());
    }
}
