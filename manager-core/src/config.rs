//! src/config.rs
//! ============================================================================
//! # Config: Core Configuration Loader and Saver
//!
//! Holds every setting the navigation engine needs: the sandbox root, the
//! persisted "show hidden files" flag, copy buffering, thumbnail policy and
//! logging. Loads and saves TOML from the cross-platform config path using
//! the [`directories`](https://docs.rs/directories) crate.
//!
//! ## Example
//! ```rust,ignore
//! let config = Config::load().await?;
//! config.save().await?;
//! ```

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use tokio::fs as TokioFs;

use crate::{
    error::{CoreError, CoreResult},
    logging::LoggerConfig,
};

/// Buffer size used by stream copies and archive I/O.
pub const DEFAULT_COPY_BUFFER: usize = 2048;

/// Thumbnail decode policy and cache bound.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThumbnailConfig {
    /// Target thumbnail width in pixels
    pub width: u32,

    /// Target thumbnail height in pixels
    pub height: u32,

    /// Maximum number of cached thumbnails
    pub max_entries: u64,

    /// Files smaller than this are decoded at full resolution, then scaled
    pub low_threshold_bytes: u64,

    /// Files larger than this are decoded with the aggressive factor
    pub high_threshold_bytes: u64,

    /// Sub-sampling factor between the two thresholds
    pub medium_sample_factor: u32,

    /// Sub-sampling factor above the high threshold
    pub aggressive_sample_factor: u32,

    /// Idle entries are dropped after this long (None = keep until evicted)
    #[serde(with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub time_to_idle: Option<Duration>,
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            width: 36,
            height: 36,
            max_entries: 512,
            low_threshold_bytes: 64 * 1024,
            high_threshold_bytes: 1024 * 1024,
            medium_sample_factor: 8,
            aggressive_sample_factor: 32,
            time_to_idle: None,
        }
    }
}

/// Main configuration struct for the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Navigation and file operations never leave this directory.
    pub root: PathBuf,

    pub show_hidden: bool,

    pub copy_buffer_size: usize,

    #[serde(default)]
    pub thumbnail: ThumbnailConfig,

    #[serde(default)]
    pub logging: LoggerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/sdcard"),
            show_hidden: false,
            copy_buffer_size: DEFAULT_COPY_BUFFER,
            thumbnail: ThumbnailConfig::default(),
            logging: LoggerConfig::default(),
        }
    }
}

impl Config {
    /// Config rooted at `root` with every other setting defaulted.
    #[must_use]
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    /// Loads config from the app config dir, or writes and returns defaults.
    ///
    /// The config is expected at `$XDG_CONFIG_HOME/OpenManager/config.toml`
    /// (Linux), or equivalent on Windows/macOS.
    pub async fn load() -> anyhow::Result<Self> {
        let path = Self::config_path()?;
        Self::load_from(&path).await
    }

    /// Loads config from an explicit path, creating it with defaults if missing.
    pub async fn load_from(path: &Path) -> anyhow::Result<Self> {
        if TokioFs::try_exists(path).await? {
            info!("Loading config from {}", path.display());
            let text = TokioFs::read_to_string(path).await?;
            let cfg: Self = toml::from_str(&text)?;
            cfg.validate()?;

            Ok(cfg)
        } else {
            info!(
                "No config file found at {}, using default configuration. Creating it now.",
                path.display()
            );

            let default_config = Self::default();
            default_config.save_to(path).await?;

            Ok(default_config)
        }
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> CoreResult<()> {
        if !self.root.is_absolute() {
            return Err(CoreError::Config(
                format!("root must be absolute, got {}", self.root.display()).into(),
            ));
        }

        if self.copy_buffer_size == 0 {
            return Err(CoreError::Config("copy_buffer_size must be positive".into()));
        }

        let thumbnail: &ThumbnailConfig = &self.thumbnail;
        if thumbnail.width == 0 || thumbnail.height == 0 {
            return Err(CoreError::Config("thumbnail size must be positive".into()));
        }

        if thumbnail.low_threshold_bytes > thumbnail.high_threshold_bytes {
            return Err(CoreError::Config(
                "thumbnail low threshold exceeds the high threshold".into(),
            ));
        }

        Ok(())
    }

    /// Saves config to the app config dir.
    pub async fn save(&self) -> anyhow::Result<()> {
        let path = Self::config_path()?;
        self.save_to(&path).await
    }

    /// Saves config to an explicit path.
    pub async fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        info!("Saving config to {}", path.display());

        if let Some(parent) = path.parent() {
            TokioFs::create_dir_all(parent).await?;
        }

        let toml_str = toml::to_string_pretty(self)?;
        TokioFs::write(path, toml_str).await?;

        Ok(())
    }

    /// Persist a new hidden-file preference at `path`.
    pub async fn store_show_hidden(&mut self, path: &Path, show_hidden: bool) -> anyhow::Result<()> {
        self.show_hidden = show_hidden;
        self.save_to(path).await
    }

    /// Returns the canonical config file path using `directories::ProjectDirs`.
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("com", "nexes", "OpenManager")
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory."))?;
        Ok(proj_dirs.config_dir().to_path_buf())
    }
}
