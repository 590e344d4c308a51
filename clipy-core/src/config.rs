//! Configuration for the history service
//!
//! Loaded from `settings.json` in the data directory. Missing fields (or a
//! missing file) fall back to defaults.

use crate::privacy::PrivacySettings;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

pub const APP_DIR_NAME: &str = "Clipy";
pub const DATABASE_FILE: &str = "clipy.sqlite";
pub const IMAGES_DIR: &str = "images";
pub const LEGACY_HISTORY_FILE: &str = "history.json";
pub const SETTINGS_FILE: &str = "settings.json";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid settings file: {0}")]
    Json(#[from] serde_json::Error),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Platform data directory for the app (`~/Library/Application Support/Clipy` on macOS)
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR_NAME)
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_save_debounce_ms() -> u64 {
    1500
}

fn default_history_limit() -> usize {
    5000
}

fn default_parallel_filter_threshold() -> usize {
    2000
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Where the database, images and settings live
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Clipboard polling interval
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Quiet period before user edits are written to disk
    #[serde(default = "default_save_debounce_ms")]
    pub save_debounce_ms: u64,

    /// Number of entries loaded into memory at startup
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Working sets larger than this are filtered on the rayon pool
    #[serde(default = "default_parallel_filter_threshold")]
    pub parallel_filter_threshold: usize,

    #[serde(default)]
    pub privacy: PrivacySettings,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            poll_interval_ms: default_poll_interval_ms(),
            save_debounce_ms: default_save_debounce_ms(),
            history_limit: default_history_limit(),
            parallel_filter_threshold: default_parallel_filter_threshold(),
            privacy: PrivacySettings::default(),
        }
    }
}

impl HistoryConfig {
    /// Defaults rooted at a specific data directory
    pub fn with_data_dir<P: Into<PathBuf>>(data_dir: P) -> Self {
        Self { data_dir: data_dir.into(), ..Self::default() }
    }

    /// Load settings from `path`. A missing file yields defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        match fs::read(path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No settings file, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Write settings to `path` atomically (temp file + rename)
    pub fn save<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec_pretty(self)?;
        let tmp_path = path.with_extension("json.tmp");
        {
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(&json)?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, path)?;
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn save_debounce(&self) -> Duration {
        Duration::from_millis(self.save_debounce_ms)
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILE)
    }

    pub fn images_dir(&self) -> PathBuf {
        self.data_dir.join(IMAGES_DIR)
    }

    pub fn legacy_history_path(&self) -> PathBuf {
        self.data_dir.join(LEGACY_HISTORY_FILE)
    }

    pub fn settings_path(&self) -> PathBuf {
        self.data_dir.join(SETTINGS_FILE)
    }
}
