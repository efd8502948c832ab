use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::app::state::Stream;

const CONFIG_FILE_NAME: &str = "config.toml";

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api: ApiConfig,
    pub cache: CacheConfig,
    pub paging: PagingConfig,
    pub polling: PollingConfig,
}

/// Backend connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL of the stats server
    pub base_url: String,
    /// Sent as `X-APIKEY` and as the sync key
    pub api_key: Option<String>,
    /// Whole-request timeout in seconds
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            api_key: None,
            timeout_secs: 30,
            connect_timeout_secs: 10,
        }
    }
}

/// Response cache limits and lifetimes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum entries per in-memory cache
    pub max_entries: usize,
    pub live_ttl_secs: u64,
    pub archive_ttl_secs: u64,
    pub clips_ttl_secs: u64,
    pub stats_ttl_secs: u64,
    /// Lifetime of persisted channel info
    pub channel_info_ttl_hours: i64,
    /// Lifetime of persisted icon lookups
    pub icon_ttl_days: i64,
    /// Persist channel info and icons under the user cache dir
    pub persist_entities: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 300,
            live_ttl_secs: 30,
            archive_ttl_secs: 60,
            clips_ttl_secs: 300,
            stats_ttl_secs: 300,
            channel_info_ttl_hours: 24,
            icon_ttl_days: 7,
            persist_entities: true,
        }
    }
}

impl CacheConfig {
    pub fn ttl_for(&self, stream: Stream) -> Duration {
        let secs = match stream {
            Stream::Live => self.live_ttl_secs,
            Stream::Archive => self.archive_ttl_secs,
            Stream::Clips => self.clips_ttl_secs,
        };
        Duration::from_secs(secs)
    }

    pub fn stats_ttl(&self) -> Duration {
        Duration::from_secs(self.stats_ttl_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PagingConfig {
    /// Items per page for every stream, clamped to 1..=100
    pub page_size: u32,
}

impl Default for PagingConfig {
    fn default() -> Self {
        Self { page_size: 32 }
    }
}

/// Background timers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Live view auto-refresh interval in seconds
    pub live_refresh_secs: u64,
    /// Sync status poll interval in seconds
    pub sync_status_secs: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            live_refresh_secs: 60,
            sync_status_secs: 3,
        }
    }
}

impl Config {
    /// Get the configuration file path
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("holodash");

        fs::create_dir_all(&config_dir)
            .context("Failed to create config directory")?;

        Ok(config_dir.join(CONFIG_FILE_NAME))
    }

    /// Load configuration from the default location, creating it if missing
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from `path`, or write defaults there if it doesn't exist
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = fs::read_to_string(path)
                .context("Failed to read config file")?;

            let config: Config = toml::from_str(&contents)
                .context("Failed to parse config file")?;

            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Save configuration to `path`
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self)
            .context("Failed to serialize config")?;

        fs::write(path, contents)
            .context("Failed to write config file")?;

        Ok(())
    }
}
