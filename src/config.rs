use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::query::{QueryConfig, RetryPolicy};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Base URL of the EMR server; requests go to `<url>/api/...`
  #[serde(default = "default_api_url")]
  pub url: String,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      url: default_api_url(),
    }
  }
}

fn default_api_url() -> String {
  "http://localhost:5000".to_string()
}

/// Cache lifetimes and retry settings. Durations are in seconds unless the
/// name says otherwise.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CacheConfig {
  pub stale_time_secs: u64,
  pub gc_time_secs: u64,
  /// Retries after the first failed read
  pub retry: u32,
  pub retry_base_delay_ms: u64,
  pub retry_max_delay_ms: u64,
  pub refetch_on_reconnect: bool,
  pub refetch_on_window_focus: bool,
  /// How often the connectivity monitor probes the API
  pub health_check_interval_secs: u64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      stale_time_secs: 300,
      gc_time_secs: 600,
      retry: 3,
      retry_base_delay_ms: 1000,
      retry_max_delay_ms: 30_000,
      refetch_on_reconnect: true,
      refetch_on_window_focus: false,
      health_check_interval_secs: 30,
    }
  }
}

impl CacheConfig {
  pub fn health_check_interval(&self) -> Duration {
    Duration::from_secs(self.health_check_interval_secs.max(1))
  }
}

impl From<&CacheConfig> for QueryConfig {
  fn from(cache: &CacheConfig) -> Self {
    QueryConfig {
      stale_time: Duration::from_secs(cache.stale_time_secs),
      gc_time: Duration::from_secs(cache.gc_time_secs),
      retry: RetryPolicy {
        max_retries: cache.retry,
        base_delay: Duration::from_millis(cache.retry_base_delay_ms),
        max_delay: Duration::from_millis(cache.retry_max_delay_ms),
      },
      refetch_on_reconnect: cache.refetch_on_reconnect,
      refetch_on_window_focus: cache.refetch_on_window_focus,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
  /// `EnvFilter` directives; `RUST_LOG` takes precedence
  pub filter: String,
  /// Directory for rolling log files (default: $XDG_DATA_HOME/vetemr/logs)
  pub dir: Option<PathBuf>,
}

impl Default for LogConfig {
  fn default() -> Self {
    Self {
      filter: "vetemr=info".to_string(),
      dir: None,
    }
  }
}

impl LogConfig {
  pub fn log_dir(&self) -> Option<PathBuf> {
    self
      .dir
      .clone()
      .or_else(|| dirs::data_dir().map(|d| d.join("vetemr").join("logs")))
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./vetemr.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/vetemr/config.yaml
  ///
  /// Without a file every setting takes its default. `VETEMR_API_URL`
  /// overrides the API URL either way.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let mut config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Config::default(),
    };

    if let Some(url) = Self::get_api_url_override() {
      config.api.url = url;
    }

    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("vetemr.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("vetemr").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self, serde_yaml::Error> {
    // An empty file is a valid, all-default config
    if contents.trim().is_empty() {
      return Ok(Config::default());
    }
    serde_yaml::from_str(contents)
  }

  /// Get the API URL override from the environment.
  ///
  /// Checks VETEMR_API_URL.
  pub fn get_api_url_override() -> Option<String> {
    std::env::var("VETEMR_API_URL")
      .ok()
      .filter(|url| !url.trim().is_empty())
  }

  pub fn query_config(&self) -> QueryConfig {
    QueryConfig::from(&self.cache)
  }
}
