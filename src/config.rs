use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::{QueryOptions, RetryPolicy};
use crate::http::HttpClient;

/// Map-provider public key; the map view is disabled without it.
pub const MAP_TOKEN_VAR: &str = "NATUR_MAP_TOKEN";
/// Optional bearer token for the marketplace API.
pub const API_TOKEN_VAR: &str = "NATUR_API_TOKEN";
/// Log filter directives.
pub const LOG_VAR: &str = "NATUR_LOG";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub api: ApiConfig,
  #[serde(default)]
  pub queries: QueriesConfig,
  #[serde(default)]
  pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  #[serde(default = "default_base_url")]
  pub base_url: String,
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      base_url: default_base_url(),
      timeout_secs: default_timeout_secs(),
    }
  }
}

fn default_base_url() -> String {
  "http://localhost:3000".to_string()
}

fn default_timeout_secs() -> u64 {
  HttpClient::DEFAULT_TIMEOUT.as_secs()
}

/// Defaults for every query the app registers.
#[derive(Debug, Clone, Deserialize)]
pub struct QueriesConfig {
  /// Seconds a value counts as fresh
  #[serde(default)]
  pub stale_secs: u64,
  /// Seconds an unobserved entry is kept
  #[serde(default = "default_gc_secs")]
  pub gc_secs: u64,
  /// Extra attempts after a failed fetch
  #[serde(default = "default_retry")]
  pub retry: u32,
  #[serde(default = "default_true")]
  pub refetch_on_window_focus: bool,
}

impl Default for QueriesConfig {
  fn default() -> Self {
    Self {
      stale_secs: 0,
      gc_secs: default_gc_secs(),
      retry: default_retry(),
      refetch_on_window_focus: true,
    }
  }
}

fn default_gc_secs() -> u64 {
  300
}

fn default_retry() -> u32 {
  1
}

fn default_true() -> bool {
  true
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
  /// SQLite file for persisted snapshots (defaults to the data directory)
  pub path: Option<PathBuf>,
  /// Set to false to keep nothing on disk
  #[serde(default = "default_true")]
  pub enabled: bool,
}

impl Default for StorageConfig {
  fn default() -> Self {
    Self {
      path: None,
      enabled: true,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./natur.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/natur/config.yaml
  ///
  /// Defaults apply when no file is found.
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

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("natur.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("natur").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    if config.api.timeout_secs == 0 {
      return Err(eyre!("api.timeout_secs must be at least 1 in {}", path.display()));
    }

    Ok(config)
  }

  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.api.timeout_secs)
  }

  pub fn query_options(&self) -> QueryOptions {
    let q = &self.queries;
    QueryOptions::default()
      .with_stale_time(Duration::from_secs(q.stale_secs))
      .with_gc_time(Duration::from_secs(q.gc_secs))
      .with_retry(RetryPolicy::standard(q.retry))
      .with_refetch_on_window_focus(q.refetch_on_window_focus)
  }

  /// Get the map-provider key from the environment.
  pub fn map_token() -> Option<String> {
    env_token(MAP_TOKEN_VAR)
  }

  /// Get the API bearer token from the environment.
  pub fn api_token() -> Option<String> {
    env_token(API_TOKEN_VAR)
  }
}

fn env_token(name: &str) -> Option<String> {
  std::env::var(name)
    .ok()
    .map(|v| v.trim().to_string())
    .filter(|v| !v.is_empty())
}
