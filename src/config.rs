use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::net::{cache_key, resolve_url};

/// Assets every version precaches unless the config says otherwise.
const DEFAULT_ASSETS: &[&str] = &[
  "/",
  "/static/manifest.json",
  "/static/icons/icon-192.png",
  "/static/icons/icon-512.png",
  "https://cdn.jsdelivr.net/npm/fullcalendar@6.1.9/main.min.css",
  "https://cdn.jsdelivr.net/npm/fullcalendar@6.1.9/index.global.min.js",
];

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Registration scope; relative URLs resolve against it
  #[serde(default = "default_origin")]
  pub origin: Url,
  #[serde(default)]
  pub cache: CacheConfig,
  /// Cache database location (defaults to $XDG_DATA_HOME/offcache/cache.db)
  pub database: Option<PathBuf>,
  #[serde(default)]
  pub network: NetworkConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Current cache identifier. Bump it whenever `assets` changes.
  #[serde(default = "default_cache_name")]
  pub name: String,
  /// Key served when the network is unreachable
  #[serde(default = "default_shell")]
  pub shell: String,
  #[serde(default = "default_assets")]
  pub assets: Vec<String>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      name: default_cache_name(),
      shell: default_shell(),
      assets: default_assets(),
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NetworkConfig {
  /// Per-request timeout. Unset means requests may hang indefinitely.
  pub timeout_secs: Option<u64>,
}

impl NetworkConfig {
  pub fn timeout(&self) -> Option<Duration> {
    self.timeout_secs.map(Duration::from_secs)
  }
}

fn default_origin() -> Url {
  Url::parse("http://localhost:5000/").expect("static origin URL is valid")
}

fn default_cache_name() -> String {
  "k-crm-v1".to_string()
}

fn default_shell() -> String {
  "/".to_string()
}

fn default_assets() -> Vec<String> {
  DEFAULT_ASSETS.iter().map(|s| s.to_string()).collect()
}

impl Default for Config {
  fn default() -> Self {
    Self {
      origin: default_origin(),
      cache: CacheConfig::default(),
      database: None,
      network: NetworkConfig::default(),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./offcache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/offcache/config.yaml
  ///
  /// Falls back to built-in defaults when no file exists.
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

    let config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Self::default(),
    };

    config.validate()?;
    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("offcache.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("offcache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    Ok(serde_yaml::from_str(contents)?)
  }

  /// Check the asset list can be precached as a single bulk add.
  pub fn validate(&self) -> Result<()> {
    if self.cache.name.trim().is_empty() {
      return Err(eyre!("cache.name must not be empty"));
    }
    if self.cache.assets.is_empty() {
      return Err(eyre!("cache.assets must list at least the shell"));
    }

    let mut seen = HashSet::new();
    for asset in &self.cache.assets {
      let key = cache_key(&resolve_url(&self.origin, asset)?);
      if !seen.insert(key.clone()) {
        return Err(eyre!("Duplicate asset in cache.assets: {}", key));
      }
    }

    let shell = cache_key(&resolve_url(&self.origin, &self.cache.shell)?);
    if !seen.contains(&shell) {
      return Err(eyre!(
        "Shell '{}' is not in cache.assets; offline fallback would never succeed",
        self.cache.shell
      ));
    }

    Ok(())
  }

  /// Resolved database path.
  pub fn database_path(&self) -> Result<PathBuf> {
    match &self.database {
      Some(path) => Ok(path.clone()),
      None => crate::cache::SqliteStorage::default_path(),
    }
  }
}
