use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::cache::CacheSettings;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub server: ServerConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub sync: SyncConfig,
  /// Override for the database and log directory
  pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
  /// Own origin; relative manifest paths and replay endpoints resolve
  /// against it
  pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Cache generation identifier. Bumping it invalidates every
  /// previously cached entry on the next activation.
  pub version: String,
  /// URLs pre-populated at install time; relative paths resolve
  /// against the server URL
  pub manifest: Vec<String>,
  /// External origins the fetch path intercepts in addition to our own
  pub allowed_origins: Vec<String>,
  /// Document served when a navigation fails offline
  pub offline_fallback: String,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      version: "villa-v1.0.0".to_string(),
      manifest: vec![
        "/".to_string(),
        "/index.html".to_string(),
        "/admin.html".to_string(),
        "/manifest.json".to_string(),
        "/offline.html".to_string(),
        // External libraries
        "https://cdn.jsdelivr.net/npm/chart.js@4.4.0/dist/chart.umd.js".to_string(),
        "https://js.stripe.com/v3/".to_string(),
      ],
      allowed_origins: vec![
        "https://cdn.jsdelivr.net".to_string(),
        "https://js.stripe.com".to_string(),
      ],
      offline_fallback: "/offline.html".to_string(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  /// Replay attempts before a queued record is dropped
  pub max_attempts: u32,
  /// Seconds between periodic calendar/price syncs
  pub periodic_interval_secs: u64,
  /// Seconds between connectivity probes
  pub connectivity_interval_secs: u64,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      max_attempts: 8,
      periodic_interval_secs: 3600,
      connectivity_interval_secs: 30,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./villasync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/villasync/config.yaml
  /// 4. ~/.config/villasync/config.yaml
  ///
  /// The returned value is immutable; reloading means calling this
  /// again and getting a new value.
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
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/villasync/config.yaml\n\
                 See config.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("villasync.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("villasync").join("config.yaml");
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

    Ok(config)
  }

  /// The server base URL, parsed.
  pub fn server_url(&self) -> Result<Url> {
    Url::parse(&self.server.url)
      .map_err(|e| eyre!("Invalid server url {}: {}", self.server.url, e))
  }

  /// Resolve the cache section into settings the cache layer consumes.
  /// Relative manifest paths become absolute against the server URL.
  pub fn cache_settings(&self) -> Result<CacheSettings> {
    let own_origin = self.server_url()?;

    let manifest = self
      .cache
      .manifest
      .iter()
      .map(|entry| {
        own_origin
          .join(entry)
          .map_err(|e| eyre!("Invalid manifest entry {}: {}", entry, e))
      })
      .collect::<Result<Vec<_>>>()?;

    let allowed_origins = self
      .cache
      .allowed_origins
      .iter()
      .map(|origin| {
        Url::parse(origin).map_err(|e| eyre!("Invalid allowed origin {}: {}", origin, e))
      })
      .collect::<Result<Vec<_>>>()?;

    let offline_fallback = own_origin
      .join(&self.cache.offline_fallback)
      .map_err(|e| eyre!("Invalid offline fallback {}: {}", self.cache.offline_fallback, e))?;

    Ok(CacheSettings {
      generation: self.cache.version.clone(),
      own_origin,
      allowed_origins,
      manifest,
      offline_fallback,
    })
  }

  /// Database path: the configured data dir, or the platform default.
  pub fn database_path(&self) -> Option<PathBuf> {
    self.data_dir.as_ref().map(|dir| dir.join("villasync.db"))
  }

  pub fn periodic_interval(&self) -> Duration {
    Duration::from_secs(self.sync.periodic_interval_secs)
  }

  pub fn connectivity_interval(&self) -> Duration {
    Duration::from_secs(self.sync.connectivity_interval_secs)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_minimal_config_gets_defaults() {
    let config: Config = serde_yaml::from_str(
      r#"
server:
  url: https://villa.test
"#,
    )
    .unwrap();

    assert_eq!(config.cache.version, "villa-v1.0.0");
    assert_eq!(config.sync.max_attempts, 8);
    assert_eq!(config.cache.offline_fallback, "/offline.html");
    assert!(config.data_dir.is_none());
  }

  #[test]
  fn test_cache_settings_resolve_relative_and_absolute_urls() {
    let config: Config = serde_yaml::from_str(
      r#"
server:
  url: https://villa.test
cache:
  version: villa-v2.0.0
  manifest:
    - /index.html
    - https://cdn.test/lib.js
  allowed_origins:
    - https://cdn.test
"#,
    )
    .unwrap();

    let settings = config.cache_settings().unwrap();
    assert_eq!(settings.generation, "villa-v2.0.0");
    assert_eq!(settings.manifest[0].as_str(), "https://villa.test/index.html");
    assert_eq!(settings.manifest[1].as_str(), "https://cdn.test/lib.js");
    assert_eq!(
      settings.offline_fallback.as_str(),
      "https://villa.test/offline.html"
    );
  }

  #[test]
  fn test_invalid_server_url_is_an_error() {
    let config: Config = serde_yaml::from_str(
      r#"
server:
  url: "not a url"
"#,
    )
    .unwrap();

    assert!(config.cache_settings().is_err());
  }
}
