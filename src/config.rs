use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

pub const DEFAULT_CACHE_VERSION: &str = "bionic-hand-dashboard-v1.0.0";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Origin the dashboard is served from; only same-origin requests are intercepted
  pub origin: String,
  /// Name of the current cache version
  pub cache_version: String,
  /// Pre-cached page served when a navigation fails
  pub offline_url: String,
  /// Dashboard page focused or opened on notification click
  pub dashboard_url: String,
  /// Path prefix identifying API requests
  pub api_prefix: String,
  /// Resources fetched and stored at install time
  pub precache: Vec<String>,
  /// Activate right after install instead of waiting
  pub skip_waiting: bool,
  /// Database file (default: $XDG_DATA_HOME/offline-sw/offline.db)
  pub database: Option<PathBuf>,
  pub network: NetworkConfig,
  pub sync: SyncConfig,
  pub notifications: NotificationDefaults,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
  pub timeout_secs: u64,
  pub user_agent: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  /// Consecutive failed drain cycles before a registration gives up
  pub max_retries: u32,
  /// Delay after the first failed delivery of an action
  pub base_delay_secs: u64,
  /// Upper bound for the per-action backoff
  pub max_delay_secs: u64,
}

/// Defaults merged under every push payload
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationDefaults {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
  pub tag: String,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      origin: "http://localhost:8000".to_string(),
      cache_version: DEFAULT_CACHE_VERSION.to_string(),
      offline_url: "/dashboard/offline/".to_string(),
      dashboard_url: "/dashboard/".to_string(),
      api_prefix: "/api/".to_string(),
      precache: vec![
        "/dashboard/".to_string(),
        "/dashboard/analytics/".to_string(),
        "/dashboard/control/".to_string(),
        "/dashboard/settings/".to_string(),
        "/dashboard/model-testing/".to_string(),
        "/static/dashboard/js/notifications.js".to_string(),
        "/static/dashboard/css/mobile-responsive.css".to_string(),
        "/static/dashboard/images/bionic-hand-logo.png".to_string(),
        "https://cdnjs.cloudflare.com/ajax/libs/font-awesome/6.0.0/css/all.min.css".to_string(),
        "https://cdn.jsdelivr.net/npm/chart.js".to_string(),
        "/dashboard/offline/".to_string(),
      ],
      skip_waiting: true,
      database: None,
      network: NetworkConfig::default(),
      sync: SyncConfig::default(),
      notifications: NotificationDefaults::default(),
    }
  }
}

impl Default for NetworkConfig {
  fn default() -> Self {
    Self {
      timeout_secs: 10,
      user_agent: concat!("offline-sw/", env!("CARGO_PKG_VERSION")).to_string(),
    }
  }
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      max_retries: 5,
      base_delay_secs: 30,
      max_delay_secs: 3600,
    }
  }
}

impl Default for NotificationDefaults {
  fn default() -> Self {
    Self {
      title: "Bionic Hand Update".to_string(),
      body: "New information available".to_string(),
      icon: "/static/dashboard/images/notification-icon.png".to_string(),
      badge: "/static/dashboard/images/badge-icon.png".to_string(),
      tag: "bionic-hand-notification".to_string(),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./offline-sw.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/offline-sw/config.yaml
  ///
  /// Falls back to built-in defaults when no file exists.
  /// `OFFLINE_SW_ORIGIN` overrides the origin either way.
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
      None => Self::default(),
    };

    if let Ok(origin) = std::env::var("OFFLINE_SW_ORIGIN") {
      config.origin = origin;
    }

    config.validate()?;
    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("offline-sw.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("offline-sw").join("config.yaml");
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
    serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))
  }

  pub fn validate(&self) -> Result<()> {
    self.origin_url()?;
    if self.cache_version.trim().is_empty() {
      return Err(eyre!("cache_version must not be empty"));
    }
    if !self.api_prefix.starts_with('/') {
      return Err(eyre!("api_prefix must start with '/': {}", self.api_prefix));
    }
    Ok(())
  }

  pub fn origin_url(&self) -> Result<Url> {
    Url::parse(&self.origin).map_err(|e| eyre!("Invalid origin {}: {}", self.origin, e))
  }

  /// Resolve a path or absolute URL against the origin
  pub fn resolve(&self, target: &str) -> Result<Url> {
    self
      .origin_url()?
      .join(target)
      .map_err(|e| eyre!("Invalid URL {}: {}", target, e))
  }

  /// Directory for the database and log file
  pub fn data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("offline-sw"))
  }

  pub fn database_path(&self) -> Result<PathBuf> {
    match &self.database {
      Some(path) => Ok(path.clone()),
      None => Ok(Self::data_dir()?.join("offline.db")),
    }
  }
}
