use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Base URL of the application; relative assets resolve against it
  pub origin: Url,
  /// Current generation tag, embedded in store names
  #[serde(default = "default_generation")]
  pub generation: String,
  #[serde(default)]
  pub stores: StoresConfig,
  /// Core assets preloaded on install, relative to `origin`
  #[serde(default)]
  pub assets: Vec<String>,
  /// External resource URLs preloaded on install
  #[serde(default)]
  pub external: Vec<String>,
  /// URL substrings that select the network-first policy
  #[serde(default = "default_api_patterns")]
  pub api_patterns: Vec<String>,
  /// URL prefixes that are never intercepted
  #[serde(default)]
  pub bypass: Vec<String>,
  /// Path of the stored offline document, relative to `origin`
  #[serde(default = "default_offline_document")]
  pub offline_document: String,
  #[serde(default)]
  pub notifications: NotificationConfig,
  /// The one background-sync tag that is honoured
  #[serde(default = "default_sync_tag")]
  pub sync_tag: String,
  /// SQLite database path (defaults to the user data directory)
  pub database: Option<PathBuf>,
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoresConfig {
  /// Prefix of generated store names
  #[serde(default = "default_prefix")]
  pub prefix: String,
  /// Explicit static store name, overriding `{prefix}-static-{generation}`
  pub static_name: Option<String>,
  /// Explicit dynamic store name, overriding `{prefix}-dynamic-{generation}`
  pub dynamic_name: Option<String>,
}

impl Default for StoresConfig {
  fn default() -> Self {
    Self {
      prefix: default_prefix(),
      static_name: None,
      dynamic_name: None,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationConfig {
  #[serde(default = "default_notification_title")]
  pub title: String,
  #[serde(default = "default_notification_body")]
  pub body: String,
  pub icon: Option<String>,
  pub badge: Option<String>,
  #[serde(default = "default_vibrate")]
  pub vibrate: Vec<u32>,
  #[serde(default)]
  pub actions: Vec<NotificationAction>,
}

impl Default for NotificationConfig {
  fn default() -> Self {
    Self {
      title: default_notification_title(),
      body: default_notification_body(),
      icon: None,
      badge: None,
      vibrate: default_vibrate(),
      actions: Vec::new(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, serde::Serialize)]
pub struct NotificationAction {
  pub action: String,
  pub title: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub icon: Option<String>,
  /// Whether clicking this action navigates to the notification target
  #[serde(default = "default_true", skip_serializing)]
  pub open: bool,
}

fn default_generation() -> String {
  "v1".to_string()
}

fn default_prefix() -> String {
  "app".to_string()
}

fn default_api_patterns() -> Vec<String> {
  vec!["/api/".to_string()]
}

fn default_offline_document() -> String {
  "/offline".to_string()
}

fn default_sync_tag() -> String {
  "background-sync".to_string()
}

fn default_timeout_secs() -> u64 {
  30
}

fn default_notification_title() -> String {
  "Update".to_string()
}

fn default_notification_body() -> String {
  "New update available".to_string()
}

fn default_vibrate() -> Vec<u32> {
  vec![100, 50, 100]
}

fn default_true() -> bool {
  true
}

impl Config {
  /// Configuration for `origin` with every other field at its default.
  pub fn new(origin: Url) -> Self {
    Self {
      origin,
      generation: default_generation(),
      stores: StoresConfig::default(),
      assets: Vec::new(),
      external: Vec::new(),
      api_patterns: default_api_patterns(),
      bypass: Vec::new(),
      offline_document: default_offline_document(),
      notifications: NotificationConfig::default(),
      sync_tag: default_sync_tag(),
      database: None,
      timeout_secs: default_timeout_secs(),
    }
  }

  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./swarden.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/swarden/config.yaml
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
        "No configuration file found. Create one at ~/.config/swarden/config.yaml\n\
                 See swarden.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("swarden.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("swarden").join("config.yaml");
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

  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }
}
