use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration for the offline subsystem.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OfflineConfig {
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub sync: SyncConfig,
  #[serde(default)]
  pub queue: QueueConfig,
}

/// Sizing for the content cache.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Total byte budget across tips and images.
  #[serde(default = "default_max_cache_bytes")]
  pub max_cache_bytes: u64,
  /// Maximum number of cached tips, enforced even under the byte budget.
  #[serde(default = "default_max_items")]
  pub max_items: usize,
  /// A single image larger than this is never cached.
  #[serde(default = "default_max_image_bytes")]
  pub max_image_bytes: u64,
  /// Cache older than this is considered stale.
  #[serde(default = "default_stale_after_secs")]
  pub stale_after_secs: u64,
}

/// Timing for the connectivity-driven sync manager.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
  /// How long to wait after a reconnect before syncing, to absorb
  /// flapping connections.
  #[serde(default = "default_debounce_secs")]
  pub reconnect_debounce_secs: u64,
}

/// Sizing and retry policy for the durable write queue.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
  /// Hard cap on queued operations; enqueue fails once reached.
  #[serde(default = "default_queue_capacity")]
  pub capacity: usize,
  /// An operation is marked failed after this many attempts.
  #[serde(default = "default_max_attempts")]
  pub max_attempts: u32,
  /// Periodic drain interval while online.
  #[serde(default = "default_drain_interval_secs")]
  pub drain_interval_secs: u64,
  /// Base retry delay; doubles per attempt, capped at `max_backoff_secs`.
  #[serde(default = "default_backoff_base_secs")]
  pub backoff_base_secs: u64,
  #[serde(default = "default_max_backoff_secs")]
  pub max_backoff_secs: u64,
}

fn default_max_cache_bytes() -> u64 {
  10 * 1024 * 1024
}

fn default_max_items() -> usize {
  50
}

fn default_max_image_bytes() -> u64 {
  1024 * 1024
}

fn default_stale_after_secs() -> u64 {
  24 * 60 * 60
}

fn default_debounce_secs() -> u64 {
  5
}

fn default_queue_capacity() -> usize {
  100
}

fn default_max_attempts() -> u32 {
  5
}

fn default_drain_interval_secs() -> u64 {
  30
}

fn default_backoff_base_secs() -> u64 {
  30
}

fn default_max_backoff_secs() -> u64 {
  30 * 60
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      max_cache_bytes: default_max_cache_bytes(),
      max_items: default_max_items(),
      max_image_bytes: default_max_image_bytes(),
      stale_after_secs: default_stale_after_secs(),
    }
  }
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      reconnect_debounce_secs: default_debounce_secs(),
    }
  }
}

impl Default for QueueConfig {
  fn default() -> Self {
    Self {
      capacity: default_queue_capacity(),
      max_attempts: default_max_attempts(),
      drain_interval_secs: default_drain_interval_secs(),
      backoff_base_secs: default_backoff_base_secs(),
      max_backoff_secs: default_max_backoff_secs(),
    }
  }
}

impl OfflineConfig {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./caresync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/caresync/config.yaml
  ///
  /// A missing file (when no explicit path was given) yields the defaults,
  /// which match the reference sizing.
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
    let local = PathBuf::from("caresync.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("caresync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: OfflineConfig = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }
}

impl CacheConfig {
  pub fn stale_after(&self) -> chrono::Duration {
    chrono::Duration::seconds(self.stale_after_secs as i64)
  }
}

impl SyncConfig {
  pub fn reconnect_debounce(&self) -> Duration {
    Duration::from_secs(self.reconnect_debounce_secs)
  }
}

impl QueueConfig {
  pub fn drain_interval(&self) -> Duration {
    Duration::from_secs(self.drain_interval_secs)
  }

  /// Retry delay after `attempts` failed attempts: base doubled per
  /// attempt, capped.
  pub fn backoff_after(&self, attempts: u32) -> chrono::Duration {
    let exp = attempts.saturating_sub(1).min(16);
    let secs = self
      .backoff_base_secs
      .saturating_mul(1u64 << exp)
      .min(self.max_backoff_secs);
    chrono::Duration::seconds(secs as i64)
  }
}
