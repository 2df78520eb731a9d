//! Connectivity-driven sync manager.
//!
//! Decides when to refresh the content cache from the remote API: a
//! debounced sync after each reconnect, plus explicit and staleness-gated
//! entry points. Connectivity state and sync progress are published on a
//! broadcast stream for UI consumption; listeners that lag simply miss
//! events, nothing is persisted.

use color_eyre::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::cache::{CachedTip, ContentCache, SyncOutcome};
use crate::config::SyncConfig;
use crate::remote::{ConnectivityMonitor, ContentApi};

/// Events emitted at connectivity transitions and sync checkpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
  Online,
  Offline,
  SyncStarted,
  SyncCompleted { cached: usize },
  SyncFailed { error: String },
}

/// Result of one requested sync cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncCycle {
  Completed { cached: usize },
  Failed { error: String },
  /// A cycle was already running; the request was not queued.
  AlreadySyncing,
}

/// Read-path response for the UI layer.
#[derive(Debug, Clone)]
pub struct TipsResponse {
  pub tips: Vec<CachedTip>,
  pub from_cache: bool,
  /// Set when a live fetch failed and cached content was served instead.
  pub error: Option<String>,
}

pub struct SyncManager {
  cache: Arc<ContentCache>,
  api: Arc<dyn ContentApi>,
  connectivity: ConnectivityMonitor,
  config: SyncConfig,
  events: broadcast::Sender<SyncEvent>,
  syncing: AtomicBool,
}

impl SyncManager {
  pub fn new(
    cache: Arc<ContentCache>,
    api: Arc<dyn ContentApi>,
    connectivity: ConnectivityMonitor,
    config: SyncConfig,
  ) -> Self {
    let (events, _) = broadcast::channel(32);
    Self {
      cache,
      api,
      connectivity,
      config,
      events,
      syncing: AtomicBool::new(false),
    }
  }

  pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
    self.events.subscribe()
  }

  fn emit(&self, event: SyncEvent) {
    debug!(?event, "sync event");
    // No receivers is fine
    let _ = self.events.send(event);
  }

  /// Run one exclusive sync cycle: fetch the tip list, cache it, pull
  /// missing images best-effort, record metadata.
  ///
  /// Emits `SyncStarted`, then exactly one of `SyncCompleted` /
  /// `SyncFailed`. A cycle requested while another is running returns
  /// [`SyncCycle::AlreadySyncing`] instead of queuing.
  pub async fn sync_community_content(&self) -> Result<SyncCycle> {
    if self.syncing.swap(true, Ordering::SeqCst) {
      return Ok(SyncCycle::AlreadySyncing);
    }

    self.emit(SyncEvent::SyncStarted);
    let result = self.run_cycle().await;
    self.syncing.store(false, Ordering::SeqCst);

    match result {
      Ok(cached) => {
        info!(cached, "content sync completed");
        self.emit(SyncEvent::SyncCompleted { cached });
        Ok(SyncCycle::Completed { cached })
      }
      Err(error) => {
        warn!(%error, "content sync failed");
        self
          .cache
          .record_sync_outcome("tips", SyncOutcome::Failed, Some(error.clone()))?;
        self.emit(SyncEvent::SyncFailed {
          error: error.clone(),
        });
        Ok(SyncCycle::Failed { error })
      }
    }
  }

  async fn run_cycle(&self) -> std::result::Result<usize, String> {
    let sources = self.api.fetch_tips().await.map_err(|e| e.to_string())?;

    let report = self.cache.cache_tips(&sources).map_err(|e| e.to_string())?;
    self
      .cache
      .record_sync_outcome("tips", SyncOutcome::Success, None)
      .map_err(|e| e.to_string())?;

    self.cache_missing_images().await;

    Ok(report.cached_count)
  }

  /// Fetch images referenced by cached tips that are not cached yet.
  /// Best-effort: a failed or skipped image never fails the cycle, only
  /// downgrades the images category to a partial outcome.
  async fn cache_missing_images(&self) {
    let tips = match self.cache.cached_tips() {
      Ok(tips) => tips,
      Err(_) => return,
    };

    let mut missed = 0usize;
    for tip in tips {
      let Some(url) = tip.image_url else { continue };
      match self.cache.cached_image(&url) {
        Ok(Some(_)) => continue,
        Ok(None) => {}
        Err(_) => continue,
      }

      match self.api.fetch_image(&url).await {
        Ok((bytes, content_type)) => {
          match self.cache.cache_image(&url, bytes, &content_type) {
            Ok(true) => {}
            _ => missed += 1,
          }
        }
        Err(error) => {
          debug!(url, %error, "image fetch failed, will retry next cycle");
          missed += 1;
        }
      }
    }

    let (outcome, message) = if missed == 0 {
      (SyncOutcome::Success, None)
    } else {
      (
        SyncOutcome::Partial,
        Some(format!("{} images not cached", missed)),
      )
    };
    let _ = self.cache.record_sync_outcome("images", outcome, message);
  }

  /// Explicit user-triggered refresh: wipe the cache, then run a normal
  /// cycle.
  pub async fn force_fresh_sync(&self) -> Result<SyncCycle> {
    self.cache.clear_all()?;
    self.sync_community_content().await
  }

  /// Sync only when the cache is stale and the device is online.
  /// Returns whether the cache is fresh afterwards.
  pub async fn sync_if_stale(&self) -> Result<bool> {
    if self.cache.is_stale()? && self.connectivity.is_online() {
      self.sync_community_content().await?;
    }
    Ok(!self.cache.is_stale()?)
  }

  /// Read path for the UI: live content when possible, cached content
  /// otherwise.
  ///
  /// A successful live fetch is re-cached in the background, not awaited.
  pub async fn get_tips(&self) -> Result<TipsResponse> {
    if !self.connectivity.is_online() {
      return Ok(TipsResponse {
        tips: self.cache.cached_tips()?,
        from_cache: true,
        error: None,
      });
    }

    match self.api.fetch_tips().await {
      Ok(sources) => {
        let now = chrono::Utc::now();
        let tips = sources
          .iter()
          .map(|source| CachedTip::from_source(source, now))
          .collect();

        // Opportunistic re-cache; the caller is not kept waiting
        let cache = Arc::clone(&self.cache);
        tokio::spawn(async move {
          if let Err(e) = cache.cache_tips(&sources) {
            warn!("background re-cache failed: {:#}", e);
          } else {
            let _ = cache.record_sync_outcome("tips", SyncOutcome::Success, None);
          }
        });

        Ok(TipsResponse {
          tips,
          from_cache: false,
          error: None,
        })
      }
      Err(error) => Ok(TipsResponse {
        tips: self.cache.cached_tips()?,
        from_cache: true,
        error: Some(error.to_string()),
      }),
    }
  }

  /// Spawn the connectivity watcher.
  ///
  /// Offline transitions cancel any pending debounced sync and emit
  /// `Offline`; online transitions emit `Online` and, after the debounce
  /// window survives without a flap, run one sync cycle. If the device is
  /// online at spawn time an initial sync runs without blocking the
  /// caller.
  pub fn spawn(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
    let manager = Arc::clone(self);

    tokio::spawn(async move {
      let mut online_rx = manager.connectivity.subscribe();

      if *online_rx.borrow_and_update() {
        if let Err(e) = manager.sync_community_content().await {
          warn!("initial sync failed: {:#}", e);
        }
      }

      'watch: loop {
        if online_rx.changed().await.is_err() {
          break;
        }

        if !*online_rx.borrow_and_update() {
          manager.emit(SyncEvent::Offline);
          continue;
        }

        manager.emit(SyncEvent::Online);

        // Debounce, cancelled by a transition back offline. An
        // offline/online flap the watch channel collapses into one
        // notification leaves the value online; that restarts the
        // window rather than dropping the sync.
        loop {
          tokio::select! {
            _ = tokio::time::sleep(manager.config.reconnect_debounce()) => {
              if manager.connectivity.is_online() {
                if let Err(e) = manager.sync_community_content().await {
                  warn!("reconnect sync failed: {:#}", e);
                }
              }
              break;
            }
            changed = online_rx.changed() => {
              if changed.is_err() {
                break 'watch;
              }
              if !*online_rx.borrow_and_update() {
                manager.emit(SyncEvent::Offline);
                break;
              }
            }
          }
        }
      }
    })
  }
}
