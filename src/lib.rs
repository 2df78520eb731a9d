//! Offline-first durable cache and write queue for the CareSync client.
//!
//! The subsystem keeps a client useful while disconnected from its system
//! of record: previously-seen community content stays readable from a
//! bounded local cache, and new writes land in a durable, priority-classed
//! outbox that drains once connectivity returns.
//!
//! Wiring order mirrors the dependency order: open a [`store::Store`],
//! build a [`cache::ContentCache`] on it, then a [`sync::SyncManager`]
//! and an [`outbox::Outbox`] (with the domain write handlers injected),
//! and hand call sites an [`facade::OfflineWriter`]. The
//! [`OfflineSubsystem`] helper does exactly that.

pub mod cache;
pub mod config;
pub mod error;
pub mod facade;
pub mod outbox;
pub mod remote;
pub mod store;
pub mod sync;

use std::sync::Arc;

use crate::cache::ContentCache;
use crate::config::OfflineConfig;
use crate::facade::OfflineWriter;
use crate::outbox::{HandlerMap, Outbox};
use crate::remote::{ConnectivityMonitor, ContentApi};
use crate::store::Store;
use crate::sync::SyncManager;

/// The assembled subsystem: one shared store handle, the components built
/// on it, and the write façade for domain call sites.
///
/// All shared state is explicit here; there are no module-level globals,
/// and tests can build as many independent instances as they need.
pub struct OfflineSubsystem {
  pub store: Arc<Store>,
  pub cache: Arc<ContentCache>,
  pub sync: Arc<SyncManager>,
  pub outbox: Arc<Outbox>,
  pub writer: OfflineWriter,
  config: OfflineConfig,
}

impl OfflineSubsystem {
  pub fn new(
    store: Arc<Store>,
    api: Arc<dyn ContentApi>,
    handlers: HandlerMap,
    connectivity: ConnectivityMonitor,
    config: OfflineConfig,
  ) -> Self {
    let cache = Arc::new(ContentCache::new(Arc::clone(&store), config.cache.clone()));
    let sync = Arc::new(SyncManager::new(
      Arc::clone(&cache),
      api,
      connectivity.clone(),
      config.sync.clone(),
    ));
    let outbox = Arc::new(Outbox::new(
      Arc::clone(&store),
      handlers,
      connectivity.clone(),
      config.queue.clone(),
    ));
    let writer = OfflineWriter::new(Arc::clone(&outbox), connectivity);

    Self {
      store,
      cache,
      sync,
      outbox,
      writer,
      config,
    }
  }

  /// Spawn the two background loops: the connectivity watcher driving
  /// content syncs, and the outbox drain loop. Each is independently
  /// guarded; a content sync and a queue drain may interleave.
  pub fn start(&self) -> (tokio::task::JoinHandle<()>, tokio::task::JoinHandle<()>) {
    let watcher = self.sync.spawn();
    let drain = self
      .outbox
      .spawn_drain_loop(self.config.sync.reconnect_debounce());
    (watcher, drain)
  }
}


#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::ApiError;
  use crate::facade::Caller;
  use crate::outbox::{OperationHandler, OperationKind, QueuedOperation};
  use crate::remote::TipSource;
  use async_trait::async_trait;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::time::Duration;

  struct OkHandler {
    calls: AtomicUsize,
  }

  #[async_trait]
  impl OperationHandler for OkHandler {
    async fn apply(&self, _op: &QueuedOperation) -> Result<(), ApiError> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      Ok(())
    }
  }

  struct OneTipApi;

  #[async_trait]
  impl ContentApi for OneTipApi {
    async fn fetch_tips(&self) -> Result<Vec<TipSource>, ApiError> {
      Ok(vec![TipSource {
        id: "t1".into(),
        title: "Tip".into(),
        body: "body".into(),
        category: "nutrition".into(),
        author: None,
        views: 3,
        likes: 1,
        published_at: "2020-01-01T00:00:00Z".into(),
        image_url: None,
      }])
    }

    async fn fetch_image(&self, _url: &str) -> Result<(Vec<u8>, String), ApiError> {
      Err(ApiError::Network("no images".into()))
    }
  }

  #[tokio::test(start_paused = true)]
  async fn reconnect_drives_both_loops() {
    test_support::init_tracing();
    let handler = Arc::new(OkHandler {
      calls: AtomicUsize::new(0),
    });
    let mut handlers = HandlerMap::new();
    handlers.insert(
      OperationKind::MedicationLog,
      Arc::clone(&handler) as Arc<dyn OperationHandler>,
    );

    let connectivity = ConnectivityMonitor::new(false);
    let subsystem = OfflineSubsystem::new(
      Arc::new(Store::open_in_memory().unwrap()),
      Arc::new(OneTipApi),
      handlers,
      connectivity.clone(),
      OfflineConfig::default(),
    );

    let (watcher, drain) = subsystem.start();
    tokio::task::yield_now().await;

    // Write while offline: queued, nothing applied, cache stale
    let outcome = subsystem
      .writer
      .log_medication_dose(
        &Caller {
          user_id: "u1".into(),
          group_id: None,
          elder_id: None,
        },
        "med-1",
        "5mg",
        chrono::Utc::now(),
        None,
      )
      .await
      .unwrap();
    assert!(outcome.queued);
    assert!(subsystem.cache.is_stale().unwrap());

    connectivity.set_online(true);
    tokio::task::yield_now().await;
    tokio::time::advance(Duration::from_secs(6)).await;
    tokio::task::yield_now().await;

    // Both loops fired: content synced, outbox drained
    assert_eq!(subsystem.cache.cached_tips().unwrap().len(), 1);
    assert!(!subsystem.cache.is_stale().unwrap());
    assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    assert_eq!(subsystem.outbox.status().unwrap().pending, 0);

    watcher.abort();
    drain.abort();
  }
}
