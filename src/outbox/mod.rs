//! Durable write queue ("outbox").
//!
//! A write the user believes succeeded must never be lost, even if the
//! network is unavailable at the moment of submission. Operations are
//! persisted with a priority class and drained by a guarded background
//! loop once the device is online, with bounded, backed-off retries.
//!
//! The queue is independent of the content cache: separate collections,
//! separate lifecycle, separate background loop.

mod ops;

pub use ops::{OperationKind, OperationPayload, OperationStatus, Priority, QueuedOperation};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use color_eyre::Result;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::QueueConfig;
use crate::error::ApiError;
use crate::remote::ConnectivityMonitor;
use crate::store::Store;

/// Seam through which the domain write API plugs in: one handler per
/// operation kind, applying the typed payload against the remote system.
#[async_trait]
pub trait OperationHandler: Send + Sync {
  async fn apply(&self, op: &QueuedOperation) -> Result<(), ApiError>;
}

/// Handler map, built once at startup and injected. A kind missing from
/// the map cannot be drained and is marked failed on first encounter.
pub type HandlerMap = HashMap<OperationKind, Arc<dyn OperationHandler>>;

/// Point-in-time projection of queue health. Derived on demand from the
/// persisted operations; never itself a source of truth.
#[derive(Debug, Clone)]
pub struct SyncQueueStatus {
  pub pending: usize,
  pub failed: usize,
  pub is_draining: bool,
  pub oldest_pending_at: Option<DateTime<Utc>>,
  pub last_drain_at: Option<DateTime<Utc>>,
  pub pending_by_kind: BTreeMap<OperationKind, usize>,
}

/// Result of one drain pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
  Drained(DrainReport),
  /// Another drain is already running; nothing was queued behind it.
  AlreadyDraining,
  /// The device is offline; no items were touched.
  Offline,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
  pub attempted: usize,
  pub succeeded: usize,
  pub requeued: usize,
  pub failed: usize,
  /// Connectivity dropped mid-drain, leaving later items pending.
  pub halted_offline: bool,
}

/// The durable write queue.
pub struct Outbox {
  store: Arc<Store>,
  handlers: Arc<HandlerMap>,
  connectivity: ConnectivityMonitor,
  config: QueueConfig,
  draining: AtomicBool,
  last_drain_at: Mutex<Option<DateTime<Utc>>>,
}

impl Outbox {
  pub fn new(
    store: Arc<Store>,
    handlers: HandlerMap,
    connectivity: ConnectivityMonitor,
    config: QueueConfig,
  ) -> Self {
    Self {
      store,
      handlers: Arc::new(handlers),
      connectivity,
      config,
      draining: AtomicBool::new(false),
      last_drain_at: Mutex::new(None),
    }
  }

  /// Handler registered for a kind, if any. The façade uses this for its
  /// immediate-apply path so both paths hit the same domain write API.
  pub fn handler(&self, kind: OperationKind) -> Option<Arc<dyn OperationHandler>> {
    self.handlers.get(&kind).map(Arc::clone)
  }

  /// Persist a new pending operation.
  ///
  /// Returns `Ok(None)` when the queue is at capacity: a deliberate
  /// backpressure valve. The caller is expected to surface the drop to
  /// the user rather than pretend the write is safe.
  pub fn queue_operation(
    &self,
    payload: OperationPayload,
    user_id: &str,
    group_id: Option<String>,
    elder_id: Option<String>,
  ) -> Result<Option<QueuedOperation>> {
    let queued = self.store.count::<QueuedOperation>()? as usize;
    if queued >= self.config.capacity {
      warn!(capacity = self.config.capacity, "outbox at capacity, dropping operation");
      return Ok(None);
    }

    let kind = payload.kind();
    let op = QueuedOperation {
      id: Uuid::new_v4().to_string(),
      priority: kind.priority(),
      payload,
      status: OperationStatus::Pending,
      queued_at: Utc::now().to_rfc3339(),
      attempts: 0,
      last_error: None,
      last_attempt_at: None,
      next_attempt_at: None,
      user_id: user_id.to_string(),
      group_id,
      elder_id,
    };

    self.store.put(&op)?;
    debug!(id = %op.id, kind = %kind, priority = ?op.priority, "queued operation");

    Ok(Some(op))
  }

  /// All pending operations in drain order: strict priority class, FIFO
  /// within a class.
  pub fn pending_operations(&self) -> Result<Vec<QueuedOperation>> {
    let mut pending: Vec<QueuedOperation> = self.store.get_by_index("status", "pending")?;
    pending.sort_by(|a, b| {
      a.priority
        .cmp(&b.priority)
        .then(a.queued_at.cmp(&b.queued_at))
        .then(a.id.cmp(&b.id))
    });
    Ok(pending)
  }

  /// Drain pending operations against their handlers.
  ///
  /// At most one drain runs at a time; offline is a no-op. Connectivity
  /// is re-checked before every item, so a mid-drain disconnect stops the
  /// loop immediately and leaves the remaining items pending.
  pub async fn process_queue(&self) -> Result<DrainOutcome> {
    if !self.connectivity.is_online() {
      return Ok(DrainOutcome::Offline);
    }
    if self.draining.swap(true, Ordering::SeqCst) {
      return Ok(DrainOutcome::AlreadyDraining);
    }

    let result = self.drain_pending().await;
    self.draining.store(false, Ordering::SeqCst);

    if let Ok(mut guard) = self.last_drain_at.lock() {
      *guard = Some(Utc::now());
    }

    let report = result?;
    info!(
      attempted = report.attempted,
      succeeded = report.succeeded,
      requeued = report.requeued,
      failed = report.failed,
      "outbox drain finished"
    );

    Ok(DrainOutcome::Drained(report))
  }

  /// Reset operations stranded in the syncing state back to pending.
  ///
  /// A crash between the pre-attempt status write and the outcome write
  /// leaves a record that no read path picks up, yet it still counts
  /// against capacity. Only an interrupted drain can produce such rows,
  /// and the drain guard keeps this from touching a live attempt.
  fn recover_interrupted(&self) -> Result<usize> {
    let stranded: Vec<QueuedOperation> = self.store.get_by_index("status", "syncing")?;
    let count = stranded.len();

    for mut op in stranded {
      op.status = OperationStatus::Pending;
      self.store.put(&op)?;
    }
    if count > 0 {
      info!(count, "recovered operations left mid-sync by an interrupted drain");
    }

    Ok(count)
  }

  async fn drain_pending(&self) -> Result<DrainReport> {
    self.recover_interrupted()?;

    let mut report = DrainReport::default();
    let now = Utc::now();

    for op in self.pending_operations()? {
      if !self.connectivity.is_online() {
        report.halted_offline = true;
        break;
      }
      if !op.due(now) {
        continue;
      }

      report.attempted += 1;
      self.attempt(op, &mut report).await?;
    }

    Ok(report)
  }

  async fn attempt(&self, mut op: QueuedOperation, report: &mut DrainReport) -> Result<()> {
    let handler = match self.handlers.get(&op.kind()) {
      Some(handler) => Arc::clone(handler),
      None => {
        // Deployment error: retrying cannot register a handler
        op.status = OperationStatus::Failed;
        op.last_error = Some(format!("no handler registered for {}", op.kind()));
        self.store.put(&op)?;
        report.failed += 1;
        warn!(id = %op.id, kind = %op.kind(), "operation has no handler, marked failed");
        return Ok(());
      }
    };

    op.status = OperationStatus::Syncing;
    op.last_attempt_at = Some(Utc::now().to_rfc3339());
    self.store.put(&op)?;

    match handler.apply(&op).await {
      Ok(()) => {
        self.store.delete::<QueuedOperation>(&op.id)?;
        report.succeeded += 1;
        debug!(id = %op.id, kind = %op.kind(), "operation synced");
      }
      Err(err) => {
        op.attempts += 1;
        op.last_error = Some(err.to_string());

        if !err.is_retryable() || op.attempts >= self.config.max_attempts {
          op.status = OperationStatus::Failed;
          op.next_attempt_at = None;
          report.failed += 1;
          warn!(
            id = %op.id,
            kind = %op.kind(),
            attempts = op.attempts,
            error = %err,
            "operation failed"
          );
        } else {
          op.status = OperationStatus::Pending;
          let delay = self.config.backoff_after(op.attempts);
          op.next_attempt_at = Some((Utc::now() + delay).to_rfc3339());
          report.requeued += 1;
          debug!(
            id = %op.id,
            attempts = op.attempts,
            retry_in_secs = delay.num_seconds(),
            "operation requeued"
          );
        }
        self.store.put(&op)?;
      }
    }

    Ok(())
  }

  /// Move every failed operation back to pending with a fresh attempt
  /// budget. Returns how many were reset.
  pub fn retry_failed(&self) -> Result<usize> {
    let failed: Vec<QueuedOperation> = self.store.get_by_index("status", "failed")?;
    let count = failed.len();

    for mut op in failed {
      op.status = OperationStatus::Pending;
      op.attempts = 0;
      op.next_attempt_at = None;
      self.store.put(&op)?;
    }

    Ok(count)
  }

  /// Delete every failed operation. Returns how many were removed.
  pub fn clear_failed(&self) -> Result<usize> {
    let failed: Vec<QueuedOperation> = self.store.get_by_index("status", "failed")?;
    let keys: Vec<String> = failed.iter().map(|op| op.id.clone()).collect();
    self.store.delete_many::<QueuedOperation>(&keys)
  }

  /// Derive the current queue status.
  pub fn status(&self) -> Result<SyncQueueStatus> {
    let pending = self.pending_operations()?;
    let failed: Vec<QueuedOperation> = self.store.get_by_index("status", "failed")?;

    let mut pending_by_kind: BTreeMap<OperationKind, usize> = BTreeMap::new();
    for op in &pending {
      *pending_by_kind.entry(op.kind()).or_insert(0) += 1;
    }

    let oldest_pending_at = pending.iter().filter_map(|op| op.queued_time()).min();
    let last_drain_at = self.last_drain_at.lock().ok().and_then(|guard| *guard);

    Ok(SyncQueueStatus {
      pending: pending.len(),
      failed: failed.len(),
      is_draining: self.draining.load(Ordering::SeqCst),
      oldest_pending_at,
      last_drain_at,
      pending_by_kind,
    })
  }

  /// User-facing summary of queued-but-unsynced work, e.g.
  /// `"2 medication_log, 1 note_create waiting to sync"`.
  pub fn pending_summary(&self) -> Result<Option<String>> {
    let status = self.status()?;
    if status.pending == 0 {
      return Ok(None);
    }

    let parts: Vec<String> = status
      .pending_by_kind
      .iter()
      .map(|(kind, count)| format!("{} {}", count, kind))
      .collect();

    Ok(Some(format!("{} waiting to sync", parts.join(", "))))
  }

  /// Spawn the background drain loop: a debounced drain after each
  /// reconnect, plus a periodic drain while online as a safety net
  /// against missed triggers.
  pub fn spawn_drain_loop(self: &Arc<Self>, reconnect_debounce: Duration) -> tokio::task::JoinHandle<()> {
    let outbox = Arc::clone(self);

    tokio::spawn(async move {
      let mut online_rx = outbox.connectivity.subscribe();
      let mut ticker = tokio::time::interval(outbox.config.drain_interval());
      ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
      // The first tick fires immediately; swallow it
      ticker.tick().await;

      loop {
        tokio::select! {
          changed = online_rx.changed() => {
            if changed.is_err() {
              break;
            }
            let online = *online_rx.borrow_and_update();
            if online {
              tokio::time::sleep(reconnect_debounce).await;
              // Flapped back offline during the debounce: skip
              if outbox.connectivity.is_online() {
                if let Err(e) = outbox.process_queue().await {
                  warn!("outbox drain failed: {:#}", e);
                }
              }
            }
          }
          _ = ticker.tick() => {
            if outbox.connectivity.is_online() {
              if let Err(e) = outbox.process_queue().await {
                warn!("outbox drain failed: {:#}", e);
              }
            }
          }
        }
      }
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::AtomicUsize;

  /// Handler whose responses are scripted per call.
  struct ScriptedHandler {
    calls: AtomicUsize,
    script: Box<dyn Fn(usize, &QueuedOperation) -> Result<(), ApiError> + Send + Sync>,
  }

  impl ScriptedHandler {
    fn new<F>(script: F) -> Arc<Self>
    where
      F: Fn(usize, &QueuedOperation) -> Result<(), ApiError> + Send + Sync + 'static,
    {
      Arc::new(Self {
        calls: AtomicUsize::new(0),
        script: Box::new(script),
      })
    }

    fn calls(&self) -> usize {
      self.calls.load(Ordering::SeqCst)
    }
  }

  #[async_trait]
  impl OperationHandler for ScriptedHandler {
    async fn apply(&self, op: &QueuedOperation) -> Result<(), ApiError> {
      let call = self.calls.fetch_add(1, Ordering::SeqCst);
      (self.script)(call, op)
    }
  }

  fn outbox_with(
    handlers: HandlerMap,
    config: QueueConfig,
    online: bool,
  ) -> (Arc<Outbox>, ConnectivityMonitor) {
    let store = Arc::new(Store::open_in_memory().unwrap());
    let connectivity = ConnectivityMonitor::new(online);
    let outbox = Arc::new(Outbox::new(store, handlers, connectivity.clone(), config));
    (outbox, connectivity)
  }

  fn no_backoff() -> QueueConfig {
    QueueConfig {
      backoff_base_secs: 0,
      ..QueueConfig::default()
    }
  }

  fn note(n: u32) -> OperationPayload {
    OperationPayload::note_create(&format!("note {}", n), "body", Utc::now())
  }

  #[test]
  fn capacity_backpressure_rejects_overflow() {
    let config = QueueConfig {
      capacity: 2,
      ..QueueConfig::default()
    };
    let (outbox, _) = outbox_with(HandlerMap::new(), config, true);

    assert!(outbox.queue_operation(note(1), "u1", None, None).unwrap().is_some());
    assert!(outbox.queue_operation(note(2), "u1", None, None).unwrap().is_some());
    assert!(outbox.queue_operation(note(3), "u1", None, None).unwrap().is_none());

    assert_eq!(outbox.status().unwrap().pending, 2);
  }

  #[test]
  fn pending_sorted_by_priority_then_fifo() {
    let (outbox, _) = outbox_with(HandlerMap::new(), QueueConfig::default(), true);

    // Insertion order: low, critical, high
    let activity = outbox
      .queue_operation(
        OperationPayload::activity_log("walk", 30, Utc::now()),
        "u1",
        None,
        None,
      )
      .unwrap()
      .unwrap();
    // Demote the activity record to the low class directly in the store
    let mut low = activity;
    low.priority = Priority::Low;
    outbox.store.put(&low).unwrap();

    outbox
      .queue_operation(
        OperationPayload::medication_log("med-1", "5mg", Utc::now(), None),
        "u1",
        None,
        None,
      )
      .unwrap();
    outbox
      .queue_operation(
        OperationPayload::diet_log("lunch", "soup", Utc::now()),
        "u1",
        None,
        None,
      )
      .unwrap();

    let order: Vec<Priority> = outbox
      .pending_operations()
      .unwrap()
      .iter()
      .map(|op| op.priority)
      .collect();
    assert_eq!(order, vec![Priority::Critical, Priority::High, Priority::Low]);
  }

  #[tokio::test]
  async fn successful_drain_deletes_operation() {
    let handler = ScriptedHandler::new(|_, _| Ok(()));
    let mut handlers = HandlerMap::new();
    handlers.insert(OperationKind::NoteCreate, handler.clone() as Arc<dyn OperationHandler>);

    let (outbox, _) = outbox_with(handlers, no_backoff(), true);
    outbox.queue_operation(note(1), "u1", None, None).unwrap();

    let outcome = outbox.process_queue().await.unwrap();
    assert_eq!(
      outcome,
      DrainOutcome::Drained(DrainReport {
        attempted: 1,
        succeeded: 1,
        ..DrainReport::default()
      })
    );
    assert_eq!(handler.calls(), 1);
    assert_eq!(outbox.store.count::<QueuedOperation>().unwrap(), 0);
  }

  #[tokio::test]
  async fn retry_exhaustion_marks_failed_after_max_attempts() {
    let handler = ScriptedHandler::new(|_, _| Err(ApiError::Network("flaky".into())));
    let mut handlers = HandlerMap::new();
    handlers.insert(OperationKind::NoteCreate, handler.clone() as Arc<dyn OperationHandler>);

    let config = QueueConfig {
      max_attempts: 3,
      ..no_backoff()
    };
    let (outbox, _) = outbox_with(handlers, config, true);
    outbox.queue_operation(note(1), "u1", None, None).unwrap();

    for _ in 0..3 {
      outbox.process_queue().await.unwrap();
    }

    let status = outbox.status().unwrap();
    assert_eq!(status.pending, 0);
    assert_eq!(status.failed, 1);
    assert_eq!(handler.calls(), 3);

    // A further drain must not touch the failed item
    outbox.process_queue().await.unwrap();
    assert_eq!(handler.calls(), 3);
  }

  #[tokio::test]
  async fn domain_rejection_fails_without_retry() {
    let handler = ScriptedHandler::new(|_, _| Err(ApiError::Rejected("validation".into())));
    let mut handlers = HandlerMap::new();
    handlers.insert(OperationKind::NoteCreate, handler.clone() as Arc<dyn OperationHandler>);

    let (outbox, _) = outbox_with(handlers, no_backoff(), true);
    outbox.queue_operation(note(1), "u1", None, None).unwrap();

    outbox.process_queue().await.unwrap();

    let status = outbox.status().unwrap();
    assert_eq!(status.failed, 1);
    assert_eq!(handler.calls(), 1);
  }

  #[tokio::test]
  async fn missing_handler_fails_immediately() {
    let (outbox, _) = outbox_with(HandlerMap::new(), no_backoff(), true);
    outbox.queue_operation(note(1), "u1", None, None).unwrap();

    outbox.process_queue().await.unwrap();

    let failed: Vec<QueuedOperation> = outbox.store.get_by_index("status", "failed").unwrap();
    assert_eq!(failed.len(), 1);
    assert!(failed[0]
      .last_error
      .as_deref()
      .unwrap()
      .contains("no handler registered"));
  }

  #[tokio::test]
  async fn offline_drain_is_a_noop() {
    let handler = ScriptedHandler::new(|_, _| Ok(()));
    let mut handlers = HandlerMap::new();
    handlers.insert(OperationKind::NoteCreate, handler.clone() as Arc<dyn OperationHandler>);

    let (outbox, _) = outbox_with(handlers, no_backoff(), false);
    outbox.queue_operation(note(1), "u1", None, None).unwrap();

    assert_eq!(outbox.process_queue().await.unwrap(), DrainOutcome::Offline);
    assert_eq!(handler.calls(), 0);
    assert_eq!(outbox.status().unwrap().pending, 1);
  }

  #[tokio::test]
  async fn mid_drain_disconnect_leaves_rest_pending() {
    let (outbox, connectivity) = {
      let store = Arc::new(Store::open_in_memory().unwrap());
      let connectivity = ConnectivityMonitor::new(true);

      // First apply succeeds but drops the connection behind itself
      let conn = connectivity.clone();
      let handler = ScriptedHandler::new(move |_, _| {
        conn.set_online(false);
        Ok(())
      });
      let mut handlers = HandlerMap::new();
      handlers.insert(OperationKind::NoteCreate, handler as Arc<dyn OperationHandler>);

      let outbox = Arc::new(Outbox::new(store, handlers, connectivity.clone(), no_backoff()));
      (outbox, connectivity)
    };

    outbox.queue_operation(note(1), "u1", None, None).unwrap();
    outbox.queue_operation(note(2), "u1", None, None).unwrap();

    let outcome = outbox.process_queue().await.unwrap();
    match outcome {
      DrainOutcome::Drained(report) => {
        assert_eq!(report.succeeded, 1);
        assert!(report.halted_offline);
      }
      other => panic!("unexpected outcome: {:?}", other),
    }
    assert_eq!(outbox.status().unwrap().pending, 1);
    let _ = connectivity;
  }

  #[tokio::test]
  async fn backoff_defers_requeued_operations() {
    let handler = ScriptedHandler::new(|_, _| Err(ApiError::Network("flaky".into())));
    let mut handlers = HandlerMap::new();
    handlers.insert(OperationKind::NoteCreate, handler.clone() as Arc<dyn OperationHandler>);

    // Real backoff base: after one failure the item is not yet due
    let (outbox, _) = outbox_with(handlers, QueueConfig::default(), true);
    outbox.queue_operation(note(1), "u1", None, None).unwrap();

    outbox.process_queue().await.unwrap();
    assert_eq!(handler.calls(), 1);

    let pending = outbox.pending_operations().unwrap();
    assert_eq!(pending.len(), 1);
    assert!(!pending[0].due(Utc::now()));

    // Draining again skips the backed-off item
    outbox.process_queue().await.unwrap();
    assert_eq!(handler.calls(), 1);
  }

  #[tokio::test]
  async fn retry_failed_resets_attempt_budget() {
    let handler = ScriptedHandler::new(|_, _| Err(ApiError::Rejected("validation".into())));
    let mut handlers = HandlerMap::new();
    handlers.insert(OperationKind::NoteCreate, handler as Arc<dyn OperationHandler>);

    let (outbox, _) = outbox_with(handlers, no_backoff(), true);
    outbox.queue_operation(note(1), "u1", None, None).unwrap();
    outbox.process_queue().await.unwrap();
    assert_eq!(outbox.status().unwrap().failed, 1);

    assert_eq!(outbox.retry_failed().unwrap(), 1);
    let pending = outbox.pending_operations().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].attempts, 0);

    assert_eq!(outbox.clear_failed().unwrap(), 0);
  }

  #[tokio::test]
  async fn clear_failed_removes_only_failed() {
    let (outbox, _) = outbox_with(HandlerMap::new(), no_backoff(), true);
    outbox.queue_operation(note(1), "u1", None, None).unwrap();
    // No handler: first drain fails the item
    outbox.process_queue().await.unwrap();
    outbox.queue_operation(note(2), "u1", None, None).unwrap();

    assert_eq!(outbox.clear_failed().unwrap(), 1);
    assert_eq!(outbox.status().unwrap().pending, 1);
    assert_eq!(outbox.status().unwrap().failed, 0);
  }

  #[tokio::test]
  async fn interrupted_sync_recovers_on_next_drain() {
    let handler = ScriptedHandler::new(|_, _| Ok(()));
    let mut handlers = HandlerMap::new();
    handlers.insert(OperationKind::NoteCreate, handler.clone() as Arc<dyn OperationHandler>);

    let (outbox, _) = outbox_with(handlers, no_backoff(), true);
    let mut op = outbox
      .queue_operation(note(1), "u1", None, None)
      .unwrap()
      .unwrap();

    // Crash window: the pre-attempt status write landed, the outcome
    // never did
    op.status = OperationStatus::Syncing;
    outbox.store.put(&op).unwrap();
    assert_eq!(outbox.status().unwrap().pending, 0);
    assert_eq!(outbox.store.count::<QueuedOperation>().unwrap(), 1);

    outbox.process_queue().await.unwrap();

    assert_eq!(handler.calls(), 1);
    assert_eq!(outbox.store.count::<QueuedOperation>().unwrap(), 0);
  }

  #[test]
  fn pending_summary_formats_counts_by_kind() {
    let (outbox, _) = outbox_with(HandlerMap::new(), QueueConfig::default(), true);
    assert!(outbox.pending_summary().unwrap().is_none());

    outbox.queue_operation(note(1), "u1", None, None).unwrap();
    outbox.queue_operation(note(2), "u1", None, None).unwrap();
    outbox
      .queue_operation(
        OperationPayload::medication_log("med-1", "5mg", Utc::now(), None),
        "u1",
        None,
        None,
      )
      .unwrap();

    let summary = outbox.pending_summary().unwrap().unwrap();
    assert_eq!(summary, "1 medication_log, 2 note_create waiting to sync");
  }

  #[tokio::test(start_paused = true)]
  async fn drain_loop_runs_after_reconnect_debounce() {
    crate::test_support::init_tracing();
    let handler = ScriptedHandler::new(|_, _| Ok(()));
    let mut handlers = HandlerMap::new();
    handlers.insert(OperationKind::NoteCreate, handler.clone() as Arc<dyn OperationHandler>);

    let (outbox, connectivity) = outbox_with(handlers, no_backoff(), false);
    outbox.queue_operation(note(1), "u1", None, None).unwrap();

    let loop_handle = outbox.spawn_drain_loop(Duration::from_secs(5));
    tokio::task::yield_now().await;

    connectivity.set_online(true);
    tokio::task::yield_now().await;
    // Not yet: still inside the debounce window
    tokio::time::advance(Duration::from_secs(4)).await;
    tokio::task::yield_now().await;
    assert_eq!(handler.calls(), 0);

    tokio::time::advance(Duration::from_secs(2)).await;
    tokio::task::yield_now().await;
    assert_eq!(handler.calls(), 1);
    assert_eq!(outbox.status().unwrap().pending, 0);

    loop_handle.abort();
  }

  #[tokio::test(start_paused = true)]
  async fn drain_loop_ticks_periodically_while_online() {
    let handler = ScriptedHandler::new(|_, _| Ok(()));
    let mut handlers = HandlerMap::new();
    handlers.insert(OperationKind::NoteCreate, handler.clone() as Arc<dyn OperationHandler>);

    let (outbox, _connectivity) = outbox_with(handlers, no_backoff(), true);
    let loop_handle = outbox.spawn_drain_loop(Duration::from_secs(5));
    tokio::task::yield_now().await;

    outbox.queue_operation(note(1), "u1", None, None).unwrap();
    tokio::time::advance(Duration::from_secs(31)).await;
    tokio::task::yield_now().await;

    assert_eq!(handler.calls(), 1);
    loop_handle.abort();
  }
}
