//! Offline-aware write façade.
//!
//! Every domain write call site gets one contract regardless of
//! connectivity: try the real write now; if the failure is
//! connectivity-class (or the device is already known offline), divert
//! the same logical operation into the outbox and hand back a placeholder
//! id the UI can render optimistically. Anything else propagates
//! unchanged.

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::error::ApiError;
use crate::outbox::{OperationPayload, OperationStatus, Outbox, QueuedOperation};
use crate::remote::ConnectivityMonitor;
use std::sync::Arc;

/// Identity on whose behalf a write is applied.
#[derive(Debug, Clone)]
pub struct Caller {
  pub user_id: String,
  pub group_id: Option<String>,
  pub elder_id: Option<String>,
}

/// Uniform result of a façade write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOutcome {
  /// True when the operation went into the outbox instead of the remote.
  pub queued: bool,
  /// Remote id on immediate success; `pending_<queue id>` when queued.
  pub id: String,
}

/// Failures the façade will not silently defer.
#[derive(Debug, Error)]
pub enum SubmitError {
  /// The remote rejected the write for a non-network reason.
  #[error(transparent)]
  Rejected(ApiError),
  /// The outbox is at capacity; the operation was dropped.
  #[error("write queue is full; the operation was not saved")]
  QueueFull,
  #[error("storage error: {0}")]
  Storage(String),
}

pub struct OfflineWriter {
  outbox: Arc<Outbox>,
  connectivity: ConnectivityMonitor,
}

impl OfflineWriter {
  pub fn new(outbox: Arc<Outbox>, connectivity: ConnectivityMonitor) -> Self {
    Self {
      outbox,
      connectivity,
    }
  }

  /// Apply a domain write now if possible, otherwise queue it.
  pub async fn submit(
    &self,
    payload: OperationPayload,
    caller: &Caller,
  ) -> Result<WriteOutcome, SubmitError> {
    if self.connectivity.is_online() {
      if let Some(handler) = self.outbox.handler(payload.kind()) {
        let op = ephemeral_op(&payload, caller);
        match handler.apply(&op).await {
          Ok(()) => {
            return Ok(WriteOutcome {
              queued: false,
              id: op.id,
            });
          }
          Err(err) if err.is_retryable() => {
            debug!(kind = %payload.kind(), %err, "immediate write failed, queueing");
          }
          Err(err) => return Err(SubmitError::Rejected(err)),
        }
      }
    }

    let queued = self
      .outbox
      .queue_operation(
        payload,
        &caller.user_id,
        caller.group_id.clone(),
        caller.elder_id.clone(),
      )
      .map_err(|e| SubmitError::Storage(format!("{:#}", e)))?;

    match queued {
      Some(op) => Ok(WriteOutcome {
        queued: true,
        id: format!("pending_{}", op.id),
      }),
      None => Err(SubmitError::QueueFull),
    }
  }

  pub async fn log_medication_dose(
    &self,
    caller: &Caller,
    medication_id: &str,
    dose: &str,
    taken_at: DateTime<Utc>,
    notes: Option<String>,
  ) -> Result<WriteOutcome, SubmitError> {
    self
      .submit(
        OperationPayload::medication_log(medication_id, dose, taken_at, notes),
        caller,
      )
      .await
  }

  pub async fn log_supplement(
    &self,
    caller: &Caller,
    supplement_id: &str,
    dose: &str,
    taken_at: DateTime<Utc>,
  ) -> Result<WriteOutcome, SubmitError> {
    self
      .submit(
        OperationPayload::supplement_log(supplement_id, dose, taken_at),
        caller,
      )
      .await
  }

  pub async fn log_diet(
    &self,
    caller: &Caller,
    meal_type: &str,
    description: &str,
    eaten_at: DateTime<Utc>,
  ) -> Result<WriteOutcome, SubmitError> {
    self
      .submit(
        OperationPayload::diet_log(meal_type, description, eaten_at),
        caller,
      )
      .await
  }

  pub async fn create_note(
    &self,
    caller: &Caller,
    title: &str,
    body: &str,
    written_at: DateTime<Utc>,
  ) -> Result<WriteOutcome, SubmitError> {
    self
      .submit(OperationPayload::note_create(title, body, written_at), caller)
      .await
  }

  pub async fn log_activity(
    &self,
    caller: &Caller,
    activity: &str,
    duration_minutes: u32,
    performed_at: DateTime<Utc>,
  ) -> Result<WriteOutcome, SubmitError> {
    self
      .submit(
        OperationPayload::activity_log(activity, duration_minutes, performed_at),
        caller,
      )
      .await
  }
}

/// Operation shape for an immediate, never-persisted apply attempt.
fn ephemeral_op(payload: &OperationPayload, caller: &Caller) -> QueuedOperation {
  QueuedOperation {
    id: Uuid::new_v4().to_string(),
    priority: payload.kind().priority(),
    payload: payload.clone(),
    status: OperationStatus::Syncing,
    queued_at: Utc::now().to_rfc3339(),
    attempts: 0,
    last_error: None,
    last_attempt_at: Some(Utc::now().to_rfc3339()),
    next_attempt_at: None,
    user_id: caller.user_id.clone(),
    group_id: caller.group_id.clone(),
    elder_id: caller.elder_id.clone(),
  }
}
