//! Queued operation types: the closed set of domain writes the outbox can
//! carry, their priority classes, and the persisted record shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::store::Record;

/// Closed set of deferrable domain writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
  MedicationLog,
  SupplementLog,
  DietLog,
  NoteCreate,
  ActivityLog,
}

impl OperationKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      OperationKind::MedicationLog => "medication_log",
      OperationKind::SupplementLog => "supplement_log",
      OperationKind::DietLog => "diet_log",
      OperationKind::NoteCreate => "note_create",
      OperationKind::ActivityLog => "activity_log",
    }
  }

  /// Fixed priority mapping: health-critical logs drain before everyday
  /// logging, which drains before low-frequency events.
  pub fn priority(&self) -> Priority {
    match self {
      OperationKind::MedicationLog | OperationKind::SupplementLog => Priority::Critical,
      OperationKind::DietLog | OperationKind::NoteCreate => Priority::High,
      OperationKind::ActivityLog => Priority::Medium,
    }
  }
}

impl fmt::Display for OperationKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Drain-order class. Declaration order is drain order; `Low` is kept for
/// kinds added ahead of a priority assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
  Critical,
  High,
  Medium,
  Low,
}

impl Priority {
  /// Numeric rank used as the secondary-index value.
  pub fn rank(&self) -> u8 {
    match self {
      Priority::Critical => 0,
      Priority::High => 1,
      Priority::Medium => 2,
      Priority::Low => 3,
    }
  }
}

/// Strongly-typed payload per operation kind.
///
/// Every timestamp is an RFC 3339 string: the record must survive a
/// store/reload cycle, so no live date values cross the persistence
/// boundary. The constructors do that conversion explicitly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperationPayload {
  MedicationLog {
    medication_id: String,
    dose: String,
    taken_at: String,
    notes: Option<String>,
  },
  SupplementLog {
    supplement_id: String,
    dose: String,
    taken_at: String,
  },
  DietLog {
    meal_type: String,
    description: String,
    eaten_at: String,
  },
  NoteCreate {
    title: String,
    body: String,
    written_at: String,
  },
  ActivityLog {
    activity: String,
    duration_minutes: u32,
    performed_at: String,
  },
}

impl OperationPayload {
  pub fn medication_log(
    medication_id: &str,
    dose: &str,
    taken_at: DateTime<Utc>,
    notes: Option<String>,
  ) -> Self {
    Self::MedicationLog {
      medication_id: medication_id.to_string(),
      dose: dose.to_string(),
      taken_at: taken_at.to_rfc3339(),
      notes,
    }
  }

  pub fn supplement_log(supplement_id: &str, dose: &str, taken_at: DateTime<Utc>) -> Self {
    Self::SupplementLog {
      supplement_id: supplement_id.to_string(),
      dose: dose.to_string(),
      taken_at: taken_at.to_rfc3339(),
    }
  }

  pub fn diet_log(meal_type: &str, description: &str, eaten_at: DateTime<Utc>) -> Self {
    Self::DietLog {
      meal_type: meal_type.to_string(),
      description: description.to_string(),
      eaten_at: eaten_at.to_rfc3339(),
    }
  }

  pub fn note_create(title: &str, body: &str, written_at: DateTime<Utc>) -> Self {
    Self::NoteCreate {
      title: title.to_string(),
      body: body.to_string(),
      written_at: written_at.to_rfc3339(),
    }
  }

  pub fn activity_log(activity: &str, duration_minutes: u32, performed_at: DateTime<Utc>) -> Self {
    Self::ActivityLog {
      activity: activity.to_string(),
      duration_minutes,
      performed_at: performed_at.to_rfc3339(),
    }
  }

  pub fn kind(&self) -> OperationKind {
    match self {
      OperationPayload::MedicationLog { .. } => OperationKind::MedicationLog,
      OperationPayload::SupplementLog { .. } => OperationKind::SupplementLog,
      OperationPayload::DietLog { .. } => OperationKind::DietLog,
      OperationPayload::NoteCreate { .. } => OperationKind::NoteCreate,
      OperationPayload::ActivityLog { .. } => OperationKind::ActivityLog,
    }
  }
}

/// Lifecycle state of a queued operation.
///
/// `pending → syncing → (deleted | pending with attempt++ | failed)`.
/// Failed operations stay until the user retries or clears them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
  Pending,
  Syncing,
  Failed,
}

impl OperationStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      OperationStatus::Pending => "pending",
      OperationStatus::Syncing => "syncing",
      OperationStatus::Failed => "failed",
    }
  }
}

/// One durable, at-least-once work item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedOperation {
  pub id: String,
  pub payload: OperationPayload,
  pub priority: Priority,
  pub status: OperationStatus,
  pub queued_at: String,
  pub attempts: u32,
  pub last_error: Option<String>,
  pub last_attempt_at: Option<String>,
  /// Earliest time the next attempt may run (exponential backoff).
  pub next_attempt_at: Option<String>,
  /// Identity needed to apply the operation later.
  pub user_id: String,
  pub group_id: Option<String>,
  pub elder_id: Option<String>,
}

impl QueuedOperation {
  pub fn kind(&self) -> OperationKind {
    self.payload.kind()
  }

  pub fn queued_time(&self) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&self.queued_at)
      .ok()
      .map(|dt| dt.with_timezone(&Utc))
  }

  /// Whether the backoff window has elapsed.
  pub fn due(&self, now: DateTime<Utc>) -> bool {
    match &self.next_attempt_at {
      None => true,
      Some(at) => DateTime::parse_from_rfc3339(at)
        .map(|at| at.with_timezone(&Utc) <= now)
        .unwrap_or(true),
    }
  }
}

impl Record for QueuedOperation {
  fn collection() -> &'static str {
    "outbox"
  }

  fn primary_key(&self) -> String {
    self.id.clone()
  }

  fn index_entries(&self) -> Vec<(&'static str, String)> {
    vec![
      ("status", self.status.as_str().to_string()),
      ("priority", self.priority.rank().to_string()),
      ("kind", self.kind().as_str().to_string()),
      ("queued_at", self.queued_at.clone()),
    ]
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn priority_mapping() {
    assert_eq!(OperationKind::MedicationLog.priority(), Priority::Critical);
    assert_eq!(OperationKind::SupplementLog.priority(), Priority::Critical);
    assert_eq!(OperationKind::DietLog.priority(), Priority::High);
    assert_eq!(OperationKind::NoteCreate.priority(), Priority::High);
    assert_eq!(OperationKind::ActivityLog.priority(), Priority::Medium);
  }

  #[test]
  fn priority_orders_critical_first() {
    assert!(Priority::Critical < Priority::High);
    assert!(Priority::High < Priority::Medium);
    assert!(Priority::Medium < Priority::Low);
  }

  #[test]
  fn payload_serializes_with_type_tag() {
    let taken_at = Utc::now();
    let payload = OperationPayload::medication_log("med-1", "5mg", taken_at, None);

    let json = serde_json::to_value(&payload).unwrap();
    assert_eq!(json["type"], "medication_log");
    assert_eq!(json["taken_at"], taken_at.to_rfc3339());

    let back: OperationPayload = serde_json::from_value(json).unwrap();
    assert_eq!(back, payload);
  }

  #[test]
  fn due_respects_backoff_window() {
    let now = Utc::now();
    let mut op = QueuedOperation {
      id: "op-1".into(),
      payload: OperationPayload::note_create("t", "b", now),
      priority: Priority::High,
      status: OperationStatus::Pending,
      queued_at: now.to_rfc3339(),
      attempts: 1,
      last_error: None,
      last_attempt_at: None,
      next_attempt_at: Some((now + chrono::Duration::seconds(60)).to_rfc3339()),
      user_id: "u1".into(),
      group_id: None,
      elder_id: None,
    };

    assert!(!op.due(now));
    assert!(op.due(now + chrono::Duration::seconds(61)));

    op.next_attempt_at = None;
    assert!(op.due(now));
  }
}
