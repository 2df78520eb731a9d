//! Record trait implemented by every persisted type.

use serde::{de::DeserializeOwned, Serialize};

/// A value persistable in a named collection of the [`Store`].
///
/// Implementors must serialize cleanly through serde_json: the persisted
/// form has to survive a store/reload cycle, so timestamps are carried as
/// RFC 3339 strings and binary payloads as base64, never as live handles.
///
/// [`Store`]: super::Store
pub trait Record: Clone + Send + Sync + Serialize + DeserializeOwned {
  /// Collection this record lives in (e.g. "tips", "outbox").
  fn collection() -> &'static str;

  /// Primary key, unique within the collection.
  fn primary_key(&self) -> String;

  /// Secondary index entries as (index name, value) pairs. Rebuilt on
  /// every put of this record.
  fn index_entries(&self) -> Vec<(&'static str, String)> {
    Vec::new()
  }
}
