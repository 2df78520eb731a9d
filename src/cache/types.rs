//! Persisted cache record types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::remote::TipSource;
use crate::store::Record;

/// Denormalized snapshot of one community tip.
///
/// Created or overwritten whole on each sync cycle; removed by eviction or
/// a full cache clear.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedTip {
  pub id: String,
  pub title: String,
  pub body: String,
  pub category: String,
  pub author: Option<String>,
  pub views: u64,
  pub likes: u64,
  /// RFC 3339 publication timestamp as received from the remote.
  pub published_at: String,
  /// Decayed popularity score; governs eviction order.
  pub ranking_score: i64,
  /// RFC 3339 timestamp of the caching write.
  pub cached_at: String,
  /// Remote locator of the tip image, if any.
  pub image_url: Option<String>,
}

impl CachedTip {
  pub fn from_source(source: &TipSource, now: DateTime<Utc>) -> Self {
    Self {
      id: source.id.clone(),
      title: source.title.clone(),
      body: source.body.clone(),
      category: source.category.clone(),
      author: source.author.clone(),
      views: source.views,
      likes: source.likes,
      published_at: source.published_at.clone(),
      ranking_score: ranking_score(source.views, source.likes, &source.published_at, now),
      cached_at: now.to_rfc3339(),
      image_url: source.image_url.clone(),
    }
  }

  /// Byte footprint counted against the cache budget.
  pub fn footprint_bytes(&self) -> u64 {
    serde_json::to_vec(self).map(|v| v.len() as u64).unwrap_or(0)
  }
}

impl Record for CachedTip {
  fn collection() -> &'static str {
    "tips"
  }

  fn primary_key(&self) -> String {
    self.id.clone()
  }

  fn index_entries(&self) -> Vec<(&'static str, String)> {
    vec![
      ("category", self.category.clone()),
      ("cached_at", self.cached_at.clone()),
    ]
  }
}

/// Popularity score with a recency bonus that decays to zero after about
/// a month: `views + likes*2 + max(0, 100 - days_since_published*3)`.
///
/// An unparsable publication timestamp earns no recency bonus.
pub fn ranking_score(views: u64, likes: u64, published_at: &str, now: DateTime<Utc>) -> i64 {
  let days_since = DateTime::parse_from_rfc3339(published_at)
    .map(|published| (now - published.with_timezone(&Utc)).num_days().max(0))
    .unwrap_or(i64::MAX / 4);

  let recency = (100 - days_since.saturating_mul(3)).max(0);
  views as i64 + (likes as i64) * 2 + recency
}

/// Cached binary attachment, keyed by a digest of its remote locator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedImage {
  /// Remote locator this image was fetched from.
  pub url: String,
  #[serde(with = "base64_bytes")]
  pub bytes: Vec<u8>,
  pub content_type: String,
  pub byte_size: u64,
  pub cached_at: String,
}

impl CachedImage {
  pub fn new(url: &str, bytes: Vec<u8>, content_type: &str, now: DateTime<Utc>) -> Self {
    Self {
      url: url.to_string(),
      byte_size: bytes.len() as u64,
      bytes,
      content_type: content_type.to_string(),
      cached_at: now.to_rfc3339(),
    }
  }

  /// Stable primary key for a remote locator.
  pub fn cache_key_for(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    hex::encode(hasher.finalize())
  }

  /// Render as a `data:` URL for direct display.
  pub fn to_data_url(&self) -> String {
    use base64::Engine;
    let payload = base64::engine::general_purpose::STANDARD.encode(&self.bytes);
    format!("data:{};base64,{}", self.content_type, payload)
  }
}

impl Record for CachedImage {
  fn collection() -> &'static str {
    "images"
  }

  fn primary_key(&self) -> String {
    Self::cache_key_for(&self.url)
  }

  fn index_entries(&self) -> Vec<(&'static str, String)> {
    vec![("cached_at", self.cached_at.clone())]
  }
}

/// Outcome of the most recent sync attempt for one content category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
  Success,
  Partial,
  Failed,
}

/// Per-category sync bookkeeping: exactly one record per content category
/// (e.g. "tips", "images"), rewritten at the end of every sync attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncMetadata {
  pub category: String,
  /// RFC 3339 timestamp of the last successful sync, if any.
  pub last_sync_at: Option<String>,
  pub item_count: u64,
  pub total_bytes: u64,
  pub outcome: SyncOutcome,
  pub message: Option<String>,
}

impl SyncMetadata {
  pub fn last_sync_time(&self) -> Option<DateTime<Utc>> {
    self
      .last_sync_at
      .as_deref()
      .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
      .map(|dt| dt.with_timezone(&Utc))
  }
}

impl Record for SyncMetadata {
  fn collection() -> &'static str {
    "sync_meta"
  }

  fn primary_key(&self) -> String {
    self.category.clone()
  }
}

/// Serde helper: binary payloads as base64 strings, so records stay valid
/// JSON across the persistence boundary.
mod base64_bytes {
  use base64::Engine;
  use serde::{Deserialize, Deserializer, Serializer};

  pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
  }

  pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    let encoded = String::deserialize(deserializer)?;
    base64::engine::general_purpose::STANDARD
      .decode(encoded)
      .map_err(serde::de::Error::custom)
  }
}
