//! Seams to the world outside this subsystem: the remote content-fetch
//! API and the platform connectivity signal.
//!
//! Domain write handlers are the third seam; those are injected into the
//! outbox as a handler map (see [`crate::outbox::OperationHandler`]).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use url::Url;

use crate::error::ApiError;

/// Wire shape of one community tip as returned by the content endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TipSource {
  pub id: String,
  pub title: String,
  pub body: String,
  pub category: String,
  #[serde(default)]
  pub author: Option<String>,
  #[serde(default)]
  pub views: u64,
  #[serde(default)]
  pub likes: u64,
  /// RFC 3339 publication timestamp.
  pub published_at: String,
  #[serde(default)]
  pub image_url: Option<String>,
}

/// Read seam to the remote system of record.
#[async_trait]
pub trait ContentApi: Send + Sync {
  /// Fetch the current community tip list.
  async fn fetch_tips(&self) -> Result<Vec<TipSource>, ApiError>;

  /// Fetch the raw bytes of a tip image. Returns the bytes and the
  /// response content type.
  async fn fetch_image(&self, url: &str) -> Result<(Vec<u8>, String), ApiError>;
}

/// HTTP implementation of the content-fetch seam.
pub struct HttpContentApi {
  client: reqwest::Client,
  base_url: Url,
}

impl HttpContentApi {
  pub fn new(base_url: &str) -> Result<Self, ApiError> {
    let base_url =
      Url::parse(base_url).map_err(|e| ApiError::Rejected(format!("invalid base url: {}", e)))?;

    Ok(Self {
      client: reqwest::Client::new(),
      base_url,
    })
  }

  fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
    self
      .base_url
      .join(path)
      .map_err(|e| ApiError::Rejected(format!("invalid endpoint {}: {}", path, e)))
  }
}

#[async_trait]
impl ContentApi for HttpContentApi {
  async fn fetch_tips(&self) -> Result<Vec<TipSource>, ApiError> {
    let url = self.endpoint("tips")?;

    let response = self
      .client
      .get(url)
      .send()
      .await
      .map_err(ApiError::from_transport)?
      .error_for_status()
      .map_err(ApiError::from_transport)?;

    response
      .json::<Vec<TipSource>>()
      .await
      .map_err(ApiError::from_transport)
  }

  async fn fetch_image(&self, url: &str) -> Result<(Vec<u8>, String), ApiError> {
    let url =
      Url::parse(url).map_err(|e| ApiError::Rejected(format!("invalid image url: {}", e)))?;

    let response = self
      .client
      .get(url)
      .send()
      .await
      .map_err(ApiError::from_transport)?
      .error_for_status()
      .map_err(ApiError::from_transport)?;

    let content_type = response
      .headers()
      .get(reqwest::header::CONTENT_TYPE)
      .and_then(|v| v.to_str().ok())
      .unwrap_or("application/octet-stream")
      .to_string();

    let bytes = response
      .bytes()
      .await
      .map_err(ApiError::from_transport)?
      .to_vec();

    Ok((bytes, content_type))
  }
}

/// Handle over the platform's online/offline signal.
///
/// The hosting environment feeds transitions in through [`set_online`];
/// the sync manager and the outbox watch the channel for changes and read
/// the current value before every network-touching step.
///
/// [`set_online`]: ConnectivityMonitor::set_online
#[derive(Clone)]
pub struct ConnectivityMonitor {
  tx: Arc<watch::Sender<bool>>,
}

impl ConnectivityMonitor {
  pub fn new(initially_online: bool) -> Self {
    let (tx, _rx) = watch::channel(initially_online);
    Self { tx: Arc::new(tx) }
  }

  /// Record a connectivity transition. Repeated reports of the same state
  /// do not wake watchers.
  pub fn set_online(&self, online: bool) {
    self.tx.send_if_modified(|current| {
      if *current != online {
        *current = online;
        true
      } else {
        false
      }
    });
  }

  pub fn is_online(&self) -> bool {
    *self.tx.borrow()
  }

  pub fn subscribe(&self) -> watch::Receiver<bool> {
    self.tx.subscribe()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn transitions_wake_subscribers_once() {
    let monitor = ConnectivityMonitor::new(false);
    let mut rx = monitor.subscribe();

    monitor.set_online(true);
    assert!(rx.has_changed().unwrap());
    rx.borrow_and_update();

    // Same state again is not a transition
    monitor.set_online(true);
    assert!(!rx.has_changed().unwrap());

    assert!(monitor.is_online());
  }

  #[test]
  fn tip_source_tolerates_missing_counts() {
    let tip: TipSource = serde_json::from_str(
      r#"{"id":"t1","title":"Hydration","body":"...","category":"nutrition",
          "published_at":"2025-06-01T00:00:00Z"}"#,
    )
    .unwrap();
    assert_eq!(tip.views, 0);
    assert_eq!(tip.likes, 0);
    assert!(tip.image_url.is_none());
  }
}
