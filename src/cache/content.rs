//! Cache manager for tips, images and sync metadata.

use chrono::{DateTime, Utc};
use color_eyre::Result;
use std::sync::Arc;
use tracing::debug;

use super::types::{CachedImage, CachedTip, SyncMetadata, SyncOutcome};
use crate::config::CacheConfig;
use crate::remote::TipSource;
use crate::store::Store;

/// Result of one `cache_tips` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheReport {
  pub cached_count: usize,
}

/// Bounded offline cache of community content.
///
/// All writes go through [`Store`]; the cache never holds content in
/// memory between calls.
pub struct ContentCache {
  store: Arc<Store>,
  config: CacheConfig,
}

impl ContentCache {
  pub fn new(store: Arc<Store>, config: CacheConfig) -> Self {
    Self { store, config }
  }

  /// Score and upsert a batch of tips, then enforce cache limits.
  ///
  /// Caching the same tip id again replaces the stored record whole;
  /// there are no partial updates.
  pub fn cache_tips(&self, sources: &[TipSource]) -> Result<CacheReport> {
    let now = Utc::now();
    let tips: Vec<CachedTip> = sources
      .iter()
      .map(|source| CachedTip::from_source(source, now))
      .collect();

    let cached_count = self.store.put_many(&tips)?;
    self.enforce_cache_limits()?;

    Ok(CacheReport { cached_count })
  }

  /// All cached tips, highest ranking score first. Callers that need
  /// chronological order re-sort themselves.
  pub fn cached_tips(&self) -> Result<Vec<CachedTip>> {
    let mut tips = self.store.get_all::<CachedTip>()?;
    tips.sort_by(|a, b| b.ranking_score.cmp(&a.ranking_score).then(a.id.cmp(&b.id)));
    Ok(tips)
  }

  pub fn cached_tips_by_category(&self, category: &str) -> Result<Vec<CachedTip>> {
    self.store.get_by_index("category", category)
  }

  pub fn cached_tip(&self, id: &str) -> Result<Option<CachedTip>> {
    self.store.get(id)
  }

  /// Cache an image, best-effort. Returns whether it was stored: an image
  /// over the per-item ceiling, or one that would push the cache over its
  /// byte budget, is skipped without failing the owning tip.
  pub fn cache_image(&self, url: &str, bytes: Vec<u8>, content_type: &str) -> Result<bool> {
    let size = bytes.len() as u64;
    if size > self.config.max_image_bytes {
      debug!(url, size, "image over per-item ceiling, not caching");
      return Ok(false);
    }
    if self.would_exceed_limit(size)? {
      debug!(url, size, "image would exceed cache budget, not caching");
      return Ok(false);
    }

    let image = CachedImage::new(url, bytes, content_type, Utc::now());
    self.store.put(&image)?;
    Ok(true)
  }

  pub fn cached_image(&self, url: &str) -> Result<Option<CachedImage>> {
    self.store.get(&CachedImage::cache_key_for(url))
  }

  /// Cached image rendered as a `data:` URL, if present.
  pub fn cached_image_data_url(&self, url: &str) -> Result<Option<String>> {
    Ok(self.cached_image(url)?.map(|image| image.to_data_url()))
  }

  /// Total byte footprint of cached tips and images.
  pub fn cache_size(&self) -> Result<u64> {
    let tip_bytes: u64 = self
      .store
      .get_all::<CachedTip>()?
      .iter()
      .map(|tip| tip.footprint_bytes())
      .sum();
    let image_bytes: u64 = self
      .store
      .get_all::<CachedImage>()?
      .iter()
      .map(|image| image.byte_size)
      .sum();

    Ok(tip_bytes + image_bytes)
  }

  pub fn would_exceed_limit(&self, candidate_bytes: u64) -> Result<bool> {
    Ok(self.cache_size()? + candidate_bytes > self.config.max_cache_bytes)
  }

  /// Evict tips in ascending ranking-score order until at least
  /// `bytes_to_free` bytes are freed or the cache is empty. Removing a tip
  /// also removes its image. Returns the bytes actually freed.
  pub fn purge_lowest_ranked(&self, bytes_to_free: u64) -> Result<u64> {
    let mut tips = self.store.get_all::<CachedTip>()?;
    tips.sort_by(|a, b| a.ranking_score.cmp(&b.ranking_score).then(a.id.cmp(&b.id)));

    let mut freed = 0u64;
    for tip in tips {
      if freed >= bytes_to_free {
        break;
      }
      freed += self.remove_tip(&tip)?;
    }

    if freed > 0 {
      debug!(freed, "evicted low-scoring content");
    }

    Ok(freed)
  }

  /// Apply the item-count ceiling and the byte budget, evicting the
  /// lowest-scored tips as needed. Invoked after every cache write.
  pub fn enforce_cache_limits(&self) -> Result<()> {
    // Item ceiling applies even under the byte budget
    let mut tips = self.store.get_all::<CachedTip>()?;
    if tips.len() > self.config.max_items {
      tips.sort_by(|a, b| a.ranking_score.cmp(&b.ranking_score).then(a.id.cmp(&b.id)));
      let excess = tips.len() - self.config.max_items;
      for tip in tips.iter().take(excess) {
        self.remove_tip(tip)?;
      }
      debug!(excess, "trimmed cache to item ceiling");
    }

    let size = self.cache_size()?;
    if size > self.config.max_cache_bytes {
      self.purge_lowest_ranked(size - self.config.max_cache_bytes)?;
    }

    Ok(())
  }

  /// Whether the cache is older than the configured staleness threshold.
  /// No recorded sync counts as stale.
  pub fn is_stale(&self) -> Result<bool> {
    match self.last_sync_time()? {
      Some(last) => Ok(Utc::now() - last > self.config.stale_after()),
      None => Ok(true),
    }
  }

  pub fn last_sync_time(&self) -> Result<Option<DateTime<Utc>>> {
    let meta: Option<SyncMetadata> = self.store.get("tips")?;
    Ok(meta.and_then(|m| m.last_sync_time()))
  }

  /// Rewrite the per-category sync record at the end of a sync attempt.
  /// Failures keep the previous last-sync timestamp; only success moves it.
  pub fn record_sync_outcome(
    &self,
    category: &str,
    outcome: SyncOutcome,
    message: Option<String>,
  ) -> Result<()> {
    let previous: Option<SyncMetadata> = self.store.get(category)?;

    let last_sync_at = if outcome == SyncOutcome::Failed {
      previous.and_then(|m| m.last_sync_at)
    } else {
      Some(Utc::now().to_rfc3339())
    };

    let (item_count, total_bytes) = match category {
      "images" => {
        let images = self.store.get_all::<CachedImage>()?;
        (
          images.len() as u64,
          images.iter().map(|i| i.byte_size).sum(),
        )
      }
      _ => {
        let tips = self.store.get_all::<CachedTip>()?;
        (
          tips.len() as u64,
          tips.iter().map(|t| t.footprint_bytes()).sum(),
        )
      }
    };

    self.store.put(&SyncMetadata {
      category: category.to_string(),
      last_sync_at,
      item_count,
      total_bytes,
      outcome,
      message,
    })?;

    Ok(())
  }

  /// Wipe tips, images and metadata. Clears run sequentially; there is no
  /// concurrent writer to observe a partial wipe.
  pub fn clear_all(&self) -> Result<()> {
    self.store.clear::<CachedTip>()?;
    self.store.clear::<CachedImage>()?;
    self.store.clear::<SyncMetadata>()?;
    Ok(())
  }

  fn remove_tip(&self, tip: &CachedTip) -> Result<u64> {
    let mut freed = tip.footprint_bytes();

    if let Some(url) = &tip.image_url {
      if let Some(image) = self.cached_image(url)? {
        freed += image.byte_size;
        self.store.delete::<CachedImage>(&CachedImage::cache_key_for(url))?;
      }
    }

    self.store.delete::<CachedTip>(&tip.id)?;
    Ok(freed)
  }
}
