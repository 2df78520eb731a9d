//! Content cache: a bounded, scored subset of remote community content
//! kept available for offline reads.
//!
//! Tips are cached whole (replace-in-place, never partially updated) with
//! a popularity score that decays with age; images are cached best-effort
//! next to their owning tip. When the byte budget or item ceiling is
//! exceeded, the lowest-scored tips are evicted first, so a high-value old
//! tip can outlive a low-value new one.

mod content;
mod types;

pub use content::{CacheReport, ContentCache};
pub use types::{ranking_score, CachedImage, CachedTip, SyncMetadata, SyncOutcome};
