//! Bounded LRU caches for encoded artifacts.
//!
//! Two independent caches share one implementation:
//!
//! - [`PreviewCache`] keyed by `(study, series, image)`, holding encoded
//!   preview JPEGs. Large, since previews are small and requested often.
//! - [`VolumeCache`] keyed by `(study, orientation, index)`, holding encoded
//!   reconstructed slices. Small, since each entry is cheap to store but the
//!   cache mostly absorbs repeated scrolling over the same slices.
//!
//! Entries are pure caches of durable state. Capacity is a bound on the number
//! of entries; inserting into a full cache evicts the least-recently-used
//! entry. Each cache has a single mutex around its LRU list and byte counter.

use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::Arc;

use bytes::Bytes;
use lru::LruCache;
use serde::Serialize;
use tokio::sync::Mutex;

use super::volume::Orientation;

/// Default number of preview entries.
pub const DEFAULT_PREVIEW_CACHE_CAPACITY: usize = 1024;

/// Default number of reconstructed-slice entries.
pub const DEFAULT_VOLUME_CACHE_CAPACITY: usize = 64;

// =============================================================================
// Cache Keys
// =============================================================================

/// Keys that belong to a study, so a study's entries can be invalidated together.
pub trait StudyScoped {
    fn study_id(&self) -> &str;
}

/// Cache key for preview artifacts.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PreviewKey {
    pub study_id: Arc<str>,
    pub series_key: Arc<str>,
    pub image_key: Arc<str>,
}

impl PreviewKey {
    pub fn new(
        study_id: impl Into<Arc<str>>,
        series_key: impl Into<Arc<str>>,
        image_key: impl Into<Arc<str>>,
    ) -> Self {
        Self {
            study_id: study_id.into(),
            series_key: series_key.into(),
            image_key: image_key.into(),
        }
    }
}

impl StudyScoped for PreviewKey {
    fn study_id(&self) -> &str {
        &self.study_id
    }
}

/// Cache key for reconstructed slices.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VolumeKey {
    pub study_id: Arc<str>,
    pub orientation: Orientation,
    pub index: usize,
}

impl VolumeKey {
    pub fn new(study_id: impl Into<Arc<str>>, orientation: Orientation, index: usize) -> Self {
        Self {
            study_id: study_id.into(),
            orientation,
            index,
        }
    }
}

impl StudyScoped for VolumeKey {
    fn study_id(&self) -> &str {
        &self.study_id
    }
}

// =============================================================================
// Artifact Cache
// =============================================================================

struct Inner<K: Hash + Eq> {
    entries: LruCache<K, Bytes>,
    bytes: usize,
}

/// Entry-bounded LRU cache of encoded bytes.
///
/// # Thread Safety
///
/// Safe to share across tasks via `Arc`; every operation takes the cache's
/// single mutex, so concurrent `get`/`put` never double-count capacity.
pub struct ArtifactCache<K: Hash + Eq> {
    inner: Mutex<Inner<K>>,
    capacity: NonZeroUsize,
}

/// Preview artifact cache.
pub type PreviewCache = ArtifactCache<PreviewKey>;

/// Reconstructed slice cache.
pub type VolumeCache = ArtifactCache<VolumeKey>;

/// Point-in-time cache statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Number of cached entries
    pub entries: usize,

    /// Maximum number of entries
    pub capacity: usize,

    /// Total size of cached data in bytes
    pub bytes: usize,
}

impl<K: Hash + Eq + Clone + StudyScoped> ArtifactCache<K> {
    /// Create a cache holding at most `capacity` entries (minimum 1).
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::new(capacity),
                bytes: 0,
            }),
            capacity,
        }
    }

    /// Get an entry, marking it as recently used.
    pub async fn get(&self, key: &K) -> Option<Bytes> {
        let mut inner = self.inner.lock().await;
        inner.entries.get(key).cloned()
    }

    /// Check presence without updating LRU order.
    pub async fn contains(&self, key: &K) -> bool {
        let inner = self.inner.lock().await;
        inner.entries.contains(key)
    }

    /// Insert or replace an entry, evicting the LRU entry when full.
    pub async fn put(&self, key: K, data: Bytes) {
        let size = data.len();
        let mut inner = self.inner.lock().await;

        if let Some((_, replaced)) = inner.entries.push(key, data) {
            // `push` returns either the old value for this key or the evicted LRU entry
            inner.bytes = inner.bytes.saturating_sub(replaced.len());
        }
        inner.bytes += size;
    }

    /// Remove an entry.
    pub async fn remove(&self, key: &K) -> Option<Bytes> {
        let mut inner = self.inner.lock().await;
        let removed = inner.entries.pop(key);
        if let Some(ref data) = removed {
            inner.bytes = inner.bytes.saturating_sub(data.len());
        }
        removed
    }

    /// Remove every entry belonging to a study. Returns the number removed.
    pub async fn invalidate_study(&self, study_id: &str) -> usize {
        let mut inner = self.inner.lock().await;
        let doomed: Vec<K> = inner
            .entries
            .iter()
            .filter(|(key, _)| key.study_id() == study_id)
            .map(|(key, _)| key.clone())
            .collect();

        for key in &doomed {
            if let Some(data) = inner.entries.pop(key) {
                inner.bytes = inner.bytes.saturating_sub(data.len());
            }
        }
        doomed.len()
    }

    /// Clear all entries.
    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        inner.entries.clear();
        inner.bytes = 0;
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.entries.is_empty()
    }

    /// Maximum number of entries.
    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    pub async fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().await;
        CacheStats {
            entries: inner.entries.len(),
            capacity: self.capacity.get(),
            bytes: inner.bytes,
        }
    }
}
