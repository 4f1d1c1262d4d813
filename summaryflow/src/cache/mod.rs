//! Content-addressed result cache with single-flight computation.
//!
//! Concurrent requests for the same fingerprint share one computation.
//! Failed computations are not cached, so the next request retries.
//! Entries can carry a time-to-live and the cache a size bound.

use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;
use tracing::debug;

use crate::context::SummaryPreferences;

/// Fingerprints a document and the preferences it is summarized with.
#[must_use]
pub fn fingerprint(text: &str, preferences: &SummaryPreferences) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hasher.update([0u8]);
    hasher.update(preferences.to_record().to_string().as_bytes());
    let digest = hasher.finalize();
    format!("sum:{}", hex::encode(&digest[..16]))
}

/// A computed value and when it was stored.
#[derive(Debug)]
struct Cached<V> {
    value: V,
    stored_at: Instant,
}

/// A cache of computed values keyed by fingerprint.
///
/// Entries older than the TTL are dropped when looked up. When more than
/// `max_entries` values are computed, the oldest are evicted.
#[derive(Debug)]
pub struct SummaryCache<V> {
    cells: DashMap<String, Arc<OnceCell<Cached<V>>>>,
    ttl: Option<Duration>,
    max_entries: Option<usize>,
}

impl<V> Default for SummaryCache<V> {
    fn default() -> Self {
        Self {
            cells: DashMap::new(),
            ttl: None,
            max_entries: None,
        }
    }
}

impl<V: Clone> SummaryCache<V> {
    /// Creates an unbounded cache with no expiry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets how long a computed value stays valid.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Caps the number of computed values kept.
    #[must_use]
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = Some(max_entries.max(1));
        self
    }

    /// Returns the cached value for `key`, if computed and not expired.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<V> {
        self.evict_if_expired(key);
        self.cells
            .get(key)
            .and_then(|cell| cell.get().map(|cached| cached.value.clone()))
    }

    /// Returns the cached value or computes it.
    ///
    /// The flag in the result is true when the value came from the cache or
    /// from a computation started by another caller.
    ///
    /// # Errors
    ///
    /// Returns the computation's error; nothing is cached in that case.
    pub async fn get_or_try_compute<F, Fut, E>(&self, key: &str, compute: F) -> Result<(V, bool), E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        self.evict_if_expired(key);
        let cell = self.cells.entry(key.to_string()).or_default().clone();

        let mut computed_here = false;
        let result = cell
            .get_or_try_init(|| {
                computed_here = true;
                async move {
                    compute().await.map(|value| Cached {
                        value,
                        stored_at: Instant::now(),
                    })
                }
            })
            .await
            .map(|cached| cached.value.clone());

        match result {
            Ok(value) => {
                debug!(key, hit = !computed_here, "Summary cache lookup");
                if computed_here {
                    self.enforce_capacity();
                }
                Ok((value, !computed_here))
            }
            Err(err) => {
                self.cells
                    .remove_if(key, |_, cell| cell.get().is_none());
                Err(err)
            }
        }
    }

    /// Removes one entry.
    pub fn invalidate(&self, key: &str) {
        self.cells.remove(key);
    }

    /// Removes every entry.
    pub fn clear(&self) {
        self.cells.clear();
    }

    /// Returns the number of computed entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cells.iter().filter(|entry| entry.value().initialized()).count()
    }

    /// Returns true if nothing has been computed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_expired(&self, cached: &Cached<V>) -> bool {
        self.ttl
            .is_some_and(|ttl| cached.stored_at.elapsed() >= ttl)
    }

    fn evict_if_expired(&self, key: &str) {
        let removed = self.cells.remove_if(key, |_, cell| {
            cell.get().is_some_and(|cached| self.is_expired(cached))
        });
        if removed.is_some() {
            debug!(key, "Summary cache entry expired");
        }
    }

    fn enforce_capacity(&self) {
        let Some(max) = self.max_entries else {
            return;
        };
        while self.len() > max {
            let oldest = self
                .cells
                .iter()
                .filter_map(|entry| {
                    entry
                        .value()
                        .get()
                        .map(|cached| (cached.stored_at, entry.key().clone()))
                })
                .min();
            let Some((_, key)) = oldest else {
                return;
            };
            self.cells.remove(&key);
            debug!(key = %key, "Summary cache entry evicted");
        }
    }
}
