//! Time-bounded response cache.
//!
//! Keyed by [`SearchParams::cache_key`](crate::SearchParams::cache_key).
//! Expired entries are treated as absent and dropped on lookup; nothing
//! sweeps in the background, so memory grows with the number of distinct
//! parameter sets seen by one client.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::Listing;

/// Cached listings and when they were written.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Cached payload.
    pub listings: Vec<Listing>,
    /// Write time.
    pub written_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, ttl: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.written_at) > ttl
    }
}

/// Listing cache with lazy TTL eviction.
#[derive(Debug)]
pub struct ResponseCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl ResponseCache {
    /// Creates an empty cache.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the entry lifetime.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the cached listings, or `None` when absent or expired.
    pub async fn get(&self, key: &str) -> Option<Vec<Listing>> {
        let now = Instant::now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if !entry.is_expired(self.ttl, now) => {
                    return Some(entry.listings.clone())
                }
                Some(_) => {}
                None => return None,
            }
        }

        let mut entries = self.entries.write().await;
        if entries
            .get(key)
            .is_some_and(|entry| entry.is_expired(self.ttl, now))
        {
            entries.remove(key);
        }
        None
    }

    /// Stores listings, replacing any previous entry.
    pub async fn set(&self, key: impl Into<String>, listings: Vec<Listing>) {
        let entry = CacheEntry {
            listings,
            written_at: Instant::now(),
        };
        self.entries.write().await.insert(key.into(), entry);
    }

    /// Drops one entry.
    pub async fn invalidate(&self, key: &str) {
        self.entries.write().await.remove(key);
    }

    /// Drops every entry.
    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    /// Number of stored entries, expired ones included.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Returns whether nothing is stored.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
