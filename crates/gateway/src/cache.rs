use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::clock::SharedClock;

/// Response cache keyed by query signature.
///
/// Entries live in a sharded map, so lookups and stores on different signatures only
/// contend when they hash to the same shard. The TTL is supplied per store by the caller.
#[derive(Clone)]
pub struct RequestCache {
    entries: Arc<DashMap<String, CachedResponse>>,
    max_entries: usize,
    clock: SharedClock,
}

#[derive(Clone)]
struct CachedResponse {
    value: serde_json::Value,
    expires_at: Instant,
}

impl RequestCache {
    pub fn new(max_entries: usize, clock: SharedClock) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            max_entries,
            clock,
        }
    }

    pub fn enabled(&self) -> bool {
        self.max_entries > 0
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn lookup(&self, signature: &str) -> Option<serde_json::Value> {
        if !self.enabled() {
            return None;
        }

        let now = self.clock.now();
        {
            let entry = self.entries.get(signature)?;
            if entry.expires_at > now {
                return Some(entry.value.clone());
            }
        }

        // The shard guard must be released before removing from the same shard.
        self.entries
            .remove_if(signature, |_, entry| entry.expires_at <= now);
        None
    }

    /// Replaces whatever is stored under `signature`. Concurrent stores resolve as last
    /// writer wins.
    ///
    /// Past `max_entries`, the entries closest to expiry are evicted first (expired ones
    /// before anything live). The entry just stored is never the one evicted.
    pub fn store(&self, signature: impl Into<String>, value: serde_json::Value, ttl: Duration) {
        if !self.enabled() || ttl.is_zero() {
            return;
        }

        let signature = signature.into();
        let expires_at = self.clock.now() + ttl;
        self.entries
            .insert(signature.clone(), CachedResponse { value, expires_at });

        while self.entries.len() > self.max_entries {
            let Some(victim) = self.eviction_candidate(&signature) else {
                break;
            };
            self.entries.remove(&victim);
        }
    }

    fn eviction_candidate(&self, keep: &str) -> Option<String> {
        self.entries
            .iter()
            .filter(|entry| entry.key() != keep)
            .min_by_key(|entry| entry.value().expires_at)
            .map(|entry| entry.key().clone())
    }

    /// Drops expired entries and returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let mut removed = 0;
        self.entries.retain(|_, entry| {
            let keep = entry.expires_at > now;
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }

    pub fn spawn_sweeper(&self, every: Duration) -> tokio::task::JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let removed = cache.sweep();
                if removed > 0 {
                    tracing::debug!(removed, remaining = cache.len(), "cache.sweep");
                }
            }
        })
    }
}
