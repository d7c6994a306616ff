//! Analysis cache - LRU + TTL store keyed by content signatures.
//!
//! Every analysis is stored under both its exact and its fuzzy signature, so
//! structurally similar events hit as well. Capacity counts slots, which means
//! one analysis can occupy two of them.

use super::signature::Signatures;
use lru::LruCache;
use serde::Serialize;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use telewatch_common::{Analysis, MonitorEvent};
use tracing::debug;

/// A cached analysis with its bookkeeping
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub analysis: Arc<Analysis>,
    pub inserted_at: Instant,
    pub hit_count: u64,
}

/// Cache counters for status output
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub total_requests: u64,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate_percent: f64,
    pub entries: usize,
    pub max_entries: usize,
}

pub struct AnalysisCache {
    entries: LruCache<String, CacheEntry>,
    max_entries: usize,
    ttl: Duration,
    hits: u64,
    misses: u64,
}

impl AnalysisCache {
    pub fn new(max_entries: usize, ttl_seconds: u64) -> Self {
        Self::with_ttl(max_entries, Duration::from_secs(ttl_seconds))
    }

    pub fn with_ttl(max_entries: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(max_entries.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
            max_entries: capacity.get(),
            ttl,
            hits: 0,
            misses: 0,
        }
    }

    /// Look up by exact signature, then by fuzzy signature
    pub fn get(&mut self, event: &MonitorEvent) -> Option<Arc<Analysis>> {
        let sigs = Signatures::compute(&event.source, &event.content);

        let found = self
            .lookup(&sigs.exact)
            .or_else(|| self.lookup(&sigs.fuzzy));
        self.count(found.is_some());
        found
    }

    /// Store under both signatures
    pub fn put(&mut self, event: &MonitorEvent, analysis: Arc<Analysis>) {
        let sigs = Signatures::compute(&event.source, &event.content);
        self.put_signature(&sigs.exact, Arc::clone(&analysis));
        self.put_signature(&sigs.fuzzy, analysis);
    }

    /// Slot-level lookup
    pub fn get_signature(&mut self, signature: &str) -> Option<Arc<Analysis>> {
        let found = self.lookup(signature);
        self.count(found.is_some());
        found
    }

    /// Slot-level insert; evicts the least recently used slot when full
    pub fn put_signature(&mut self, signature: &str, analysis: Arc<Analysis>) {
        let entry = CacheEntry {
            analysis,
            inserted_at: Instant::now(),
            hit_count: 0,
        };
        if let Some((evicted, _)) = self.entries.push(signature.to_string(), entry) {
            if evicted != signature {
                debug!(signature = %evicted, "Evicted least recently used cache slot");
            }
        }
    }

    /// Presence check that neither promotes nor counts
    pub fn contains_signature(&self, signature: &str) -> bool {
        self.entries.contains(signature)
    }

    pub fn hit_count(&self, signature: &str) -> Option<u64> {
        self.entries.peek(signature).map(|e| e.hit_count)
    }

    /// Drop every slot older than the TTL, returning how many were removed
    pub fn evict_expired(&mut self) -> usize {
        let now = Instant::now();
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| now.duration_since(entry.inserted_at) > self.ttl)
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            self.entries.pop(key);
        }
        expired.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.hits = 0;
        self.misses = 0;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        let total = self.hits + self.misses;
        let hit_rate = if total > 0 {
            (self.hits as f64 / total as f64 * 1000.0).round() / 10.0
        } else {
            0.0
        };
        CacheStats {
            total_requests: total,
            hits: self.hits,
            misses: self.misses,
            hit_rate_percent: hit_rate,
            entries: self.entries.len(),
            max_entries: self.max_entries,
        }
    }

    /// Promote and count a live slot; expired slots are removed
    fn lookup(&mut self, signature: &str) -> Option<Arc<Analysis>> {
        let ttl = self.ttl;
        let expired = match self.entries.get_mut(signature) {
            None => return None,
            Some(entry) if entry.inserted_at.elapsed() > ttl => true,
            Some(entry) => {
                entry.hit_count += 1;
                return Some(Arc::clone(&entry.analysis));
            }
        };

        if expired {
            self.entries.pop(signature);
            debug!(signature, "Expired cache slot removed");
        }
        None
    }

    fn count(&mut self, hit: bool) {
        if hit {
            self.hits += 1;
        } else {
            self.misses += 1;
        }
    }
}
