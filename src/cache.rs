//! Time-bounded memoization of site-store lookups
//!
//! Both outcomes are cached: a site assignment and an explicit "not found".
//! Caching the negative answer keeps repeated lookups of unknown numbers off
//! the store, at the cost of hiding a newly added row until the entry
//! expires. Store failures are never cached.
//!
//! Entries are checked on every read (an expired entry is deleted, never
//! returned) and a background sweep can remove expired entries independent
//! of traffic.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::CacheConfig;
use crate::error::GatewayResult;
use crate::model::SiteAssignment;

/// A cached outcome and when it was stored
#[derive(Debug, Clone)]
struct CacheEntry {
    /// `None` records an explicit "not found"
    site: Option<SiteAssignment>,
    inserted_at: Instant,
}

impl CacheEntry {
    fn is_fresh(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.inserted_at) < timeout
    }
}

/// Cache statistics for monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub enabled: bool,
    pub size: usize,
    pub hits: u64,
    pub misses: u64,
    pub timeout_secs: u64,
}

/// Site-lookup cache keyed by identifying number
pub struct ResultCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    timeout: Duration,
    enabled: bool,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResultCache {
    pub fn new(timeout: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            timeout,
            enabled: true,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self {
            enabled: config.enabled,
            ..Self::new(config.timeout())
        }
    }

    /// A pass-through cache that never stores anything
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::new(Duration::ZERO)
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Cached outcome for `number`, if fresh.
    ///
    /// `Some(None)` is a cached "not found". An expired entry is removed and
    /// reported as a miss.
    pub fn get(&self, number: &str) -> Option<Option<SiteAssignment>> {
        if !self.enabled {
            return None;
        }
        let now = Instant::now();
        {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            match entries.get(number) {
                None => return None,
                Some(entry) if entry.is_fresh(now, self.timeout) => return Some(entry.site.clone()),
                Some(_) => {}
            }
        }

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        // re-check: a writer may have refreshed the entry in between
        match entries.get(number) {
            Some(entry) if entry.is_fresh(now, self.timeout) => Some(entry.site.clone()),
            Some(_) => {
                entries.remove(number);
                tracing::debug!(id = %number, "Cache entry expired");
                None
            }
            None => None,
        }
    }

    /// Store an outcome with a fresh timestamp
    pub fn insert(&self, number: impl Into<String>, site: Option<SiteAssignment>) {
        if !self.enabled {
            return;
        }
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                number.into(),
                CacheEntry {
                    site,
                    inserted_at: Instant::now(),
                },
            );
    }

    /// Record a hit served outside `get_or_fetch` (batched lookups).
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Return the cached outcome, or call `fetch`, cache what it returns and return that.
    ///
    /// Errors from `fetch` pass through uncached.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        number: &str,
        fetch: F,
    ) -> GatewayResult<Option<SiteAssignment>>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = GatewayResult<Option<SiteAssignment>>>,
    {
        if let Some(cached) = self.get(number) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(id = %number, found = cached.is_some(), "Cache hit");
            return Ok(cached);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let outcome = fetch(number.to_string()).await?;
        self.insert(number, outcome.clone());
        Ok(outcome)
    }

    /// Remove every expired entry. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, entry| entry.is_fresh(now, self.timeout));
        let removed = before - entries.len();
        if removed > 0 {
            tracing::debug!(removed, remaining = entries.len(), "Cache swept");
        }
        removed
    }

    /// Spawn a task that sweeps every `interval`
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                cache.sweep();
            }
        })
    }

    /// Entries currently held, expired ones included until swept or read
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            enabled: self.enabled,
            size: self.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            timeout_secs: self.timeout.as_secs(),
        }
    }
}
