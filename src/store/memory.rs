//! In-memory `SiteStore` with fault injection
//!
//! Used by tests and local development. Reachability, dropped connections and
//! failing statements can all be switched on from the outside.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};

use async_trait::async_trait;

use crate::error::StoreError;
use crate::model::SiteAssignment;
use crate::store::traits::{PoolStats, SiteStore};

/// In-memory site store.
///
/// ```rust,ignore
/// let store = MemorySiteStore::new().with_site("123", SiteAssignment::default());
/// store.fail_next_connects(2);   // two refused connects, then success
/// store.drop_connection();       // pool dies silently
/// store.set_reachable(false);    // server down
/// ```
pub struct MemorySiteStore {
    sites: RwLock<HashMap<String, SiteAssignment>>,
    reachable: AtomicBool,
    connected: AtomicBool,
    table_present: AtomicBool,
    connect_failures: AtomicU32,
    query_failures: AtomicU32,
    connect_calls: AtomicU32,
    queries: Mutex<HashMap<String, u32>>,
    total_queries: AtomicU32,
}

impl MemorySiteStore {
    pub fn new() -> Self {
        Self {
            sites: RwLock::new(HashMap::new()),
            reachable: AtomicBool::new(true),
            connected: AtomicBool::new(false),
            table_present: AtomicBool::new(true),
            connect_failures: AtomicU32::new(0),
            query_failures: AtomicU32::new(0),
            connect_calls: AtomicU32::new(0),
            queries: Mutex::new(HashMap::new()),
            total_queries: AtomicU32::new(0),
        }
    }

    /// Add a site assignment (builder form).
    pub fn with_site(self, number: impl Into<String>, site: SiteAssignment) -> Self {
        self.insert(number, site);
        self
    }

    pub fn insert(&self, number: impl Into<String>, site: SiteAssignment) {
        self.sites
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(number.into(), site);
    }

    pub fn remove(&self, number: &str) {
        self.sites
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(number);
    }

    /// Server up/down. Going down also drops the current connection.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
        if !reachable {
            self.connected.store(false, Ordering::SeqCst);
        }
    }

    /// Lose the current connection without telling anyone.
    pub fn drop_connection(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    pub fn set_table_present(&self, present: bool) {
        self.table_present.store(present, Ordering::SeqCst);
    }

    /// Refuse the next `n` connect calls.
    pub fn fail_next_connects(&self, n: u32) {
        self.connect_failures.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` lookups with a statement (non-connection) error.
    pub fn fail_next_queries(&self, n: u32) {
        self.query_failures.store(n, Ordering::SeqCst);
    }

    pub fn connect_calls(&self) -> u32 {
        self.connect_calls.load(Ordering::SeqCst)
    }

    /// Lookups that reached the store, including failed ones
    pub fn total_queries(&self) -> u32 {
        self.total_queries.load(Ordering::SeqCst)
    }

    /// Single-number lookups that reached the store for `number`
    pub fn queries_for(&self, number: &str) -> u32 {
        self.queries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(number)
            .copied()
            .unwrap_or(0)
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn check_live(&self) -> Result<(), StoreError> {
        if !self.reachable.load(Ordering::SeqCst) {
            self.connected.store(false, Ordering::SeqCst);
            return Err(StoreError::Connection("connection refused".to_string()));
        }
        if !self.connected.load(Ordering::SeqCst) {
            return Err(StoreError::Connection("connection terminated".to_string()));
        }
        if Self::take_failure(&self.query_failures) {
            return Err(StoreError::Query("statement failed".to_string()));
        }
        Ok(())
    }
}

impl Default for MemorySiteStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SiteStore for MemorySiteStore {
    async fn connect(&self) -> Result<(), StoreError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        if !self.reachable.load(Ordering::SeqCst) || Self::take_failure(&self.connect_failures) {
            return Err(StoreError::Connection("connection refused".to_string()));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        if self.reachable.load(Ordering::SeqCst) && self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Connection("connection terminated".to_string()))
        }
    }

    async fn table_exists(&self) -> Result<bool, StoreError> {
        self.ping().await?;
        Ok(self.table_present.load(Ordering::SeqCst))
    }

    async fn fetch_one(&self, number: &str) -> Result<Option<SiteAssignment>, StoreError> {
        self.total_queries.fetch_add(1, Ordering::SeqCst);
        *self
            .queries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(number.to_string())
            .or_insert(0) += 1;

        self.check_live()?;

        Ok(self
            .sites
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(number)
            .cloned())
    }

    async fn fetch_many(
        &self,
        numbers: &[String],
    ) -> Result<HashMap<String, SiteAssignment>, StoreError> {
        self.total_queries.fetch_add(1, Ordering::SeqCst);
        self.check_live()?;

        let sites = self.sites.read().unwrap_or_else(PoisonError::into_inner);
        Ok(numbers
            .iter()
            .filter_map(|n| sites.get(n).map(|s| (n.clone(), s.clone())))
            .collect())
    }

    fn pool_stats(&self) -> PoolStats {
        if self.connected.load(Ordering::SeqCst) {
            PoolStats { size: 1, idle: 1 }
        } else {
            PoolStats::default()
        }
    }

    async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}
