//! Backend abstraction for the site-assignment store

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::StoreError;
use crate::model::SiteAssignment;

/// Connection pool occupancy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub size: u32,
    pub idle: u32,
}

/// A read-only backend holding site assignments keyed by identifying number.
///
/// Implementations must be Send + Sync; one instance is shared by every request.
#[async_trait]
pub trait SiteStore: Send + Sync {
    /// Open (or reopen) the backend connection pool and prove it answers.
    async fn connect(&self) -> Result<(), StoreError>;

    /// Cheap liveness probe on an established pool.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Whether the configured site-assignment table exists.
    async fn table_exists(&self) -> Result<bool, StoreError>;

    /// Site assignment for one identifying number.
    async fn fetch_one(&self, number: &str) -> Result<Option<SiteAssignment>, StoreError>;

    /// Site assignments for a set of identifying numbers. Numbers without a
    /// row are absent from the map.
    async fn fetch_many(
        &self,
        numbers: &[String],
    ) -> Result<HashMap<String, SiteAssignment>, StoreError>;

    fn pool_stats(&self) -> PoolStats;

    /// Close the pool. Subsequent calls fail until `connect` succeeds again.
    async fn close(&self);
}
