//! Voter Gateway - Read-only Voter Lookup Service
//!
//! Resolves a person's identifying number to a locally held roster record and
//! a polling-site assignment kept in an external Postgres store, and merges
//! both into one answer. The external store may be slow, unreachable or down;
//! lookups then degrade to local-only results instead of failing. Every
//! lookup is recorded in an audit trail.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  Consumers: coordinators' web/mobile clients                    │
//! └─────────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                   REST API (axum)                               │
//! │           bearer sessions, admin-only audit route               │
//! └─────────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                  LookupCoordinator                              │
//! │        merge policy, name search, audit on every call           │
//! └─────────────────────────────────────────────────────────────────┘
//!          │                    │                       │
//!          ▼                    ▼                       ▼
//! ┌────────────────┐  ┌───────────────────┐   ┌──────────────────┐
//! │   LocalIndex   │  │    ResultCache    │   │     AuditLog     │
//! │ (JSON roster)  │  │   (TTL, +/- hits) │   │ (append-only)    │
//! └────────────────┘  └───────────────────┘   └──────────────────┘
//!                               │
//!                               ▼
//!                  ┌──────────────────────────┐
//!                  │   ExternalStoreClient    │
//!                  │ retry, health probe, PG  │
//!                  └──────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use voter_gateway::{
//!     AuditLog, ExternalStoreClient, GatewayConfig, LocalIndex, LookupCoordinator,
//!     PgSiteStore, ResultCache, RetryPolicy,
//! };
//!
//! let config = GatewayConfig::load()?;
//! let index = Arc::new(LocalIndex::load(&config.data.people_path)?);
//!
//! let store = Arc::new(PgSiteStore::new(config.store.clone()));
//! let client = Arc::new(ExternalStoreClient::new(store, RetryPolicy::from(&config.store)));
//! client.connect().await;
//!
//! let coordinator = LookupCoordinator::new(
//!     index,
//!     client,
//!     Arc::new(ResultCache::from_config(&config.cache)),
//!     Arc::new(AuditLog::in_memory()),
//! );
//! let result = coordinator.resolve("1046346406", &caller).await?;
//! ```

pub mod audit;
pub mod cache;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod index;
pub mod model;
#[cfg(feature = "server")]
pub mod server;
pub mod store;

// Re-export main types
pub use audit::{AuditEntry, AuditFilter, AuditLog, LookupEvent};
pub use cache::{CacheStats, ResultCache};
pub use config::GatewayConfig;
pub use coordinator::{LookupCoordinator, LookupStatus, PersonWithSite, MIN_NAME_FRAGMENT_LEN};
pub use error::{GatewayError, GatewayResult, StoreError};
pub use index::{LoadReport, LocalIndex};
pub use model::{
    CallerIdentity, MergedResult, PersonRecord, Provenance, QueryKind, SiteAssignment,
};
#[cfg(feature = "database")]
pub use store::PgSiteStore;
pub use store::{
    ConnectionState, ExternalStoreClient, MemorySiteStore, PoolStats, QueryStats, RetryPolicy,
    SiteStore,
};
