//! External site-assignment store
//!
//! `SiteStore` abstracts the backend so the connection state machine in
//! `ExternalStoreClient` can be exercised against `MemorySiteStore` in tests
//! and run against Postgres (`PgSiteStore`) in production.
//!
//! ```text
//!            connect ok
//! Disconnected ──────────► Connected
//!   ▲   │  ▲                  │
//!   │   │  └──────────────────┘ ping fails / connection-class query error
//!   │   │ attempts exhausted
//!   │   ▼
//!   └─ Degraded ◄── next health probe or explicit connect() starts over
//! ```

mod client;
mod memory;
#[cfg(feature = "database")]
mod postgres;
mod traits;

pub use client::{ConnectionState, ExternalStoreClient, QueryStats, RetryPolicy};
pub use memory::MemorySiteStore;
#[cfg(feature = "database")]
pub use postgres::PgSiteStore;
pub use traits::{PoolStats, SiteStore};
