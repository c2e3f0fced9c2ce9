//! Connection-managing client over a `SiteStore`

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::StoreConfig;
use crate::error::{GatewayError, GatewayResult, StoreError};
use crate::model::{normalize_number, SiteAssignment};
use crate::store::traits::{PoolStats, SiteStore};

/// Connection state of the external store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// The last connect sequence ran out of attempts. A later sequence may still succeed.
    Degraded,
}

impl ConnectionState {
    pub fn is_available(self) -> bool {
        self == ConnectionState::Connected
    }
}

/// Bounded connect policy: `attempts` tries with a fixed `delay` between them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(1),
        }
    }
}

impl From<&StoreConfig> for RetryPolicy {
    fn from(config: &StoreConfig) -> Self {
        Self {
            attempts: config.retry_attempts.max(1),
            delay: config.retry_delay(),
        }
    }
}

/// Query counters, for observability only
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueryStats {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    total: AtomicU64,
    successful: AtomicU64,
    failed: AtomicU64,
}

impl Counters {
    fn begin(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    fn succeed(&self) {
        self.successful.fetch_add(1, Ordering::Relaxed);
    }

    fn fail(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> QueryStats {
        QueryStats {
            total: self.total.load(Ordering::Relaxed),
            successful: self.successful.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Owns the store connection and its state machine.
///
/// Connection failures never escape: lookups degrade to
/// `GatewayError::StoreUnavailable` and the state flips to `Disconnected`, so
/// later lookups skip the store until a connect sequence succeeds. Only one
/// connect sequence runs at a time.
pub struct ExternalStoreClient {
    store: Arc<dyn SiteStore>,
    policy: RetryPolicy,
    state: RwLock<ConnectionState>,
    /// Held for the duration of a connect sequence
    connect_gate: Mutex<()>,
    counters: Counters,
}

impl ExternalStoreClient {
    pub fn new(store: Arc<dyn SiteStore>, policy: RetryPolicy) -> Self {
        Self {
            store,
            policy,
            state: RwLock::new(ConnectionState::Disconnected),
            connect_gate: Mutex::new(()),
            counters: Counters::default(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_available(&self) -> bool {
        self.state().is_available()
    }

    pub fn stats(&self) -> QueryStats {
        self.counters.snapshot()
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.store.pool_stats()
    }

    fn set_state(&self, next: ConnectionState) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if *state != next {
            tracing::debug!(from = ?*state, to = ?next, "Store connection state change");
            *state = next;
        }
    }

    /// Connected → Disconnected. Leaves other states alone so a running
    /// connect sequence is not clobbered.
    fn mark_disconnected(&self) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if *state == ConnectionState::Connected {
            tracing::warn!("Site store connection lost");
            *state = ConnectionState::Disconnected;
        }
    }

    /// Run a connect sequence: up to `policy.attempts` tries with a fixed
    /// delay between them.
    ///
    /// Returns the resulting state: `Connected`, or `Degraded` once attempts are
    /// exhausted. If another sequence is already running this returns the
    /// current state without starting a second one.
    pub async fn connect(&self) -> ConnectionState {
        let Ok(_gate) = self.connect_gate.try_lock() else {
            tracing::debug!("Connect sequence already in progress");
            return self.state();
        };

        let attempts = self.policy.attempts.max(1);
        for attempt in 1..=attempts {
            self.set_state(ConnectionState::Connecting);

            match self.store.connect().await {
                Ok(()) => {
                    self.set_state(ConnectionState::Connected);
                    tracing::info!(attempt, "Connected to site store");
                    self.verify_table().await;
                    return ConnectionState::Connected;
                }
                Err(e) => {
                    self.set_state(ConnectionState::Disconnected);
                    match connect_failure_hint(&e) {
                        Some(hint) => tracing::error!(
                            attempt,
                            attempts,
                            error = %e,
                            hint,
                            "Site store connect attempt failed"
                        ),
                        None => tracing::error!(
                            attempt,
                            attempts,
                            error = %e,
                            "Site store connect attempt failed"
                        ),
                    }
                    if attempt < attempts {
                        tracing::info!(delay_ms = self.policy.delay.as_millis() as u64, "Retrying connect");
                        tokio::time::sleep(self.policy.delay).await;
                    }
                }
            }
        }

        tracing::warn!(attempts, "Site store unavailable, serving local data only");
        self.set_state(ConnectionState::Degraded);
        ConnectionState::Degraded
    }

    /// Check that the site-assignment table exists. Logged, never fatal.
    pub async fn verify_table(&self) -> bool {
        match self.store.table_exists().await {
            Ok(true) => {
                tracing::info!("Site assignment table present");
                true
            }
            Ok(false) => {
                tracing::warn!("Site assignment table missing, lookups will find nothing");
                false
            }
            Err(e) => {
                tracing::error!(error = %e, "Could not verify site assignment table");
                if e.is_connection() {
                    self.mark_disconnected();
                }
                false
            }
        }
    }

    /// One health probe.
    ///
    /// A live connection is pinged; a failed ping, or a client that is not
    /// connected, starts a fresh connect sequence.
    pub async fn health_check(&self) -> ConnectionState {
        match self.state() {
            ConnectionState::Connected => match self.store.ping().await {
                Ok(()) => {
                    tracing::debug!("Site store heartbeat ok");
                    ConnectionState::Connected
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Site store heartbeat failed, reconnecting");
                    self.mark_disconnected();
                    self.connect().await
                }
            },
            ConnectionState::Connecting => ConnectionState::Connecting,
            ConnectionState::Disconnected | ConnectionState::Degraded => {
                tracing::info!("Site store not connected, attempting reconnect");
                self.connect().await
            }
        }
    }

    /// Spawn the periodic health probe. The first probe runs one `interval` after spawning.
    pub fn spawn_health_probe(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let client = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                client.health_check().await;
            }
        })
    }

    /// Site assignment for one identifying number.
    ///
    /// Malformed numbers are rejected with `InvalidQuery` before touching the
    /// store. Every other failure is `StoreUnavailable`; connection-class
    /// failures also flip the client to `Disconnected`.
    pub async fn fetch_by_number(&self, number: &str) -> GatewayResult<Option<SiteAssignment>> {
        let number = normalize_number(number)?;

        self.counters.begin();

        if !self.is_available() {
            self.counters.fail();
            tracing::debug!(id = %number, state = ?self.state(), "Site store not available");
            return Err(GatewayError::StoreUnavailable(
                "site store not connected".to_string(),
            ));
        }

        match self.store.fetch_one(&number).await {
            Ok(site) => {
                self.counters.succeed();
                tracing::debug!(id = %number, found = site.is_some(), "Site store lookup");
                Ok(site)
            }
            Err(e) => Err(self.record_failure(&number, e)),
        }
    }

    /// Site assignments for many identifying numbers in one round trip.
    ///
    /// Blank, malformed and repeated numbers are dropped. Numbers without a
    /// row are absent from the map. Failures are `StoreUnavailable`, as for
    /// single lookups.
    pub async fn fetch_by_numbers(
        &self,
        numbers: &[String],
    ) -> GatewayResult<HashMap<String, SiteAssignment>> {
        let unique: BTreeSet<String> = numbers
            .iter()
            .filter_map(|n| normalize_number(n).ok())
            .collect();
        if unique.is_empty() {
            return Ok(HashMap::new());
        }

        self.counters.begin();

        if !self.is_available() {
            self.counters.fail();
            return Err(GatewayError::StoreUnavailable(
                "site store not connected".to_string(),
            ));
        }

        let unique: Vec<String> = unique.into_iter().collect();
        match self.store.fetch_many(&unique).await {
            Ok(found) => {
                self.counters.succeed();
                tracing::debug!(requested = unique.len(), found = found.len(), "Batched site lookup");
                Ok(found)
            }
            Err(e) => Err(self.record_failure("batch", e)),
        }
    }

    fn record_failure(&self, subject: &str, e: StoreError) -> GatewayError {
        self.counters.fail();
        tracing::error!(id = %subject, error = %e, "Site store query failed");
        if e.is_connection() {
            self.mark_disconnected();
        }
        GatewayError::StoreUnavailable(e.to_string())
    }

    /// Close the pool and stop serving site lookups.
    pub async fn disconnect(&self) {
        let _gate = self.connect_gate.lock().await;
        self.store.close().await;
        self.set_state(ConnectionState::Disconnected);
        tracing::info!("Disconnected from site store");
    }
}

/// Operator hint for common connect failures
fn connect_failure_hint(e: &StoreError) -> Option<&'static str> {
    let message = e.to_string().to_ascii_lowercase();
    if message.contains("password authentication failed") || message.contains("28p01") {
        Some("authentication failed, check user and password")
    } else if message.contains("pg_hba.conf") {
        Some("host rejected by server, enable TLS (DB_SSL=true) or allow-list this address")
    } else if message.contains("refused") {
        Some("server refused the connection")
    } else if message.contains("timed out") || message.contains("timeout") {
        Some("connection timed out")
    } else {
        None
    }
}
