//! Lookup coordinator
//!
//! Wires the local roster, the cached site store and the audit trail into the
//! two consumer operations. Holds no state of its own.
//!
//! ```text
//! resolve(id)
//!   ├── LocalIndex::get_by_number ─────────────┐
//!   └── ResultCache::get_or_fetch              ├── MergedResult ──► AuditLog::record
//!         └── ExternalStoreClient::fetch ──────┘
//! ```
//!
//! Store trouble never fails a lookup; it only removes the external half.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use crate::audit::{AuditEntry, AuditFilter, AuditLog, LookupEvent};
use crate::cache::{CacheStats, ResultCache};
use crate::error::{GatewayError, GatewayResult};
use crate::index::LocalIndex;
use crate::model::{
    normalize_number, CallerIdentity, MergedResult, PersonRecord, QueryKind, SiteAssignment,
};
use crate::store::{ConnectionState, ExternalStoreClient, PoolStats, QueryStats};

/// Minimum length (in characters, after trimming) of a name-search fragment
pub const MIN_NAME_FRAGMENT_LEN: usize = 2;

/// A name-search match with its site assignment, if the store had one
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PersonWithSite {
    #[serde(flatten)]
    pub person: Arc<PersonRecord>,
    pub site: Option<SiteAssignment>,
}

/// Snapshot for health and monitoring endpoints
#[derive(Debug, Clone, Serialize)]
pub struct LookupStatus {
    pub connection_state: ConnectionState,
    pub store_available: bool,
    pub pool: PoolStats,
    pub queries: QueryStats,
    pub cache: CacheStats,
    pub local_records: usize,
    pub audit_entries: usize,
}

pub struct LookupCoordinator {
    index: Arc<LocalIndex>,
    store: Arc<ExternalStoreClient>,
    cache: Arc<ResultCache>,
    audit: Arc<AuditLog>,
}

impl LookupCoordinator {
    pub fn new(
        index: Arc<LocalIndex>,
        store: Arc<ExternalStoreClient>,
        cache: Arc<ResultCache>,
        audit: Arc<AuditLog>,
    ) -> Self {
        Self {
            index,
            store,
            cache,
            audit,
        }
    }

    pub fn store(&self) -> &Arc<ExternalStoreClient> {
        &self.store
    }

    pub fn index(&self) -> &LocalIndex {
        &self.index
    }

    /// Resolve an identifying number to its merged local and external halves.
    ///
    /// Malformed numbers fail with `InvalidQuery` and are not audited. Every
    /// other call is audited exactly once, with `found` reflecting the local
    /// half, before the result is returned.
    pub async fn resolve(
        &self,
        number: &str,
        caller: &CallerIdentity,
    ) -> GatewayResult<MergedResult> {
        let number = normalize_number(number)?;

        let person = self.index.get_by_number(&number);
        let site = self.external_site(&number).await;
        let result = MergedResult::merge(person, site);

        tracing::debug!(
            id = %number,
            provenance = ?result.provenance,
            "Lookup resolved"
        );

        self.audit.record(LookupEvent {
            caller: caller.clone(),
            kind: QueryKind::ByNumber,
            parameter: number,
            found: result.person.is_some(),
        });

        Ok(result)
    }

    /// `resolve` on its own task. Dropping the returned future does not
    /// cancel the store query, the cache write or the audit append.
    pub async fn resolve_detached(
        self: &Arc<Self>,
        number: String,
        caller: CallerIdentity,
    ) -> GatewayResult<MergedResult> {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move { coordinator.resolve(&number, &caller).await })
            .await
            .map_err(|e| GatewayError::Internal(format!("lookup task failed: {}", e)))?
    }

    /// External half for a validated number. `None` when the store has no
    /// row or cannot answer.
    async fn external_site(&self, number: &str) -> Option<SiteAssignment> {
        // a disconnected store is skipped outright, cached entries included
        let store = &self.store;
        let outcome = if store.is_available() {
            self.cache
                .get_or_fetch(number, move |n| async move { store.fetch_by_number(&n).await })
                .await
        } else {
            store.fetch_by_number(number).await
        };

        match outcome {
            Ok(site) => site,
            Err(e) => {
                tracing::debug!(id = %number, error = %e, "Serving local half only");
                None
            }
        }
    }

    /// Case-insensitive substring search over the local roster.
    ///
    /// Fragments shorter than two characters fail with `InvalidQuery` and
    /// are not audited. The audit parameter is the trimmed fragment in upper case.
    pub fn search_by_name(
        &self,
        fragment: &str,
        caller: &CallerIdentity,
    ) -> GatewayResult<Vec<Arc<PersonRecord>>> {
        let fragment = fragment.trim();
        if fragment.chars().count() < MIN_NAME_FRAGMENT_LEN {
            return Err(GatewayError::invalid_query(format!(
                "name fragment must have at least {} characters",
                MIN_NAME_FRAGMENT_LEN
            )));
        }

        let matches = self.index.search_by_name(fragment);

        self.audit.record(LookupEvent {
            caller: caller.clone(),
            kind: QueryKind::ByName,
            parameter: fragment.to_uppercase(),
            found: !matches.is_empty(),
        });

        Ok(matches)
    }

    /// Pair each record with its site assignment.
    ///
    /// Fresh cache entries are used as they are; the rest go to the store in
    /// one batch and the outcome, found or not, is cached. If the store
    /// cannot answer, those records get no site and nothing is cached.
    pub async fn attach_sites(&self, records: &[Arc<PersonRecord>]) -> Vec<PersonWithSite> {
        let mut known: HashMap<String, Option<SiteAssignment>> = HashMap::new();

        if self.store.is_available() {
            let mut missing = Vec::new();
            for record in records {
                let number = &record.identifying_number;
                if known.contains_key(number) {
                    continue;
                }
                match self.cache.get(number) {
                    Some(cached) => {
                        self.cache.record_hit();
                        known.insert(number.clone(), cached);
                    }
                    None => missing.push(number.clone()),
                }
            }

            if !missing.is_empty() {
                match self.store.fetch_by_numbers(&missing).await {
                    Ok(found) => {
                        for number in missing {
                            let site = found.get(&number).cloned();
                            self.cache.insert(number.clone(), site.clone());
                            known.insert(number, site);
                        }
                    }
                    Err(e) => {
                        tracing::debug!(
                            missing = missing.len(),
                            error = %e,
                            "Batched site lookup unavailable"
                        );
                    }
                }
            }
        }

        records
            .iter()
            .map(|person| PersonWithSite {
                site: known.get(&person.identifying_number).cloned().flatten(),
                person: Arc::clone(person),
            })
            .collect()
    }

    /// Audit entries matching `filter`
    pub fn audit_entries(&self, filter: &AuditFilter) -> Vec<AuditEntry> {
        self.audit.query(filter)
    }

    pub fn status(&self) -> LookupStatus {
        let connection_state = self.store.state();
        LookupStatus {
            connection_state,
            store_available: connection_state.is_available(),
            pool: self.store.pool_stats(),
            queries: self.store.stats(),
            cache: self.cache.stats(),
            local_records: self.index.len(),
            audit_entries: self.audit.count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::model::Provenance;
    use crate::store::{MemorySiteStore, RetryPolicy};

    fn site(zone: &str) -> SiteAssignment {
        SiteAssignment {
            zone: zone.to_string(),
            site_name: format!("SCHOOL {}", zone),
            ..SiteAssignment::default()
        }
    }

    fn caller() -> CallerIdentity {
        CallerIdentity::new("orlando", "Orlando", "coordinator")
    }

    fn build(store: Arc<MemorySiteStore>) -> LookupCoordinator {
        let index = LocalIndex::from_records(vec![
            PersonRecord::new("123", "ANA RUIZ"),
            PersonRecord::new("456", "JOHN SMITH"),
            PersonRecord::new("789", "Johnny Walker"),
        ]);
        let client = ExternalStoreClient::new(
            store,
            RetryPolicy {
                attempts: 1,
                delay: Duration::from_millis(10),
            },
        );
        LookupCoordinator::new(
            Arc::new(index),
            Arc::new(client),
            Arc::new(ResultCache::new(Duration::from_secs(300))),
            Arc::new(AuditLog::in_memory()),
        )
    }

    #[tokio::test]
    async fn test_merge_both_halves() {
        let store = Arc::new(MemorySiteStore::new().with_site("456", site("03")));
        let coordinator = build(store);
        coordinator.store().connect().await;

        let result = coordinator.resolve("456", &caller()).await.unwrap();
        assert_eq!(result.person.as_ref().unwrap().full_name, "JOHN SMITH");
        assert_eq!(result.site, Some(site("03")));
        assert_eq!(result.provenance, vec![Provenance::Local, Provenance::External]);
    }

    #[tokio::test]
    async fn test_external_only_is_not_an_error() {
        let store = Arc::new(MemorySiteStore::new().with_site("555", site("01")));
        let coordinator = build(store);
        coordinator.store().connect().await;

        let result = coordinator.resolve("555", &caller()).await.unwrap();
        assert!(result.is_external_only());
        assert_eq!(result.provenance, vec![Provenance::External]);

        let entries = coordinator.audit_entries(&AuditFilter::default());
        assert_eq!(entries.len(), 1);
        assert!(!entries[0].found);
    }

    #[tokio::test]
    async fn test_local_half_survives_store_outage() {
        let store = Arc::new(MemorySiteStore::new().with_site("123", site("01")));
        store.set_reachable(false);
        let coordinator = build(store);
        coordinator.store().connect().await;

        let result = coordinator.resolve("123", &caller()).await.unwrap();
        assert_eq!(result.person.as_ref().unwrap().full_name, "ANA RUIZ");
        assert!(result.site.is_none());
        assert_eq!(result.provenance, vec![Provenance::Local]);
        assert!(!coordinator.status().store_available);
    }

    #[tokio::test]
    async fn test_invalid_number_is_rejected_without_audit() {
        let store = Arc::new(MemorySiteStore::new());
        let coordinator = build(store.clone());
        coordinator.store().connect().await;

        for bad in ["", "   ", "12a", "-1"] {
            let err = coordinator.resolve(bad, &caller()).await.unwrap_err();
            assert!(matches!(err, GatewayError::InvalidQuery(_)), "{:?}", bad);
        }
        assert_eq!(coordinator.status().audit_entries, 0);
        assert_eq!(store.total_queries(), 0);
    }

    #[tokio::test]
    async fn test_padded_number_is_trimmed() {
        let store = Arc::new(MemorySiteStore::new());
        let coordinator = build(store);
        coordinator.store().connect().await;

        let result = coordinator.resolve("  123 ", &caller()).await.unwrap();
        assert!(result.person.is_some());
        let entries = coordinator.audit_entries(&AuditFilter::default());
        assert_eq!(entries[0].parameter, "123");
    }

    #[tokio::test]
    async fn test_search_by_name_audits_uppercased_fragment() {
        let coordinator = build(Arc::new(MemorySiteStore::new()));

        let hits = coordinator.search_by_name(" john ", &caller()).unwrap();
        assert_eq!(hits.len(), 2);
        let none = coordinator.search_by_name("zz", &caller()).unwrap();
        assert!(none.is_empty());

        let entries = coordinator.audit_entries(&AuditFilter::default());
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].kind, QueryKind::ByName);
        assert_eq!(entries[0].parameter, "JOHN");
        assert!(entries[0].found);
        assert!(!entries[1].found);
    }

    #[tokio::test]
    async fn test_short_fragment_rejected() {
        let coordinator = build(Arc::new(MemorySiteStore::new()));
        for bad in ["", "a", "  b  "] {
            let err = coordinator.search_by_name(bad, &caller()).unwrap_err();
            assert!(matches!(err, GatewayError::InvalidQuery(_)));
        }
        assert_eq!(coordinator.status().audit_entries, 0);
    }

    #[tokio::test]
    async fn test_attach_sites_uses_cache_then_batch() {
        let store = Arc::new(
            MemorySiteStore::new()
                .with_site("456", site("02"))
                .with_site("123", site("01")),
        );
        let coordinator = build(store.clone());
        coordinator.store().connect().await;

        // warm the cache for 123
        coordinator.resolve("123", &caller()).await.unwrap();
        assert_eq!(store.total_queries(), 1);

        let people: Vec<_> = ["123", "456", "789"]
            .iter()
            .filter_map(|n| coordinator.index().get_by_number(n))
            .collect();
        let enriched = coordinator.attach_sites(&people).await;
        assert_eq!(enriched.len(), 3);
        assert_eq!(enriched[0].site, Some(site("01")));
        assert_eq!(enriched[1].site, Some(site("02")));
        assert_eq!(enriched[2].site, None);
        // one batch for the two misses
        assert_eq!(store.total_queries(), 2);

        // batch outcome, including the negative, is now cached
        coordinator.attach_sites(&people).await;
        assert_eq!(store.total_queries(), 2);
        assert_eq!(coordinator.status().cache.size, 3);
    }

    #[tokio::test]
    async fn test_attach_sites_without_store() {
        let store = Arc::new(MemorySiteStore::new().with_site("456", site("02")));
        let coordinator = build(store.clone());

        let people: Vec<_> = coordinator.index().get_by_number("456").into_iter().collect();
        let enriched = coordinator.attach_sites(&people).await;
        assert_eq!(enriched.len(), 1);
        assert!(enriched[0].site.is_none());
        assert_eq!(store.total_queries(), 0);
        assert_eq!(coordinator.status().cache.size, 0);
    }

    #[tokio::test]
    async fn test_resolve_detached_audits() {
        let store = Arc::new(MemorySiteStore::new());
        let coordinator = Arc::new(build(store));
        coordinator.store().connect().await;

        let result = coordinator
            .resolve_detached("999".to_string(), caller())
            .await
            .unwrap();
        assert!(result.is_empty());
        assert_eq!(coordinator.status().audit_entries, 1);
    }

    #[tokio::test]
    async fn test_status_snapshot() {
        let store = Arc::new(MemorySiteStore::new().with_site("123", site("01")));
        let coordinator = build(store);
        assert_eq!(coordinator.status().connection_state, ConnectionState::Disconnected);

        coordinator.store().connect().await;
        coordinator.resolve("123", &caller()).await.unwrap();
        coordinator.resolve("123", &caller()).await.unwrap();

        let status = coordinator.status();
        assert!(status.store_available);
        assert_eq!(status.connection_state, ConnectionState::Connected);
        assert_eq!(status.local_records, 3);
        assert_eq!(status.audit_entries, 2);
        assert_eq!(status.queries.total, 1);
        assert_eq!(status.cache.hits, 1);
        assert_eq!(status.pool.size, 1);
    }
}
