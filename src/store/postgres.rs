//! Postgres-backed site store (sqlx)

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgSslMode};

use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::model::SiteAssignment;
use crate::store::traits::{PoolStats, SiteStore};

/// Row shape shared by the single and batched lookups
#[derive(Debug, sqlx::FromRow)]
struct SiteRow {
    identifying_number: String,
    department: Option<String>,
    municipality: Option<String>,
    zone: Option<String>,
    site_name: Option<String>,
    site_address: Option<String>,
    table_number: Option<String>,
}

impl SiteRow {
    fn into_assignment(self) -> (String, SiteAssignment) {
        (
            self.identifying_number.trim().to_string(),
            SiteAssignment {
                department: self.department.unwrap_or_default(),
                municipality: self.municipality.unwrap_or_default(),
                zone: self.zone.unwrap_or_default(),
                site_name: self.site_name.unwrap_or_default(),
                site_address: self.site_address.unwrap_or_default(),
                table_number: self.table_number.unwrap_or_default(),
            },
        )
    }
}

/// Site store over a pooled Postgres connection.
///
/// The pool bounds in-flight queries at `pool_max`; callers beyond that wait
/// up to `connect_timeout_ms` for a free connection.
pub struct PgSiteStore {
    config: StoreConfig,
    pool: RwLock<Option<PgPool>>,
    select_one: String,
    select_many: String,
}

impl PgSiteStore {
    /// Table and column names must already be validated (`GatewayConfig::validate`).
    pub fn new(config: StoreConfig) -> Self {
        let select = select_clause(&config);
        let id_column = quote_ident(&config.columns.identifying_number);
        let select_one = format!("{select} WHERE {id_column}::text = $1 LIMIT 1");
        let select_many = format!("{select} WHERE {id_column}::text = ANY($1)");
        Self {
            config,
            pool: RwLock::new(None),
            select_one,
            select_many,
        }
    }

    fn connect_options(&self) -> PgConnectOptions {
        let ssl_mode = if self.config.ssl {
            PgSslMode::Require
        } else {
            PgSslMode::Disable
        };
        PgConnectOptions::new()
            .host(&self.config.host)
            .port(self.config.port)
            .database(&self.config.database)
            .username(&self.config.user)
            .password(&self.config.password)
            .ssl_mode(ssl_mode)
    }

    fn pool(&self) -> Result<PgPool, StoreError> {
        self.pool
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| StoreError::Connection("pool not initialised".to_string()))
    }
}

#[async_trait]
impl SiteStore for PgSiteStore {
    async fn connect(&self) -> Result<(), StoreError> {
        tracing::info!(
            host = %self.config.host,
            port = self.config.port,
            database = %self.config.database,
            ssl = self.config.ssl,
            "Connecting to site store"
        );

        let pool = PgPoolOptions::new()
            .max_connections(self.config.pool_max)
            .idle_timeout(Some(self.config.idle_timeout()))
            .acquire_timeout(self.config.connect_timeout())
            .connect_with(self.connect_options())
            .await?;

        sqlx::query("SELECT 1").execute(&pool).await?;

        let previous = self
            .pool
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(pool);
        if let Some(previous) = previous {
            previous.close().await;
        }
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let pool = self.pool()?;
        sqlx::query("SELECT 1").execute(&pool).await?;
        Ok(())
    }

    async fn table_exists(&self) -> Result<bool, StoreError> {
        let pool = self.pool()?;
        let exists = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT FROM information_schema.tables
                WHERE table_name = $1
            )
            "#,
        )
        .bind(&self.config.table)
        .fetch_one(&pool)
        .await?;
        Ok(exists)
    }

    async fn fetch_one(&self, number: &str) -> Result<Option<SiteAssignment>, StoreError> {
        let pool = self.pool()?;
        let row = sqlx::query_as::<_, SiteRow>(&self.select_one)
            .bind(number)
            .fetch_optional(&pool)
            .await?;
        Ok(row.map(|row| row.into_assignment().1))
    }

    async fn fetch_many(
        &self,
        numbers: &[String],
    ) -> Result<HashMap<String, SiteAssignment>, StoreError> {
        if numbers.is_empty() {
            return Ok(HashMap::new());
        }
        let pool = self.pool()?;
        let rows = sqlx::query_as::<_, SiteRow>(&self.select_many)
            .bind(numbers)
            .fetch_all(&pool)
            .await?;
        Ok(rows.into_iter().map(SiteRow::into_assignment).collect())
    }

    fn pool_stats(&self) -> PoolStats {
        match self.pool.read().unwrap_or_else(PoisonError::into_inner).as_ref() {
            Some(pool) => PoolStats {
                size: pool.size(),
                idle: pool.num_idle() as u32,
            },
            None => PoolStats::default(),
        }
    }

    async fn close(&self) {
        let pool = self
            .pool
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(pool) = pool {
            pool.close().await;
        }
    }
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// `SELECT ... FROM "table"` with every column cast to text and aliased to the row field name
fn select_clause(config: &StoreConfig) -> String {
    let c = &config.columns;
    let columns = [
        (&c.identifying_number, "identifying_number"),
        (&c.department, "department"),
        (&c.municipality, "municipality"),
        (&c.zone, "zone"),
        (&c.site_name, "site_name"),
        (&c.site_address, "site_address"),
        (&c.table_number, "table_number"),
    ]
    .iter()
    .map(|(column, alias)| format!("{}::text AS {}", quote_ident(column), alias))
    .collect::<Vec<_>>()
    .join(", ");

    format!("SELECT {} FROM {}", columns, quote_ident(&config.table))
}
