//! Configuration structures and loading

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, GatewayResult};

/// Default configuration path
pub const DEFAULT_CONFIG_PATH: &str = "config/gateway.yaml";

/// Root configuration structure for the voter gateway
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub server: ServerConfig,
    pub data: DataConfig,
    pub store: StoreConfig,
    pub cache: CacheConfig,
    pub session: SessionConfig,
}

/// HTTP listener settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3000".to_string(),
        }
    }
}

/// Locations of the static data files
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DataConfig {
    /// JSON array of person records, read once at startup
    pub people_path: String,
    /// JSON array of gateway users (id, password, display_name, role)
    pub users_path: String,
    /// Audit trail file. `None` keeps the audit in memory only.
    pub audit_path: Option<String>,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            people_path: "data/people.json".to_string(),
            users_path: "data/users.json".to_string(),
            audit_path: None,
        }
    }
}

/// External site-assignment store connection settings
#[derive(Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    pub ssl: bool,
    /// Maximum pooled connections (bounds in-flight queries)
    pub pool_max: u32,
    pub idle_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    /// Connect attempts per connect sequence
    pub retry_attempts: u32,
    /// Fixed delay between connect attempts
    pub retry_delay_ms: u64,
    /// Health probe interval; 0 disables the probe
    pub health_interval_secs: u64,
    /// Site-assignment table name
    pub table: String,
    pub columns: SiteColumns,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            database: String::new(),
            user: String::new(),
            password: String::new(),
            ssl: false,
            pool_max: 20,
            idle_timeout_ms: 30_000,
            connect_timeout_ms: 5_000,
            retry_attempts: 3,
            retry_delay_ms: 1_000,
            health_interval_secs: 30,
            table: "site_assignments".to_string(),
            columns: SiteColumns::default(),
        }
    }
}

// Password stays out of logs.
impl std::fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"***")
            .field("ssl", &self.ssl)
            .field("pool_max", &self.pool_max)
            .field("idle_timeout_ms", &self.idle_timeout_ms)
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .field("retry_attempts", &self.retry_attempts)
            .field("retry_delay_ms", &self.retry_delay_ms)
            .field("health_interval_secs", &self.health_interval_secs)
            .field("table", &self.table)
            .field("columns", &self.columns)
            .finish()
    }
}

impl StoreConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn health_interval(&self) -> Option<Duration> {
        (self.health_interval_secs > 0).then(|| Duration::from_secs(self.health_interval_secs))
    }

    /// Names of required connection fields that are empty
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.host.is_empty() {
            missing.push("host");
        }
        if self.database.is_empty() {
            missing.push("database");
        }
        if self.user.is_empty() {
            missing.push("user");
        }
        if self.password.is_empty() {
            missing.push("password");
        }
        missing
    }
}

/// Column mapping of the site-assignment table
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SiteColumns {
    pub identifying_number: String,
    pub department: String,
    pub municipality: String,
    pub zone: String,
    pub site_name: String,
    pub site_address: String,
    pub table_number: String,
}

impl Default for SiteColumns {
    fn default() -> Self {
        Self {
            identifying_number: "identifying_number".to_string(),
            department: "department".to_string(),
            municipality: "municipality".to_string(),
            zone: "zone".to_string(),
            site_name: "site_name".to_string(),
            site_address: "site_address".to_string(),
            table_number: "table_number".to_string(),
        }
    }
}

impl SiteColumns {
    /// Result columns in the order `SiteAssignment` fields are declared
    pub fn assignment_columns(&self) -> [&str; 6] {
        [
            &self.department,
            &self.municipality,
            &self.zone,
            &self.site_name,
            &self.site_address,
            &self.table_number,
        ]
    }
}

/// Result cache settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub timeout_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_secs: 300,
        }
    }
}

impl CacheConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Bearer token settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    pub token_ttl_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            token_ttl_secs: 4 * 60 * 60,
        }
    }
}

impl SessionConfig {
    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }
}

impl GatewayConfig {
    /// Load configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> GatewayResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            GatewayError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&content)
    }

    /// Load configuration from a YAML string
    pub fn from_yaml(content: &str) -> GatewayResult<Self> {
        let config: GatewayConfig =
            serde_yaml::from_str(content).map_err(|e| GatewayError::Config(e.to_string()))?;
        Ok(config)
    }

    /// Full load: defaults, then the YAML file (if present), then the process environment.
    ///
    /// The file path comes from `GATEWAY_CONFIG`, falling back to `config/gateway.yaml`.
    pub fn load() -> GatewayResult<Self> {
        let path =
            std::env::var("GATEWAY_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

        let mut config = if Path::new(&path).exists() {
            tracing::info!(path = %path, "Loading configuration file");
            Self::from_file(&path)?
        } else {
            tracing::info!(path = %path, "No configuration file, using defaults");
            Self::default()
        };

        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Overlay values from an environment lookup.
    ///
    /// Numeric values that do not parse are ignored with a warning.
    pub fn apply_env(&mut self, get: impl Fn(&str) -> Option<String>) {
        let store = &mut self.store;
        if let Some(v) = get("DB_HOST") {
            store.host = v;
        }
        if let Some(v) = get("DB_NAME") {
            store.database = v;
        }
        if let Some(v) = get("DB_USER") {
            store.user = v;
        }
        if let Some(v) = get("DB_PASSWORD") {
            store.password = v;
        }
        if let Some(v) = get("DB_SSL") {
            store.ssl = v.eq_ignore_ascii_case("true");
        }
        override_parsed(&get, "DB_PORT", &mut store.port);
        override_parsed(&get, "DB_POOL_MAX", &mut store.pool_max);
        override_parsed(&get, "DB_IDLE_TIMEOUT", &mut store.idle_timeout_ms);
        override_parsed(&get, "DB_CONNECTION_TIMEOUT", &mut store.connect_timeout_ms);
        override_parsed(&get, "DB_RETRY_ATTEMPTS", &mut store.retry_attempts);
        override_parsed(&get, "DB_RETRY_DELAY", &mut store.retry_delay_ms);

        if let Some(v) = get("GATEWAY_BIND_ADDR") {
            self.server.bind_addr = v;
        }
        if let Some(v) = get("GATEWAY_PEOPLE_PATH") {
            self.data.people_path = v;
        }
        if let Some(v) = get("GATEWAY_USERS_PATH") {
            self.data.users_path = v;
        }
        if let Some(v) = get("GATEWAY_AUDIT_PATH") {
            self.data.audit_path = Some(v).filter(|p| !p.is_empty());
        }
        override_parsed(&get, "GATEWAY_CACHE_TIMEOUT_SECS", &mut self.cache.timeout_secs);
    }

    /// Reject unusable settings; warn about incomplete ones.
    pub fn validate(&self) -> GatewayResult<()> {
        let missing = self.store.missing_fields();
        if !missing.is_empty() {
            tracing::warn!(
                missing = %missing.join(", "),
                "Incomplete store configuration, site lookups will stay unavailable"
            );
        }

        if self.store.retry_attempts == 0 {
            return Err(GatewayError::Config(
                "store.retry_attempts must be at least 1".to_string(),
            ));
        }
        if self.store.pool_max == 0 {
            return Err(GatewayError::Config(
                "store.pool_max must be at least 1".to_string(),
            ));
        }

        check_identifier("store.table", &self.store.table)?;
        let columns = &self.store.columns;
        check_identifier("store.columns.identifying_number", &columns.identifying_number)?;
        for column in columns.assignment_columns() {
            check_identifier("store.columns", column)?;
        }
        Ok(())
    }
}

fn override_parsed<T: std::str::FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut T,
) {
    if let Some(raw) = get(key) {
        match raw.trim().parse() {
            Ok(value) => *slot = value,
            Err(_) => tracing::warn!(key, value = %raw, "Ignoring unparseable override"),
        }
    }
}

/// Table and column names are spliced into SQL, so only plain identifiers pass.
fn check_identifier(field: &str, value: &str) -> GatewayResult<()> {
    let valid = !value.is_empty()
        && value.len() <= 63
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !value.starts_with(|c: char| c.is_ascii_digit());
    if valid {
        Ok(())
    } else {
        Err(GatewayError::Config(format!(
            "{} is not a valid SQL identifier: '{}'",
            field, value
        )))
    }
}
