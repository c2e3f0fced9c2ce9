//! Gateway configuration
//!
//! Defaults, overlaid by an optional YAML file, overlaid by environment
//! variables.

mod gateway;

pub use gateway::{
    CacheConfig, DataConfig, GatewayConfig, ServerConfig, SessionConfig, SiteColumns, StoreConfig,
    DEFAULT_CONFIG_PATH,
};
