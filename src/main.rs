//! Voter Gateway Server
//!
//! Main entry point for the voter lookup REST API.

use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use voter_gateway::{
    server::{build_router, AppState, SessionStore},
    AuditLog, ExternalStoreClient, GatewayConfig, LocalIndex, LookupCoordinator, PgSiteStore,
    ResultCache, RetryPolicy,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env is optional
    let _ = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "voter_gateway=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting voter gateway");

    let config = GatewayConfig::load().context("loading configuration")?;

    // The roster is mandatory: no traffic without it
    let index = Arc::new(
        LocalIndex::load(&config.data.people_path).context("loading local roster")?,
    );

    let audit = Arc::new(match &config.data.audit_path {
        Some(path) => AuditLog::open(path).context("opening audit trail")?,
        None => AuditLog::in_memory(),
    });

    let sessions = Arc::new(
        SessionStore::load(&config.data.users_path, config.session.token_ttl())
            .context("loading users")?,
    );

    // External store: failure to connect leaves the gateway running local-only
    let store = Arc::new(PgSiteStore::new(config.store.clone()));
    let client = Arc::new(ExternalStoreClient::new(
        store,
        RetryPolicy::from(&config.store),
    ));
    let state = client.connect().await;
    tracing::info!(state = ?state, "Site store connect sequence finished");

    let probe = config
        .store
        .health_interval()
        .map(|interval| client.spawn_health_probe(interval));

    let cache = Arc::new(ResultCache::from_config(&config.cache));
    let sweeper = (cache.is_enabled() && !cache.timeout().is_zero())
        .then(|| cache.spawn_sweeper(cache.timeout()));

    let coordinator = Arc::new(LookupCoordinator::new(
        index,
        Arc::clone(&client),
        cache,
        Arc::clone(&audit),
    ));

    let app = build_router(AppState::new(coordinator, sessions));

    let listener = TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.server.bind_addr))?;
    tracing::info!(addr = %config.server.bind_addr, "Voter gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("Shutting down");
    if let Some(probe) = probe {
        probe.abort();
    }
    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }
    client.disconnect().await;
    audit.flush().await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}
