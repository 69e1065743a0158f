use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use api_service::app::{build_router, AppState};
use api_service::config::ServiceConfig;
use api_service::metrics::ApiMetrics;
use api_service::pg_repo::PgStore;
use api_service::rate_limiter::{spawn_sweeper, ClientRateLimiter};
use api_service::repo::{DataStore, InMemoryStore};
use common_auth::{JwtVerifier, KeyRing, TokenSigner};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let config = ServiceConfig::from_env().context("Failed to load configuration")?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    config.validate().context("Invalid configuration")?;

    let store: Arc<dyn DataStore> = match &config.database_url {
        Some(url) => {
            let pg = PgStore::connect(url, config.database_max_conns)
                .await
                .context("Failed to connect to Postgres")?;
            if config.run_migrations {
                pg.ensure_schema()
                    .await
                    .context("Failed to create database schema")?;
            }
            Arc::new(pg)
        }
        None => {
            warn!("DATABASE_URL not set; using the in-memory store, data is lost on restart");
            Arc::new(InMemoryStore::new())
        }
    };

    let jwt_config = config.jwt_config();
    let ring = if config.jwt_secrets.is_empty() {
        None
    } else {
        Some(KeyRing::new(config.jwt_secrets.iter()).context("Failed to build JWT key ring")?)
    };

    let signer = ring.as_ref().map(|ring| {
        Arc::new(TokenSigner::new(
            &jwt_config,
            ring,
            config.jwt_access_ttl_seconds,
        ))
    });

    let verifier = match (&ring, config.auth_disabled) {
        (Some(ring), false) => Some(Arc::new(JwtVerifier::new(jwt_config.clone(), ring.clone()))),
        (_, true) => {
            warn!("AUTH_DISABLED=true: bearer tokens are NOT checked; never run this way outside local development");
            None
        }
        (None, false) => anyhow::bail!("no JWT secret configured"),
    };

    if let Some(ring) = &ring {
        info!(keys = ring.len(), "JWT key ring loaded");
    }

    let metrics = Arc::new(ApiMetrics::new().context("Failed to register metrics")?);
    let limiter = Arc::new(ClientRateLimiter::new(config.login_rps, config.login_burst));
    spawn_sweeper(
        limiter.clone(),
        config.login_limiter_sweep,
        Some(metrics.clone()),
    );

    let addr = config.bind_addr();
    let state = AppState {
        store,
        verifier,
        signer,
        limiter,
        metrics,
        config: Arc::new(config),
    };

    let app = build_router(state);

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(%addr, "starting api-service");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
