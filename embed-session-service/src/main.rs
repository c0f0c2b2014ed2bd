use embed_session_service::{
    build_router,
    config::ServiceConfig,
    db,
    services::{
        AccessTokenMinter, AuditLog, FixedWindowLimiter, QuotaSettings, RedisReplayCache,
        ReplayCache, RotationEngine, SessionIssuer,
    },
    store::{PgSessionStore, SessionStore},
    AppState,
};
use session_core::error::AppError;
use session_core::middleware::rate_limit::create_ip_rate_limiter;
use session_core::observability::logging::init_tracing;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Load configuration - fail fast if invalid
    let config = ServiceConfig::from_env()?;

    init_tracing(&config.service_name, &config.log_level);

    tracing::info!(
        service = %config.service_name,
        environment = ?config.environment,
        "Starting embedded-session service"
    );

    // Durable token store
    let pool = db::create_pool(&config.database)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::Error::new(e)))?;
    db::run_migrations(&pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::Error::new(e)))?;
    let store: Arc<dyn SessionStore> = Arc::new(PgSessionStore::new(pool));
    tracing::info!("Session store initialized");

    // Grace-window replay cache
    let replay: Arc<dyn ReplayCache> = Arc::new(
        RedisReplayCache::connect(&config.redis)
            .await
            .map_err(AppError::InternalError)?,
    );
    tracing::info!("Replay cache initialized");

    // Domain services
    let limiter = Arc::new(FixedWindowLimiter::new(QuotaSettings::from(
        &config.rate_limit,
    )));
    let minter = AccessTokenMinter::new(&config.tokens);
    let audit = AuditLog::new(store.clone());
    let rotation = RotationEngine::new(
        store.clone(),
        replay.clone(),
        minter.clone(),
        limiter.clone(),
        audit.clone(),
        &config.tokens,
    );
    let issuer = SessionIssuer::new(
        store.clone(),
        rotation,
        minter,
        limiter,
        audit,
        &config.tokens,
    );

    let ip_rate_limiter = create_ip_rate_limiter(
        config.rate_limit.global_ip_limit,
        config.rate_limit.global_ip_window_seconds,
    );
    tracing::info!("Rate limiters initialized");

    // Retention sweep for terminal rows, off the hot path.
    let sweep_issuer = issuer.clone();
    let retention = chrono::Duration::days(config.retention.retention_days);
    let sweep_period =
        std::time::Duration::from_secs(config.retention.sweep_interval_seconds.max(1));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(sweep_period);
        loop {
            interval.tick().await;
            let cutoff = chrono::Utc::now() - retention;
            match sweep_issuer.purge_terminal(cutoff).await {
                Ok(0) => {}
                Ok(purged) => tracing::info!(purged, "Retention sweep removed terminal rows"),
                Err(e) => tracing::warn!(error = %e, "Retention sweep failed"),
            }
        }
    });

    let state = AppState {
        config: config.clone(),
        store,
        replay,
        issuer,
        ip_rate_limiter,
    };
    let app = build_router(state)?;

    let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
    tracing::info!(address = %addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Service shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
