use anyhow::{Context, Result};
use loads_service::api::{start_api_server, AppState};
use loads_service::config::Config;
use loads_service::{
    shared_pg_store, ActivityLog, AnalyticsService, ArchivalService, KvStore, LoadStore,
    MemoryKvStore, MemoryLoadStore, PhotoSanitizer, TtlCache,
};
use mockable::{Clock, DefaultClock};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        "Starting Haulbook Loads Service"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    let (store, kv): (Arc<dyn LoadStore>, Arc<dyn KvStore>) = match &config.database {
        Some(database) => {
            let pg = shared_pg_store(database)
                .await
                .context("Failed to initialize load store")?;
            if database.run_migrations {
                pg.run_migrations()
                    .await
                    .context("Failed to run database migrations")?;
            }
            let kv: Arc<dyn KvStore> = Arc::new(pg.kv_store());
            let store: Arc<dyn LoadStore> = pg;
            (store, kv)
        }
        None => {
            warn!("No database configured, using in-memory load store and activity log");
            let store: Arc<dyn LoadStore> = Arc::new(MemoryLoadStore::new());
            let kv: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
            (store, kv)
        }
    };

    let clock: Arc<dyn Clock> = Arc::new(DefaultClock);

    let activity = Arc::new(ActivityLog::new(
        kv,
        clock.clone(),
        config.activity_log.capacity,
    ));

    let archival = Arc::new(ArchivalService::new(
        &config.archival,
        store.clone(),
        clock.clone(),
        activity.clone(),
    ));

    let analytics = Arc::new(AnalyticsService::new(
        TtlCache::with_clock(MemoryKvStore::new(), clock.clone()),
        &config.analytics,
    ));

    let api_state = AppState {
        store,
        archival: archival.clone(),
        analytics,
        photos: Arc::new(PhotoSanitizer::new(config.photos.clone())),
        activity,
        clock,
        archive_secret: config.api.archive_secret.clone(),
        secret_header: config.api.secret_header.clone(),
        default_purge_days: config.archival.default_purge_days,
    };

    if api_state.archive_secret.is_none() {
        warn!("No archive secret configured, archival trigger endpoints will reject all calls");
    }

    let shutdown = CancellationToken::new();

    // Spawn archive scheduler task
    let scheduler_handle = config.sweep_interval().map(|interval| {
        tokio::spawn(archival.clone().run_scheduled(interval, shutdown.clone()))
    });

    // Spawn API server task
    let api_config = config.api.clone();
    let api_handle = tokio::spawn(async move {
        if let Err(e) = start_api_server(api_state, &api_config).await {
            error!(error = %e, "API server error");
        }
    });

    info!("Loads service started successfully");

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutting down loads service");

    shutdown.cancel();
    if let Some(handle) = scheduler_handle {
        if let Err(e) = handle.await {
            error!(error = %e, "Archive scheduler task failed");
        }
    }
    api_handle.abort();

    info!("Loads service stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();

    builder
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
