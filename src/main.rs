use anyhow::{Context, Result};
use carcast::api::{create_router, AppState};
use carcast::auth::ShareRegistry;
use carcast::config;
use carcast::ingest::{run_mqtt_ingest, Ingestor};
use carcast::state::{run_resampler, Store};
use carcast::stream::Hub;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

const SHARE_PURGE_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "carcast=info".into()),
        )
        .init();

    info!("Carcast starting...");

    let config = config::load_from_env().context("Failed to load configuration")?;
    info!(
        window_seconds = config.state.window_seconds,
        heartbeat_seconds = config.stream.heartbeat_seconds,
        resample_seconds = config.resampler.interval_seconds,
        admin_auth = config.http.admin_token.is_some(),
        "Configuration loaded"
    );

    let store = Arc::new(Store::new(config.state.window()));
    let hub = Arc::new(Hub::with_capacity(config.stream.queue_capacity));
    let shares = Arc::new(ShareRegistry::new(config.stream.default_arrive_radius_m));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let resampler = tokio::spawn(run_resampler(
        Arc::clone(&store),
        Arc::clone(&hub),
        config.resampler.interval(),
        shutdown_rx.clone(),
    ));

    let ingestion = if config.mqtt.broker_url.is_some() {
        let ingestor = Arc::new(Ingestor::new(Arc::clone(&store), Arc::clone(&hub)));
        let mqtt = config.mqtt.clone();
        let shutdown = shutdown_rx.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = run_mqtt_ingest(mqtt, ingestor, shutdown).await {
                error!(error = %e, "MQTT ingestion failed");
            }
        }))
    } else {
        info!("No MQTT broker configured, ingestion disabled");
        None
    };

    tokio::spawn(purge_expired_shares(Arc::clone(&shares), shutdown_rx.clone()));

    let state = Arc::new(AppState::new(
        Arc::clone(&store),
        Arc::clone(&hub),
        Arc::clone(&shares),
        &config,
    )
    .with_shutdown(shutdown_rx.clone()));
    let router = create_router(state, &config.http.cors_allowed_origins);

    let listener = tokio::net::TcpListener::bind(&config.http.addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.http.addr))?;
    info!(addr = %config.http.addr, "HTTP API listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            wait_for_shutdown().await;
            info!("Shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await
        .context("HTTP server error")?;

    if let Err(e) = resampler.await {
        error!(error = %e, "Resampler task panicked");
    }
    if let Some(handle) = ingestion {
        if let Err(e) = handle.await {
            error!(error = %e, "Ingestion task panicked");
        }
    }

    info!("Carcast stopped");
    Ok(())
}

/// Periodically drop expired share links
async fn purge_expired_shares(shares: Arc<ShareRegistry>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = interval(SHARE_PURGE_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                let purged = shares.purge_expired();
                if purged > 0 {
                    info!(purged = purged, "Expired shares removed");
                }
            }
        }
    }
}

/// Wait for SIGINT or SIGTERM
async fn wait_for_shutdown() {
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
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
