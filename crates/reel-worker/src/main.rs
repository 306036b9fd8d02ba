//! Worker binary: one consumer per configured job type.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use reel_queue::{ConnectionConfig, ConnectionManager, RedisBroker};
use reel_services::{Services, ServicesConfig};
use reel_storage::StorageConfig;
use reel_store::RedisStore;
use reel_worker::{CompositionConfig, Handlers, VideoComposer, WorkerConfig, WorkerConsumer};

fn init_tracing() -> anyhow::Result<()> {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env().add_directive("reel=info".parse()?);

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(true).with_target(true))
            .with(env_filter)
            .init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Required for TLS to the external services and R2
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    dotenvy::dotenv().ok();
    init_tracing()?;

    info!("Starting reel-worker");

    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    if let Some(port) = std::env::var("WORKER_METRICS_PORT")
        .ok()
        .and_then(|p| p.parse::<u16>().ok())
    {
        PrometheusBuilder::new()
            .with_http_listener(SocketAddr::from(([0, 0, 0, 0], port)))
            .install()
            .context("failed to start metrics exporter")?;
        info!(port = port, "Metrics exporter listening");
    }

    if let Err(e) = reel_media::check_ffmpeg() {
        warn!("FFmpeg not found, video composition jobs will fail: {}", e);
    }

    let connection = ConnectionManager::new(ConnectionConfig::from_env())
        .context("invalid broker configuration")?;
    for job_type in &config.job_types {
        connection.register_queue(*job_type).await.ok();
    }

    let store = Arc::new(RedisStore::from_env().context("invalid store configuration")?);
    let broker = Arc::new(RedisBroker::new(connection.clone()));
    let services = Services::from_config(&ServicesConfig::from_env())
        .context("invalid service configuration")?;
    let storage_config = StorageConfig::from_env().context("invalid storage configuration")?;
    let storage = reel_storage::from_config(&storage_config)
        .await
        .context("failed to initialise output storage")?;

    let composer = VideoComposer::new(
        store.clone(),
        storage,
        CompositionConfig::from_env(),
        config.work_dir.clone(),
    )
    .with_narration(services.narration.clone());
    let handlers = Arc::new(Handlers::new(store.clone(), services, composer));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let supervisor = tokio::spawn(connection.clone().run(shutdown_rx.clone()));

    let mut consumers = Vec::new();
    for job_type in &config.job_types {
        let consumer = Arc::new(WorkerConsumer::new(
            *job_type,
            &config,
            broker.clone(),
            store.clone(),
            handlers.clone(),
        ));
        consumers.push(tokio::spawn(consumer.run(shutdown_rx.clone())));
    }

    tokio::signal::ctrl_c().await.ok();
    info!("Received shutdown signal");
    let _ = shutdown_tx.send(true);

    // Consumers bound their own wait; this guards against a stuck task.
    let grace = config.shutdown_timeout + std::time::Duration::from_secs(5);
    let drained = tokio::time::timeout(grace, futures_util::future::join_all(consumers)).await;
    if drained.is_err() {
        error!("Consumers did not stop within {:?}", grace);
    }
    supervisor.await.ok();

    info!("Worker shutdown complete");
    Ok(())
}
