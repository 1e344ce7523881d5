//! Label Dispatch web server.
//!
//! Serves the predict endpoint for the labelling UI and hands accepted
//! requests to the model queues.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::{net::TcpListener, signal};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use label_dispatch::catalog::PgImageLocator;
use label_dispatch::cooldown::{connect_redis, RedisCooldownStore};
use label_dispatch::dispatch::WorkQueue;
use label_dispatch::queue::{declared_queues, Publisher, RedisListQueue};
use label_dispatch::storage::S3ObjectStore;
use label_dispatch::{web, AppState, Config, CoordinatorSettings, DispatchCoordinator, QueueBackend};

#[tokio::main]
async fn main() -> Result<()> {
    let dotenv_loaded = dotenvy::dotenv().is_ok();

    // Initialize structured JSON logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    info!(dotenv_loaded, "web_server_starting");

    let config = Config::from_env();
    info!(
        port = config.port,
        queue_backend = ?config.queue_backend,
        queues = ?config.predict_queues,
        cooldown_secs = config.cooldown.as_secs(),
        io_timeout_ms = config.io_timeout.as_millis() as u64,
        minio_endpoint = %config.minio.endpoint,
        minio_bucket = %config.minio.bucket,
        "config_loaded"
    );

    let redis = connect_redis(&config.redis_url).await?;
    let locator = PgImageLocator::connect(&config.database_url, config.io_timeout).await?;
    let objects = S3ObjectStore::new(&config.minio, config.io_timeout)?;

    let mut publisher = None;
    let queues: Vec<Arc<dyn WorkQueue>> = match config.queue_backend {
        QueueBackend::Redis => config
            .predict_queues
            .iter()
            .map(|name| {
                Arc::new(RedisListQueue::new(name.clone(), redis.clone())) as Arc<dyn WorkQueue>
            })
            .collect(),
        QueueBackend::Amqp => {
            let amqp = Publisher::new(
                config.cloudamqp_url.clone(),
                declared_queues(&config.predict_queues),
            );
            amqp.ensure_connected().await?;
            let queues: Vec<Arc<dyn WorkQueue>> = config
                .predict_queues
                .iter()
                .map(|name| Arc::new(amqp.queue(name.clone())) as Arc<dyn WorkQueue>)
                .collect();
            publisher = Some(amqp);
            queues
        }
    };

    let coordinator = DispatchCoordinator::new(
        Arc::new(RedisCooldownStore::new(redis)),
        Arc::new(locator),
        Arc::new(objects),
        queues,
        CoordinatorSettings {
            cooldown: config.cooldown,
            lock_key_prefix: config.lock_key_prefix.clone(),
            io_timeout: config.io_timeout,
        },
    );
    info!(queues = ?coordinator.queue_names(), "dispatch_coordinator_ready");

    let app = web::router(AppState::new(coordinator));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    info!(address = %addr, "web_server_listening");

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    if let Some(publisher) = publisher {
        publisher.close().await;
    }

    info!("web_server_shutdown_complete");

    Ok(())
}

/// Create a future that completes when a shutdown signal is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }

    info!("web_server_shutting_down");
}
