//! Cinema ETL Service
//!
//! Extracts movie metadata from TMDB on a fixed cadence and publishes each
//! batch on the Redis movies channel:
//! 1. Every tick, fetches the next contiguous range of TMDB ids
//! 2. Skips ids that fail to fetch or decode
//! 3. Publishes the surviving batch; a failed publish drops the batch

mod extractor;
mod pipeline;
mod tmdb;

use crate::extractor::Extractor;
use crate::pipeline::Pipeline;
use crate::tmdb::TmdbClient;
use cinema_common::{config::AppConfig, metrics, transport::RedisPublisher, VERSION};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = AppConfig::load()?;

    // Initialize tracing and metrics
    metrics::init_tracing(&config.observability);
    metrics::register_metrics();
    metrics::install_exporter(&config.observability)?;

    info!(
        service = %config.observability.service_name,
        "Starting Cinema ETL v{}",
        VERSION
    );

    let source = TmdbClient::new(&config.tmdb)?;

    info!("Connecting to Redis...");
    let publisher = RedisPublisher::connect(&config).await?;

    let cancel = CancellationToken::new();

    let extractor = Extractor::new(source, &config.extractor);
    let (batches, extractor_task) = extractor.spawn(cancel.clone(), 1);

    let pipeline = Pipeline::new(publisher);
    let pipeline_cancel = cancel.clone();
    let pipeline_task = tokio::spawn(async move { pipeline.run(batches, pipeline_cancel).await });

    shutdown_signal().await;
    cancel.cancel();

    let cursor = extractor_task.await?;
    let stats = pipeline_task.await?;

    info!(
        next_id = cursor,
        published = stats.published,
        failed = stats.failed,
        "ETL shutdown complete"
    );
    Ok(())
}

/// Graceful shutdown signal handler
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
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}
