//! Afterglow Server - Main entry point.

use std::net::SocketAddr;
use std::sync::Arc;

use afterglow_core::{
    aggregator::EventAggregator,
    api::{self, AppState},
    config::Config,
    observability,
    queue::{QueueBackend, RedisQueueBackend},
    tasks::TaskRunner,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::load().unwrap_or_else(|e| {
        eprintln!("Warning: Could not load config: {}. Using defaults.", e);
        Config::default()
    });

    // Initialize observability
    observability::init(&config.observability)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting Afterglow Server"
    );

    // Create the outbound queue client
    let redis_client = redis::Client::open(config.queue.url.as_str())
        .map_err(|e| anyhow::anyhow!("Failed to create queue client: {}", e))?;
    let queue: Arc<dyn QueueBackend> =
        Arc::new(RedisQueueBackend::new(redis_client, &config.queue.key));
    tracing::info!(
        queue_key = %config.queue.key,
        "Queue client created for {}",
        config.queue.url
    );

    // Wire the aggregation engine and the task runner
    let aggregator = Arc::new(EventAggregator::new(
        queue.clone(),
        config.aggregation.threshold,
    ));
    let runner = TaskRunner::new(queue);
    tracing::info!(
        threshold = config.aggregation.threshold,
        "Event aggregator initialized"
    );

    // Create app state
    let app_state = AppState {
        runner,
        aggregator,
        run: config.run.clone(),
        aggregation: config.aggregation.clone(),
    };

    // Build router
    let app = api::build_router(app_state);

    // Start server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    tracing::info!(address = %addr, "Starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Detached tasks still in flight at this point are abandoned along with
    // any buffered, undispatched events. Best-effort by contract.
    tracing::info!("Server shutdown complete");

    Ok(())
}

/// Wait for shutdown signal.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
