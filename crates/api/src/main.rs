//! Service entry point.

use std::sync::Arc;

use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use api::config::Config;
use api::lnbits::LnBitsProcessor;
use api::schema;
use dispatch::{Backend, MemoryStore, OutboxProcessor};
use domain::{FakeLightningProcessor, LightningProcessor};

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

#[tokio::main]
async fn main() {
    // 1. Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    let config = Config::from_env();

    // 3. Select the storage backend and bootstrap the schema
    let backend = match &config.database_url {
        Some(url) => {
            let pool = sqlx::postgres::PgPoolOptions::new()
                .connect(url)
                .await
                .expect("failed to connect to PostgreSQL");
            schema::apply(&pool).await.expect("schema bootstrap failed");
            Backend::Postgres(pool)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, running on the in-memory backend");
            Backend::Memory(MemoryStore::new())
        }
    };

    // 4. Select the Lightning processor
    let lightning: Arc<dyn LightningProcessor> = match config.lnbits.clone() {
        Some(lnbits) => Arc::new(LnBitsProcessor::new(lnbits)),
        None => {
            tracing::warn!("LNbits credentials not set, using the fake Lightning processor");
            Arc::new(FakeLightningProcessor::new())
        }
    };

    // 5. Build the bus and register all handlers before traffic begins
    let bus = Arc::new(api::build_bus(backend.clone(), lightning));

    // 6. Start the outbox processor with a cancellation signal
    let (shutdown_tx, mut shutdown_rx) = tokio::sync::watch::channel(false);
    let processor = OutboxProcessor::new(backend, Arc::clone(&bus), config.outbox_interval);
    let processor_handle = tokio::spawn(processor.run(async move {
        let _ = shutdown_rx.changed().await;
    }));

    // 7. Serve the operational routes
    let app = api::create_app(metrics_handle);
    let addr = config.addr();
    tracing::info!(%addr, "starting server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    // 8. Let the in-flight outbox cycle finish before exiting
    let _ = shutdown_tx.send(true);
    processor_handle.await.expect("outbox processor panicked");

    tracing::info!("server shut down gracefully");
}
