//! API server entry point.

use api::config::{Config, LogFormat};
use broker::{InMemoryBroker, MessageBroker, PostgresBroker};
use ledger::{InMemoryLedger, Ledger, PostgresLedger};
use metrics_exporter_prometheus::PrometheusHandle;
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

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

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));
    let registry = tracing_subscriber::registry().with(filter);

    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn serve<B, L>(
    config: Config,
    broker: B,
    orders: L,
    shipments: L,
    metrics_handle: PrometheusHandle,
) where
    B: MessageBroker + Clone + 'static,
    L: Ledger + Clone + 'static,
{
    let shutdown = CancellationToken::new();
    let state = api::create_state(
        &config,
        broker,
        orders,
        shipments,
        api::default_catalog(),
        shutdown.clone(),
    );
    let dispatch_listener = api::spawn_dispatch_listener(&state);
    let app = api::create_app(state, metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    shutdown.cancel();
    match dispatch_listener.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(error = %e, "dispatch listener stopped with an error"),
        Err(e) => tracing::error!(error = %e, "dispatch listener panicked"),
    }

    tracing::info!("server shut down gracefully");
}

#[tokio::main]
async fn main() {
    // 1. Load configuration and initialize tracing
    let config = Config::from_env();
    init_tracing(&config);
    if let Err(e) = config.validate() {
        tracing::error!(error = %e, "invalid configuration");
        std::process::exit(2);
    }

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Pick backends and serve
    match config.database_url.clone() {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(&url)
                .await
                .expect("failed to connect to database");
            let broker = PostgresBroker::new(pool.clone())
                .with_visibility_timeout(config.visibility_timeout);
            broker
                .run_migrations()
                .await
                .expect("failed to run migrations");

            tracing::info!("using Postgres broker and ledgers");
            let orders = PostgresLedger::new(pool.clone(), "orders");
            let shipments = PostgresLedger::new(pool, "shipping");
            serve(config, broker, orders, shipments, metrics_handle).await;
        }
        None => {
            tracing::info!("DATABASE_URL not set, using in-memory broker and ledgers");
            serve(
                config,
                InMemoryBroker::new(),
                InMemoryLedger::new(),
                InMemoryLedger::new(),
                metrics_handle,
            )
            .await;
        }
    }
}
