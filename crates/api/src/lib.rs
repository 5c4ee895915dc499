//! HTTP surface for the order fulfillment saga.
//!
//! Wires the three stages (placement, order confirmation, shipment
//! confirmation) over one broker, with structured logging (tracing) and
//! Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, post};
use broker::MessageBroker;
use ledger::Ledger;
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{
    DispatchBoard, IngestListener, InMemoryCatalog, OutboxWriter, SagaScanner, StageConfig,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;
use routes::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<B, L>(state: Arc<AppState<B, L>>, metrics_handle: PrometheusHandle) -> Router
where
    B: MessageBroker + Clone + 'static,
    L: Ledger + Clone + 'static,
{
    let metrics_router = Router::new()
        .route("/metrics", get(routes::observability::metrics))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::observability::health::<B, L>))
        .route("/orders", post(routes::orders::create::<B, L>))
        .route("/orders/{key}", get(routes::orders::get::<B, L>))
        .route("/orders/{key}/confirm", post(routes::orders::confirm::<B, L>))
        .route("/orders/{key}/cancel", post(routes::orders::cancel::<B, L>))
        .route("/shipments/{key}", get(routes::shipments::get::<B, L>))
        .route(
            "/shipments/{key}/confirm",
            post(routes::shipments::confirm::<B, L>),
        )
        .route("/dispatches", get(routes::dispatches::list::<B, L>))
        .route("/queues/{name}", delete(routes::queues::purge::<B, L>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// A catalog seeded with the demo items.
pub fn default_catalog() -> InMemoryCatalog {
    let catalog = InMemoryCatalog::new();
    catalog.insert("SKU-001", "Widget");
    catalog.insert("SKU-002", "Gadget");
    catalog.insert("SKU-003", "Gizmo");
    catalog
}

/// Creates the application state: one outbox writer and one scanner per
/// confirmation stage, sharing the broker.
pub fn create_state<B, L>(
    config: &Config,
    broker: B,
    orders: L,
    shipments: L,
    catalog: InMemoryCatalog,
    shutdown: CancellationToken,
) -> Arc<AppState<B, L>>
where
    B: MessageBroker + Clone + 'static,
    L: Ledger + Clone + 'static,
{
    let order_stage = StageConfig::order_confirmation(&config.order_queue, &config.shipping_queue);
    let shipment_stage =
        StageConfig::shipment_confirmation(&config.shipping_queue, &config.dispatch_queue);

    let outbox = OutboxWriter::new(broker.clone(), orders.clone(), catalog, order_stage.entry());
    let order_stage = SagaScanner::new(
        broker.clone(),
        orders.clone(),
        order_stage,
        config.retry_policy(),
        config.scan_config(),
    );
    let shipment_stage = SagaScanner::new(
        broker.clone(),
        shipments.clone(),
        shipment_stage,
        config.retry_policy(),
        config.scan_config(),
    );

    Arc::new(AppState {
        broker,
        orders,
        shipments,
        outbox,
        order_stage: Arc::new(order_stage),
        shipment_stage: Arc::new(shipment_stage),
        dispatches: DispatchBoard::new(),
        dispatch_queue: config.dispatch_queue.clone(),
        identity_secret: config.identity_secret.as_ref().map(|s| s.as_bytes().to_vec()),
        shutdown,
    })
}

/// Starts the dispatch listener. It stops when the state's shutdown token
/// is cancelled.
pub fn spawn_dispatch_listener<B, L>(state: &AppState<B, L>) -> JoinHandle<saga::Result<()>>
where
    B: MessageBroker + Clone + 'static,
    L: Ledger + Clone + 'static,
{
    let listener = IngestListener::new(
        state.broker.clone(),
        state.dispatch_queue.clone(),
        state.dispatches.clone(),
    );
    let cancel = state.shutdown.child_token();

    tokio::spawn(async move { listener.run(cancel).await })
}
