//! Health and Prometheus metrics endpoints.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use broker::MessageBroker;
use ledger::Ledger;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;

use super::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    /// Visible messages per stage queue; absent when the broker is down.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub queues: BTreeMap<String, u64>,
}

/// GET /health: reports broker reachability and queue depths.
pub async fn health<B, L>(
    State(state): State<Arc<AppState<B, L>>>,
) -> (StatusCode, Json<HealthResponse>)
where
    B: MessageBroker + Clone + 'static,
    L: Ledger + Clone + 'static,
{
    let queues = [
        &state.order_stage.stage().queue,
        &state.shipment_stage.stage().queue,
        &state.dispatch_queue,
    ];

    let mut depths = BTreeMap::new();
    for queue in queues {
        if let Err(e) = state.broker.declare_queue(queue).await {
            tracing::warn!(error = %e, "health check could not reach broker");
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "degraded",
                    queues: BTreeMap::new(),
                }),
            );
        }
        let depth = state.broker.message_count(queue).await.unwrap_or_default();
        depths.insert(queue.clone(), depth);
    }

    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok",
            queues: depths,
        }),
    )
}

/// GET /metrics: returns Prometheus-formatted metrics.
pub async fn metrics(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        handle.render(),
    )
}
