//! HTTP route handlers and the state they share.

pub mod dispatches;
pub mod observability;
pub mod orders;
pub mod queues;
pub mod shipments;

use std::sync::Arc;

use axum::Json;
use axum::http::StatusCode;
use broker::MessageBroker;
use ledger::Ledger;
use saga::{
    DispatchBoard, InMemoryCatalog, OutboxWriter, SagaScanner, ScanOutcome, StageRequest,
    WorkItem,
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::ApiError;

/// Shared application state accessible from all handlers.
pub struct AppState<B: MessageBroker, L: Ledger> {
    pub broker: B,
    /// The order service's ledger.
    pub orders: L,
    /// The shipping service's ledger.
    pub shipments: L,
    pub outbox: OutboxWriter<B, L, InMemoryCatalog>,
    pub order_stage: Arc<SagaScanner<B, L>>,
    pub shipment_stage: Arc<SagaScanner<B, L>>,
    pub dispatches: DispatchBoard,
    pub dispatch_queue: String,
    /// Shared secret for signed admin requests; admin routes are open when unset.
    pub identity_secret: Option<Vec<u8>>,
    /// Cancelled on shutdown; scans and the listener run on child tokens.
    pub shutdown: CancellationToken,
}

#[derive(Serialize)]
pub struct OutcomeResponse {
    pub key: String,
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub newly_confirmed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forwarded: Option<WorkItem>,
}

/// Maps a tri-state scan result to a response: 200, 409 or 404.
pub(crate) fn outcome_response(outcome: ScanOutcome) -> (StatusCode, Json<OutcomeResponse>) {
    let key = outcome.key().to_string();
    let label = outcome.as_str();

    match outcome {
        ScanOutcome::Confirmed(confirmed) => (
            StatusCode::OK,
            Json(OutcomeResponse {
                key,
                outcome: label,
                reason: None,
                newly_confirmed: Some(confirmed.newly_confirmed),
                forwarded: confirmed.forwarded,
            }),
        ),
        ScanOutcome::ConfirmationFailed { reason, .. } => (
            StatusCode::CONFLICT,
            Json(OutcomeResponse {
                key,
                outcome: label,
                reason: Some(reason),
                newly_confirmed: None,
                forwarded: None,
            }),
        ),
        ScanOutcome::NotFound(_) => (
            StatusCode::NOT_FOUND,
            Json(OutcomeResponse {
                key,
                outcome: label,
                reason: None,
                newly_confirmed: None,
                forwarded: None,
            }),
        ),
    }
}

/// Runs a scan on its own task so that a dropped request cannot interrupt
/// the restore step. Shutdown still reaches it through `cancel`.
pub(crate) async fn run_scan<B, L>(
    scanner: Arc<SagaScanner<B, L>>,
    request: StageRequest,
    cancel: CancellationToken,
) -> Result<ScanOutcome, ApiError>
where
    B: MessageBroker + Clone + 'static,
    L: Ledger + 'static,
{
    tokio::spawn(async move { scanner.confirm(&request, &cancel).await })
        .await
        .map_err(|e| ApiError::Internal(format!("scan task failed: {e}")))?
        .map_err(ApiError::from)
}
