//! Shipment confirmation by suppliers.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use broker::MessageBroker;
use common::CorrelationKey;
use ledger::{Ledger, ParentRecord};
use saga::{ScanTarget, StageRequest};
use serde::Deserialize;

use super::{AppState, OutcomeResponse, outcome_response, run_scan};
use crate::error::ApiError;

#[derive(Deserialize)]
pub struct ConfirmShipmentRequest {
    /// The user who placed the order; the work item must belong to them.
    pub user_id: String,
    pub supplier_id: String,
}

/// POST /shipments/{key}/confirm: find the confirmed order in the shipping
/// queue, record the shipment and forward it to dispatch.
#[tracing::instrument(skip(state, req))]
pub async fn confirm<B, L>(
    State(state): State<Arc<AppState<B, L>>>,
    Path(key): Path<String>,
    Json(req): Json<ConfirmShipmentRequest>,
) -> Result<(StatusCode, Json<OutcomeResponse>), ApiError>
where
    B: MessageBroker + Clone + 'static,
    L: Ledger + Clone + 'static,
{
    if req.user_id.trim().is_empty() || req.supplier_id.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "user_id and supplier_id are required".to_string(),
        ));
    }

    let request = StageRequest::new(ScanTarget::key(key).owned_by(req.user_id))
        .confirmed_by(req.supplier_id);
    let outcome = run_scan(
        state.shipment_stage.clone(),
        request,
        state.shutdown.child_token(),
    )
    .await?;

    Ok(outcome_response(outcome))
}

/// GET /shipments/{key}: load a shipment record.
#[tracing::instrument(skip(state))]
pub async fn get<B, L>(
    State(state): State<Arc<AppState<B, L>>>,
    Path(key): Path<String>,
) -> Result<Json<ParentRecord>, ApiError>
where
    B: MessageBroker + Clone + 'static,
    L: Ledger + Clone + 'static,
{
    let key = CorrelationKey::new(key);
    state
        .shipments
        .get_parent(&key)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Shipment {key} not found")))
}
