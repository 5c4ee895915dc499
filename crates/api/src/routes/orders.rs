//! Order creation, lookup, confirmation and cancellation.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use broker::MessageBroker;
use common::{CorrelationKey, Money, ShippingAddress};
use ledger::{ConfirmationRecord, Ledger, ParentRecord};
use saga::{NewOrder, ScanTarget, StageRequest, WorkItem};
use serde::{Deserialize, Serialize};

use super::{AppState, OutcomeResponse, outcome_response, run_scan};
use crate::error::ApiError;

const ANONYMOUS: &str = "anonymous";

// -- Request types --

#[derive(Deserialize)]
pub struct CreateOrderRequest {
    pub item_id: String,
    pub amount_cents: i64,
    pub user_id: Option<String>,
    pub consumer: Option<String>,
}

#[derive(Deserialize)]
pub struct ConfirmOrderRequest {
    pub address: ShippingAddress,
}

// -- Response types --

#[derive(Serialize)]
pub struct OrderResponse {
    pub order: ParentRecord,
    pub confirmations: Vec<ConfirmationRecord>,
}

// -- Handlers --

/// POST /orders: create a pending order and enqueue it for confirmation.
#[tracing::instrument(skip(state, req))]
pub async fn create<B, L>(
    State(state): State<Arc<AppState<B, L>>>,
    Json(req): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<WorkItem>), ApiError>
where
    B: MessageBroker + Clone + 'static,
    L: Ledger + Clone + 'static,
{
    if req.item_id.trim().is_empty() {
        return Err(ApiError::BadRequest("item_id must not be empty".to_string()));
    }
    let amount = Money::from_cents(req.amount_cents);
    if !amount.is_positive() {
        return Err(ApiError::BadRequest(format!(
            "amount_cents must be positive, got {}",
            req.amount_cents
        )));
    }

    let item = state
        .outbox
        .create_and_enqueue(NewOrder {
            item_id: req.item_id,
            amount,
            user_id: non_empty_or(req.user_id, ANONYMOUS),
            consumer: non_empty_or(req.consumer, ANONYMOUS),
        })
        .await?;

    Ok((StatusCode::CREATED, Json(item)))
}

/// GET /orders/{key}: load an order and its confirmation records.
#[tracing::instrument(skip(state))]
pub async fn get<B, L>(
    State(state): State<Arc<AppState<B, L>>>,
    Path(key): Path<String>,
) -> Result<Json<OrderResponse>, ApiError>
where
    B: MessageBroker + Clone + 'static,
    L: Ledger + Clone + 'static,
{
    let key = CorrelationKey::new(key);
    let order = state
        .orders
        .get_parent(&key)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Order {key} not found")))?;
    let confirmations = state.orders.confirmations_for(&key).await?;

    Ok(Json(OrderResponse {
        order,
        confirmations,
    }))
}

/// POST /orders/{key}/confirm: find the order in the order queue, confirm
/// it, and forward it to shipping with the given address.
#[tracing::instrument(skip(state, req))]
pub async fn confirm<B, L>(
    State(state): State<Arc<AppState<B, L>>>,
    Path(key): Path<String>,
    Json(req): Json<ConfirmOrderRequest>,
) -> Result<(StatusCode, Json<OutcomeResponse>), ApiError>
where
    B: MessageBroker + Clone + 'static,
    L: Ledger + Clone + 'static,
{
    if !req.address.is_deliverable() {
        return Err(ApiError::BadRequest(
            "address needs home_address, city and country".to_string(),
        ));
    }

    let request = StageRequest::new(ScanTarget::key(key)).with_address(req.address);
    let outcome = run_scan(
        state.order_stage.clone(),
        request,
        state.shutdown.child_token(),
    )
    .await?;

    Ok(outcome_response(outcome))
}

/// POST /orders/{key}/cancel: mark a pending order as failed.
#[tracing::instrument(skip(state))]
pub async fn cancel<B, L>(
    State(state): State<Arc<AppState<B, L>>>,
    Path(key): Path<String>,
) -> Result<Json<ParentRecord>, ApiError>
where
    B: MessageBroker + Clone + 'static,
    L: Ledger + Clone + 'static,
{
    let order = state.orders.mark_failed(&CorrelationKey::new(key)).await?;
    tracing::info!(key = %order.key, "order cancelled");
    Ok(Json(order))
}

fn non_empty_or(value: Option<String>, fallback: &str) -> String {
    value
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| fallback.to_string())
}
