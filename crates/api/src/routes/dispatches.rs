//! Dispatch notifications collected by the background listener.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use broker::MessageBroker;
use ledger::Ledger;
use saga::WorkItem;

use super::AppState;

/// GET /dispatches: every order that reached dispatch, oldest first.
pub async fn list<B, L>(State(state): State<Arc<AppState<B, L>>>) -> Json<Vec<WorkItem>>
where
    B: MessageBroker + Clone + 'static,
    L: Ledger + Clone + 'static,
{
    Json(state.dispatches.list().await)
}
