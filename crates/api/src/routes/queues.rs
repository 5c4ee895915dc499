//! Queue maintenance for incident cleanup.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use broker::MessageBroker;
use ledger::Ledger;
use saga::{Claims, derive_signing_key};
use serde::Serialize;

use super::AppState;
use crate::error::ApiError;

/// Role required for queue maintenance.
pub const ADMIN_ROLE: &str = "admin";

pub const SUBJECT_HEADER: &str = "x-subject";
pub const ROLES_HEADER: &str = "x-roles";
pub const EMAIL_HEADER: &str = "x-email";
pub const SIGNATURE_HEADER: &str = "x-signature";

#[derive(Serialize)]
pub struct PurgeResponse {
    pub queue: String,
    pub removed: u64,
}

/// DELETE /queues/{name}: drop every visible message in a queue.
///
/// When an identity secret is configured, the request must carry claims and
/// a signature over `DELETE /queues/{name}` made with the claims-derived key.
#[tracing::instrument(skip(state, headers))]
pub async fn purge<B, L>(
    State(state): State<Arc<AppState<B, L>>>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Result<Json<PurgeResponse>, ApiError>
where
    B: MessageBroker + Clone + 'static,
    L: Ledger + Clone + 'static,
{
    if let Some(secret) = &state.identity_secret
        && let Err(e) = authorize(&headers, secret, &signing_input(&name))
    {
        let reason = match &e {
            ApiError::Forbidden(_) => "forbidden",
            _ => "unauthorized",
        };
        metrics::counter!("admin_requests_rejected_total", "reason" => reason).increment(1);
        tracing::warn!(queue = %name, error = %e, "queue purge rejected");
        return Err(e);
    }

    let removed = state.broker.purge_queue(&name).await?;
    tracing::warn!(queue = %name, removed, "queue purged");

    Ok(Json(PurgeResponse {
        queue: name,
        removed,
    }))
}

/// The message an admin signs to purge `queue`.
pub fn signing_input(queue: &str) -> String {
    format!("DELETE /queues/{queue}")
}

fn authorize(headers: &HeaderMap, secret: &[u8], message: &str) -> Result<(), ApiError> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };

    let claims = Claims {
        subject: header(SUBJECT_HEADER),
        roles: header(ROLES_HEADER)
            .map(|roles| roles.split(',').map(|r| r.trim().to_string()).collect())
            .unwrap_or_default(),
        email: header(EMAIL_HEADER),
    };
    let signature = header(SIGNATURE_HEADER)
        .ok_or_else(|| ApiError::Unauthorized("missing signature".to_string()))?;

    let key = derive_signing_key(&claims, secret)?;
    key.verify(message.as_bytes(), &signature)?;

    if !claims.has_role(ADMIN_ROLE) {
        return Err(ApiError::Forbidden(format!(
            "role '{ADMIN_ROLE}' required"
        )));
    }
    Ok(())
}
