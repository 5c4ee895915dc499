//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use broker::BrokerError;
use ledger::LedgerError;
use saga::{CatalogError, IdentityError, SagaError};

/// API-level error type that maps to HTTP responses.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Resource not found.
    #[error("{0}")]
    NotFound(String),
    /// Bad request from the client.
    #[error("{0}")]
    BadRequest(String),
    /// Missing credentials.
    #[error("{0}")]
    Unauthorized(String),
    /// Valid credentials without the required role.
    #[error("{0}")]
    Forbidden(String),
    /// Claims or signature rejected.
    #[error(transparent)]
    Identity(#[from] IdentityError),
    #[error(transparent)]
    Broker(#[from] BrokerError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Saga(#[from] SagaError),
    /// Internal server error.
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::Identity(err) => identity_status(err),
            ApiError::Broker(err) => broker_status(err),
            ApiError::Ledger(err) => ledger_status(err),
            ApiError::Saga(err) => saga_status(err),
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.to_string();

        if status.is_server_error() {
            tracing::error!(%status, error = %message, "request failed");
        }

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn identity_status(err: &IdentityError) -> StatusCode {
    match err {
        // Startup validation rejects short secrets, so this is a server fault.
        IdentityError::SecretTooShort => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::UNAUTHORIZED,
    }
}

fn broker_status(err: &BrokerError) -> StatusCode {
    match err {
        BrokerError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        BrokerError::QueueNotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn ledger_status(err: &LedgerError) -> StatusCode {
    match err {
        LedgerError::ParentNotFound(_) => StatusCode::NOT_FOUND,
        LedgerError::AlreadyExists(_) | LedgerError::InvalidTransition { .. } => {
            StatusCode::CONFLICT
        }
        LedgerError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn saga_status(err: &SagaError) -> StatusCode {
    match err {
        SagaError::Broker(e) => broker_status(e),
        SagaError::Ledger(e) => ledger_status(e),
        SagaError::Catalog(CatalogError::ItemNotFound(_)) => StatusCode::NOT_FOUND,
        SagaError::Catalog(CatalogError::Unavailable(_)) => StatusCode::BAD_GATEWAY,
        SagaError::Undelivered { .. }
        | SagaError::RetriesExhausted { .. }
        | SagaError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
        SagaError::DeadlineExceeded(_) => StatusCode::GATEWAY_TIMEOUT,
        SagaError::PayloadMalformed(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
