//! Saga error types.

use broker::BrokerError;
use common::CorrelationKey;
use ledger::LedgerError;
use thiserror::Error;

use crate::catalog::CatalogError;

/// Errors that can occur during saga operations.
#[derive(Debug, Error)]
pub enum SagaError {
    /// Broker error. `BrokerError::Unavailable` is fatal to the current call.
    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    /// Ledger error that was not recovered at the transaction boundary.
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// A queue payload could not be decoded as a work item.
    #[error("Malformed payload: {0}")]
    PayloadMalformed(String),

    /// The catalog lookup that precedes order creation failed.
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// The confirmation transaction kept failing with transient errors.
    #[error("Gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    /// The record was committed but its work item never reached the queue.
    #[error("Record {key} committed but not published: {source}")]
    Undelivered {
        key: CorrelationKey,
        source: BrokerError,
    },

    /// The caller cancelled the operation.
    #[error("Operation cancelled")]
    Cancelled,

    /// The scan ran past its deadline.
    #[error("Scan deadline of {0:?} exceeded")]
    DeadlineExceeded(std::time::Duration),
}

impl SagaError {
    /// Returns true if the broker could not be reached.
    pub fn is_broker_unavailable(&self) -> bool {
        match self {
            SagaError::Broker(e) | SagaError::Undelivered { source: e, .. } => e.is_unavailable(),
            _ => false,
        }
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
