use thiserror::Error;

use crate::DeliveryTag;

/// Errors that can occur when talking to the broker.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The broker connection is gone. Fatal to the current operation; the
    /// client never retries on its own.
    #[error("Broker unavailable: {0}")]
    Unavailable(String),

    /// The named queue has not been declared.
    #[error("Queue does not exist: {0}")]
    QueueNotFound(String),

    /// The delivery was already settled, or its visibility lease ran out and
    /// the message went back to the queue.
    #[error("Delivery {0} is no longer held")]
    DeliveryNotHeld(DeliveryTag),

    /// A database error occurred in a database-backed broker.
    #[error("Database error: {0}")]
    Database(sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl From<sqlx::Error> for BrokerError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::Io(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => BrokerError::Unavailable(e.to_string()),
            other => BrokerError::Database(other),
        }
    }
}

impl BrokerError {
    /// Returns true if the broker could not be reached at all.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, BrokerError::Unavailable(_))
    }
}

/// Result type for broker operations.
pub type Result<T> = std::result::Result<T, BrokerError>;
