use common::{CorrelationKey, RecordStatus};
use thiserror::Error;

/// Errors that can occur when interacting with a ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// A failure worth retrying: lost connection, serialization conflict,
    /// deadlock.
    #[error("Transient storage error: {0}")]
    Transient(String),

    /// Another transaction inserted the confirmation record for this key
    /// first. Callers treat this as "already confirmed".
    #[error("Confirmation for {key} at stage '{stage}' already exists")]
    DuplicateConfirmation { stage: String, key: CorrelationKey },

    /// No parent record exists for the key.
    #[error("Parent record not found: {0}")]
    ParentNotFound(CorrelationKey),

    /// A parent record with this key already exists.
    #[error("Parent record already exists: {0}")]
    AlreadyExists(CorrelationKey),

    /// The requested status change would move the record backwards.
    #[error("Invalid status transition for {key}: {from} -> {to}")]
    InvalidTransition {
        key: CorrelationKey,
        from: RecordStatus,
        to: RecordStatus,
    },

    /// A failure injected by a test double.
    #[error("Injected failure: {0}")]
    Injected(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored column held a value the ledger does not understand.
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

// Postgres error codes worth retrying
const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";

impl From<sqlx::Error> for LedgerError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::Io(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => LedgerError::Transient(e.to_string()),
            sqlx::Error::Database(ref db_err)
                if matches!(
                    db_err.code().as_deref(),
                    Some(SERIALIZATION_FAILURE) | Some(DEADLOCK_DETECTED)
                ) =>
            {
                LedgerError::Transient(e.to_string())
            }
            other => LedgerError::Database(other),
        }
    }
}

impl LedgerError {
    /// Returns true if the whole transaction may be retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, LedgerError::Transient(_))
    }
}

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_timeouts_are_transient() {
        assert!(LedgerError::from(sqlx::Error::PoolTimedOut).is_transient());
        assert!(!LedgerError::from(sqlx::Error::RowNotFound).is_transient());
    }
}
