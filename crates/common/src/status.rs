//! Status enumerations for parent and confirmation records.

use serde::{Deserialize, Serialize};

/// Lifecycle of a parent record (an order, a shipment).
///
/// ```text
/// Pending ──┬──► Confirmed
///           └──► Failed
/// ```
///
/// Confirmed and Failed are terminal; a record never returns to Pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum RecordStatus {
    #[default]
    Pending,
    Confirmed,
    Failed,
}

impl RecordStatus {
    /// Returns true if the record may move to `next`.
    ///
    /// Staying in the same state is allowed so that repeated confirmations
    /// are no-ops rather than errors.
    pub fn can_transition_to(&self, next: RecordStatus) -> bool {
        matches!(
            (self, next),
            (RecordStatus::Pending, _)
                | (RecordStatus::Confirmed, RecordStatus::Confirmed)
                | (RecordStatus::Failed, RecordStatus::Failed)
        )
    }

    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RecordStatus::Confirmed | RecordStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Pending => "Pending",
            RecordStatus::Confirmed => "Confirmed",
            RecordStatus::Failed => "Failed",
        }
    }

    /// Parses the stored column value.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Pending" => Some(RecordStatus::Pending),
            "Confirmed" => Some(RecordStatus::Confirmed),
            "Failed" => Some(RecordStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Status stored on a confirmation record.
///
/// A record is inserted as `Pending` and flips to `Confirmed` once the next
/// stage has been told about it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum StageStatus {
    #[default]
    Pending,
    Confirmed,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Pending => "Pending",
            StageStatus::Confirmed => "Confirmed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Pending" => Some(StageStatus::Pending),
            "Confirmed" => Some(StageStatus::Confirmed),
            _ => None,
        }
    }
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
