//! Scanner state machine.

use serde::{Deserialize, Serialize};

/// The state of a single scan.
///
/// State transitions:
/// ```text
/// Scanning ──┬──► Matched ──► DrainingUnmatched ──► Done
///            └──► Exhausted ──► DrainingUnmatched ──► NotFound
/// ```
///
/// Cancellation skips straight to `DrainingUnmatched`: buffered messages are
/// always restored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ScanState {
    /// Taking messages off the queue and testing them.
    #[default]
    Scanning,

    /// The target was found and its confirmation is running.
    Matched,

    /// The queue ran dry without a match.
    Exhausted,

    /// Restoring buffered messages to the queue.
    DrainingUnmatched,

    /// Finished after a match (terminal state).
    Done,

    /// Finished without a match (terminal state).
    NotFound,
}

impl ScanState {
    /// Returns true if the scan may move to `next`.
    pub fn can_transition_to(&self, next: ScanState) -> bool {
        matches!(
            (self, next),
            (ScanState::Scanning, ScanState::Matched)
                | (ScanState::Scanning, ScanState::Exhausted)
                | (ScanState::Scanning, ScanState::DrainingUnmatched)
                | (ScanState::Matched, ScanState::DrainingUnmatched)
                | (ScanState::Exhausted, ScanState::DrainingUnmatched)
                | (ScanState::DrainingUnmatched, ScanState::Done)
                | (ScanState::DrainingUnmatched, ScanState::NotFound)
        )
    }

    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ScanState::Done | ScanState::NotFound)
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanState::Scanning => "Scanning",
            ScanState::Matched => "Matched",
            ScanState::Exhausted => "Exhausted",
            ScanState::DrainingUnmatched => "DrainingUnmatched",
            ScanState::Done => "Done",
            ScanState::NotFound => "NotFound",
        }
    }
}

impl std::fmt::Display for ScanState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
