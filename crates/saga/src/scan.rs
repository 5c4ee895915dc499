//! The pure half of a scan: classify payloads against a target and keep the
//! ones that must go back.
//!
//! Abstractly a scan partitions a multiset of payloads by a predicate,
//! consumes the first matching element and restores the rest. Nothing here
//! touches a broker.

use common::CorrelationKey;

use crate::work_item::WorkItem;

/// What a scan is looking for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanTarget {
    pub key: CorrelationKey,
    /// When set, the item must also belong to this user.
    pub owner: Option<String>,
}

impl ScanTarget {
    pub fn key(key: impl Into<CorrelationKey>) -> Self {
        Self {
            key: key.into(),
            owner: None,
        }
    }

    pub fn owned_by(mut self, user_id: impl Into<String>) -> Self {
        self.owner = Some(user_id.into());
        self
    }

    pub fn matches(&self, item: &WorkItem) -> bool {
        item.correlation_key == self.key
            && self
                .owner
                .as_deref()
                .is_none_or(|owner| owner == item.user_id)
    }
}

/// How one payload was classified.
#[derive(Debug)]
pub enum Classified {
    /// The target.
    Matched(WorkItem),
    /// Not the target; kept in the buffer.
    Buffered,
    /// Not decodable; the caller drops it.
    Malformed(String),
}

/// Accumulates non-matching payloads during a scan.
#[derive(Debug)]
pub struct ScanBuffer {
    target: ScanTarget,
    unmatched: Vec<Vec<u8>>,
    malformed: usize,
    inspected: usize,
}

impl ScanBuffer {
    pub fn new(target: ScanTarget) -> Self {
        Self {
            target,
            unmatched: Vec::new(),
            malformed: 0,
            inspected: 0,
        }
    }

    pub fn target(&self) -> &ScanTarget {
        &self.target
    }

    /// Tests one payload against the target. Mismatches are kept verbatim.
    pub fn offer(&mut self, payload: &[u8]) -> Classified {
        self.inspected += 1;

        match WorkItem::decode(payload) {
            Ok(item) if self.target.matches(&item) => Classified::Matched(item),
            Ok(_) => {
                self.unmatched.push(payload.to_vec());
                Classified::Buffered
            }
            Err(e) => {
                self.malformed += 1;
                Classified::Malformed(e.to_string())
            }
        }
    }

    /// Number of payloads offered so far.
    pub fn inspected(&self) -> usize {
        self.inspected
    }

    pub fn malformed(&self) -> usize {
        self.malformed
    }

    pub fn len(&self) -> usize {
        self.unmatched.len()
    }

    pub fn is_empty(&self) -> bool {
        self.unmatched.is_empty()
    }

    /// Hands back every buffered payload for restoring.
    pub fn drain(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.unmatched)
    }
}
