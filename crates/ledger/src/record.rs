//! Rows stored in a ledger.

use chrono::{DateTime, Utc};
use common::{CorrelationKey, Money, RecordStatus, ShippingAddress, StageStatus};
use serde::{Deserialize, Serialize};

/// A durable record keyed by correlation key: an order, a shipment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentRecord {
    pub key: CorrelationKey,
    pub consumer: String,
    pub user_id: String,
    pub item_id: Option<String>,
    pub item_name: Option<String>,
    pub amount: Money,
    pub address: Option<ShippingAddress>,
    pub status: RecordStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ParentRecord {
    /// Creates a new pending record.
    pub fn pending(
        key: CorrelationKey,
        consumer: impl Into<String>,
        user_id: impl Into<String>,
        amount: Money,
    ) -> Self {
        let now = Utc::now();
        Self {
            key,
            consumer: consumer.into(),
            user_id: user_id.into(),
            item_id: None,
            item_name: None,
            amount,
            address: None,
            status: RecordStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    /// Sets the catalog item this record refers to.
    pub fn with_item(mut self, item_id: impl Into<String>, item_name: impl Into<String>) -> Self {
        self.item_id = Some(item_id.into());
        self.item_name = Some(item_name.into());
        self
    }

    /// Sets the delivery address.
    pub fn with_address(mut self, address: ShippingAddress) -> Self {
        self.address = Some(address);
        self
    }
}

/// Idempotency marker proving that `stage` already confirmed `key`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationRecord {
    pub stage: String,
    pub key: CorrelationKey,
    pub user_id: String,
    pub stage_status: StageStatus,
    /// Who performed the confirmation, e.g. the supplier dispatching a shipment.
    pub confirmed_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Input to a single confirmation transaction.
#[derive(Debug, Clone)]
pub struct ConfirmRequest {
    pub stage: String,
    pub key: CorrelationKey,
    pub user_id: String,
    pub confirmed_by: Option<String>,
    /// When set, the parent is created from this record inside the same
    /// transaction if it does not exist yet. When unset, a missing parent
    /// fails the confirmation.
    pub materialize: Option<ParentRecord>,
}

impl ConfirmRequest {
    pub fn new(stage: impl Into<String>, key: CorrelationKey, user_id: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            key,
            user_id: user_id.into(),
            confirmed_by: None,
            materialize: None,
        }
    }

    pub fn confirmed_by(mut self, actor: impl Into<String>) -> Self {
        self.confirmed_by = Some(actor.into());
        self
    }

    pub fn materialize(mut self, parent: ParentRecord) -> Self {
        self.materialize = Some(parent);
        self
    }

    pub(crate) fn new_record(&self) -> ConfirmationRecord {
        ConfirmationRecord {
            stage: self.stage.clone(),
            key: self.key.clone(),
            user_id: self.user_id.clone(),
            stage_status: StageStatus::Pending,
            confirmed_by: self.confirmed_by.clone(),
            created_at: Utc::now(),
        }
    }
}

/// Result of a confirmation transaction that did not fail.
#[derive(Debug, Clone)]
pub struct Confirmation {
    /// The parent record as committed.
    pub parent: ParentRecord,
    /// The idempotency marker for this stage.
    pub record: ConfirmationRecord,
    /// False when the marker already existed and nothing was written.
    pub newly_confirmed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_record_defaults() {
        let record = ParentRecord::pending(CorrelationKey::new("7"), "ada@example.com", "u-1", Money::from_cents(500))
            .with_item("SKU-1", "Widget");

        assert_eq!(record.status, RecordStatus::Pending);
        assert_eq!(record.item_name.as_deref(), Some("Widget"));
        assert!(record.address.is_none());
        assert_eq!(record.created_at, record.updated_at);
    }

    #[test]
    fn confirm_request_builds_pending_marker() {
        let request = ConfirmRequest::new("order-confirmation", CorrelationKey::new("7"), "u-1")
            .confirmed_by("supplier-3");

        let record = request.new_record();
        assert_eq!(record.stage_status, StageStatus::Pending);
        assert_eq!(record.confirmed_by.as_deref(), Some("supplier-3"));
    }
}
