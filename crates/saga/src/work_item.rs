//! The message carried between stages.

use chrono::{DateTime, Utc};
use common::{CorrelationKey, Money, RecordStatus, ShippingAddress};
use ledger::ParentRecord;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SagaError};

/// A work item as it travels through a queue.
///
/// Encoded as a flat JSON object. Consumers must not assume in-order or
/// exactly-once delivery of these messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub correlation_key: CorrelationKey,
    /// The stage expected to consume this item.
    pub stage: String,
    pub consumer: String,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_name: Option<String>,
    pub amount: Money,
    pub status: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<ShippingAddress>,
}

impl WorkItem {
    /// Describes a committed parent record for the stage that consumes it.
    pub fn from_parent(parent: &ParentRecord, stage: impl Into<String>) -> Self {
        Self {
            correlation_key: parent.key.clone(),
            stage: stage.into(),
            consumer: parent.consumer.clone(),
            user_id: parent.user_id.clone(),
            item_id: parent.item_id.clone(),
            item_name: parent.item_name.clone(),
            amount: parent.amount,
            status: parent.status.to_string(),
            created_at: Utc::now(),
            address: parent.address.clone(),
        }
    }

    /// The parent record a downstream service creates when it confirms this
    /// item. Always starts out pending.
    pub fn to_parent(&self) -> ParentRecord {
        let mut parent = ParentRecord::pending(
            self.correlation_key.clone(),
            self.consumer.clone(),
            self.user_id.clone(),
            self.amount,
        );
        parent.item_id = self.item_id.clone();
        parent.item_name = self.item_name.clone();
        parent.address = self.address.clone();
        parent
    }

    /// Status as recorded by the producer, if it is one we know.
    pub fn record_status(&self) -> Option<RecordStatus> {
        RecordStatus::parse(&self.status)
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| SagaError::PayloadMalformed(e.to_string()))
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload).map_err(|e| SagaError::PayloadMalformed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parent() -> ParentRecord {
        ParentRecord::pending(
            CorrelationKey::new("7"),
            "ada@example.com",
            "u-1",
            Money::from_cents(2500),
        )
        .with_item("SKU-1", "Widget")
    }

    #[test]
    fn test_from_parent_copies_fields() {
        let item = WorkItem::from_parent(&parent(), "order-confirmation");

        assert_eq!(item.correlation_key.as_str(), "7");
        assert_eq!(item.stage, "order-confirmation");
        assert_eq!(item.item_name.as_deref(), Some("Widget"));
        assert_eq!(item.status, "Pending");
        assert_eq!(item.record_status(), Some(RecordStatus::Pending));
    }

    #[test]
    fn test_wire_format_is_flat() {
        let item = WorkItem::from_parent(&parent(), "order-confirmation");
        let value: serde_json::Value = serde_json::from_slice(&item.encode().unwrap()).unwrap();

        assert_eq!(value["correlation_key"], "7");
        assert_eq!(value["amount"], 2500);
        assert_eq!(value["user_id"], "u-1");
        assert!(value.get("address").is_none());
    }

    #[test]
    fn test_decode_tolerates_missing_optionals() {
        let payload = br#"{
            "correlation_key": "9",
            "stage": "shipment-confirmation",
            "consumer": "ada@example.com",
            "user_id": "u-1",
            "amount": 100,
            "status": "Confirmed",
            "created_at": "2024-01-01T00:00:00Z"
        }"#;

        let item = WorkItem::decode(payload).unwrap();
        assert_eq!(item.correlation_key.as_str(), "9");
        assert!(item.item_id.is_none());
        assert!(item.address.is_none());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            WorkItem::decode(b"not json"),
            Err(SagaError::PayloadMalformed(_))
        ));
        assert!(matches!(
            WorkItem::decode(br#"{"correlation_key": "1"}"#),
            Err(SagaError::PayloadMalformed(_))
        ));
    }

    #[test]
    fn test_to_parent_is_pending() {
        let mut item = WorkItem::from_parent(&parent(), "shipment-confirmation");
        item.status = "Confirmed".to_string();

        let record = item.to_parent();
        assert_eq!(record.status, RecordStatus::Pending);
        assert_eq!(record.item_id.as_deref(), Some("SKU-1"));
    }
}
