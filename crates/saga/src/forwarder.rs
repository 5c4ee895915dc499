//! Publishes confirmed work to the next stage.

use broker::{BrokerExt, MessageBroker};
use common::ShippingAddress;
use ledger::ParentRecord;

use crate::error::Result;
use crate::stage::NextHop;
use crate::work_item::WorkItem;

/// Chains the saga forward once a confirmation has committed.
///
/// A failed publish leaves the local record confirmed while the next stage
/// knows nothing about it. The caller logs and counts that gap; nothing is
/// rolled back.
#[derive(Clone)]
pub struct Forwarder<B: MessageBroker> {
    broker: B,
}

impl<B: MessageBroker> Forwarder<B> {
    pub fn new(broker: B) -> Self {
        Self { broker }
    }

    /// Builds the next stage's work item from the confirmed parent.
    ///
    /// `address` overrides whatever address the parent carries.
    pub fn next_item(
        parent: &ParentRecord,
        hop: &NextHop,
        address: Option<ShippingAddress>,
    ) -> WorkItem {
        let mut item = WorkItem::from_parent(parent, hop.stage.clone());
        if address.is_some() {
            item.address = address;
        }
        item
    }

    #[tracing::instrument(skip(self, parent, address), fields(key = %parent.key, queue = %hop.queue))]
    pub async fn forward(
        &self,
        parent: &ParentRecord,
        hop: &NextHop,
        address: Option<ShippingAddress>,
    ) -> Result<WorkItem> {
        let item = Self::next_item(parent, hop, address);
        self.broker
            .publish_durable(&hop.queue, &item.encode()?)
            .await?;

        tracing::info!(stage = %hop.stage, "work item forwarded");
        Ok(item)
    }
}
