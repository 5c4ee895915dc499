//! Creates parent records and enqueues their work items.

use broker::{BrokerExt, MessageBroker};
use common::{CorrelationKey, Money};
use ledger::{Ledger, ParentRecord};

use crate::catalog::Catalog;
use crate::error::{Result, SagaError};
use crate::stage::{NextHop, PLACEMENT};
use crate::work_item::WorkItem;

/// Input for a new order.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub item_id: String,
    pub amount: Money,
    pub user_id: String,
    pub consumer: String,
}

/// Writes a parent record plus its shadow confirmation record in one local
/// transaction, then publishes a work item for the next stage.
///
/// If the publish fails after the commit, the record stays pending with no
/// message in flight. The call reports [`SagaError::Undelivered`] and does
/// not retry.
pub struct OutboxWriter<B, L, C>
where
    B: MessageBroker,
    L: Ledger,
    C: Catalog,
{
    broker: B,
    ledger: L,
    catalog: C,
    next: NextHop,
}

impl<B, L, C> OutboxWriter<B, L, C>
where
    B: MessageBroker,
    L: Ledger,
    C: Catalog,
{
    pub fn new(broker: B, ledger: L, catalog: C, next: NextHop) -> Self {
        Self {
            broker,
            ledger,
            catalog,
            next,
        }
    }

    /// Creates a pending order under a freshly generated key.
    pub async fn create_and_enqueue(&self, order: NewOrder) -> Result<WorkItem> {
        self.create_with_key(CorrelationKey::generate(), order)
            .await
    }

    /// Creates a pending order under `key`.
    ///
    /// The catalog lookup happens before anything is written, so a catalog
    /// failure leaves no partial record behind.
    #[tracing::instrument(skip(self, order), fields(key = %key, queue = %self.next.queue))]
    pub async fn create_with_key(&self, key: CorrelationKey, order: NewOrder) -> Result<WorkItem> {
        let item_name = self.catalog.item_name(&order.item_id).await?;

        let parent = ParentRecord::pending(key.clone(), order.consumer, order.user_id, order.amount)
            .with_item(order.item_id, item_name);
        let item = WorkItem::from_parent(&parent, self.next.stage.clone());
        let payload = item.encode()?;

        self.ledger.create_with_shadow(parent, PLACEMENT).await?;

        if let Err(source) = self.broker.publish_durable(&self.next.queue, &payload).await {
            tracing::error!(error = %source, "record committed but work item not published");
            metrics::counter!("outbox_publish_failures_total").increment(1);
            return Err(SagaError::Undelivered { key, source });
        }

        tracing::info!("order created and enqueued");
        Ok(item)
    }
}
