//! Background ingestion of a queue.
//!
//! Unlike the scanner, the listener takes every message it sees. A message
//! is acknowledged only after its handler succeeded. A handler error
//! releases it back to the queue. Payloads that cannot be decoded, or that
//! the handler rejects as malformed, are acknowledged and dropped.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use broker::{Delivery, MessageBroker};
use common::CorrelationKey;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, SagaError};
use crate::work_item::WorkItem;

/// Processes work items taken off a queue.
#[async_trait]
pub trait WorkHandler: Send + Sync {
    /// Handles one item. Must tolerate seeing the same item more than once.
    ///
    /// Returning [`SagaError::PayloadMalformed`] drops the item for good;
    /// any other error requeues it.
    async fn handle(&self, item: WorkItem) -> Result<()>;
}

/// Polls a queue and feeds a [`WorkHandler`].
pub struct IngestListener<B: MessageBroker, H: WorkHandler> {
    broker: B,
    queue: String,
    handler: H,
    poll_interval: Duration,
}

impl<B: MessageBroker, H: WorkHandler> IngestListener<B, H> {
    pub fn new(broker: B, queue: impl Into<String>, handler: H) -> Self {
        Self {
            broker,
            queue: queue.into(),
            handler,
            poll_interval: Duration::from_millis(250),
        }
    }

    /// How long to wait when the queue is empty or a handler failed.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Runs until `cancel` fires. Broker outages are logged and retried
    /// after the poll interval.
    #[tracing::instrument(skip(self, cancel), fields(queue = %self.queue))]
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        self.broker.declare_queue(&self.queue).await?;
        tracing::info!("listener started");

        while !cancel.is_cancelled() {
            let busy = match self.poll_once().await {
                Ok(handled) => handled,
                Err(e) => {
                    tracing::warn!(error = %e, "listener poll failed");
                    false
                }
            };

            if !busy {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(self.poll_interval) => {}
                }
            }
        }

        tracing::info!("listener stopped");
        Ok(())
    }

    /// Takes at most one message and settles it. Returns true if a message
    /// was handled successfully.
    pub async fn poll_once(&self) -> Result<bool> {
        let Some(delivery) = self.broker.try_dequeue(&self.queue).await? else {
            return Ok(false);
        };

        let item = match WorkItem::decode(&delivery.payload) {
            Ok(item) => item,
            Err(e) => {
                tracing::warn!(error = %e, tag = %delivery.tag, "dropping malformed payload");
                metrics::counter!("saga_poison_messages_total").increment(1);
                self.broker.ack(&delivery).await?;
                return Ok(false);
            }
        };

        self.dispatch(delivery, item).await
    }

    async fn dispatch(&self, delivery: Delivery, item: WorkItem) -> Result<bool> {
        let key = item.correlation_key.clone();

        match self.handler.handle(item).await {
            Ok(()) => {
                self.broker.ack(&delivery).await?;
                tracing::debug!(%key, "work item ingested");
                Ok(true)
            }
            Err(SagaError::PayloadMalformed(reason)) => {
                tracing::warn!(%key, %reason, "handler rejected work item, dropping");
                metrics::counter!("saga_poison_messages_total").increment(1);
                self.broker.ack(&delivery).await?;
                Ok(false)
            }
            Err(e) => {
                tracing::warn!(%key, error = %e, "handler failed, requeueing");
                self.broker.nack(&delivery, true).await?;
                Ok(false)
            }
        }
    }
}

/// Latest dispatch notification per order, as seen by the listener.
#[derive(Clone, Default)]
pub struct DispatchBoard {
    entries: Arc<RwLock<HashMap<CorrelationKey, WorkItem>>>,
}

impl DispatchBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every dispatched item, oldest first.
    pub async fn list(&self) -> Vec<WorkItem> {
        let mut items: Vec<WorkItem> = self.entries.read().await.values().cloned().collect();
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        items
    }

    pub async fn get(&self, key: &CorrelationKey) -> Option<WorkItem> {
        self.entries.read().await.get(key).cloned()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl WorkHandler for DispatchBoard {
    async fn handle(&self, item: WorkItem) -> Result<()> {
        if item.address.is_none() {
            return Err(SagaError::PayloadMalformed(format!(
                "dispatch for {} has no address",
                item.correlation_key
            )));
        }
        self.entries
            .write()
            .await
            .insert(item.correlation_key.clone(), item);
        Ok(())
    }
}
