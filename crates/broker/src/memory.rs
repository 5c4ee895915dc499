use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{BrokerError, Delivery, DeliveryTag, MessageBroker, Result};

#[derive(Debug, Clone)]
struct StoredMessage {
    payload: Vec<u8>,
    deliveries: u32,
}

#[derive(Debug, Default)]
struct QueueState {
    ready: VecDeque<StoredMessage>,
    held: HashMap<DeliveryTag, StoredMessage>,
}

/// In-memory broker for tests and single-process runs.
///
/// Mirrors the visibility rules of the production broker: a dequeued
/// message sits in a held set until it is settled, and
/// [`recover_unacked`](Self::recover_unacked) plays the part of a consumer
/// crash by handing every held message back to its queue.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    queues: Arc<Mutex<HashMap<String, QueueState>>>,
    unavailable: Arc<AtomicBool>,
    fail_on_publish: Arc<AtomicBool>,
}

impl InMemoryBroker {
    /// Creates a new empty in-memory broker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every operation fail with `Unavailable` while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Makes `publish` fail with `Unavailable` while set. Other operations
    /// keep working.
    pub fn set_fail_on_publish(&self, fail: bool) {
        self.fail_on_publish.store(fail, Ordering::SeqCst);
    }

    /// Returns copies of the visible payloads in queue order.
    pub async fn queue_contents(&self, queue: &str) -> Vec<Vec<u8>> {
        self.queues
            .lock()
            .await
            .get(queue)
            .map(|q| q.ready.iter().map(|m| m.payload.clone()).collect())
            .unwrap_or_default()
    }

    /// Number of deliveries currently held across all queues.
    pub async fn held_count(&self) -> usize {
        self.queues
            .lock()
            .await
            .values()
            .map(|q| q.held.len())
            .sum()
    }

    /// Returns every held message to the front of its queue, as the broker
    /// does when a consumer connection drops. Returns how many were released.
    pub async fn recover_unacked(&self) -> usize {
        let mut queues = self.queues.lock().await;
        let mut released = 0;
        for state in queues.values_mut() {
            for (_, message) in state.held.drain() {
                state.ready.push_front(message);
                released += 1;
            }
        }
        released
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(BrokerError::Unavailable(
                "in-memory broker marked unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl MessageBroker for InMemoryBroker {
    async fn declare_queue(&self, queue: &str) -> Result<()> {
        self.check_available()?;
        self.queues
            .lock()
            .await
            .entry(queue.to_string())
            .or_default();
        Ok(())
    }

    async fn publish(&self, queue: &str, payload: &[u8]) -> Result<()> {
        self.check_available()?;
        if self.fail_on_publish.load(Ordering::SeqCst) {
            return Err(BrokerError::Unavailable(
                "publish rejected by in-memory broker".to_string(),
            ));
        }

        let mut queues = self.queues.lock().await;
        let state = queues
            .get_mut(queue)
            .ok_or_else(|| BrokerError::QueueNotFound(queue.to_string()))?;
        state.ready.push_back(StoredMessage {
            payload: payload.to_vec(),
            deliveries: 0,
        });
        metrics::counter!("broker_messages_published_total").increment(1);
        Ok(())
    }

    async fn try_dequeue(&self, queue: &str) -> Result<Option<Delivery>> {
        self.check_available()?;

        let mut queues = self.queues.lock().await;
        let state = queues
            .get_mut(queue)
            .ok_or_else(|| BrokerError::QueueNotFound(queue.to_string()))?;

        let Some(mut message) = state.ready.pop_front() else {
            return Ok(None);
        };
        message.deliveries += 1;

        let tag = DeliveryTag::new();
        let delivery = Delivery {
            tag,
            queue: queue.to_string(),
            payload: message.payload.clone(),
            redelivered: message.deliveries > 1,
        };
        state.held.insert(tag, message);
        Ok(Some(delivery))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        self.check_available()?;

        let mut queues = self.queues.lock().await;
        let state = queues
            .get_mut(&delivery.queue)
            .ok_or_else(|| BrokerError::QueueNotFound(delivery.queue.clone()))?;
        state
            .held
            .remove(&delivery.tag)
            .map(|_| ())
            .ok_or(BrokerError::DeliveryNotHeld(delivery.tag))
    }

    async fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<()> {
        self.check_available()?;

        let mut queues = self.queues.lock().await;
        let state = queues
            .get_mut(&delivery.queue)
            .ok_or_else(|| BrokerError::QueueNotFound(delivery.queue.clone()))?;
        let message = state
            .held
            .remove(&delivery.tag)
            .ok_or(BrokerError::DeliveryNotHeld(delivery.tag))?;
        if requeue {
            state.ready.push_front(message);
        }
        Ok(())
    }

    async fn purge_queue(&self, queue: &str) -> Result<u64> {
        self.check_available()?;

        let mut queues = self.queues.lock().await;
        let state = queues
            .get_mut(queue)
            .ok_or_else(|| BrokerError::QueueNotFound(queue.to_string()))?;
        let removed = state.ready.len() as u64;
        state.ready.clear();
        Ok(removed)
    }

    async fn message_count(&self, queue: &str) -> Result<u64> {
        self.check_available()?;

        let queues = self.queues.lock().await;
        queues
            .get(queue)
            .map(|q| q.ready.len() as u64)
            .ok_or_else(|| BrokerError::QueueNotFound(queue.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BrokerExt;

    const QUEUE: &str = "OrderQueue";

    async fn broker_with(payloads: &[&str]) -> InMemoryBroker {
        let broker = InMemoryBroker::new();
        broker.declare_queue(QUEUE).await.unwrap();
        for p in payloads {
            broker.publish(QUEUE, p.as_bytes()).await.unwrap();
        }
        broker
    }

    #[tokio::test]
    async fn test_declare_is_idempotent() {
        let broker = broker_with(&["a"]).await;
        broker.declare_queue(QUEUE).await.unwrap();
        assert_eq!(broker.message_count(QUEUE).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_publish_to_undeclared_queue_fails() {
        let broker = InMemoryBroker::new();
        let result = broker.publish("missing", b"x").await;
        assert!(matches!(result, Err(BrokerError::QueueNotFound(q)) if q == "missing"));
    }

    #[tokio::test]
    async fn test_publish_durable_declares_first() {
        let broker = InMemoryBroker::new();
        broker.publish_durable("fresh", b"x").await.unwrap();
        assert_eq!(broker.queue_contents("fresh").await, vec![b"x".to_vec()]);
    }

    #[tokio::test]
    async fn test_dequeue_holds_message_until_ack() {
        let broker = broker_with(&["a", "b"]).await;

        let delivery = broker.try_dequeue(QUEUE).await.unwrap().unwrap();
        assert_eq!(delivery.payload, b"a");
        assert!(!delivery.redelivered);
        assert_eq!(broker.message_count(QUEUE).await.unwrap(), 1);
        assert_eq!(broker.held_count().await, 1);

        broker.ack(&delivery).await.unwrap();
        assert_eq!(broker.held_count().await, 0);
        assert_eq!(broker.queue_contents(QUEUE).await, vec![b"b".to_vec()]);
    }

    #[tokio::test]
    async fn test_empty_queue_returns_none() {
        let broker = broker_with(&[]).await;
        assert!(broker.try_dequeue(QUEUE).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_double_ack_is_rejected() {
        let broker = broker_with(&["a"]).await;
        let delivery = broker.try_dequeue(QUEUE).await.unwrap().unwrap();
        broker.ack(&delivery).await.unwrap();

        let result = broker.ack(&delivery).await;
        assert!(matches!(result, Err(BrokerError::DeliveryNotHeld(_))));
    }

    #[tokio::test]
    async fn test_nack_requeue_and_drop() {
        let broker = broker_with(&["a", "b"]).await;

        let first = broker.try_dequeue(QUEUE).await.unwrap().unwrap();
        broker.nack(&first, true).await.unwrap();
        let again = broker.try_dequeue(QUEUE).await.unwrap().unwrap();
        assert_eq!(again.payload, b"a");
        assert!(again.redelivered);

        broker.nack(&again, false).await.unwrap();
        assert_eq!(broker.queue_contents(QUEUE).await, vec![b"b".to_vec()]);
    }

    #[tokio::test]
    async fn test_recover_unacked_restores_held_messages() {
        let broker = broker_with(&["a", "b"]).await;
        let _held = broker.try_dequeue(QUEUE).await.unwrap().unwrap();

        assert_eq!(broker.recover_unacked().await, 1);
        assert_eq!(
            broker.queue_contents(QUEUE).await,
            vec![b"a".to_vec(), b"b".to_vec()]
        );

        let redelivered = broker.try_dequeue(QUEUE).await.unwrap().unwrap();
        assert!(redelivered.redelivered);
    }

    #[tokio::test]
    async fn test_purge_counts_visible_messages() {
        let broker = broker_with(&["a", "b", "c"]).await;
        let held = broker.try_dequeue(QUEUE).await.unwrap().unwrap();

        assert_eq!(broker.purge_queue(QUEUE).await.unwrap(), 2);
        assert_eq!(broker.message_count(QUEUE).await.unwrap(), 0);
        broker.ack(&held).await.unwrap();
    }

    #[tokio::test]
    async fn test_purge_unknown_queue() {
        let broker = InMemoryBroker::new();
        let result = broker.purge_queue("nope").await;
        assert!(matches!(result, Err(BrokerError::QueueNotFound(_))));
    }

    #[tokio::test]
    async fn test_unavailable_fails_everything() {
        let broker = broker_with(&["a"]).await;
        broker.set_unavailable(true);

        assert!(broker.try_dequeue(QUEUE).await.unwrap_err().is_unavailable());
        assert!(broker.publish(QUEUE, b"b").await.unwrap_err().is_unavailable());

        broker.set_unavailable(false);
        assert_eq!(broker.message_count(QUEUE).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_fail_on_publish_leaves_dequeue_working() {
        let broker = broker_with(&["a"]).await;
        broker.set_fail_on_publish(true);

        assert!(broker.publish(QUEUE, b"b").await.is_err());
        assert!(broker.try_dequeue(QUEUE).await.unwrap().is_some());
    }
}
