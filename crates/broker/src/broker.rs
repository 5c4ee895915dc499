use async_trait::async_trait;
use uuid::Uuid;

use crate::Result;

/// Opaque handle identifying one held delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeliveryTag(Uuid);

impl DeliveryTag {
    /// Creates a fresh delivery tag.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for DeliveryTag {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for DeliveryTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A message taken off a queue and held until it is settled.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub tag: DeliveryTag,
    pub queue: String,
    pub payload: Vec<u8>,
    /// True if this message was handed out before and never acknowledged.
    pub redelivered: bool,
}

/// Core trait for broker implementations.
///
/// All implementations must be thread-safe (Send + Sync). None of the methods
/// retry internally; a lost connection surfaces as
/// [`BrokerError::Unavailable`](crate::BrokerError::Unavailable) and the
/// caller decides what to do.
#[async_trait]
pub trait MessageBroker: Send + Sync {
    /// Declares a durable queue. Declaring an existing queue is a no-op.
    async fn declare_queue(&self, queue: &str) -> Result<()>;

    /// Appends a payload to a declared queue.
    async fn publish(&self, queue: &str, payload: &[u8]) -> Result<()>;

    /// Takes the next visible message, if any, and holds it.
    ///
    /// The returned delivery must be settled with [`ack`](Self::ack) or
    /// [`nack`](Self::nack).
    async fn try_dequeue(&self, queue: &str) -> Result<Option<Delivery>>;

    /// Removes a held message permanently.
    async fn ack(&self, delivery: &Delivery) -> Result<()>;

    /// Releases a held message. With `requeue` it becomes visible again,
    /// otherwise it is dropped.
    async fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<()>;

    /// Drops every visible message in the queue and returns how many were
    /// removed. Held deliveries are left alone.
    async fn purge_queue(&self, queue: &str) -> Result<u64>;

    /// Number of visible messages in the queue.
    async fn message_count(&self, queue: &str) -> Result<u64>;
}

/// Extension trait providing convenience methods for brokers.
#[async_trait]
pub trait BrokerExt: MessageBroker {
    /// Declares the queue, then publishes to it.
    async fn publish_durable(&self, queue: &str, payload: &[u8]) -> Result<()> {
        self.declare_queue(queue).await?;
        self.publish(queue, payload).await
    }
}

// Blanket implementation for all MessageBroker implementations
impl<T: MessageBroker + ?Sized> BrokerExt for T {}
