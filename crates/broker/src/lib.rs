//! Broker client for the confirmation saga.
//!
//! Queues are durable and named. A dequeued message is *held*: invisible to
//! other consumers of the same queue until it is acknowledged (removed for
//! good) or negatively acknowledged (released or dropped). A consumer that
//! disappears while holding a message gives it back to the queue, so delivery
//! is at-least-once.

pub mod broker;
pub mod error;
pub mod memory;
pub mod postgres;

pub use broker::{BrokerExt, Delivery, DeliveryTag, MessageBroker};
pub use error::{BrokerError, Result};
pub use memory::InMemoryBroker;
pub use postgres::PostgresBroker;
