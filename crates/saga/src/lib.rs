//! Queue-mediated confirmation saga.
//!
//! Services coordinate through durable queues and their own local ledgers,
//! never through a shared transaction. A stage finds its work item in a
//! shared queue, commits a local confirmation tied to it, and either
//! removes the item or returns it unchanged.
//!
//! The order fulfillment chain has three stages:
//! 1. Placement: the [`OutboxWriter`] commits a pending order and enqueues it
//! 2. Order confirmation: a [`SagaScanner`] confirms the order and forwards
//!    it with a shipping address
//! 3. Shipment confirmation: a second scanner, matching on key and owner,
//!    records the shipment and forwards it to dispatch
//!
//! Dispatch notifications are consumed by an [`IngestListener`].

pub mod catalog;
pub mod error;
pub mod forwarder;
pub mod identity;
pub mod listener;
pub mod outbox;
pub mod scan;
pub mod scanner;
pub mod stage;
pub mod state;
pub mod transaction;
pub mod work_item;

pub use catalog::{Catalog, CatalogError, InMemoryCatalog};
pub use error::{Result, SagaError};
pub use forwarder::Forwarder;
pub use identity::{Claims, IdentityError, SigningKey, derive_signing_key};
pub use listener::{DispatchBoard, IngestListener, WorkHandler};
pub use outbox::{NewOrder, OutboxWriter};
pub use scan::{Classified, ScanBuffer, ScanTarget};
pub use scanner::{Confirmed, SagaScanner, ScanConfig, ScanOutcome, StageRequest};
pub use stage::{NextHop, ParentMode, StageConfig};
pub use state::ScanState;
pub use transaction::{ConfirmationTransaction, RetryPolicy};
pub use work_item::WorkItem;
