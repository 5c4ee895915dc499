//! Local relational store for the confirmation saga.
//!
//! Each service owns one ledger holding two kinds of rows:
//! - **parent records** (an order, a shipment) whose status only ever moves
//!   forward from `Pending`
//! - **confirmation records**, unique per `(stage, key)`, which prove that a
//!   stage already confirmed a key and make redelivery harmless

pub mod error;
pub mod ledger;
pub mod memory;
pub mod postgres;
pub mod record;

pub use error::{LedgerError, Result};
pub use ledger::Ledger;
pub use memory::InMemoryLedger;
pub use postgres::PostgresLedger;
pub use record::{Confirmation, ConfirmRequest, ConfirmationRecord, ParentRecord};
