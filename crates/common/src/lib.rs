//! Shared identifiers and value objects used by every service in the saga.

pub mod status;
pub mod types;

pub use status::{RecordStatus, StageStatus};
pub use types::{CorrelationKey, Money, ShippingAddress};
