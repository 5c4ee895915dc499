//! Stage definitions for the order fulfillment chain.
//!
//! ```text
//! placement ──► OrderQueue ──► order-confirmation ──► ShippingQueue
//!           ──► shipment-confirmation ──► DispatchQueue ──► dispatch
//! ```

/// Stage name: order created and work item enqueued.
pub const PLACEMENT: &str = "placement";

/// Stage name: the order service confirms an order against its queue.
pub const ORDER_CONFIRMATION: &str = "order-confirmation";

/// Stage name: a supplier confirms the shipment of a confirmed order.
pub const SHIPMENT_CONFIRMATION: &str = "shipment-confirmation";

/// Stage name: terminal notification consumed by the ingestion listener.
pub const DISPATCH: &str = "dispatch";

/// How a stage obtains the parent record it confirms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParentMode {
    /// The parent must already exist in the stage's ledger.
    Existing,
    /// The parent is created from the matched work item in the same
    /// transaction that confirms it.
    FromWorkItem,
}

/// Where a stage sends its work once confirmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NextHop {
    pub stage: String,
    pub queue: String,
}

/// Everything a scanner needs to know about the stage it serves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageConfig {
    pub name: String,
    pub queue: String,
    pub parent_mode: ParentMode,
    pub next: Option<NextHop>,
}

impl StageConfig {
    pub fn new(name: impl Into<String>, queue: impl Into<String>, parent_mode: ParentMode) -> Self {
        Self {
            name: name.into(),
            queue: queue.into(),
            parent_mode,
            next: None,
        }
    }

    /// Forwards confirmed work to `queue` for `stage`.
    pub fn forward_to(mut self, stage: impl Into<String>, queue: impl Into<String>) -> Self {
        self.next = Some(NextHop {
            stage: stage.into(),
            queue: queue.into(),
        });
        self
    }

    /// The hop producers use to hand work to this stage.
    pub fn entry(&self) -> NextHop {
        NextHop {
            stage: self.name.clone(),
            queue: self.queue.clone(),
        }
    }

    /// The order service's stage: scans `order_queue`, forwards to `shipping_queue`.
    pub fn order_confirmation(order_queue: &str, shipping_queue: &str) -> Self {
        Self::new(ORDER_CONFIRMATION, order_queue, ParentMode::Existing)
            .forward_to(SHIPMENT_CONFIRMATION, shipping_queue)
    }

    /// The shipping service's stage: scans `shipping_queue`, forwards to `dispatch_queue`.
    pub fn shipment_confirmation(shipping_queue: &str, dispatch_queue: &str) -> Self {
        Self::new(SHIPMENT_CONFIRMATION, shipping_queue, ParentMode::FromWorkItem)
            .forward_to(DISPATCH, dispatch_queue)
    }
}
