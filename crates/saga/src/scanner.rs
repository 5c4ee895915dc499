//! The saga scanner: find one work item in a shared queue, confirm it, and
//! put everything else back.

use std::time::Duration;

use broker::{Delivery, MessageBroker};
use common::{CorrelationKey, ShippingAddress};
use ledger::{Confirmation, ConfirmRequest, Ledger, ParentRecord};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, SagaError};
use crate::forwarder::Forwarder;
use crate::scan::{Classified, ScanBuffer, ScanTarget};
use crate::stage::{ParentMode, StageConfig};
use crate::state::ScanState;
use crate::transaction::{ConfirmationTransaction, RetryPolicy};
use crate::work_item::WorkItem;

/// Limits applied to a single scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanConfig {
    /// Time allowed for finding the target. Restoring buffered messages is
    /// not bounded by it.
    pub timeout: Option<Duration>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            timeout: Some(Duration::from_secs(5)),
        }
    }
}

/// One confirmation request against a stage.
#[derive(Debug, Clone)]
pub struct StageRequest {
    pub target: ScanTarget,
    /// Recorded on the confirmation record, e.g. the dispatching supplier.
    pub confirmed_by: Option<String>,
    /// Delivery address handed to the next stage.
    pub address: Option<ShippingAddress>,
}

impl StageRequest {
    pub fn new(target: ScanTarget) -> Self {
        Self {
            target,
            confirmed_by: None,
            address: None,
        }
    }

    pub fn confirmed_by(mut self, actor: impl Into<String>) -> Self {
        self.confirmed_by = Some(actor.into());
        self
    }

    pub fn with_address(mut self, address: ShippingAddress) -> Self {
        self.address = Some(address);
        self
    }
}

/// A successful confirmation.
#[derive(Debug, Clone)]
pub struct Confirmed {
    /// The work item that was matched and acknowledged.
    pub item: WorkItem,
    pub parent: ParentRecord,
    /// False when an earlier delivery of the same item already confirmed it.
    pub newly_confirmed: bool,
    /// The item published to the next stage, if one was published.
    pub forwarded: Option<WorkItem>,
}

/// Tri-state result of a scan.
#[derive(Debug, Clone)]
pub enum ScanOutcome {
    Confirmed(Box<Confirmed>),
    /// The transaction failed and the item went back on the queue.
    ConfirmationFailed { key: CorrelationKey, reason: String },
    /// The queue held no matching item. Concurrent scans of the same queue
    /// can hide each other's targets, so callers may retry before giving up.
    NotFound(CorrelationKey),
}

impl ScanOutcome {
    pub fn key(&self) -> &CorrelationKey {
        match self {
            ScanOutcome::Confirmed(confirmed) => &confirmed.parent.key,
            ScanOutcome::ConfirmationFailed { key, .. } | ScanOutcome::NotFound(key) => key,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        matches!(self, ScanOutcome::Confirmed(_))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScanOutcome::Confirmed(_) => "confirmed",
            ScanOutcome::ConfirmationFailed { .. } => "failed",
            ScanOutcome::NotFound(_) => "not_found",
        }
    }
}

struct Held {
    delivery: Delivery,
    item: WorkItem,
}

/// Scans one stage's queue for a target and runs its confirmation.
///
/// Every scan ends by republishing the non-matching messages it took off the
/// queue, including scans that were cancelled or timed out. Dropping the
/// future returned by [`confirm`](Self::confirm) skips that step, so callers
/// that can be dropped mid-request should run it on its own task.
pub struct SagaScanner<B: MessageBroker, L: Ledger> {
    broker: B,
    transaction: ConfirmationTransaction<L>,
    forwarder: Forwarder<B>,
    stage: StageConfig,
    config: ScanConfig,
}

impl<B, L> SagaScanner<B, L>
where
    B: MessageBroker + Clone,
    L: Ledger,
{
    pub fn new(
        broker: B,
        ledger: L,
        stage: StageConfig,
        retry: RetryPolicy,
        config: ScanConfig,
    ) -> Self {
        Self {
            forwarder: Forwarder::new(broker.clone()),
            broker,
            transaction: ConfirmationTransaction::new(ledger, retry),
            stage,
            config,
        }
    }

    pub fn stage(&self) -> &StageConfig {
        &self.stage
    }

    pub fn ledger(&self) -> &L {
        self.transaction.ledger()
    }

    /// Runs one scan for `request.target`.
    ///
    /// Errors are reserved for broker failures, cancellation and the
    /// deadline; a failed confirmation is a normal
    /// [`ScanOutcome::ConfirmationFailed`].
    #[tracing::instrument(
        skip(self, request, cancel),
        fields(stage = %self.stage.name, queue = %self.stage.queue, key = %request.target.key)
    )]
    pub async fn confirm(
        &self,
        request: &StageRequest,
        cancel: &CancellationToken,
    ) -> Result<ScanOutcome> {
        metrics::counter!("saga_scans_total").increment(1);
        let started = std::time::Instant::now();

        self.broker.declare_queue(&self.stage.queue).await?;

        let mut buffer = ScanBuffer::new(request.target.clone());
        let mut state = ScanState::Scanning;

        let result = match self.search(&mut buffer, cancel).await {
            Ok(Some(held)) => {
                advance(&mut state, ScanState::Matched);
                self.settle(held, request).await
            }
            Ok(None) => {
                advance(&mut state, ScanState::Exhausted);
                Ok(ScanOutcome::NotFound(request.target.key.clone()))
            }
            Err(e) => Err(e),
        };

        advance(&mut state, ScanState::DrainingUnmatched);
        let restored = self.restore(&mut buffer).await;

        let result = match (result, restored) {
            (Err(e), _) => Err(e),
            (Ok(_), Err(e)) => Err(e),
            (Ok(outcome), Ok(())) => Ok(outcome),
        };

        match &result {
            Ok(ScanOutcome::NotFound(_)) => advance(&mut state, ScanState::NotFound),
            _ => advance(&mut state, ScanState::Done),
        }

        let label = match &result {
            Ok(outcome) => outcome.as_str(),
            Err(SagaError::Cancelled) => "cancelled",
            Err(SagaError::DeadlineExceeded(_)) => "timed_out",
            Err(_) => "error",
        };
        metrics::counter!("saga_scan_outcomes_total", "outcome" => label).increment(1);
        metrics::histogram!("saga_scan_duration_seconds").record(started.elapsed().as_secs_f64());
        metrics::histogram!("saga_scan_depth").record(buffer.inspected() as f64);

        match &result {
            Ok(ScanOutcome::Confirmed(confirmed)) => tracing::info!(
                newly_confirmed = confirmed.newly_confirmed,
                forwarded = confirmed.forwarded.is_some(),
                depth = buffer.inspected(),
                "work item confirmed"
            ),
            Ok(ScanOutcome::ConfirmationFailed { reason, .. }) => {
                tracing::warn!(%reason, "confirmation failed, work item republished")
            }
            Ok(ScanOutcome::NotFound(_)) => {
                tracing::warn!(depth = buffer.inspected(), "no matching work item in queue")
            }
            Err(e) => tracing::warn!(error = %e, "scan aborted"),
        }

        result
    }

    /// Takes messages off the queue until the target turns up or the queue
    /// is empty. Non-matching messages are acknowledged and buffered.
    ///
    /// If cancellation or the deadline interrupts a dequeue in flight, a
    /// message that call already leased is not in the buffer; it becomes
    /// visible again only once its broker lease expires.
    async fn search(
        &self,
        buffer: &mut ScanBuffer,
        cancel: &CancellationToken,
    ) -> Result<Option<Held>> {
        let deadline = self.config.timeout.map(|t| Instant::now() + t);
        let expired = async {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(expired);

        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(SagaError::Cancelled),
                () = &mut expired => {
                    return Err(SagaError::DeadlineExceeded(self.config.timeout.unwrap_or_default()));
                }
                next = self.broker.try_dequeue(&self.stage.queue) => next?,
            };

            let Some(delivery) = next else {
                return Ok(None);
            };

            match buffer.offer(&delivery.payload) {
                Classified::Matched(item) => return Ok(Some(Held { delivery, item })),
                Classified::Buffered => self.broker.ack(&delivery).await?,
                Classified::Malformed(reason) => {
                    tracing::warn!(%reason, tag = %delivery.tag, "dropping malformed payload");
                    metrics::counter!("saga_poison_messages_total").increment(1);
                    self.broker.ack(&delivery).await?;
                }
            }
        }
    }

    /// Runs the confirmation for a held delivery and settles it.
    async fn settle(&self, held: Held, request: &StageRequest) -> Result<ScanOutcome> {
        let Held { delivery, item } = held;

        let mut confirm = ConfirmRequest::new(
            self.stage.name.clone(),
            item.correlation_key.clone(),
            item.user_id.clone(),
        );
        if let Some(actor) = &request.confirmed_by {
            confirm = confirm.confirmed_by(actor.clone());
        }
        if self.stage.parent_mode == ParentMode::FromWorkItem {
            confirm = confirm.materialize(item.to_parent());
        }

        match self.transaction.run(&confirm).await {
            Ok(confirmation) => {
                if let Err(e) = self.broker.ack(&delivery).await {
                    // The item will be redelivered and short-circuit next time.
                    tracing::warn!(error = %e, "could not acknowledge confirmed work item");
                }
                let forwarded = self.forward(&confirmation, request).await;

                Ok(ScanOutcome::Confirmed(Box::new(Confirmed {
                    item,
                    parent: confirmation.parent,
                    newly_confirmed: confirmation.newly_confirmed,
                    forwarded,
                })))
            }
            Err(e) => {
                self.return_to_queue(&delivery).await?;
                Ok(ScanOutcome::ConfirmationFailed {
                    key: item.correlation_key,
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Puts a failed item back at the tail of the queue. The copy is
    /// published before the held delivery is acknowledged, so a crash in
    /// between duplicates the item instead of losing it.
    async fn return_to_queue(&self, delivery: &Delivery) -> Result<()> {
        if let Err(e) = self.broker.publish(&delivery.queue, &delivery.payload).await {
            tracing::warn!(error = %e, "republish failed, releasing held delivery instead");
            self.broker.nack(delivery, true).await?;
            return Ok(());
        }
        metrics::counter!("saga_messages_republished_total").increment(1);

        if let Err(e) = self.broker.ack(delivery).await {
            tracing::warn!(error = %e, "could not acknowledge republished work item");
        }
        Ok(())
    }

    /// Publishes the next stage's work item and marks the stage forwarded.
    ///
    /// Only the call that wrote the confirmation marker forwards, so racing
    /// duplicates publish at most one next-stage item. A marker left at
    /// `StageStatus::Pending` records a forward that never went out.
    async fn forward(
        &self,
        confirmation: &Confirmation,
        request: &StageRequest,
    ) -> Option<WorkItem> {
        let hop = self.stage.next.as_ref()?;

        if !confirmation.newly_confirmed {
            tracing::debug!(
                stage_status = ?confirmation.record.stage_status,
                "already confirmed, not forwarding again"
            );
            return None;
        }

        match self
            .forwarder
            .forward(&confirmation.parent, hop, request.address.clone())
            .await
        {
            Ok(item) => {
                if let Err(e) = self
                    .ledger()
                    .mark_forwarded(&self.stage.name, &confirmation.parent.key)
                    .await
                {
                    tracing::warn!(error = %e, "forwarded but stage status not updated");
                }
                Some(item)
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    next_queue = %hop.queue,
                    "confirmed but not forwarded to next stage"
                );
                metrics::counter!("forward_failures_total").increment(1);
                None
            }
        }
    }

    /// Republishes every buffered payload. Not cancellable.
    async fn restore(&self, buffer: &mut ScanBuffer) -> Result<()> {
        let pending = buffer.drain();
        if pending.is_empty() {
            return Ok(());
        }

        let total = pending.len();
        let mut first_error = None;
        let mut restored = 0_u64;

        for payload in pending {
            match self.broker.publish(&self.stage.queue, &payload).await {
                Ok(()) => restored += 1,
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        metrics::counter!("saga_messages_republished_total").increment(restored);

        match first_error {
            Some(e) => {
                tracing::error!(
                    error = %e,
                    unrestored = total as u64 - restored,
                    "buffered work items could not be restored"
                );
                Err(e.into())
            }
            None => {
                tracing::debug!(restored, "buffered work items restored");
                Ok(())
            }
        }
    }
}

fn advance(state: &mut ScanState, next: ScanState) {
    debug_assert!(
        state.can_transition_to(next),
        "invalid scan transition {state} -> {next}"
    );
    tracing::trace!(from = %state, to = %next, "scan state");
    *state = next;
}
