use async_trait::async_trait;
use common::CorrelationKey;

use crate::{Confirmation, ConfirmRequest, ConfirmationRecord, ParentRecord, Result};

/// Core trait for ledger implementations.
///
/// Every method is one local transaction. All implementations must be
/// thread-safe (Send + Sync).
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Inserts a pending parent record and a pending shadow confirmation
    /// record for `shadow_stage`, atomically.
    ///
    /// Fails with `AlreadyExists` if the key is taken.
    async fn create_with_shadow(&self, parent: ParentRecord, shadow_stage: &str) -> Result<()>;

    /// Runs one confirmation transaction:
    ///
    /// 1. if a confirmation record for `(stage, key)` exists, return it
    ///    without writing anything
    /// 2. otherwise insert the record and move the parent to `Confirmed`
    /// 3. commit both or neither
    ///
    /// A concurrent insert of the same marker surfaces as
    /// `DuplicateConfirmation`.
    async fn confirm(&self, request: &ConfirmRequest) -> Result<Confirmation>;

    /// Flips the stage status of a confirmation record to `Confirmed` once
    /// the next stage has been notified.
    async fn mark_forwarded(&self, stage: &str, key: &CorrelationKey) -> Result<()>;

    /// Moves a pending parent record to `Failed`.
    async fn mark_failed(&self, key: &CorrelationKey) -> Result<ParentRecord>;

    /// Loads a parent record.
    async fn get_parent(&self, key: &CorrelationKey) -> Result<Option<ParentRecord>>;

    /// Loads the confirmation record of one stage.
    async fn get_confirmation(
        &self,
        stage: &str,
        key: &CorrelationKey,
    ) -> Result<Option<ConfirmationRecord>>;

    /// Lists every confirmation record for a key, across stages.
    async fn confirmations_for(&self, key: &CorrelationKey) -> Result<Vec<ConfirmationRecord>>;
}
