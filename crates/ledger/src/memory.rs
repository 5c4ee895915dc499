use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use common::{CorrelationKey, RecordStatus, StageStatus};
use tokio::sync::RwLock;

use crate::{
    Confirmation, ConfirmRequest, ConfirmationRecord, Ledger, LedgerError, ParentRecord, Result,
};

#[derive(Debug, Default)]
struct LedgerState {
    parents: HashMap<CorrelationKey, ParentRecord>,
    confirmations: HashMap<(String, CorrelationKey), ConfirmationRecord>,
}

/// In-memory ledger for testing.
///
/// The confirmation check and the commit happen under separate lock
/// acquisitions, like a read-committed database: two concurrent confirmers
/// can both see "not confirmed yet", and the loser hits the uniqueness check
/// at commit time.
#[derive(Clone, Default)]
pub struct InMemoryLedger {
    state: Arc<RwLock<LedgerState>>,
    fail_on_confirm: Arc<AtomicBool>,
    fail_on_create: Arc<AtomicBool>,
    transient_failures: Arc<AtomicU32>,
}

impl InMemoryLedger {
    /// Creates a new empty in-memory ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every confirmation commit fail (and roll back) while set.
    pub fn set_fail_on_confirm(&self, fail: bool) {
        self.fail_on_confirm.store(fail, Ordering::SeqCst);
    }

    /// Makes `create_with_shadow` fail while set.
    pub fn set_fail_on_create(&self, fail: bool) {
        self.fail_on_create.store(fail, Ordering::SeqCst);
    }

    /// Makes the next `count` confirmation attempts fail with a transient error.
    pub fn fail_next_confirms_transiently(&self, count: u32) {
        self.transient_failures.store(count, Ordering::SeqCst);
    }

    /// Total number of confirmation records, across keys and stages.
    pub async fn confirmation_count(&self) -> usize {
        self.state.read().await.confirmations.len()
    }

    /// Total number of parent records.
    pub async fn parent_count(&self) -> usize {
        self.state.read().await.parents.len()
    }

    fn take_transient_failure(&self) -> bool {
        self.transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl Ledger for InMemoryLedger {
    async fn create_with_shadow(&self, parent: ParentRecord, shadow_stage: &str) -> Result<()> {
        if self.fail_on_create.load(Ordering::SeqCst) {
            return Err(LedgerError::Injected("create rejected".to_string()));
        }

        let mut state = self.state.write().await;
        if state.parents.contains_key(&parent.key) {
            return Err(LedgerError::AlreadyExists(parent.key));
        }

        let shadow = ConfirmationRecord {
            stage: shadow_stage.to_string(),
            key: parent.key.clone(),
            user_id: parent.user_id.clone(),
            stage_status: StageStatus::Pending,
            confirmed_by: None,
            created_at: Utc::now(),
        };
        state
            .confirmations
            .insert((shadow_stage.to_string(), parent.key.clone()), shadow);
        state.parents.insert(parent.key.clone(), parent);
        Ok(())
    }

    async fn confirm(&self, request: &ConfirmRequest) -> Result<Confirmation> {
        if self.take_transient_failure() {
            return Err(LedgerError::Transient(
                "simulated serialization failure".to_string(),
            ));
        }

        let marker = (request.stage.clone(), request.key.clone());

        // Idempotency check
        {
            let state = self.state.read().await;
            if let Some(record) = state.confirmations.get(&marker) {
                let parent = state
                    .parents
                    .get(&request.key)
                    .cloned()
                    .ok_or_else(|| LedgerError::ParentNotFound(request.key.clone()))?;
                return Ok(Confirmation {
                    parent,
                    record: record.clone(),
                    newly_confirmed: false,
                });
            }
        }

        // Other transactions may commit between the check and the write.
        tokio::task::yield_now().await;

        let mut state = self.state.write().await;

        let mut parent = match (state.parents.get(&request.key), &request.materialize) {
            (Some(existing), _) => existing.clone(),
            (None, Some(template)) => template.clone(),
            (None, None) => return Err(LedgerError::ParentNotFound(request.key.clone())),
        };

        if !parent.status.can_transition_to(RecordStatus::Confirmed) {
            return Err(LedgerError::InvalidTransition {
                key: request.key.clone(),
                from: parent.status,
                to: RecordStatus::Confirmed,
            });
        }

        if self.fail_on_confirm.load(Ordering::SeqCst) {
            return Err(LedgerError::Injected(format!(
                "insert of confirmation for {} rejected",
                request.key
            )));
        }

        if state.confirmations.contains_key(&marker) {
            return Err(LedgerError::DuplicateConfirmation {
                stage: request.stage.clone(),
                key: request.key.clone(),
            });
        }

        // Commit
        let record = request.new_record();
        if parent.status != RecordStatus::Confirmed {
            parent.status = RecordStatus::Confirmed;
            parent.updated_at = Utc::now();
        }
        state.confirmations.insert(marker, record.clone());
        state.parents.insert(request.key.clone(), parent.clone());

        Ok(Confirmation {
            parent,
            record,
            newly_confirmed: true,
        })
    }

    async fn mark_forwarded(&self, stage: &str, key: &CorrelationKey) -> Result<()> {
        let mut state = self.state.write().await;
        let record = state
            .confirmations
            .get_mut(&(stage.to_string(), key.clone()))
            .ok_or_else(|| LedgerError::ParentNotFound(key.clone()))?;
        record.stage_status = StageStatus::Confirmed;
        Ok(())
    }

    async fn mark_failed(&self, key: &CorrelationKey) -> Result<ParentRecord> {
        let mut state = self.state.write().await;
        let parent = state
            .parents
            .get_mut(key)
            .ok_or_else(|| LedgerError::ParentNotFound(key.clone()))?;

        if !parent.status.can_transition_to(RecordStatus::Failed) {
            return Err(LedgerError::InvalidTransition {
                key: key.clone(),
                from: parent.status,
                to: RecordStatus::Failed,
            });
        }
        parent.status = RecordStatus::Failed;
        parent.updated_at = Utc::now();
        Ok(parent.clone())
    }

    async fn get_parent(&self, key: &CorrelationKey) -> Result<Option<ParentRecord>> {
        Ok(self.state.read().await.parents.get(key).cloned())
    }

    async fn get_confirmation(
        &self,
        stage: &str,
        key: &CorrelationKey,
    ) -> Result<Option<ConfirmationRecord>> {
        Ok(self
            .state
            .read()
            .await
            .confirmations
            .get(&(stage.to_string(), key.clone()))
            .cloned())
    }

    async fn confirmations_for(&self, key: &CorrelationKey) -> Result<Vec<ConfirmationRecord>> {
        let state = self.state.read().await;
        let mut records: Vec<_> = state
            .confirmations
            .values()
            .filter(|r| &r.key == key)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }
}
