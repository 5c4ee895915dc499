//! The confirmation transaction and its retry policy.

use std::time::Duration;

use ledger::{Confirmation, ConfirmRequest, Ledger, LedgerError};

use crate::error::{Result, SagaError};

/// Bounded exponential backoff for transient storage errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles after each retry.
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            ..Self::default()
        }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Delay to wait after the given failed attempt (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
        }
    }
}

/// Runs [`Ledger::confirm`] with the whole body retried on transient errors.
///
/// Retrying the whole transaction is safe only because the ledger checks
/// for an existing confirmation record first. A concurrent duplicate insert
/// counts as "already confirmed".
pub struct ConfirmationTransaction<L: Ledger> {
    ledger: L,
    retry: RetryPolicy,
}

impl<L: Ledger> ConfirmationTransaction<L> {
    pub fn new(ledger: L, retry: RetryPolicy) -> Self {
        Self { ledger, retry }
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    #[tracing::instrument(skip(self, request), fields(stage = %request.stage, key = %request.key))]
    pub async fn run(&self, request: &ConfirmRequest) -> Result<Confirmation> {
        let mut attempt = 1;

        loop {
            match self.ledger.confirm(request).await {
                Ok(confirmation) => return Ok(confirmation),
                Err(LedgerError::DuplicateConfirmation { .. }) => {
                    tracing::debug!("lost confirmation race, treating as already confirmed");
                    return self.load_existing(request).await;
                }
                Err(e) if e.is_transient() => {
                    if attempt >= self.retry.max_attempts {
                        return Err(SagaError::RetriesExhausted {
                            attempts: attempt,
                            last: e.to_string(),
                        });
                    }

                    let delay = self.retry.delay_after(attempt);
                    tracing::warn!(attempt, ?delay, error = %e, "transient ledger error, retrying");
                    metrics::counter!("confirmation_retries_total").increment(1);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn load_existing(&self, request: &ConfirmRequest) -> Result<Confirmation> {
        let record = self
            .ledger
            .get_confirmation(&request.stage, &request.key)
            .await?
            .ok_or_else(|| LedgerError::ParentNotFound(request.key.clone()))?;
        let parent = self
            .ledger
            .get_parent(&request.key)
            .await?
            .ok_or_else(|| LedgerError::ParentNotFound(request.key.clone()))?;

        Ok(Confirmation {
            parent,
            record,
            newly_confirmed: false,
        })
    }
}
