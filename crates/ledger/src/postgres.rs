use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CorrelationKey, Money, RecordStatus, ShippingAddress, StageStatus};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};

use crate::{
    Confirmation, ConfirmRequest, ConfirmationRecord, Ledger, LedgerError, ParentRecord, Result,
};

const PARENT_COLUMNS: &str = "correlation_key, consumer, user_id, item_id, item_name, amount_cents, address, status, created_at, updated_at";
const CONFIRMATION_COLUMNS: &str =
    "stage, correlation_key, user_id, stage_status, confirmed_by, created_at";

/// PostgreSQL-backed ledger.
///
/// Several services may share one database; every row is scoped by the
/// ledger name so their keys never collide.
#[derive(Clone)]
pub struct PostgresLedger {
    pool: PgPool,
    name: String,
}

impl PostgresLedger {
    /// Creates a ledger named `name` on the given pool.
    pub fn new(pool: PgPool, name: impl Into<String>) -> Self {
        Self {
            pool,
            name: name.into(),
        }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_parent(row: PgRow) -> Result<ParentRecord> {
        let status: String = row.try_get("status")?;
        let address: Option<serde_json::Value> = row.try_get("address")?;

        Ok(ParentRecord {
            key: CorrelationKey::new(row.try_get::<String, _>("correlation_key")?),
            consumer: row.try_get("consumer")?,
            user_id: row.try_get("user_id")?,
            item_id: row.try_get("item_id")?,
            item_name: row.try_get("item_name")?,
            amount: Money::from_cents(row.try_get("amount_cents")?),
            address: address
                .map(serde_json::from_value::<ShippingAddress>)
                .transpose()?,
            status: RecordStatus::parse(&status)
                .ok_or_else(|| LedgerError::Corrupt(format!("unknown record status '{status}'")))?,
            created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
            updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
        })
    }

    fn row_to_confirmation(row: PgRow) -> Result<ConfirmationRecord> {
        let stage_status: String = row.try_get("stage_status")?;

        Ok(ConfirmationRecord {
            stage: row.try_get("stage")?,
            key: CorrelationKey::new(row.try_get::<String, _>("correlation_key")?),
            user_id: row.try_get("user_id")?,
            stage_status: StageStatus::parse(&stage_status).ok_or_else(|| {
                LedgerError::Corrupt(format!("unknown stage status '{stage_status}'"))
            })?,
            confirmed_by: row.try_get("confirmed_by")?,
            created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        })
    }

    async fn insert_parent(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        parent: &ParentRecord,
    ) -> Result<u64> {
        let address = parent.address.as_ref().map(serde_json::to_value).transpose()?;

        let result = sqlx::query(
            r#"
            INSERT INTO parent_records
                (ledger, correlation_key, consumer, user_id, item_id, item_name, amount_cents, address, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (ledger, correlation_key) DO NOTHING
            "#,
        )
        .bind(&self.name)
        .bind(parent.key.as_str())
        .bind(&parent.consumer)
        .bind(&parent.user_id)
        .bind(&parent.item_id)
        .bind(&parent.item_name)
        .bind(parent.amount.cents())
        .bind(address)
        .bind(parent.status.as_str())
        .bind(parent.created_at)
        .bind(parent.updated_at)
        .execute(&mut **tx)
        .await?;

        Ok(result.rows_affected())
    }

    async fn lock_parent(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        key: &CorrelationKey,
    ) -> Result<Option<ParentRecord>> {
        let sql = format!(
            "SELECT {PARENT_COLUMNS} FROM parent_records WHERE ledger = $1 AND correlation_key = $2 FOR UPDATE"
        );
        let row = sqlx::query(&sql)
            .bind(&self.name)
            .bind(key.as_str())
            .fetch_optional(&mut **tx)
            .await?;

        row.map(Self::row_to_parent).transpose()
    }
}

#[async_trait]
impl Ledger for PostgresLedger {
    #[tracing::instrument(skip(self, parent), fields(ledger = %self.name, key = %parent.key))]
    async fn create_with_shadow(&self, parent: ParentRecord, shadow_stage: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        if self.insert_parent(&mut tx, &parent).await? == 0 {
            return Err(LedgerError::AlreadyExists(parent.key));
        }

        sqlx::query(
            r#"
            INSERT INTO confirmation_records (ledger, stage, correlation_key, user_id, stage_status)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&self.name)
        .bind(shadow_stage)
        .bind(parent.key.as_str())
        .bind(&parent.user_id)
        .bind(StageStatus::Pending.as_str())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    #[tracing::instrument(skip(self, request), fields(ledger = %self.name, stage = %request.stage, key = %request.key))]
    async fn confirm(&self, request: &ConfirmRequest) -> Result<Confirmation> {
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            "SELECT {CONFIRMATION_COLUMNS} FROM confirmation_records WHERE ledger = $1 AND stage = $2 AND correlation_key = $3"
        );
        let existing = sqlx::query(&sql)
            .bind(&self.name)
            .bind(&request.stage)
            .bind(request.key.as_str())
            .fetch_optional(&mut *tx)
            .await?;

        if let Some(row) = existing {
            let record = Self::row_to_confirmation(row)?;
            let parent = self
                .lock_parent(&mut tx, &request.key)
                .await?
                .ok_or_else(|| LedgerError::ParentNotFound(request.key.clone()))?;
            tx.commit().await?;
            return Ok(Confirmation {
                parent,
                record,
                newly_confirmed: false,
            });
        }

        if let Some(template) = &request.materialize {
            self.insert_parent(&mut tx, template).await?;
        }

        let mut parent = self
            .lock_parent(&mut tx, &request.key)
            .await?
            .ok_or_else(|| LedgerError::ParentNotFound(request.key.clone()))?;

        if !parent.status.can_transition_to(RecordStatus::Confirmed) {
            return Err(LedgerError::InvalidTransition {
                key: request.key.clone(),
                from: parent.status,
                to: RecordStatus::Confirmed,
            });
        }

        let record = request.new_record();
        sqlx::query(
            r#"
            INSERT INTO confirmation_records
                (ledger, stage, correlation_key, user_id, stage_status, confirmed_by, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&self.name)
        .bind(&record.stage)
        .bind(record.key.as_str())
        .bind(&record.user_id)
        .bind(record.stage_status.as_str())
        .bind(&record.confirmed_by)
        .bind(record.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some("unique_stage_confirmation")
            {
                return LedgerError::DuplicateConfirmation {
                    stage: request.stage.clone(),
                    key: request.key.clone(),
                };
            }
            LedgerError::from(e)
        })?;

        if parent.status != RecordStatus::Confirmed {
            let updated_at: DateTime<Utc> = sqlx::query_scalar(
                r#"
                UPDATE parent_records SET status = $3, updated_at = now()
                WHERE ledger = $1 AND correlation_key = $2 AND status = 'Pending'
                RETURNING updated_at
                "#,
            )
            .bind(&self.name)
            .bind(request.key.as_str())
            .bind(RecordStatus::Confirmed.as_str())
            .fetch_one(&mut *tx)
            .await?;
            parent.status = RecordStatus::Confirmed;
            parent.updated_at = updated_at;
        }

        tx.commit().await?;
        Ok(Confirmation {
            parent,
            record,
            newly_confirmed: true,
        })
    }

    #[tracing::instrument(skip(self), fields(ledger = %self.name))]
    async fn mark_forwarded(&self, stage: &str, key: &CorrelationKey) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE confirmation_records SET stage_status = $4
            WHERE ledger = $1 AND stage = $2 AND correlation_key = $3
            "#,
        )
        .bind(&self.name)
        .bind(stage)
        .bind(key.as_str())
        .bind(StageStatus::Confirmed.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::ParentNotFound(key.clone()));
        }
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(ledger = %self.name))]
    async fn mark_failed(&self, key: &CorrelationKey) -> Result<ParentRecord> {
        let mut tx = self.pool.begin().await?;

        let mut parent = self
            .lock_parent(&mut tx, key)
            .await?
            .ok_or_else(|| LedgerError::ParentNotFound(key.clone()))?;

        if !parent.status.can_transition_to(RecordStatus::Failed) {
            return Err(LedgerError::InvalidTransition {
                key: key.clone(),
                from: parent.status,
                to: RecordStatus::Failed,
            });
        }

        if parent.status != RecordStatus::Failed {
            let updated_at: DateTime<Utc> = sqlx::query_scalar(
                r#"
                UPDATE parent_records SET status = $3, updated_at = now()
                WHERE ledger = $1 AND correlation_key = $2
                RETURNING updated_at
                "#,
            )
            .bind(&self.name)
            .bind(key.as_str())
            .bind(RecordStatus::Failed.as_str())
            .fetch_one(&mut *tx)
            .await?;
            parent.status = RecordStatus::Failed;
            parent.updated_at = updated_at;
        }

        tx.commit().await?;
        Ok(parent)
    }

    async fn get_parent(&self, key: &CorrelationKey) -> Result<Option<ParentRecord>> {
        let sql = format!(
            "SELECT {PARENT_COLUMNS} FROM parent_records WHERE ledger = $1 AND correlation_key = $2"
        );
        let row = sqlx::query(&sql)
            .bind(&self.name)
            .bind(key.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_parent).transpose()
    }

    async fn get_confirmation(
        &self,
        stage: &str,
        key: &CorrelationKey,
    ) -> Result<Option<ConfirmationRecord>> {
        let sql = format!(
            "SELECT {CONFIRMATION_COLUMNS} FROM confirmation_records WHERE ledger = $1 AND stage = $2 AND correlation_key = $3"
        );
        let row = sqlx::query(&sql)
            .bind(&self.name)
            .bind(stage)
            .bind(key.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_confirmation).transpose()
    }

    async fn confirmations_for(&self, key: &CorrelationKey) -> Result<Vec<ConfirmationRecord>> {
        let sql = format!(
            "SELECT {CONFIRMATION_COLUMNS} FROM confirmation_records WHERE ledger = $1 AND correlation_key = $2 ORDER BY id ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(&self.name)
            .bind(key.as_str())
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Self::row_to_confirmation).collect()
    }
}
