use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{BrokerError, Delivery, DeliveryTag, MessageBroker, Result};

/// How long a dequeued message stays invisible before it is handed out again.
pub const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(30);

/// PostgreSQL-backed broker.
///
/// Visibility is a lease: dequeue stamps the row with a delivery tag and a
/// `locked_until` deadline using `FOR UPDATE SKIP LOCKED`, so concurrent
/// consumers never see the same message. A consumer that dies without
/// settling simply lets the lease lapse.
#[derive(Clone)]
pub struct PostgresBroker {
    pool: PgPool,
    visibility_timeout: Duration,
}

impl PostgresBroker {
    /// Creates a new PostgreSQL broker with the default visibility timeout.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            visibility_timeout: DEFAULT_VISIBILITY_TIMEOUT,
        }
    }

    /// Overrides the visibility timeout.
    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    async fn ensure_queue_exists(&self, queue: &str) -> Result<()> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM broker_queues WHERE name = $1)")
                .bind(queue)
                .fetch_one(&self.pool)
                .await?;

        if exists {
            Ok(())
        } else {
            Err(BrokerError::QueueNotFound(queue.to_string()))
        }
    }
}

#[async_trait]
impl MessageBroker for PostgresBroker {
    #[tracing::instrument(skip(self))]
    async fn declare_queue(&self, queue: &str) -> Result<()> {
        sqlx::query("INSERT INTO broker_queues (name) VALUES ($1) ON CONFLICT (name) DO NOTHING")
            .bind(queue)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    #[tracing::instrument(skip(self, payload), fields(bytes = payload.len()))]
    async fn publish(&self, queue: &str, payload: &[u8]) -> Result<()> {
        sqlx::query("INSERT INTO broker_messages (queue_name, payload) VALUES ($1, $2)")
            .bind(queue)
            .bind(payload)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                if let sqlx::Error::Database(ref db_err) = e
                    && db_err.is_foreign_key_violation()
                {
                    return BrokerError::QueueNotFound(queue.to_string());
                }
                BrokerError::from(e)
            })?;

        metrics::counter!("broker_messages_published_total").increment(1);
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn try_dequeue(&self, queue: &str) -> Result<Option<Delivery>> {
        self.ensure_queue_exists(queue).await?;

        let tag = DeliveryTag::new();
        let row: Option<(Vec<u8>, i32)> = sqlx::query_as(
            r#"
            UPDATE broker_messages
            SET delivery_tag = $2,
                locked_until = now() + make_interval(secs => $3),
                delivery_count = delivery_count + 1
            WHERE id = (
                SELECT id FROM broker_messages
                WHERE queue_name = $1
                  AND (locked_until IS NULL OR locked_until <= now())
                ORDER BY id
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING payload, delivery_count
            "#,
        )
        .bind(queue)
        .bind(tag.as_uuid())
        .bind(self.visibility_timeout.as_secs_f64())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(payload, delivery_count)| Delivery {
            tag,
            queue: queue.to_string(),
            payload,
            redelivered: delivery_count > 1,
        }))
    }

    #[tracing::instrument(skip(self, delivery), fields(queue = %delivery.queue, tag = %delivery.tag))]
    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        let result = sqlx::query("DELETE FROM broker_messages WHERE delivery_tag = $1")
            .bind(delivery.tag.as_uuid())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(BrokerError::DeliveryNotHeld(delivery.tag));
        }
        Ok(())
    }

    #[tracing::instrument(skip(self, delivery), fields(queue = %delivery.queue, tag = %delivery.tag))]
    async fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<()> {
        let tag: Uuid = delivery.tag.as_uuid();
        let result = if requeue {
            sqlx::query(
                "UPDATE broker_messages SET delivery_tag = NULL, locked_until = NULL WHERE delivery_tag = $1",
            )
            .bind(tag)
            .execute(&self.pool)
            .await?
        } else {
            sqlx::query("DELETE FROM broker_messages WHERE delivery_tag = $1")
                .bind(tag)
                .execute(&self.pool)
                .await?
        };

        if result.rows_affected() == 0 {
            return Err(BrokerError::DeliveryNotHeld(delivery.tag));
        }
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn purge_queue(&self, queue: &str) -> Result<u64> {
        self.ensure_queue_exists(queue).await?;

        let result = sqlx::query(
            r#"
            DELETE FROM broker_messages
            WHERE queue_name = $1
              AND (locked_until IS NULL OR locked_until <= now())
            "#,
        )
        .bind(queue)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn message_count(&self, queue: &str) -> Result<u64> {
        self.ensure_queue_exists(queue).await?;

        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM broker_messages
            WHERE queue_name = $1
              AND (locked_until IS NULL OR locked_until <= now())
            "#,
        )
        .bind(queue)
        .fetch_one(&self.pool)
        .await?;

        Ok(count as u64)
    }
}
