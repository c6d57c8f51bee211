//! SQLite-backed durable [`WorkQueue`].
//!
//! Messages live in `queue_messages` with a `state` of `ready`, `leased`
//! or `dead`; acknowledged messages are deleted. A receive claims the
//! oldest visible row with a single `UPDATE ... RETURNING`, so concurrent
//! consumers never lease the same delivery.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::models::now;

use super::{Delivery, QueueError, QueueTopology, WorkQueue};

const READY: &str = "ready";
const LEASED: &str = "leased";
const DEAD: &str = "dead";

pub struct SqliteWorkQueue {
    pool: SqlitePool,
}

impl SqliteWorkQueue {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn queue_settings(&self, queue: &str) -> Result<(i64, i64), QueueError> {
        let row = sqlx::query(
            "SELECT max_deliveries, visibility_timeout_ms FROM queue_queues WHERE name = ?",
        )
        .bind(queue)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| QueueError::UnknownQueue(queue.to_string()))?;
        Ok((row.try_get(0)?, row.try_get(1)?))
    }
}

fn now_ms() -> i64 {
    now().timestamp_millis()
}

#[async_trait]
impl WorkQueue for SqliteWorkQueue {
    async fn declare(&self, topology: &QueueTopology) -> Result<(), QueueError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("INSERT INTO queue_exchanges (name, kind) VALUES (?, 'topic') ON CONFLICT(name) DO NOTHING")
            .bind(&topology.exchange)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO queue_queues (name, max_deliveries, visibility_timeout_ms)
            VALUES (?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET
                max_deliveries = excluded.max_deliveries,
                visibility_timeout_ms = excluded.visibility_timeout_ms
            "#,
        )
        .bind(&topology.queue)
        .bind(topology.max_deliveries as i64)
        .bind(topology.visibility_timeout.as_millis() as i64)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO queue_bindings (exchange, routing_key, queue) VALUES (?, ?, ?) \
             ON CONFLICT DO NOTHING",
        )
        .bind(&topology.exchange)
        .bind(&topology.routing_key)
        .bind(&topology.queue)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &str,
    ) -> Result<(), QueueError> {
        // Single statement: the write lock is held before the binding lookup.
        let ts = now_ms();
        let result = sqlx::query(
            r#"
            INSERT INTO queue_messages (queue, payload, state, deliveries, visible_at, enqueued_at)
            SELECT queue, ?, ?, 0, ?, ?
            FROM queue_bindings
            WHERE exchange = ? AND routing_key = ?
            "#,
        )
        .bind(payload)
        .bind(READY)
        .bind(ts)
        .bind(ts)
        .bind(exchange)
        .bind(routing_key)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(QueueError::Unroutable {
                exchange: exchange.to_string(),
                routing_key: routing_key.to_string(),
            });
        }
        Ok(())
    }

    async fn receive(&self, queue: &str) -> Result<Option<Delivery>, QueueError> {
        let (max_deliveries, visibility_ms) = self.queue_settings(queue).await?;
        let ts = now_ms();

        // Leases that expired on their final delivery are not redelivered.
        let expired = sqlx::query(
            r#"
            UPDATE queue_messages
            SET state = ?, last_error = 'lease expired after max deliveries'
            WHERE queue = ? AND state = ? AND visible_at <= ? AND deliveries >= ?
            "#,
        )
        .bind(DEAD)
        .bind(queue)
        .bind(LEASED)
        .bind(ts)
        .bind(max_deliveries)
        .execute(&self.pool)
        .await?;
        if expired.rows_affected() > 0 {
            tracing::warn!(
                queue,
                count = expired.rows_affected(),
                "dead-lettered messages whose final lease expired"
            );
        }

        let row = sqlx::query(
            r#"
            UPDATE queue_messages
            SET state = ?, deliveries = deliveries + 1, visible_at = ?
            WHERE id = (
                SELECT id FROM queue_messages
                WHERE queue = ? AND state IN (?, ?) AND visible_at <= ?
                ORDER BY id
                LIMIT 1
            )
            RETURNING id, payload, deliveries
            "#,
        )
        .bind(LEASED)
        .bind(ts + visibility_ms)
        .bind(queue)
        .bind(READY)
        .bind(LEASED)
        .bind(ts)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let deliveries: i64 = row.try_get("deliveries")?;
                Ok(Some(Delivery {
                    message_id: row.try_get("id")?,
                    queue: queue.to_string(),
                    attempt: deliveries as u32,
                    payload: row.try_get("payload")?,
                }))
            }
            None => Ok(None),
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let result = sqlx::query(
            "DELETE FROM queue_messages WHERE id = ? AND state = ? AND deliveries = ?",
        )
        .bind(delivery.message_id)
        .bind(LEASED)
        .bind(delivery.attempt as i64)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(QueueError::LeaseLost(delivery.message_id));
        }
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<(), QueueError> {
        let (max_deliveries, _) = self.queue_settings(&delivery.queue).await?;
        let next_state = if requeue && (delivery.attempt as i64) < max_deliveries {
            READY
        } else {
            DEAD
        };

        let result = sqlx::query(
            r#"
            UPDATE queue_messages
            SET state = ?, visible_at = ?
            WHERE id = ? AND state = ? AND deliveries = ?
            "#,
        )
        .bind(next_state)
        .bind(now_ms())
        .bind(delivery.message_id)
        .bind(LEASED)
        .bind(delivery.attempt as i64)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(QueueError::LeaseLost(delivery.message_id));
        }
        Ok(())
    }

    async fn pending_count(&self, queue: &str) -> Result<usize, QueueError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM queue_messages WHERE queue = ? AND state != ?")
                .bind(queue)
                .bind(DEAD)
                .fetch_one(&self.pool)
                .await?;
        Ok(count as usize)
    }

    async fn dead_letter_count(&self, queue: &str) -> Result<usize, QueueError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM queue_messages WHERE queue = ? AND state = ?")
                .bind(queue)
                .bind(DEAD)
                .fetch_one(&self.pool)
                .await?;
        Ok(count as usize)
    }
}
