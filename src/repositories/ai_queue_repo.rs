use sqlx::PgPool;

use crate::entities::{AiQueue, AiQueueStatus, AiTaskItem, AiTaskType};

#[derive(Clone)]
pub struct AiQueueRepository {
    pool: PgPool,
}

impl AiQueueRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Queues are created lazily on first enqueue; exactly one row exists
    /// per queue key.
    pub async fn get_or_create(
        &self,
        task_type: AiTaskType,
        model_name: Option<&str>,
    ) -> Result<AiQueue, sqlx::Error> {
        let queue_key = task_type.queue_key(model_name);
        let model = if task_type.is_per_model() {
            model_name
        } else {
            None
        };
        sqlx::query_as::<_, AiQueue>(
            r#"
            INSERT INTO ai_queues (queue_key, task_type, model_name)
            VALUES ($1, $2, $3)
            ON CONFLICT (queue_key) DO UPDATE SET queue_key = EXCLUDED.queue_key
            RETURNING *
            "#,
        )
        .bind(&queue_key)
        .bind(task_type.as_str())
        .bind(model)
        .fetch_one(&self.pool)
        .await
    }

    pub async fn get(&self, id: i64) -> Result<Option<AiQueue>, sqlx::Error> {
        sqlx::query_as::<_, AiQueue>("SELECT * FROM ai_queues WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn get_by_key(&self, queue_key: &str) -> Result<Option<AiQueue>, sqlx::Error> {
        sqlx::query_as::<_, AiQueue>("SELECT * FROM ai_queues WHERE queue_key = $1")
            .bind(queue_key)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn list(&self) -> Result<Vec<AiQueue>, sqlx::Error> {
        sqlx::query_as::<_, AiQueue>("SELECT * FROM ai_queues ORDER BY queue_key")
            .fetch_all(&self.pool)
            .await
    }

    /// Inserts a pending item unless one already exists for `(queue, item)`;
    /// returns whether a new item was created.
    pub async fn enqueue(
        &self,
        queue_id: i64,
        item_id: i64,
        item_type: &str,
    ) -> Result<bool, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let inserted = sqlx::query(
            r#"
            INSERT INTO ai_task_items (queue_id, item_id, item_type)
            VALUES ($1, $2, $3)
            ON CONFLICT (queue_id, item_id) DO NOTHING
            "#,
        )
        .bind(queue_id)
        .bind(item_id)
        .bind(item_type)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            > 0;
        if inserted {
            sqlx::query("UPDATE ai_queues SET pending_count = pending_count + 1 WHERE id = $1")
                .bind(queue_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(inserted)
    }

    /// FIFO batch of pending work; the single worker per queue makes row
    /// locking unnecessary.
    pub async fn take_pending(
        &self,
        queue_id: i64,
        limit: i64,
    ) -> Result<Vec<AiTaskItem>, sqlx::Error> {
        sqlx::query_as::<_, AiTaskItem>(
            r#"
            SELECT * FROM ai_task_items
            WHERE queue_id = $1 AND status = 'pending'
            ORDER BY id
            LIMIT $2
            "#,
        )
        .bind(queue_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }

    /// Success deletes the row; a crash before this point leaves the item
    /// pending for the next start.
    pub async fn complete(&self, item: &AiTaskItem) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let deleted = sqlx::query("DELETE FROM ai_task_items WHERE id = $1")
            .bind(item.id)
            .execute(&mut *tx)
            .await?
            .rows_affected()
            > 0;
        if deleted {
            sqlx::query(
                "UPDATE ai_queues SET pending_count = GREATEST(pending_count - 1, 0) WHERE id = $1",
            )
            .bind(item.queue_id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn fail(&self, item: &AiTaskItem, error: &str) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let updated = sqlx::query(
            r#"
            UPDATE ai_task_items
            SET status = 'failed', error = $2, attempts = attempts + 1
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(item.id)
        .bind(error)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            > 0;
        if updated {
            sqlx::query(
                r#"
                UPDATE ai_queues
                SET pending_count = GREATEST(pending_count - 1, 0),
                    failed_count = failed_count + 1
                WHERE id = $1
                "#,
            )
            .bind(item.queue_id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Moves one failed item back to pending; returns the queue id when the
    /// item existed.
    pub async fn retry_item(&self, item_id: i64) -> Result<Option<i64>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let queue_id: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE ai_task_items
            SET status = 'pending', error = NULL
            WHERE id = $1 AND status = 'failed'
            RETURNING queue_id
            "#,
        )
        .bind(item_id)
        .fetch_optional(&mut *tx)
        .await?;
        if let Some(queue_id) = queue_id {
            sqlx::query(
                r#"
                UPDATE ai_queues
                SET pending_count = pending_count + 1,
                    failed_count = GREATEST(failed_count - 1, 0)
                WHERE id = $1
                "#,
            )
            .bind(queue_id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(queue_id)
    }

    pub async fn retry_all(&self, queue_id: i64) -> Result<u64, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let moved = sqlx::query(
            "UPDATE ai_task_items SET status = 'pending', error = NULL WHERE queue_id = $1 AND status = 'failed'",
        )
        .bind(queue_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if moved > 0 {
            sqlx::query(
                r#"
                UPDATE ai_queues
                SET pending_count = pending_count + $2,
                    failed_count = GREATEST(failed_count - $2, 0)
                WHERE id = $1
                "#,
            )
            .bind(queue_id)
            .bind(moved as i64)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(moved)
    }

    /// Drops one failed item, accepting the failure.
    pub async fn ignore_item(&self, item_id: i64) -> Result<Option<i64>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let queue_id: Option<i64> = sqlx::query_scalar(
            "DELETE FROM ai_task_items WHERE id = $1 AND status = 'failed' RETURNING queue_id",
        )
        .bind(item_id)
        .fetch_optional(&mut *tx)
        .await?;
        if let Some(queue_id) = queue_id {
            sqlx::query(
                "UPDATE ai_queues SET failed_count = GREATEST(failed_count - 1, 0) WHERE id = $1",
            )
            .bind(queue_id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(queue_id)
    }

    pub async fn clear_failed(&self, queue_id: i64) -> Result<u64, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let removed = sqlx::query(
            "DELETE FROM ai_task_items WHERE queue_id = $1 AND status = 'failed'",
        )
        .bind(queue_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        sqlx::query("UPDATE ai_queues SET failed_count = 0 WHERE id = $1")
            .bind(queue_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(removed)
    }

    pub async fn failed_items(&self, queue_id: i64) -> Result<Vec<AiTaskItem>, sqlx::Error> {
        sqlx::query_as::<_, AiTaskItem>(
            "SELECT * FROM ai_task_items WHERE queue_id = $1 AND status = 'failed' ORDER BY id",
        )
        .bind(queue_id)
        .fetch_all(&self.pool)
        .await
    }

    pub async fn set_status(
        &self,
        queue_id: i64,
        status: AiQueueStatus,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE ai_queues SET status = $2 WHERE id = $1")
            .bind(queue_id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Recounts from the items table, repairing any counter drift.
    pub async fn recount(&self, queue_id: i64) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE ai_queues q SET
                pending_count = (SELECT count(*) FROM ai_task_items WHERE queue_id = q.id AND status = 'pending'),
                failed_count  = (SELECT count(*) FROM ai_task_items WHERE queue_id = q.id AND status = 'failed')
            WHERE q.id = $1
            "#,
        )
        .bind(queue_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
