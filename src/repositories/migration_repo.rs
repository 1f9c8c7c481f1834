use chrono::Utc;
use serde_json::Value as JsonValue;
use sqlx::postgres::PgConnection;
use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::entities::{
    MigrationFileRecord, MigrationFilter, MigrationStatus, MigrationTask, MigrationType,
};

/// Offset namespacing migration advisory locks away from other users of the
/// shared Postgres lock space.
const ADVISORY_LOCK_BASE: i64 = 0x6d69_6772_0000_0000;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MigrationCandidate {
    pub id: i64,
    pub bytes: i64,
}

/// Guard owning the dedicated connection that holds a task's advisory
/// lock. The connection is detached from the pool: advisory locks are
/// session-scoped, so dropping the guard closes the session and releases
/// the lock instead of leaking it into a reused pool connection.
pub struct MigrationLock {
    _connection: PgConnection,
}

#[derive(Clone)]
pub struct MigrationRepository {
    pool: PgPool,
}

impl MigrationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create_task(
        &self,
        migration_type: MigrationType,
        source_storage_id: &str,
        target_storage_id: &str,
        filter: &JsonValue,
        delete_source_after: bool,
    ) -> Result<MigrationTask, sqlx::Error> {
        sqlx::query_as::<_, MigrationTask>(
            r#"
            INSERT INTO migration_tasks
                (migration_type, source_storage_id, target_storage_id, filter, delete_source_after)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(migration_type.as_str())
        .bind(source_storage_id)
        .bind(target_storage_id)
        .bind(filter)
        .bind(delete_source_after)
        .fetch_one(&self.pool)
        .await
    }

    pub async fn get(&self, id: i64) -> Result<Option<MigrationTask>, sqlx::Error> {
        sqlx::query_as::<_, MigrationTask>("SELECT * FROM migration_tasks WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn list_active(&self) -> Result<Vec<MigrationTask>, sqlx::Error> {
        sqlx::query_as::<_, MigrationTask>(
            r#"
            SELECT * FROM migration_tasks
            WHERE status IN ('pending', 'running', 'paused')
            ORDER BY created_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await
    }

    /// Images matching the task filter on the source driver, in id order.
    pub async fn candidates(
        &self,
        migration_type: MigrationType,
        source_storage_id: &str,
        filter: &MigrationFilter,
    ) -> Result<Vec<MigrationCandidate>, sqlx::Error> {
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT id, bytes FROM images WHERE deleted_at IS NULL");
        match migration_type {
            MigrationType::Original => {
                builder.push(" AND storage_id = ").push_bind(source_storage_id.to_string());
            }
            MigrationType::Thumbnail => {
                builder.push(" AND thumbnail_path IS NOT NULL");
            }
        }
        if let Some(album_ids) = &filter.album_ids {
            if !album_ids.is_empty() {
                builder
                    .push(
                        " AND EXISTS (SELECT 1 FROM album_images ai WHERE ai.image_id = images.id AND ai.album_id = ANY(",
                    )
                    .push_bind(album_ids.clone())
                    .push("))");
            }
        }
        if let Some(taken_after) = filter.taken_after {
            builder.push(" AND taken_at >= ").push_bind(taken_after);
        }
        if let Some(taken_before) = filter.taken_before {
            builder.push(" AND taken_at <= ").push_bind(taken_before);
        }
        if let Some(min_bytes) = filter.min_bytes {
            builder.push(" AND bytes >= ").push_bind(min_bytes);
        }
        if let Some(max_bytes) = filter.max_bytes {
            builder.push(" AND bytes <= ").push_bind(max_bytes);
        }
        builder.push(" ORDER BY id");
        builder
            .build_query_as::<MigrationCandidate>()
            .fetch_all(&self.pool)
            .await
    }

    /// Bulk-creates the pending ledger and fixes `total` to the ledger size.
    pub async fn insert_records(
        &self,
        task_id: i64,
        image_ids: &[i64],
    ) -> Result<i64, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO migration_file_records (task_id, image_id)
            SELECT $1, unnest($2::bigint[])
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(task_id)
        .bind(image_ids)
        .execute(&mut *tx)
        .await?;
        let total: i64 = sqlx::query_scalar(
            "SELECT count(*) FROM migration_file_records WHERE task_id = $1",
        )
        .bind(task_id)
        .fetch_one(&mut *tx)
        .await?;
        sqlx::query("UPDATE migration_tasks SET total = $2 WHERE id = $1")
            .bind(task_id)
            .bind(total)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(total)
    }

    pub async fn next_pending(
        &self,
        task_id: i64,
        limit: i64,
    ) -> Result<Vec<MigrationFileRecord>, sqlx::Error> {
        sqlx::query_as::<_, MigrationFileRecord>(
            r#"
            SELECT * FROM migration_file_records
            WHERE task_id = $1 AND status = 'pending'
            ORDER BY id
            LIMIT $2
            "#,
        )
        .bind(task_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }

    pub async fn pending_count(&self, task_id: i64) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT count(*) FROM migration_file_records WHERE task_id = $1 AND status = 'pending'",
        )
        .bind(task_id)
        .fetch_one(&self.pool)
        .await
    }

    pub async fn failed_records(
        &self,
        task_id: i64,
    ) -> Result<Vec<MigrationFileRecord>, sqlx::Error> {
        sqlx::query_as::<_, MigrationFileRecord>(
            "SELECT * FROM migration_file_records WHERE task_id = $1 AND status = 'failed' ORDER BY id",
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await
    }

    /// Success commit for one ledger record: repoints the image row at the
    /// target driver, marks the record and bumps `processed`, all in one
    /// transaction so resume never re-copies a committed file.
    pub async fn record_success(
        &self,
        task: &MigrationTask,
        record: &MigrationFileRecord,
    ) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        if task.migration_type() == Some(MigrationType::Original) {
            sqlx::query(
                "UPDATE images SET storage_id = $2 WHERE id = $1 AND storage_id = $3",
            )
            .bind(record.image_id)
            .bind(&task.target_storage_id)
            .bind(&task.source_storage_id)
            .execute(&mut *tx)
            .await?;
        }
        let updated = sqlx::query(
            "UPDATE migration_file_records SET status = 'success', error_msg = NULL WHERE id = $1 AND status = 'pending'",
        )
        .bind(record.id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if updated > 0 {
            sqlx::query("UPDATE migration_tasks SET processed = processed + 1 WHERE id = $1")
                .bind(task.id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn record_failed(
        &self,
        task_id: i64,
        record_id: i64,
        error: &str,
    ) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let updated = sqlx::query(
            "UPDATE migration_file_records SET status = 'failed', error_msg = $2 WHERE id = $1 AND status = 'pending'",
        )
        .bind(record_id)
        .bind(error)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if updated > 0 {
            sqlx::query(
                "UPDATE migration_tasks SET processed = processed + 1, failed = failed + 1 WHERE id = $1",
            )
            .bind(task_id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Re-opens every failed record; counters shrink so that
    /// `processed == #success + #failed` keeps holding.
    pub async fn retry_failed(&self, task_id: i64) -> Result<u64, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let moved = sqlx::query(
            "UPDATE migration_file_records SET status = 'pending', error_msg = NULL WHERE task_id = $1 AND status = 'failed'",
        )
        .bind(task_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if moved > 0 {
            sqlx::query(
                r#"
                UPDATE migration_tasks
                SET processed = GREATEST(processed - $2, 0),
                    failed = GREATEST(failed - $2, 0)
                WHERE id = $1
                "#,
            )
            .bind(task_id)
            .bind(moved as i64)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(moved)
    }

    pub async fn set_status(
        &self,
        task_id: i64,
        status: MigrationStatus,
    ) -> Result<(), sqlx::Error> {
        let now = Utc::now();
        let started = matches!(status, MigrationStatus::Running);
        let finished = status.is_terminal();
        sqlx::query(
            r#"
            UPDATE migration_tasks SET
                status = $2,
                started_at = CASE WHEN $3 AND started_at IS NULL THEN $5 ELSE started_at END,
                finished_at = CASE WHEN $4 THEN $5 ELSE finished_at END
            WHERE id = $1
            "#,
        )
        .bind(task_id)
        .bind(status.as_str())
        .bind(started)
        .bind(finished)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Takes the per-task advisory lock so only one worker can progress a
    /// task, even across process restarts. Returns None when another holder
    /// is alive.
    pub async fn try_lock(&self, task_id: i64) -> Result<Option<MigrationLock>, sqlx::Error> {
        let mut connection = self.pool.acquire().await?;
        let locked: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock($1)")
            .bind(ADVISORY_LOCK_BASE + task_id)
            .fetch_one(&mut *connection)
            .await?;
        if locked {
            Ok(Some(MigrationLock {
                _connection: connection.detach(),
            }))
        } else {
            Ok(None)
        }
    }
}
