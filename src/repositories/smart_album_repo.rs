use chrono::Utc;
use serde_json::Value as JsonValue;
use sqlx::PgPool;
use uuid::Uuid;

use crate::entities::{SmartAlbumTask, SmartAlbumTaskStatus};

#[derive(Clone)]
pub struct SmartAlbumTaskRepository {
    pool: PgPool,
}

impl SmartAlbumTaskRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(
        &self,
        id: Uuid,
        model_name: &str,
        params: &JsonValue,
    ) -> Result<SmartAlbumTask, sqlx::Error> {
        sqlx::query_as::<_, SmartAlbumTask>(
            "INSERT INTO smart_album_tasks (id, model_name, params) VALUES ($1, $2, $3) RETURNING *",
        )
        .bind(id)
        .bind(model_name)
        .bind(params)
        .fetch_one(&self.pool)
        .await
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<SmartAlbumTask>, sqlx::Error> {
        sqlx::query_as::<_, SmartAlbumTask>("SELECT * FROM smart_album_tasks WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn complete(
        &self,
        id: Uuid,
        album_ids: &[i64],
        noise_image_ids: &[i64],
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE smart_album_tasks
            SET status = $2, album_ids = $3, noise_image_ids = $4, finished_at = $5
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(SmartAlbumTaskStatus::Completed.as_str())
        .bind(album_ids)
        .bind(noise_image_ids)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn finish_with(
        &self,
        id: Uuid,
        status: SmartAlbumTaskStatus,
        error: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE smart_album_tasks SET status = $2, error = $3, finished_at = $4 WHERE id = $1",
        )
        .bind(id)
        .bind(status.as_str())
        .bind(error)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
