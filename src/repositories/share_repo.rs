use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::entities::{Image, Share};

#[derive(Clone)]
pub struct ShareRepository {
    pool: PgPool,
}

impl ShareRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(
        &self,
        code: &str,
        password_hash: Option<&str>,
        expire_at: Option<DateTime<Utc>>,
        image_ids: &[i64],
    ) -> Result<Share, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let share = sqlx::query_as::<_, Share>(
            "INSERT INTO shares (code, password_hash, expire_at) VALUES ($1, $2, $3) RETURNING *",
        )
        .bind(code)
        .bind(password_hash)
        .bind(expire_at)
        .fetch_one(&mut *tx)
        .await?;

        // Position preserves the caller's display order.
        sqlx::query(
            r#"
            INSERT INTO share_images (share_id, image_id, position)
            SELECT $1, ids.image_id, ids.ordinality - 1
            FROM unnest($2::bigint[]) WITH ORDINALITY AS ids (image_id, ordinality)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(share.id)
        .bind(image_ids)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(share)
    }

    pub async fn list(&self) -> Result<Vec<Share>, sqlx::Error> {
        sqlx::query_as::<_, Share>("SELECT * FROM shares ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await
    }

    pub async fn get_by_code(&self, code: &str) -> Result<Option<Share>, sqlx::Error> {
        sqlx::query_as::<_, Share>("SELECT * FROM shares WHERE code = $1")
            .bind(code)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn deactivate(&self, id: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE shares SET is_active = FALSE WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn bump_view_count(&self, id: i64) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE shares SET view_count = view_count + 1 WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn images_of(&self, share_id: i64) -> Result<Vec<Image>, sqlx::Error> {
        sqlx::query_as::<_, Image>(
            r#"
            SELECT i.* FROM images i
            JOIN share_images si ON si.image_id = i.id
            WHERE si.share_id = $1 AND i.deleted_at IS NULL
            ORDER BY si.position, i.id
            "#,
        )
        .bind(share_id)
        .fetch_all(&self.pool)
        .await
    }
}
