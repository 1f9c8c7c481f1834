use serde_json::Value as JsonValue;
use sqlx::{PgPool, Postgres, Transaction};

use crate::entities::{Album, AlbumWithCount, Image};

#[derive(Clone)]
pub struct AlbumRepository {
    pool: PgPool,
}

impl AlbumRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn list_with_counts(&self) -> Result<Vec<AlbumWithCount>, sqlx::Error> {
        sqlx::query_as::<_, AlbumWithCount>(
            r#"
            SELECT a.id, a.name, a.description, a.cover_image_id, a.is_smart,
                   a.smart_config, a.created_at, count(i.id) AS image_count
            FROM albums a
            LEFT JOIN album_images ai ON ai.album_id = a.id
            LEFT JOIN images i ON i.id = ai.image_id AND i.deleted_at IS NULL
            GROUP BY a.id
            ORDER BY a.created_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await
    }

    pub async fn get(&self, id: i64) -> Result<Option<Album>, sqlx::Error> {
        sqlx::query_as::<_, Album>("SELECT * FROM albums WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn create(
        &self,
        name: &str,
        description: Option<&str>,
    ) -> Result<Album, sqlx::Error> {
        sqlx::query_as::<_, Album>(
            "INSERT INTO albums (name, description) VALUES ($1, $2) RETURNING *",
        )
        .bind(name)
        .bind(description)
        .fetch_one(&self.pool)
        .await
    }

    pub async fn update(
        &self,
        id: i64,
        name: Option<&str>,
        description: Option<&str>,
        cover_image_id: Option<i64>,
    ) -> Result<Option<Album>, sqlx::Error> {
        sqlx::query_as::<_, Album>(
            r#"
            UPDATE albums SET
                name = COALESCE($2, name),
                description = COALESCE($3, description),
                cover_image_id = COALESCE($4, cover_image_id)
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(description)
        .bind(cover_image_id)
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn delete(&self, id: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM albums WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn images_of(&self, album_id: i64) -> Result<Vec<Image>, sqlx::Error> {
        sqlx::query_as::<_, Image>(
            r#"
            SELECT i.* FROM images i
            JOIN album_images ai ON ai.image_id = i.id
            WHERE ai.album_id = $1 AND i.deleted_at IS NULL
            ORDER BY COALESCE(i.taken_at, i.created_at) DESC, i.id DESC
            "#,
        )
        .bind(album_id)
        .fetch_all(&self.pool)
        .await
    }

    pub async fn add_images(&self, album_id: i64, image_ids: &[i64]) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO album_images (album_id, image_id)
            SELECT $1, unnest($2::bigint[])
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(album_id)
        .bind(image_ids)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn remove_images(
        &self,
        album_id: i64,
        image_ids: &[i64],
    ) -> Result<u64, sqlx::Error> {
        let result =
            sqlx::query("DELETE FROM album_images WHERE album_id = $1 AND image_id = ANY($2)")
                .bind(album_id)
                .bind(image_ids)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }

    /// Creates a smart album with its membership inside the caller's
    /// transaction so a failed clustering run commits nothing.
    pub async fn create_smart_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        name: &str,
        smart_config: &JsonValue,
        image_ids: &[i64],
    ) -> Result<Album, sqlx::Error> {
        let album = sqlx::query_as::<_, Album>(
            r#"
            INSERT INTO albums (name, is_smart, smart_config, cover_image_id)
            VALUES ($1, TRUE, $2, $3)
            RETURNING *
            "#,
        )
        .bind(name)
        .bind(smart_config)
        .bind(image_ids.first().copied())
        .fetch_one(&mut **tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO album_images (album_id, image_id)
            SELECT $1, unnest($2::bigint[])
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(album.id)
        .bind(image_ids)
        .execute(&mut **tx)
        .await?;

        Ok(album)
    }

    pub async fn remove_image_everywhere(&self, image_id: i64) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM album_images WHERE image_id = $1")
            .bind(image_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
