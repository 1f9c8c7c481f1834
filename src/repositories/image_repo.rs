use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::entities::{Image, NewImage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSort {
    TakenAt,
    CreatedAt,
    Bytes,
    AiScore,
}

impl ImageSort {
    pub fn parse(value: Option<&str>) -> Self {
        match value {
            Some("created_at") => ImageSort::CreatedAt,
            Some("bytes") => ImageSort::Bytes,
            Some("ai_score") => ImageSort::AiScore,
            _ => ImageSort::TakenAt,
        }
    }

    fn order_clause(&self) -> &'static str {
        match self {
            ImageSort::TakenAt => "COALESCE(taken_at, created_at) DESC, id DESC",
            ImageSort::CreatedAt => "created_at DESC, id DESC",
            ImageSort::Bytes => "bytes DESC, id DESC",
            ImageSort::AiScore => "ai_score DESC NULLS LAST, id DESC",
        }
    }
}

#[derive(Debug, Clone)]
pub struct GeoBounds {
    pub min_latitude: f64,
    pub max_latitude: f64,
    pub min_longitude: f64,
    pub max_longitude: f64,
}

#[derive(Clone)]
pub struct ImageRepository {
    pool: PgPool,
}

impl ImageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, image: &NewImage) -> Result<Image, sqlx::Error> {
        sqlx::query_as::<_, Image>(
            r#"
            INSERT INTO images (
                uuid, hash, original_name, mime, bytes, width, height,
                taken_at, latitude, longitude, camera_make, camera_model,
                exposure_time, f_number, iso, focal_length,
                storage_id, storage_path, thumbnail_path,
                thumbnail_width, thumbnail_height
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12,
                    $13, $14, $15, $16, $17, $18, $19, $20, $21)
            RETURNING *
            "#,
        )
        .bind(image.uuid)
        .bind(&image.hash)
        .bind(&image.original_name)
        .bind(&image.mime)
        .bind(image.bytes)
        .bind(image.width)
        .bind(image.height)
        .bind(image.exif.taken_at)
        .bind(image.exif.latitude)
        .bind(image.exif.longitude)
        .bind(&image.exif.camera_make)
        .bind(&image.exif.camera_model)
        .bind(&image.exif.exposure_time)
        .bind(image.exif.f_number)
        .bind(image.exif.iso)
        .bind(image.exif.focal_length)
        .bind(&image.storage_id)
        .bind(&image.storage_path)
        .bind(&image.thumbnail_path)
        .bind(image.thumbnail_width)
        .bind(image.thumbnail_height)
        .fetch_one(&self.pool)
        .await
    }

    pub async fn get(&self, id: i64) -> Result<Option<Image>, sqlx::Error> {
        sqlx::query_as::<_, Image>("SELECT * FROM images WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn get_live(&self, id: i64) -> Result<Option<Image>, sqlx::Error> {
        sqlx::query_as::<_, Image>(
            "SELECT * FROM images WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn get_by_uuid(&self, uuid: Uuid) -> Result<Option<Image>, sqlx::Error> {
        sqlx::query_as::<_, Image>("SELECT * FROM images WHERE uuid = $1")
            .bind(uuid)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn find_live_by_hash(&self, hash: &str) -> Result<Option<Image>, sqlx::Error> {
        sqlx::query_as::<_, Image>(
            "SELECT * FROM images WHERE hash = $1 AND deleted_at IS NULL",
        )
        .bind(hash)
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn list_by_ids(&self, ids: &[i64]) -> Result<Vec<Image>, sqlx::Error> {
        sqlx::query_as::<_, Image>(
            "SELECT * FROM images WHERE id = ANY($1) AND deleted_at IS NULL ORDER BY id",
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await
    }

    pub async fn list(
        &self,
        page: i64,
        page_size: i64,
        sort: ImageSort,
    ) -> Result<Vec<Image>, sqlx::Error> {
        let sql = format!(
            "SELECT * FROM images WHERE deleted_at IS NULL ORDER BY {} LIMIT $1 OFFSET $2",
            sort.order_clause()
        );
        sqlx::query_as::<_, Image>(&sql)
            .bind(page_size)
            .bind((page - 1).max(0) * page_size)
            .fetch_all(&self.pool)
            .await
    }

    pub async fn count_live(&self) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>("SELECT count(*) FROM images WHERE deleted_at IS NULL")
            .fetch_one(&self.pool)
            .await
    }

    pub async fn total_bytes(&self) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COALESCE(sum(bytes), 0)::bigint FROM images WHERE deleted_at IS NULL",
        )
        .fetch_one(&self.pool)
        .await
    }

    pub async fn count_on_storage(&self, storage_id: &str) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>("SELECT count(*) FROM images WHERE storage_id = $1")
            .bind(storage_id)
            .fetch_one(&self.pool)
            .await
    }

    pub async fn update_metadata(
        &self,
        id: i64,
        original_name: Option<&str>,
        taken_at: Option<DateTime<Utc>>,
        latitude: Option<f64>,
        longitude: Option<f64>,
        location_name: Option<&str>,
    ) -> Result<Option<Image>, sqlx::Error> {
        sqlx::query_as::<_, Image>(
            r#"
            UPDATE images SET
                original_name = COALESCE($2, original_name),
                taken_at      = COALESCE($3, taken_at),
                latitude      = COALESCE($4, latitude),
                longitude     = COALESCE($5, longitude),
                location_name = COALESCE($6, location_name)
            WHERE id = $1 AND deleted_at IS NULL
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(original_name)
        .bind(taken_at)
        .bind(latitude)
        .bind(longitude)
        .bind(location_name)
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn set_ai_score(&self, id: i64, score: f32) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE images SET ai_score = $2 WHERE id = $1")
            .bind(id)
            .bind(score)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn soft_delete(&self, ids: &[i64]) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE images SET deleted_at = now() WHERE id = ANY($1) AND deleted_at IS NULL",
        )
        .bind(ids)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn restore(&self, ids: &[i64]) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE images SET deleted_at = NULL WHERE id = ANY($1) AND deleted_at IS NOT NULL",
        )
        .bind(ids)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn list_trash(&self) -> Result<Vec<Image>, sqlx::Error> {
        sqlx::query_as::<_, Image>(
            "SELECT * FROM images WHERE deleted_at IS NOT NULL ORDER BY deleted_at DESC",
        )
        .fetch_all(&self.pool)
        .await
    }

    /// Trash rows whose soft-delete timestamp is older than `cutoff`.
    pub async fn expired_trash(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Image>, sqlx::Error> {
        sqlx::query_as::<_, Image>(
            "SELECT * FROM images WHERE deleted_at IS NOT NULL AND deleted_at < $1 ORDER BY deleted_at LIMIT $2",
        )
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }

    /// Removes the row; link tables cascade. Blob removal is the caller's
    /// concern and happens after this commit.
    pub async fn delete_row(&self, id: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM images WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Live images without an aesthetic score, for queue backfill.
    pub async fn ids_missing_score(&self) -> Result<Vec<i64>, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            "SELECT id FROM images WHERE deleted_at IS NULL AND ai_score IS NULL ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
    }

    pub async fn geo_bounds(&self) -> Result<Option<GeoBounds>, sqlx::Error> {
        let row: Option<(Option<f64>, Option<f64>, Option<f64>, Option<f64>)> = sqlx::query_as(
            r#"
            SELECT min(latitude), max(latitude), min(longitude), max(longitude)
            FROM images
            WHERE deleted_at IS NULL AND latitude IS NOT NULL AND longitude IS NOT NULL
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(match row {
            Some((Some(min_lat), Some(max_lat), Some(min_lng), Some(max_lng))) => {
                Some(GeoBounds {
                    min_latitude: min_lat,
                    max_latitude: max_lat,
                    min_longitude: min_lng,
                    max_longitude: max_lng,
                })
            }
            _ => None,
        })
    }
}
