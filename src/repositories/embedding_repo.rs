use pgvector::Vector;
use sqlx::PgPool;

use crate::entities::EmbeddingPoint;

#[derive(Clone)]
pub struct EmbeddingRepository {
    pool: PgPool,
}

impl EmbeddingRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// One row per `(image_id, model_name)`; re-processing replaces the
    /// previous vector.
    pub async fn upsert_image(
        &self,
        image_id: i64,
        model_name: &str,
        vector: Vector,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO embeddings (image_id, model_name, vector)
            VALUES ($1, $2, $3)
            ON CONFLICT (image_id, model_name) DO UPDATE SET vector = EXCLUDED.vector
            "#,
        )
        .bind(image_id)
        .bind(model_name)
        .bind(vector)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn upsert_tag(
        &self,
        tag_id: i64,
        model_name: &str,
        vector: Vector,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO tag_embeddings (tag_id, model_name, vector)
            VALUES ($1, $2, $3)
            ON CONFLICT (tag_id, model_name) DO UPDATE SET vector = EXCLUDED.vector
            "#,
        )
        .bind(tag_id)
        .bind(model_name)
        .bind(vector)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn image_vector(
        &self,
        image_id: i64,
        model_name: &str,
    ) -> Result<Option<Vector>, sqlx::Error> {
        sqlx::query_scalar::<_, Vector>(
            "SELECT vector FROM embeddings WHERE image_id = $1 AND model_name = $2",
        )
        .bind(image_id)
        .bind(model_name)
        .fetch_optional(&self.pool)
        .await
    }

    /// All live-image embeddings for one model, as raw points for the
    /// clustering RPC.
    pub async fn points_for_model(
        &self,
        model_name: &str,
    ) -> Result<Vec<EmbeddingPoint>, sqlx::Error> {
        let rows: Vec<(i64, Vector)> = sqlx::query_as(
            r#"
            SELECT e.image_id, e.vector
            FROM embeddings e
            JOIN images i ON i.id = e.image_id
            WHERE e.model_name = $1 AND i.deleted_at IS NULL
            ORDER BY e.image_id
            "#,
        )
        .bind(model_name)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(image_id, vector)| EmbeddingPoint {
                image_id,
                vector: vector.to_vec(),
            })
            .collect())
    }

    /// Live images that have no vector for `model_name` yet; the backfill
    /// enqueue uses this when a model comes online.
    pub async fn image_ids_missing(&self, model_name: &str) -> Result<Vec<i64>, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            r#"
            SELECT i.id FROM images i
            WHERE i.deleted_at IS NULL
              AND NOT EXISTS (
                  SELECT 1 FROM embeddings e
                  WHERE e.image_id = i.id AND e.model_name = $1
              )
            ORDER BY i.id
            "#,
        )
        .bind(model_name)
        .fetch_all(&self.pool)
        .await
    }

    pub async fn tag_ids_missing(&self, model_name: &str) -> Result<Vec<i64>, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            r#"
            SELECT t.id FROM tags t
            WHERE NOT EXISTS (
                SELECT 1 FROM tag_embeddings te
                WHERE te.tag_id = t.id AND te.model_name = $1
            )
            ORDER BY t.id
            "#,
        )
        .bind(model_name)
        .fetch_all(&self.pool)
        .await
    }

    pub async fn delete_for_image(&self, image_id: i64) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM embeddings WHERE image_id = $1")
            .bind(image_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Drops all vectors of a model, e.g. when it is removed from the
    /// provider registry.
    pub async fn delete_for_model(&self, model_name: &str) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM embeddings WHERE model_name = $1")
            .bind(model_name)
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM tag_embeddings WHERE model_name = $1")
            .bind(model_name)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
