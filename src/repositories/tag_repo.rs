use sqlx::PgPool;

use crate::entities::{Tag, TagWithCount};

#[derive(Clone)]
pub struct TagRepository {
    pool: PgPool,
}

impl TagRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn list_with_counts(&self) -> Result<Vec<TagWithCount>, sqlx::Error> {
        sqlx::query_as::<_, TagWithCount>(
            r#"
            SELECT t.id, t.name, t.color, count(it.image_id) AS image_count
            FROM tags t
            LEFT JOIN image_tags it ON it.tag_id = t.id
            LEFT JOIN images i ON i.id = it.image_id AND i.deleted_at IS NULL
            GROUP BY t.id
            ORDER BY t.name
            "#,
        )
        .fetch_all(&self.pool)
        .await
    }

    pub async fn get(&self, id: i64) -> Result<Option<Tag>, sqlx::Error> {
        sqlx::query_as::<_, Tag>("SELECT * FROM tags WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    /// Creates the tag or returns the existing row for the same name.
    pub async fn get_or_create(&self, name: &str, color: Option<&str>) -> Result<Tag, sqlx::Error> {
        sqlx::query_as::<_, Tag>(
            r#"
            INSERT INTO tags (name, color) VALUES ($1, $2)
            ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name
            RETURNING *
            "#,
        )
        .bind(name)
        .bind(color)
        .fetch_one(&self.pool)
        .await
    }

    pub async fn rename(
        &self,
        id: i64,
        name: &str,
        color: Option<&str>,
    ) -> Result<Option<Tag>, sqlx::Error> {
        sqlx::query_as::<_, Tag>(
            "UPDATE tags SET name = $2, color = COALESCE($3, color) WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(name)
        .bind(color)
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn delete(&self, id: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM tags WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn tags_of_image(&self, image_id: i64) -> Result<Vec<Tag>, sqlx::Error> {
        sqlx::query_as::<_, Tag>(
            r#"
            SELECT t.* FROM tags t
            JOIN image_tags it ON it.tag_id = t.id
            WHERE it.image_id = $1
            ORDER BY t.name
            "#,
        )
        .bind(image_id)
        .fetch_all(&self.pool)
        .await
    }

    pub async fn attach(&self, image_id: i64, tag_id: i64) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO image_tags (image_id, tag_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(image_id)
        .bind(tag_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn detach(&self, image_id: i64, tag_id: i64) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM image_tags WHERE image_id = $1 AND tag_id = $2")
            .bind(image_id)
            .bind(tag_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn detach_all(&self, image_id: i64) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM image_tags WHERE image_id = $1")
            .bind(image_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
