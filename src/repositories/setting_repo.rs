use serde_json::Value as JsonValue;
use sqlx::PgPool;

use crate::entities::{SettingCategory, SettingRow};

#[derive(Clone)]
pub struct SettingRepository {
    pool: PgPool,
}

impl SettingRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn all(&self) -> Result<Vec<SettingRow>, sqlx::Error> {
        sqlx::query_as::<_, SettingRow>("SELECT * FROM settings ORDER BY category")
            .fetch_all(&self.pool)
            .await
    }

    pub async fn get(
        &self,
        category: SettingCategory,
    ) -> Result<Option<SettingRow>, sqlx::Error> {
        sqlx::query_as::<_, SettingRow>("SELECT * FROM settings WHERE category = $1")
            .bind(category.as_str())
            .fetch_optional(&self.pool)
            .await
    }

    /// Writes the whole category payload, bumping the row version.
    pub async fn upsert(
        &self,
        category: SettingCategory,
        payload: &JsonValue,
    ) -> Result<SettingRow, sqlx::Error> {
        sqlx::query_as::<_, SettingRow>(
            r#"
            INSERT INTO settings (category, payload)
            VALUES ($1, $2)
            ON CONFLICT (category) DO UPDATE
            SET payload = EXCLUDED.payload,
                version = settings.version + 1,
                updated_at = now()
            RETURNING *
            "#,
        )
        .bind(category.as_str())
        .bind(payload)
        .fetch_one(&self.pool)
        .await
    }

    /// Seeds a category only when absent, leaving operator edits alone.
    pub async fn seed_default(
        &self,
        category: SettingCategory,
        payload: &JsonValue,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO settings (category, payload) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(category.as_str())
        .bind(payload)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
