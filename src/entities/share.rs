use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A public share link. The password, when set, is stored as a bcrypt hash;
/// responses only ever expose whether one exists.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Share {
    pub id: i64,
    pub code: String,
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    pub expire_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub view_count: i64,
    pub created_at: DateTime<Utc>,
}

impl Share {
    pub fn has_password(&self) -> bool {
        self.password_hash.is_some()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expire_at.map(|at| at < now).unwrap_or(false)
    }
}
