use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::FromRow;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

/// One settings row per category; the payload is the whole category as JSON.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct SettingRow {
    pub category: String,
    pub payload: JsonValue,
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettingCategory {
    General,
    Storage,
    Ai,
    Retention,
    Auth,
}

impl SettingCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettingCategory::General => "general",
            SettingCategory::Storage => "storage",
            SettingCategory::Ai => "ai",
            SettingCategory::Retention => "retention",
            SettingCategory::Auth => "auth",
        }
    }

    pub fn all() -> [SettingCategory; 5] {
        [
            SettingCategory::General,
            SettingCategory::Storage,
            SettingCategory::Ai,
            SettingCategory::Retention,
            SettingCategory::Auth,
        ]
    }
}

impl Display for SettingCategory {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SettingCategory {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "general" => Ok(SettingCategory::General),
            "storage" => Ok(SettingCategory::Storage),
            "ai" => Ok(SettingCategory::Ai),
            "retention" => Ok(SettingCategory::Retention),
            "auth" => Ok(SettingCategory::Auth),
            _ => Err(()),
        }
    }
}
