//! Per-user preferences

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    Dark,
    #[default]
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserPreferences {
    /// Preferences are keyed by the owning user
    pub id: String,
    pub user_id: String,
    #[serde(default)]
    pub theme: Theme,
    pub language: String,
    pub timezone: String,
    #[serde(default = "default_true")]
    pub email_notifications: bool,
    #[serde(default)]
    pub dashboard_layout: Value,
    pub updated_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

impl UserPreferences {
    pub fn defaults_for(user_id: &str) -> Self {
        Self {
            id: crate::new_id(),
            user_id: user_id.to_string(),
            theme: Theme::System,
            language: "en".to_string(),
            timezone: "UTC".to_string(),
            email_notifications: true,
            dashboard_layout: Value::Null,
            updated_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PreferencesUpdate {
    #[serde(default)]
    pub theme: Option<Theme>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub email_notifications: Option<bool>,
    #[serde(default)]
    pub dashboard_layout: Option<Value>,
}
