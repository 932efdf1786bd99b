//! Audit log types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Created,
    Updated,
    Deleted,
    Published,
    Unpublished,
    Submitted,
    MemberAdded,
    MemberRemoved,
    RoleChanged,
    TierChanged,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLog {
    pub id: String,
    pub agency_id: String,
    /// `None` for anonymous actions such as public form submissions
    #[serde(default)]
    pub user_id: Option<String>,
    pub action: AuditAction,
    pub entity_type: String,
    #[serde(default)]
    pub entity_id: Option<String>,
    #[serde(default)]
    pub details: Value,
    pub created_at: DateTime<Utc>,
}
