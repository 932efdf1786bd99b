//! Agency (tenant) and membership types

use crate::SubscriptionTier;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Tenant organization. Every business record belongs to exactly one agency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agency {
    pub id: String,
    pub name: String,
    pub owner_id: String,
    #[serde(default)]
    pub subscription_tier: SubscriptionTier,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Agency {
    pub fn new(name: impl Into<String>, owner_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: crate::new_id(),
            name: name.into(),
            owner_id: owner_id.into(),
            subscription_tier: SubscriptionTier::Free,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Role of a user inside an agency
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    Owner,
    Admin,
    Member,
    Viewer,
}

impl MemberRole {
    /// Create and modify forms, leads, contacts and todos
    pub fn can_edit(&self) -> bool {
        matches!(self, MemberRole::Owner | MemberRole::Admin | MemberRole::Member)
    }

    pub fn can_manage_members(&self) -> bool {
        matches!(self, MemberRole::Owner | MemberRole::Admin)
    }

    pub fn can_manage_billing(&self) -> bool {
        matches!(self, MemberRole::Owner)
    }
}

impl std::fmt::Display for MemberRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemberRole::Owner => write!(f, "owner"),
            MemberRole::Admin => write!(f, "admin"),
            MemberRole::Member => write!(f, "member"),
            MemberRole::Viewer => write!(f, "viewer"),
        }
    }
}

/// Membership row linking a user to an agency
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgencyMember {
    pub id: String,
    pub agency_id: String,
    pub user_id: String,
    pub role: MemberRole,
    #[serde(default)]
    pub invited_email: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AgencyMember {
    pub fn new(agency_id: &str, user_id: &str, role: MemberRole) -> Self {
        Self {
            id: crate::new_id(),
            agency_id: agency_id.to_string(),
            user_id: user_id.to_string(),
            role,
            invited_email: None,
            created_at: Utc::now(),
        }
    }
}

/// Agency creation request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgencyCreate {
    pub name: String,
}

/// Agency rename request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgencyUpdate {
    pub name: String,
}

/// Add a member to an agency
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberAdd {
    pub user_id: String,
    pub role: MemberRole,
    #[serde(default)]
    pub invited_email: Option<String>,
}

/// Change a member's role
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberUpdate {
    pub role: MemberRole,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_capabilities() {
        assert!(MemberRole::Owner.can_manage_billing());
        assert!(!MemberRole::Admin.can_manage_billing());
        assert!(MemberRole::Admin.can_manage_members());
        assert!(!MemberRole::Member.can_manage_members());
        assert!(MemberRole::Member.can_edit());
        assert!(!MemberRole::Viewer.can_edit());
    }

    #[test]
    fn test_role_wire_format() {
        let json = serde_json::to_string(&MemberRole::Viewer).unwrap();
        assert_eq!(json, "\"viewer\"");
        let role: MemberRole = serde_json::from_str("\"admin\"").unwrap();
        assert_eq!(role, MemberRole::Admin);
    }
}
