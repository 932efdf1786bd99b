//! REST envelope shared by every endpoint

use crate::{Agency, AgencyMember, MemberRole, SubscriptionTier, TierLimits, UserPreferences};
use serde::{Deserialize, Serialize};

/// Successful response body: `{"success": true, "data": ...}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

/// Failed response body: `{"success": false, "error": ..., "code": ...}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorBody {
    pub success: bool,
    pub error: String,
    pub code: String,
}

/// Page parameters accepted by list endpoints
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Pagination {
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub offset: Option<u32>,
}

impl Pagination {
    pub const DEFAULT_LIMIT: u32 = 50;
    pub const MAX_LIMIT: u32 = 500;

    pub fn limit(&self) -> u32 {
        self.limit
            .unwrap_or(Self::DEFAULT_LIMIT)
            .clamp(1, Self::MAX_LIMIT)
    }

    pub fn offset(&self) -> u32 {
        self.offset.unwrap_or(0)
    }
}

/// Everything the dashboard needs after sign-in
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapPayload {
    pub agency: Agency,
    pub membership: AgencyMember,
    pub role: MemberRole,
    pub preferences: UserPreferences,
    pub tier: SubscriptionTier,
    pub limits: TierLimits,
    /// True when this call created the agency
    pub created: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pagination_clamps() {
        let page = Pagination {
            limit: Some(10_000),
            offset: None,
        };
        assert_eq!(page.limit(), Pagination::MAX_LIMIT);
        assert_eq!(page.offset(), 0);
        assert_eq!(Pagination::default().limit(), Pagination::DEFAULT_LIMIT);
    }

    #[test]
    fn test_envelope_shape() {
        let body = serde_json::to_value(ApiResponse::ok(vec![1, 2])).unwrap();
        assert_eq!(body["success"], true);
        assert_eq!(body["data"][1], 2);
    }
}
