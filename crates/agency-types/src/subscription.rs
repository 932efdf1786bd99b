//! Subscription tiers and their usage limits

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionTier {
    #[default]
    Free,
    Starter,
    Professional,
    Enterprise,
}

/// Usage caps for a tier. `None` means unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierLimits {
    pub max_forms: Option<u64>,
    pub max_responses_per_month: Option<u64>,
    pub max_members: Option<u64>,
    pub max_contacts: Option<u64>,
}

impl SubscriptionTier {
    pub fn limits(&self) -> TierLimits {
        match self {
            SubscriptionTier::Free => TierLimits {
                max_forms: Some(3),
                max_responses_per_month: Some(100),
                max_members: Some(1),
                max_contacts: Some(250),
            },
            SubscriptionTier::Starter => TierLimits {
                max_forms: Some(10),
                max_responses_per_month: Some(1_000),
                max_members: Some(3),
                max_contacts: Some(2_500),
            },
            SubscriptionTier::Professional => TierLimits {
                max_forms: Some(50),
                max_responses_per_month: Some(10_000),
                max_members: Some(10),
                max_contacts: Some(25_000),
            },
            SubscriptionTier::Enterprise => TierLimits {
                max_forms: None,
                max_responses_per_month: None,
                max_members: None,
                max_contacts: None,
            },
        }
    }
}

impl std::fmt::Display for SubscriptionTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubscriptionTier::Free => write!(f, "free"),
            SubscriptionTier::Starter => write!(f, "starter"),
            SubscriptionTier::Professional => write!(f, "professional"),
            SubscriptionTier::Enterprise => write!(f, "enterprise"),
        }
    }
}

/// Resources capped by a tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitedResource {
    Forms,
    ResponsesPerMonth,
    Members,
    Contacts,
}

impl LimitedResource {
    pub fn limit(&self, limits: &TierLimits) -> Option<u64> {
        match self {
            LimitedResource::Forms => limits.max_forms,
            LimitedResource::ResponsesPerMonth => limits.max_responses_per_month,
            LimitedResource::Members => limits.max_members,
            LimitedResource::Contacts => limits.max_contacts,
        }
    }
}

impl std::fmt::Display for LimitedResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LimitedResource::Forms => write!(f, "forms"),
            LimitedResource::ResponsesPerMonth => write!(f, "monthly responses"),
            LimitedResource::Members => write!(f, "members"),
            LimitedResource::Contacts => write!(f, "contacts"),
        }
    }
}

/// Current consumption of each limited resource
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSummary {
    pub forms: u64,
    pub responses_this_month: u64,
    pub members: u64,
    pub contacts: u64,
}

/// Tier, limits and usage reported to the billing page
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionStatus {
    pub tier: SubscriptionTier,
    pub limits: TierLimits,
    pub usage: UsageSummary,
}

/// Change an agency's tier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierChange {
    pub tier: SubscriptionTier,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limits_grow_with_tier() {
        let free = SubscriptionTier::Free.limits();
        let starter = SubscriptionTier::Starter.limits();
        assert!(free.max_forms < starter.max_forms);
        assert_eq!(SubscriptionTier::Enterprise.limits().max_members, None);
        assert_eq!(LimitedResource::Contacts.limit(&free), Some(250));
    }

    #[test]
    fn test_default_tier_is_free() {
        assert_eq!(SubscriptionTier::default(), SubscriptionTier::Free);
    }
}
