//! Business logic services

pub mod agencies;
pub mod audit;
pub mod auth;
pub mod bootstrap;
pub mod contacts;
pub mod dedup;
pub mod forms;
pub mod leads;
pub mod settings;
pub mod subscription;
pub mod todos;

pub use agencies::AgencyService;
pub use audit::AuditLogger;
pub use auth::{AuthService, AuthUser};
pub use bootstrap::BootstrapService;
pub use contacts::ContactService;
pub use dedup::{agency_prefix, RequestDeduplicator};
pub use forms::{FormService, Submitted};
pub use leads::LeadService;
pub use settings::SettingsService;
pub use subscription::SubscriptionService;
pub use todos::TodoService;

use agency_core::{AgencyError, Result};
use agency_types::{Agency, MemberRole};

/// The agency a request acts on and the caller's role inside it
#[derive(Clone, Debug)]
pub struct TenantContext {
    pub user: AuthUser,
    pub agency: Agency,
    pub role: MemberRole,
}

impl TenantContext {
    pub fn agency_id(&self) -> &str {
        &self.agency.id
    }

    pub fn user_id(&self) -> &str {
        &self.user.user_id
    }

    pub fn require_edit(&self) -> Result<()> {
        if self.role.can_edit() {
            Ok(())
        } else {
            Err(AgencyError::Forbidden(format!(
                "{} role is read-only",
                self.role
            )))
        }
    }

    pub fn require_manage_members(&self) -> Result<()> {
        if self.role.can_manage_members() {
            Ok(())
        } else {
            Err(AgencyError::Forbidden(
                "Only owners and admins can do this".to_string(),
            ))
        }
    }

    pub fn require_owner(&self) -> Result<()> {
        if self.role.can_manage_billing() {
            Ok(())
        } else {
            Err(AgencyError::Forbidden(
                "Only the agency owner can do this".to_string(),
            ))
        }
    }
}

/// Trim a free-text field, mapping blank input to `None`
pub(crate) fn clean(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Require a non-blank title of at most `max` characters
pub(crate) fn required_text(field: &str, value: &str, max: usize) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(AgencyError::Validation(format!("{} is required", field)));
    }
    if value.chars().count() > max {
        return Err(AgencyError::Validation(format!(
            "{} must be at most {} characters",
            field, max
        )));
    }
    Ok(value.to_string())
}

/// Loose email shape check: one `@`, non-empty local part, dotted domain
pub(crate) fn is_valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !email.chars().any(char::is_whitespace)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_shape() {
        assert!(is_valid_email("ann@example.com"));
        assert!(!is_valid_email("ann@example"));
        assert!(!is_valid_email("@example.com"));
        assert!(!is_valid_email("ann smith@example.com"));
        assert!(!is_valid_email("ann@@example.com"));
    }

    #[test]
    fn test_required_text() {
        assert_eq!(required_text("Title", "  Intake ", 10).unwrap(), "Intake");
        assert!(required_text("Title", "   ", 10).is_err());
        assert!(required_text("Title", "abcdefghijk", 10).is_err());
        assert_eq!(clean(Some("  ".to_string())), None);
    }
}
