//! User preferences

use agency_core::ports::{tables, Query};
use agency_core::{AgencyError, Result, Store, StoreExt};
use agency_types::{PreferencesUpdate, UserPreferences};
use chrono::Utc;
use std::sync::Arc;

pub struct SettingsService {
    store: Arc<dyn Store>,
}

impl SettingsService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn stored(&self, user_id: &str) -> Result<Option<UserPreferences>> {
        let query = Query::new().eq("user_id", user_id);
        self.store.first_as(tables::PREFERENCES, &query).await
    }

    /// Stored preferences, or unsaved defaults
    pub async fn get(&self, user_id: &str) -> Result<UserPreferences> {
        Ok(self
            .stored(user_id)
            .await?
            .unwrap_or_else(|| UserPreferences::defaults_for(user_id)))
    }

    /// Partial update; missing fields keep their current value
    pub async fn update(&self, user_id: &str, req: PreferencesUpdate) -> Result<UserPreferences> {
        let existing = self.stored(user_id).await?;
        let mut prefs = existing
            .clone()
            .unwrap_or_else(|| UserPreferences::defaults_for(user_id));

        if let Some(theme) = req.theme {
            prefs.theme = theme;
        }
        if let Some(language) = req.language {
            prefs.language = validate_language(&language)?;
        }
        if let Some(timezone) = req.timezone {
            prefs.timezone = validate_timezone(&timezone)?;
        }
        if let Some(email_notifications) = req.email_notifications {
            prefs.email_notifications = email_notifications;
        }
        if let Some(layout) = req.dashboard_layout {
            if !(layout.is_object() || layout.is_array() || layout.is_null()) {
                return Err(AgencyError::Validation(
                    "dashboard_layout must be an object or a list".to_string(),
                ));
            }
            prefs.dashboard_layout = layout;
        }
        prefs.updated_at = Utc::now();

        match existing {
            Some(current) => self
                .store
                .update_as(tables::PREFERENCES, &current.id, &prefs)
                .await?
                .ok_or_else(|| AgencyError::not_found("Preferences", &current.id)),
            None => self.store.insert_as(tables::PREFERENCES, &prefs).await,
        }
    }

    /// Forget stored preferences and return the defaults
    pub async fn reset(&self, user_id: &str) -> Result<UserPreferences> {
        if let Some(current) = self.stored(user_id).await? {
            self.store.delete(tables::PREFERENCES, &current.id).await?;
        }
        Ok(UserPreferences::defaults_for(user_id))
    }
}

/// `en` or `en-US` style tags
fn validate_language(language: &str) -> Result<String> {
    let language = language.trim();
    let mut parts = language.split('-');
    let primary = parts.next().unwrap_or_default();
    let region = parts.next();

    let primary_ok = (2..=3).contains(&primary.len())
        && primary.chars().all(|c| c.is_ascii_lowercase());
    let region_ok = region.map_or(true, |r| {
        r.len() == 2 && r.chars().all(|c| c.is_ascii_uppercase())
    });

    if primary_ok && region_ok && parts.next().is_none() {
        Ok(language.to_string())
    } else {
        Err(AgencyError::Validation(format!(
            "'{}' is not a language tag like 'en' or 'en-US'",
            language
        )))
    }
}

/// `UTC` or an IANA `Area/Location` name
fn validate_timezone(timezone: &str) -> Result<String> {
    let timezone = timezone.trim();
    if timezone == "UTC" {
        return Ok(timezone.to_string());
    }

    let segments: Vec<&str> = timezone.split('/').collect();
    let well_formed = segments.len() >= 2
        && segments.iter().all(|segment| {
            !segment.is_empty()
                && segment
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '+'))
        })
        && segments[0].chars().next().map_or(false, |c| c.is_ascii_uppercase());

    if well_formed {
        Ok(timezone.to_string())
    } else {
        Err(AgencyError::Validation(format!(
            "'{}' is not a timezone like 'Europe/Berlin'",
            timezone
        )))
    }
}
