//! First sign-in setup
//!
//! A user who signs in without any membership gets a free-tier agency they
//! own plus default preferences. Calling it again returns the existing setup.
//! Calls for the same user are serialized so concurrent first sign-ins
//! create a single agency.

use super::{AgencyService, AuditLogger, AuthUser, SettingsService, SubscriptionService};
use agency_core::ports::tables;
use agency_core::{Result, Store, Transaction};
use agency_types::{
    Agency, AgencyMember, AuditAction, BootstrapPayload, MemberRole, UserPreferences,
};
use dashmap::DashMap;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

pub struct BootstrapService {
    store: Arc<dyn Store>,
    agencies: Arc<AgencyService>,
    subscriptions: Arc<SubscriptionService>,
    settings: Arc<SettingsService>,
    audit: Arc<AuditLogger>,
    /// Per-user setup locks, removed once nobody holds them
    in_progress: DashMap<String, Arc<Mutex<()>>>,
}

/// "ann.lee@example.com" becomes "Ann Lee's Agency"
pub fn agency_name_for(email: Option<&str>) -> String {
    let local = email
        .and_then(|e| e.split('@').next())
        .map(str::trim)
        .unwrap_or_default();

    let words: Vec<String> = local
        .split(|c: char| matches!(c, '.' | '_' | '-' | '+'))
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect();

    if words.is_empty() {
        "My Agency".to_string()
    } else {
        format!("{}'s Agency", words.join(" "))
    }
}

impl BootstrapService {
    pub fn new(
        store: Arc<dyn Store>,
        agencies: Arc<AgencyService>,
        subscriptions: Arc<SubscriptionService>,
        settings: Arc<SettingsService>,
        audit: Arc<AuditLogger>,
    ) -> Self {
        Self {
            store,
            agencies,
            subscriptions,
            settings,
            audit,
            in_progress: DashMap::new(),
        }
    }

    pub async fn bootstrap(&self, user: &AuthUser) -> Result<BootstrapPayload> {
        let lock = self
            .in_progress
            .entry(user.user_id.clone())
            .or_default()
            .clone();
        let result = {
            let _guard = lock.lock().await;
            self.bootstrap_locked(user).await
        };
        drop(lock);
        self.in_progress
            .remove_if(&user.user_id, |_, lock| Arc::strong_count(lock) == 1);
        result
    }

    async fn bootstrap_locked(&self, user: &AuthUser) -> Result<BootstrapPayload> {
        if let Some(membership) = self
            .agencies
            .memberships_for_user(&user.user_id)
            .await?
            .into_iter()
            .next()
        {
            let agency = self.subscriptions.load_agency(&membership.agency_id).await?;
            let preferences = self.settings.get(&user.user_id).await?;
            debug!("User {} already belongs to agency {}", user.user_id, agency.id);
            return Ok(payload(agency, membership, preferences, false));
        }

        let agency = Agency::new(agency_name_for(user.email.as_deref()), user.user_id.as_str());
        let membership = AgencyMember::new(&agency.id, &user.user_id, MemberRole::Owner);
        let existing_prefs = self.settings.stored(&user.user_id).await?;

        let mut tx = Transaction::begin(self.store.clone(), "bootstrap");
        let result: Result<(Agency, AgencyMember, UserPreferences)> = async {
            let agency: Agency = tx.insert_as(tables::AGENCIES, &agency).await?;
            let membership: AgencyMember = tx.insert_as(tables::MEMBERS, &membership).await?;
            let preferences = match existing_prefs {
                Some(prefs) => prefs,
                None => {
                    tx.insert_as(
                        tables::PREFERENCES,
                        &UserPreferences::defaults_for(&user.user_id),
                    )
                    .await?
                }
            };
            Ok((agency, membership, preferences))
        }
        .await;
        let (agency, membership, preferences) = tx.finish(result).await?;

        info!(
            "Bootstrapped agency {} ({}) for user {}",
            agency.id, agency.name, user.user_id
        );
        self.audit
            .record(
                &agency.id,
                Some(&user.user_id),
                AuditAction::Created,
                "agency",
                Some(&agency.id),
                json!({ "name": agency.name, "bootstrap": true }),
            )
            .await;

        Ok(payload(agency, membership, preferences, true))
    }
}

fn payload(
    agency: Agency,
    membership: AgencyMember,
    preferences: UserPreferences,
    created: bool,
) -> BootstrapPayload {
    BootstrapPayload {
        role: membership.role,
        tier: agency.subscription_tier,
        limits: agency.subscription_tier.limits(),
        agency,
        membership,
        preferences,
        created,
    }
}
