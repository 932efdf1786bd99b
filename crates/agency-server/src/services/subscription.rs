//! Subscription tiers: usage accounting and limit enforcement

use agency_core::ports::{tables, Query};
use agency_core::{AgencyError, Result, Store, StoreExt};
use agency_types::{Agency, LimitedResource, SubscriptionStatus, UsageSummary};
use chrono::{DateTime, Datelike, Duration, DurationRound, SecondsFormat, TimeZone, Utc};
use std::sync::Arc;

pub struct SubscriptionService {
    store: Arc<dyn Store>,
}

/// First instant of the current calendar month (UTC)
pub fn month_start(now: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
        .single()
        .unwrap_or(now)
}

/// Lower bound for `gte` filters on stored timestamps
///
/// Rows are stored as RFC 3339 text with a variable fraction, so the bound is
/// truncated to whole seconds and written with nine zero digits; it then
/// sorts correctly against every stored precision.
pub fn timestamp_cutoff(at: DateTime<Utc>) -> String {
    at.duration_trunc(Duration::seconds(1))
        .unwrap_or(at)
        .to_rfc3339_opts(SecondsFormat::Nanos, true)
}

impl SubscriptionService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn load_agency(&self, agency_id: &str) -> Result<Agency> {
        self.store
            .get_as(tables::AGENCIES, agency_id)
            .await?
            .ok_or_else(|| AgencyError::not_found("Agency", agency_id))
    }

    pub async fn current_usage(&self, agency_id: &str, resource: LimitedResource) -> Result<u64> {
        let scoped = Query::new().eq("agency_id", agency_id);
        match resource {
            LimitedResource::Forms => self.store.count(tables::FORMS, &scoped).await,
            LimitedResource::Members => self.store.count(tables::MEMBERS, &scoped).await,
            LimitedResource::Contacts => self.store.count(tables::CONTACTS, &scoped).await,
            LimitedResource::ResponsesPerMonth => {
                let since = timestamp_cutoff(month_start(Utc::now()));
                let query = scoped.gte("submitted_at", since);
                self.store.count(tables::RESPONSES, &query).await
            }
        }
    }

    pub async fn usage(&self, agency_id: &str) -> Result<UsageSummary> {
        Ok(UsageSummary {
            forms: self.current_usage(agency_id, LimitedResource::Forms).await?,
            responses_this_month: self
                .current_usage(agency_id, LimitedResource::ResponsesPerMonth)
                .await?,
            members: self.current_usage(agency_id, LimitedResource::Members).await?,
            contacts: self.current_usage(agency_id, LimitedResource::Contacts).await?,
        })
    }

    pub async fn status(&self, agency: &Agency) -> Result<SubscriptionStatus> {
        Ok(SubscriptionStatus {
            tier: agency.subscription_tier,
            limits: agency.subscription_tier.limits(),
            usage: self.usage(&agency.id).await?,
        })
    }

    /// Fail with `LimitExceeded` when one more `resource` would exceed the tier
    pub async fn ensure_within(&self, agency: &Agency, resource: LimitedResource) -> Result<()> {
        let limits = agency.subscription_tier.limits();
        let Some(limit) = resource.limit(&limits) else {
            return Ok(());
        };

        let used = self.current_usage(&agency.id, resource).await?;
        if used >= limit {
            return Err(AgencyError::LimitExceeded(format!(
                "the {} plan allows {} {}",
                agency.subscription_tier, limit, resource
            )));
        }
        Ok(())
    }
}
