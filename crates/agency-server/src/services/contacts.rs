//! Contacts (address book)

use super::{clean, is_valid_email, SubscriptionService, TenantContext};
use agency_core::ports::{tables, Query};
use agency_core::{AgencyError, Result, Store, StoreExt, Transaction};
use agency_types::{Agency, Contact, ContactInput, LimitedResource, Pagination};
use chrono::Utc;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::warn;

const SEARCH_COLUMNS: [&str; 4] = ["first_name", "last_name", "company", "email"];

pub struct ContactService {
    store: Arc<dyn Store>,
    subscriptions: Arc<SubscriptionService>,
}

fn normalize_email(email: Option<String>) -> Result<Option<String>> {
    match clean(email) {
        Some(email) if is_valid_email(&email) => Ok(Some(email.to_lowercase())),
        Some(email) => Err(AgencyError::Validation(format!(
            "'{}' is not a valid email address",
            email
        ))),
        None => Ok(None),
    }
}

fn normalize_tags(tags: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for tag in tags {
        let tag = tag.trim().to_lowercase();
        if !tag.is_empty() && !out.contains(&tag) {
            out.push(tag);
        }
    }
    out
}

impl ContactService {
    pub fn new(store: Arc<dyn Store>, subscriptions: Arc<SubscriptionService>) -> Self {
        Self {
            store,
            subscriptions,
        }
    }

    /// `search` matches the email when it contains `@`, else any of the
    /// name, company and email columns
    pub async fn list(
        &self,
        ctx: &TenantContext,
        search: Option<&str>,
        page: &Pagination,
    ) -> Result<Vec<Contact>> {
        let scoped = Query::new().eq("agency_id", ctx.agency_id());
        let Some(term) = search.map(str::trim).filter(|t| !t.is_empty()) else {
            let query = scoped
                .order_by("created_at", false)
                .limit(page.limit())
                .offset(page.offset());
            return self.store.select_as(tables::CONTACTS, &query).await;
        };

        let columns: &[&str] = if term.contains('@') {
            &["email"]
        } else {
            &SEARCH_COLUMNS
        };
        // Each column is searched separately and the matches merged
        let window = page.offset().saturating_add(page.limit());
        let mut seen = HashSet::new();
        let mut matches: Vec<Contact> = Vec::new();
        for column in columns {
            let query = scoped
                .clone()
                .ilike(column, term)
                .order_by("created_at", false)
                .limit(window);
            let found: Vec<Contact> = self.store.select_as(tables::CONTACTS, &query).await?;
            matches.extend(found.into_iter().filter(|c| seen.insert(c.id.clone())));
        }
        matches.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matches
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.limit() as usize)
            .collect())
    }

    pub async fn get(&self, ctx: &TenantContext, id: &str) -> Result<Contact> {
        self.store
            .get_as::<Contact>(tables::CONTACTS, id)
            .await?
            .filter(|c| c.agency_id == ctx.agency_id())
            .ok_or_else(|| AgencyError::not_found("Contact", id))
    }

    pub async fn find_by_email(&self, agency_id: &str, email: &str) -> Result<Option<Contact>> {
        let query = Query::new()
            .eq("agency_id", agency_id)
            .eq("email", email.to_lowercase());
        self.store.first_as(tables::CONTACTS, &query).await
    }

    pub async fn create(&self, ctx: &TenantContext, input: ContactInput) -> Result<Contact> {
        ctx.require_edit()?;
        let email = normalize_email(input.email)?;
        let first_name = clean(input.first_name);
        let last_name = clean(input.last_name);
        let phone = clean(input.phone);
        if first_name.is_none() && last_name.is_none() && email.is_none() && phone.is_none() {
            return Err(AgencyError::Validation(
                "A contact needs a name, an email or a phone number".to_string(),
            ));
        }
        if let Some(email) = &email {
            if self.find_by_email(ctx.agency_id(), email).await?.is_some() {
                return Err(AgencyError::Conflict(format!(
                    "A contact with email {} already exists",
                    email
                )));
            }
        }
        self.subscriptions
            .ensure_within(&ctx.agency, LimitedResource::Contacts)
            .await?;

        let now = Utc::now();
        let contact = Contact {
            id: agency_types::new_id(),
            agency_id: ctx.agency_id().to_string(),
            first_name,
            last_name,
            email,
            phone,
            company: clean(input.company),
            tags: normalize_tags(input.tags.unwrap_or_default()),
            created_at: now,
            updated_at: now,
        };
        self.store.insert_as(tables::CONTACTS, &contact).await
    }

    pub async fn update(&self, ctx: &TenantContext, id: &str, input: ContactInput) -> Result<Contact> {
        ctx.require_edit()?;
        let current = self.get(ctx, id).await?;

        let mut patch = Map::new();
        if input.email.is_some() {
            let email = normalize_email(input.email)?;
            if let Some(email) = &email {
                if let Some(other) = self.find_by_email(ctx.agency_id(), email).await? {
                    if other.id != current.id {
                        return Err(AgencyError::Conflict(format!(
                            "A contact with email {} already exists",
                            email
                        )));
                    }
                }
            }
            patch.insert("email".to_string(), serde_json::to_value(email)?);
        }
        for (key, value) in [
            ("first_name", input.first_name),
            ("last_name", input.last_name),
            ("phone", input.phone),
            ("company", input.company),
        ] {
            if value.is_some() {
                patch.insert(key.to_string(), serde_json::to_value(clean(value))?);
            }
        }
        if let Some(tags) = input.tags {
            patch.insert("tags".to_string(), serde_json::to_value(normalize_tags(tags))?);
        }
        patch.insert("updated_at".to_string(), serde_json::to_value(Utc::now())?);

        self.store
            .update_as(tables::CONTACTS, id, &Value::Object(patch))
            .await?
            .ok_or_else(|| AgencyError::not_found("Contact", id))
    }

    pub async fn delete(&self, ctx: &TenantContext, id: &str) -> Result<()> {
        ctx.require_edit()?;
        self.get(ctx, id).await?;
        self.store.delete(tables::CONTACTS, id).await?;
        Ok(())
    }

    /// Create or enrich the contact holding `input.email` inside `tx`.
    ///
    /// Existing contacts only gain fields they are missing. Returns `None`
    /// without an email, or when a new contact would exceed the plan.
    pub async fn upsert_by_email(
        &self,
        tx: &mut Transaction,
        agency: &Agency,
        input: ContactInput,
    ) -> Result<Option<Contact>> {
        let Some(email) = normalize_email(input.email)? else {
            return Ok(None);
        };

        if let Some(existing) = self.find_by_email(&agency.id, &email).await? {
            let mut patch = Map::new();
            for (key, current, incoming) in [
                ("first_name", &existing.first_name, input.first_name),
                ("last_name", &existing.last_name, input.last_name),
                ("phone", &existing.phone, input.phone),
                ("company", &existing.company, input.company),
            ] {
                if current.is_none() {
                    if let Some(value) = clean(incoming) {
                        patch.insert(key.to_string(), Value::String(value));
                    }
                }
            }
            if patch.is_empty() {
                return Ok(Some(existing));
            }
            patch.insert("updated_at".to_string(), serde_json::to_value(Utc::now())?);
            return tx
                .update_as(tables::CONTACTS, &existing.id, &Value::Object(patch))
                .await;
        }

        if let Err(e) = self
            .subscriptions
            .ensure_within(agency, LimitedResource::Contacts)
            .await
        {
            match e {
                AgencyError::LimitExceeded(reason) => {
                    warn!("Skipping contact for {} in agency {}: {}", email, agency.id, reason);
                    return Ok(None);
                }
                other => return Err(other),
            }
        }

        let now = Utc::now();
        let contact = Contact {
            id: agency_types::new_id(),
            agency_id: agency.id.clone(),
            first_name: clean(input.first_name),
            last_name: clean(input.last_name),
            email: Some(email),
            phone: clean(input.phone),
            company: clean(input.company),
            tags: normalize_tags(input.tags.unwrap_or_default()),
            created_at: now,
            updated_at: now,
        };
        Ok(Some(tx.insert_as(tables::CONTACTS, &contact).await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::testing::{store, tenant};
    use agency_types::MemberRole;

    async fn setup() -> (ContactService, Arc<dyn Store>, Agency) {
        let store = store().await;
        let subscriptions = Arc::new(SubscriptionService::new(store.clone()));
        let agency = Agency::new("Acme", "u1");
        (ContactService::new(store.clone(), subscriptions), store, agency)
    }

    fn input(email: &str, first: &str) -> ContactInput {
        ContactInput {
            email: Some(email.to_string()),
            first_name: Some(first.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_enforces_unique_email() {
        let (contacts, _, agency) = setup().await;
        let ctx = tenant(&agency, "u1", MemberRole::Member);

        let created = contacts
            .create(&ctx, input("Ann@Example.com", "Ann"))
            .await
            .unwrap();
        assert_eq!(created.email.as_deref(), Some("ann@example.com"));

        let err = contacts
            .create(&ctx, input("ann@example.com", "Other"))
            .await
            .unwrap_err();
        assert!(matches!(err, AgencyError::Conflict(_)));

        let err = contacts
            .create(&ctx, ContactInput::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AgencyError::Validation(_)));
    }

    #[tokio::test]
    async fn test_viewer_cannot_create() {
        let (contacts, _, agency) = setup().await;
        let ctx = tenant(&agency, "u2", MemberRole::Viewer);
        let err = contacts.create(&ctx, input("a@b.co", "A")).await.unwrap_err();
        assert!(matches!(err, AgencyError::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_update_and_search() {
        let (contacts, _, agency) = setup().await;
        let ctx = tenant(&agency, "u1", MemberRole::Owner);
        let created = contacts.create(&ctx, input("ann@example.com", "Ann")).await.unwrap();

        let updated = contacts
            .update(
                &ctx,
                &created.id,
                ContactInput {
                    last_name: Some("Lee".to_string()),
                    tags: Some(vec!["VIP".to_string(), " vip ".to_string()]),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.first_name.as_deref(), Some("Ann"));
        assert_eq!(updated.tags, vec!["vip".to_string()]);

        let found = contacts
            .list(&ctx, Some("le"), &Pagination::default())
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        let by_first_name = contacts
            .list(&ctx, Some("ANN"), &Pagination::default())
            .await
            .unwrap();
        assert_eq!(by_first_name.len(), 1);
        let none = contacts
            .list(&ctx, Some("zed@"), &Pagination::default())
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_search_spans_company_and_pages_merged_matches() {
        let (contacts, _, agency) = setup().await;
        let ctx = tenant(&agency, "u1", MemberRole::Owner);
        let mut acme = input("bob@acme.test", "Bob");
        acme.company = Some("Acme Corp".to_string());
        contacts.create(&ctx, acme).await.unwrap();
        contacts
            .create(&ctx, input("acme.fan@example.com", "Cy"))
            .await
            .unwrap();
        contacts
            .create(&ctx, input("dee@example.com", "Dee"))
            .await
            .unwrap();

        let found = contacts
            .list(&ctx, Some("acme"), &Pagination::default())
            .await
            .unwrap();
        assert_eq!(found.len(), 2);

        let first = Pagination {
            limit: Some(1),
            offset: None,
        };
        let second = Pagination {
            limit: Some(1),
            offset: Some(1),
        };
        let a = contacts.list(&ctx, Some("acme"), &first).await.unwrap();
        let b = contacts.list(&ctx, Some("acme"), &second).await.unwrap();
        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);
        assert_ne!(a[0].id, b[0].id);
    }

    #[tokio::test]
    async fn test_upsert_fills_missing_fields_only() {
        let (contacts, store, agency) = setup().await;
        let ctx = tenant(&agency, "u1", MemberRole::Owner);
        contacts.create(&ctx, input("ann@example.com", "Ann")).await.unwrap();

        let mut tx = Transaction::begin(store.clone(), "test");
        let upserted = contacts
            .upsert_by_email(
                &mut tx,
                &agency,
                ContactInput {
                    email: Some("ANN@example.com".to_string()),
                    first_name: Some("Annie".to_string()),
                    phone: Some("555-0100".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        tx.commit();

        assert_eq!(upserted.first_name.as_deref(), Some("Ann"));
        assert_eq!(upserted.phone.as_deref(), Some("555-0100"));
        assert_eq!(store.count(tables::CONTACTS, &Query::new()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_upsert_without_email_is_skipped() {
        let (contacts, store, agency) = setup().await;
        let mut tx = Transaction::begin(store.clone(), "test");
        let result = contacts
            .upsert_by_email(&mut tx, &agency, ContactInput::default())
            .await
            .unwrap();
        assert!(result.is_none());
        assert_eq!(tx.steps(), 0);
        tx.commit();
    }
}
