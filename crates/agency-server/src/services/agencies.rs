//! Agencies, memberships and tier changes

use super::{required_text, AuditLogger, AuthUser, SubscriptionService, TenantContext};
use agency_core::ports::{tables, Query};
use agency_core::{AgencyError, Result, Store, StoreExt, Transaction};
use agency_types::{
    Agency, AgencyCreate, AgencyMember, AgencyUpdate, AuditAction, LimitedResource, MemberAdd,
    MemberRole, MemberUpdate, TierChange,
};
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

const MAX_NAME_LEN: usize = 120;

pub struct AgencyService {
    store: Arc<dyn Store>,
    audit: Arc<AuditLogger>,
    subscriptions: Arc<SubscriptionService>,
}

impl AgencyService {
    pub fn new(
        store: Arc<dyn Store>,
        audit: Arc<AuditLogger>,
        subscriptions: Arc<SubscriptionService>,
    ) -> Self {
        Self {
            store,
            audit,
            subscriptions,
        }
    }

    /// Oldest membership first
    pub async fn memberships_for_user(&self, user_id: &str) -> Result<Vec<AgencyMember>> {
        let query = Query::new()
            .eq("user_id", user_id)
            .order_by("created_at", true);
        self.store.select_as(tables::MEMBERS, &query).await
    }

    pub async fn membership(&self, agency_id: &str, user_id: &str) -> Result<Option<AgencyMember>> {
        let query = Query::new()
            .eq("agency_id", agency_id)
            .eq("user_id", user_id);
        self.store.first_as(tables::MEMBERS, &query).await
    }

    /// Agency a request acts on: the requested one, or the caller's first
    pub async fn resolve_tenant(
        &self,
        user: AuthUser,
        requested: Option<&str>,
    ) -> Result<TenantContext> {
        if let Some(agency_id) = requested {
            return self.tenant_for(user, agency_id).await;
        }

        let membership = self
            .memberships_for_user(&user.user_id)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                AgencyError::NotFound(
                    "Agency membership (call GET /api/v1/bootstrap first)".to_string(),
                )
            })?;
        let agency = self.subscriptions.load_agency(&membership.agency_id).await?;
        Ok(TenantContext {
            user,
            agency,
            role: membership.role,
        })
    }

    pub async fn tenant_for(&self, user: AuthUser, agency_id: &str) -> Result<TenantContext> {
        let agency = self.subscriptions.load_agency(agency_id).await?;
        let membership = self
            .membership(agency_id, &user.user_id)
            .await?
            .ok_or_else(|| AgencyError::Forbidden("Not a member of this agency".to_string()))?;
        Ok(TenantContext {
            user,
            agency,
            role: membership.role,
        })
    }

    pub async fn list_for_user(&self, user_id: &str) -> Result<Vec<Agency>> {
        let memberships = self.memberships_for_user(user_id).await?;
        if memberships.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<String> = memberships.into_iter().map(|m| m.agency_id).collect();
        let query = Query::new()
            .is_in("id", ids)
            .order_by("created_at", true);
        self.store.select_as(tables::AGENCIES, &query).await
    }

    /// New agency with the caller as owner
    pub async fn create(&self, user: &AuthUser, req: AgencyCreate) -> Result<Agency> {
        let name = required_text("Agency name", &req.name, MAX_NAME_LEN)?;
        let agency = Agency::new(name, user.user_id.as_str());
        let owner = AgencyMember::new(&agency.id, &user.user_id, MemberRole::Owner);

        let mut tx = Transaction::begin(self.store.clone(), "create_agency");
        let result: Result<Agency> = async {
            let agency: Agency = tx.insert_as(tables::AGENCIES, &agency).await?;
            tx.insert_as(tables::MEMBERS, &owner).await?;
            Ok(agency)
        }
        .await;
        let agency = tx.finish(result).await?;

        info!("Agency {} created by {}", agency.id, user.user_id);
        self.audit
            .record(
                &agency.id,
                Some(&user.user_id),
                AuditAction::Created,
                "agency",
                Some(&agency.id),
                json!({ "name": agency.name }),
            )
            .await;
        Ok(agency)
    }

    pub async fn rename(&self, ctx: &TenantContext, req: AgencyUpdate) -> Result<Agency> {
        ctx.require_manage_members()?;
        let name = required_text("Agency name", &req.name, MAX_NAME_LEN)?;
        let patch = json!({ "name": name, "updated_at": Utc::now() });
        let agency: Agency = self
            .store
            .update_as(tables::AGENCIES, ctx.agency_id(), &patch)
            .await?
            .ok_or_else(|| AgencyError::not_found("Agency", ctx.agency_id()))?;

        self.audit
            .record(
                &agency.id,
                Some(ctx.user_id()),
                AuditAction::Updated,
                "agency",
                Some(&agency.id),
                json!({ "name": agency.name }),
            )
            .await;
        Ok(agency)
    }

    /// Remove the agency and everything scoped to it
    ///
    /// Children go first and the agency row last, all inside one
    /// transaction, so a failed step restores every row already removed.
    pub async fn delete(&self, ctx: &TenantContext) -> Result<()> {
        ctx.require_owner()?;
        let agency_id = ctx.agency_id();
        let scoped = Query::new().eq("agency_id", agency_id);

        let mut tx = Transaction::begin(self.store.clone(), "delete agency");
        let result: Result<()> = async {
            let forms = self.store.select(tables::FORMS, &scoped).await?;
            for form_id in row_ids(&forms) {
                let questions = Query::new().eq("form_id", form_id.as_str());
                self.delete_matching(&mut tx, tables::QUESTIONS, &questions)
                    .await?;
            }
            for table in [
                tables::FORMS,
                tables::RESPONSES,
                tables::LEADS,
                tables::CONTACTS,
                tables::TODOS,
                tables::AUDIT_LOGS,
                tables::MEMBERS,
            ] {
                self.delete_matching(&mut tx, table, &scoped).await?;
            }
            if !tx.delete(tables::AGENCIES, agency_id).await? {
                return Err(AgencyError::not_found("Agency", agency_id));
            }
            Ok(())
        }
        .await;
        tx.finish(result).await?;

        info!("Agency {} deleted by {}", agency_id, ctx.user_id());
        Ok(())
    }

    async fn delete_matching(
        &self,
        tx: &mut Transaction,
        table: &str,
        query: &Query,
    ) -> Result<usize> {
        let rows = self.store.select(table, query).await?;
        let mut removed = 0;
        for id in row_ids(&rows) {
            if tx.delete(table, &id).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub async fn list_members(&self, ctx: &TenantContext) -> Result<Vec<AgencyMember>> {
        let query = Query::new()
            .eq("agency_id", ctx.agency_id())
            .order_by("created_at", true);
        self.store.select_as(tables::MEMBERS, &query).await
    }

    pub async fn add_member(&self, ctx: &TenantContext, req: MemberAdd) -> Result<AgencyMember> {
        ctx.require_manage_members()?;
        if req.role == MemberRole::Owner {
            ctx.require_owner()?;
        }
        let user_id = required_text("User id", &req.user_id, 128)?;

        if self.membership(ctx.agency_id(), &user_id).await?.is_some() {
            return Err(AgencyError::Conflict(format!(
                "User {} is already a member",
                user_id
            )));
        }
        self.subscriptions
            .ensure_within(&ctx.agency, LimitedResource::Members)
            .await?;

        let mut member = AgencyMember::new(ctx.agency_id(), &user_id, req.role);
        member.invited_email = super::clean(req.invited_email);
        let member: AgencyMember = self.store.insert_as(tables::MEMBERS, &member).await?;

        self.audit
            .record(
                ctx.agency_id(),
                Some(ctx.user_id()),
                AuditAction::MemberAdded,
                "member",
                Some(&member.id),
                json!({ "user_id": member.user_id, "role": member.role }),
            )
            .await;
        Ok(member)
    }

    async fn load_member(&self, ctx: &TenantContext, member_id: &str) -> Result<AgencyMember> {
        let member: AgencyMember = self
            .store
            .get_as(tables::MEMBERS, member_id)
            .await?
            .filter(|m: &AgencyMember| m.agency_id == ctx.agency_id())
            .ok_or_else(|| AgencyError::not_found("Member", member_id))?;
        Ok(member)
    }

    async fn owner_count(&self, agency_id: &str) -> Result<u64> {
        let query = Query::new()
            .eq("agency_id", agency_id)
            .eq("role", MemberRole::Owner.to_string());
        self.store.count(tables::MEMBERS, &query).await
    }

    pub async fn update_member(
        &self,
        ctx: &TenantContext,
        member_id: &str,
        req: MemberUpdate,
    ) -> Result<AgencyMember> {
        ctx.require_manage_members()?;
        let member = self.load_member(ctx, member_id).await?;

        if member.role == req.role {
            return Ok(member);
        }
        if member.role == MemberRole::Owner || req.role == MemberRole::Owner {
            ctx.require_owner()?;
        }
        if member.role == MemberRole::Owner && self.owner_count(ctx.agency_id()).await? <= 1 {
            return Err(AgencyError::Conflict(
                "An agency must keep at least one owner".to_string(),
            ));
        }

        let updated: AgencyMember = self
            .store
            .update_as(tables::MEMBERS, member_id, &json!({ "role": req.role }))
            .await?
            .ok_or_else(|| AgencyError::not_found("Member", member_id))?;

        self.audit
            .record(
                ctx.agency_id(),
                Some(ctx.user_id()),
                AuditAction::RoleChanged,
                "member",
                Some(member_id),
                json!({ "from": member.role, "to": updated.role }),
            )
            .await;
        Ok(updated)
    }

    /// Admins remove others; anyone may leave
    pub async fn remove_member(&self, ctx: &TenantContext, member_id: &str) -> Result<()> {
        let member = self.load_member(ctx, member_id).await?;
        if member.user_id != ctx.user_id() {
            ctx.require_manage_members()?;
            if member.role == MemberRole::Owner {
                ctx.require_owner()?;
            }
        }
        if member.role == MemberRole::Owner && self.owner_count(ctx.agency_id()).await? <= 1 {
            return Err(AgencyError::Conflict(
                "The last owner cannot leave the agency".to_string(),
            ));
        }

        self.store.delete(tables::MEMBERS, member_id).await?;
        self.audit
            .record(
                ctx.agency_id(),
                Some(ctx.user_id()),
                AuditAction::MemberRemoved,
                "member",
                Some(member_id),
                json!({ "user_id": member.user_id }),
            )
            .await;
        Ok(())
    }

    /// Downgrades are refused while usage exceeds the new tier's caps
    pub async fn change_tier(&self, ctx: &TenantContext, req: TierChange) -> Result<Agency> {
        ctx.require_owner()?;
        let previous = ctx.agency.subscription_tier;
        if previous == req.tier {
            return Ok(ctx.agency.clone());
        }

        let limits = req.tier.limits();
        for resource in [
            LimitedResource::Forms,
            LimitedResource::Members,
            LimitedResource::Contacts,
        ] {
            let Some(limit) = resource.limit(&limits) else {
                continue;
            };
            let used = self
                .subscriptions
                .current_usage(ctx.agency_id(), resource)
                .await?;
            if used > limit {
                return Err(AgencyError::Validation(format!(
                    "the {} plan allows {} {} but the agency has {}",
                    req.tier, limit, resource, used
                )));
            }
        }

        let patch = json!({ "subscription_tier": req.tier, "updated_at": Utc::now() });
        let agency: Agency = self
            .store
            .update_as(tables::AGENCIES, ctx.agency_id(), &patch)
            .await?
            .ok_or_else(|| AgencyError::not_found("Agency", ctx.agency_id()))?;

        info!(
            "Agency {} moved from {} to {} plan",
            agency.id, previous, agency.subscription_tier
        );
        self.audit
            .record(
                &agency.id,
                Some(ctx.user_id()),
                AuditAction::TierChanged,
                "agency",
                Some(&agency.id),
                json!({ "from": previous, "to": agency.subscription_tier }),
            )
            .await;
        Ok(agency)
    }
}

fn row_ids(rows: &[Value]) -> Vec<String> {
    rows.iter()
        .filter_map(|row| row.get("id").and_then(Value::as_str))
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::testing::{store, tenant, FailingDeletes};
    use agency_types::SubscriptionTier;

    async fn service() -> (AgencyService, Arc<dyn Store>) {
        let store = store().await;
        let audit = Arc::new(AuditLogger::new(store.clone()));
        let subscriptions = Arc::new(SubscriptionService::new(store.clone()));
        (AgencyService::new(store.clone(), audit, subscriptions), store)
    }

    fn user(id: &str) -> AuthUser {
        AuthUser {
            user_id: id.to_string(),
            email: None,
            role: None,
        }
    }

    #[tokio::test]
    async fn test_create_makes_caller_owner() {
        let (agencies, _) = service().await;
        let agency = agencies
            .create(&user("u1"), AgencyCreate { name: " Acme ".to_string() })
            .await
            .unwrap();
        assert_eq!(agency.name, "Acme");

        let ctx = agencies.resolve_tenant(user("u1"), None).await.unwrap();
        assert_eq!(ctx.agency.id, agency.id);
        assert_eq!(ctx.role, MemberRole::Owner);

        let listed = agencies.list_for_user("u1").await.unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn test_resolve_tenant_rejects_strangers() {
        let (agencies, _) = service().await;
        let agency = agencies
            .create(&user("u1"), AgencyCreate { name: "Acme".to_string() })
            .await
            .unwrap();

        let err = agencies
            .resolve_tenant(user("u2"), Some(&agency.id))
            .await
            .unwrap_err();
        assert!(matches!(err, AgencyError::Forbidden(_)));

        let err = agencies.resolve_tenant(user("u2"), None).await.unwrap_err();
        assert!(matches!(err, AgencyError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_member_limit_and_last_owner() {
        let (agencies, _) = service().await;
        let agency = agencies
            .create(&user("u1"), AgencyCreate { name: "Acme".to_string() })
            .await
            .unwrap();
        let ctx = tenant(&agency, "u1", MemberRole::Owner);

        // Free plan: the owner already fills the only seat
        let err = agencies
            .add_member(
                &ctx,
                MemberAdd {
                    user_id: "u2".to_string(),
                    role: MemberRole::Member,
                    invited_email: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AgencyError::LimitExceeded(_)));

        let owner = agencies.list_members(&ctx).await.unwrap().remove(0);
        let err = agencies.remove_member(&ctx, &owner.id).await.unwrap_err();
        assert!(matches!(err, AgencyError::Conflict(_)));
        let err = agencies
            .update_member(&ctx, &owner.id, MemberUpdate { role: MemberRole::Admin })
            .await
            .unwrap_err();
        assert!(matches!(err, AgencyError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_tier_change_allows_more_members() {
        let (agencies, _) = service().await;
        let agency = agencies
            .create(&user("u1"), AgencyCreate { name: "Acme".to_string() })
            .await
            .unwrap();
        let ctx = tenant(&agency, "u1", MemberRole::Owner);

        let upgraded = agencies
            .change_tier(&ctx, TierChange { tier: SubscriptionTier::Starter })
            .await
            .unwrap();
        assert_eq!(upgraded.subscription_tier, SubscriptionTier::Starter);

        let ctx = tenant(&upgraded, "u1", MemberRole::Owner);
        let member = agencies
            .add_member(
                &ctx,
                MemberAdd {
                    user_id: "u2".to_string(),
                    role: MemberRole::Viewer,
                    invited_email: Some("bob@example.com".to_string()),
                },
            )
            .await
            .unwrap();
        assert_eq!(member.role, MemberRole::Viewer);

        let err = agencies
            .add_member(
                &ctx,
                MemberAdd {
                    user_id: "u2".to_string(),
                    role: MemberRole::Viewer,
                    invited_email: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AgencyError::Conflict(_)));

        // Two members no longer fit the free plan
        let err = agencies
            .change_tier(&ctx, TierChange { tier: SubscriptionTier::Free })
            .await
            .unwrap_err();
        assert!(matches!(err, AgencyError::Validation(_)));

        let viewer = tenant(&upgraded, "u2", MemberRole::Viewer);
        assert!(agencies
            .change_tier(&viewer, TierChange { tier: SubscriptionTier::Enterprise })
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_delete_cascades() {
        let (agencies, store) = service().await;
        let agency = agencies
            .create(&user("u1"), AgencyCreate { name: "Acme".to_string() })
            .await
            .unwrap();
        let form = store
            .insert(tables::FORMS, json!({ "agency_id": agency.id }))
            .await
            .unwrap();
        store
            .insert(tables::QUESTIONS, json!({ "form_id": form["id"] }))
            .await
            .unwrap();

        let ctx = tenant(&agency, "u1", MemberRole::Owner);
        agencies.delete(&ctx).await.unwrap();

        assert!(agencies.list_for_user("u1").await.unwrap().is_empty());
        assert_eq!(store.count(tables::QUESTIONS, &Query::new()).await.unwrap(), 0);
        assert_eq!(store.count(tables::MEMBERS, &Query::new()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failed_delete_restores_everything() {
        let inner = store().await;
        let failing: Arc<dyn Store> = Arc::new(FailingDeletes {
            inner: inner.clone(),
            table: tables::LEADS,
        });
        let audit = Arc::new(AuditLogger::new(failing.clone()));
        let subscriptions = Arc::new(SubscriptionService::new(failing.clone()));
        let agencies = AgencyService::new(failing, audit, subscriptions);

        let agency = agencies
            .create(&user("u1"), AgencyCreate { name: "Acme".to_string() })
            .await
            .unwrap();
        inner
            .insert(tables::FORMS, json!({ "agency_id": agency.id }))
            .await
            .unwrap();
        inner
            .insert(tables::LEADS, json!({ "agency_id": agency.id }))
            .await
            .unwrap();

        let ctx = tenant(&agency, "u1", MemberRole::Owner);
        assert!(agencies.delete(&ctx).await.is_err());

        assert!(inner.get(tables::AGENCIES, &agency.id).await.unwrap().is_some());
        let scoped = Query::new().eq("agency_id", agency.id.as_str());
        assert_eq!(inner.count(tables::FORMS, &scoped).await.unwrap(), 1);
        assert_eq!(inner.count(tables::LEADS, &scoped).await.unwrap(), 1);
        assert_eq!(inner.count(tables::MEMBERS, &scoped).await.unwrap(), 1);

        // The owner can still reach the agency
        let resolved = agencies.resolve_tenant(user("u1"), None).await.unwrap();
        assert_eq!(resolved.agency.id, agency.id);
    }
}
