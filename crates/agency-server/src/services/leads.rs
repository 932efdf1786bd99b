//! Leads produced by form submissions

use super::{clean, AuditLogger, TenantContext};
use agency_core::ports::{tables, Query};
use agency_core::{AgencyError, Result, Store, StoreExt, Transaction};
use agency_types::{AuditAction, Lead, LeadFilter, LeadStats, LeadUpdate, Pagination};
use chrono::Utc;
use serde_json::{json, Map, Value};
use std::sync::Arc;

pub struct LeadService {
    store: Arc<dyn Store>,
    audit: Arc<AuditLogger>,
}

impl LeadService {
    pub fn new(store: Arc<dyn Store>, audit: Arc<AuditLogger>) -> Self {
        Self { store, audit }
    }

    /// Highest score first
    pub async fn list(&self, ctx: &TenantContext, filter: &LeadFilter) -> Result<Vec<Lead>> {
        let mut query = Query::new().eq("agency_id", ctx.agency_id());
        if let Some(status) = filter.status {
            query = query.eq("status", status.to_string());
        }
        if let Some(qualification) = filter.qualification {
            query = query.eq("qualification", qualification.to_string());
        }
        if let Some(min_score) = filter.min_score {
            query = query.gte("score", min_score);
        }
        if let Some(term) = filter.search.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            let column = if term.contains('@') { "email" } else { "name" };
            query = query.ilike(column, term);
        }

        let page = Pagination {
            limit: filter.limit,
            offset: filter.offset,
        };
        let query = query
            .order_by("score", false)
            .limit(page.limit())
            .offset(page.offset());
        self.store.select_as(tables::LEADS, &query).await
    }

    pub async fn get(&self, ctx: &TenantContext, id: &str) -> Result<Lead> {
        self.store
            .get_as::<Lead>(tables::LEADS, id)
            .await?
            .filter(|lead| lead.agency_id == ctx.agency_id())
            .ok_or_else(|| AgencyError::not_found("Lead", id))
    }

    pub async fn update(&self, ctx: &TenantContext, id: &str, req: LeadUpdate) -> Result<Lead> {
        ctx.require_edit()?;
        let current = self.get(ctx, id).await?;

        let mut patch = Map::new();
        if let Some(status) = req.status {
            patch.insert("status".to_string(), serde_json::to_value(status)?);
        }
        for (key, value) in [("notes", req.notes), ("name", req.name), ("phone", req.phone)] {
            if value.is_some() {
                patch.insert(key.to_string(), serde_json::to_value(clean(value))?);
            }
        }
        if patch.is_empty() {
            return Ok(current);
        }
        let changed: Vec<String> = patch.keys().cloned().collect();
        patch.insert("updated_at".to_string(), serde_json::to_value(Utc::now())?);

        let lead: Lead = self
            .store
            .update_as(tables::LEADS, id, &Value::Object(patch))
            .await?
            .ok_or_else(|| AgencyError::not_found("Lead", id))?;

        self.audit
            .record(
                ctx.agency_id(),
                Some(ctx.user_id()),
                AuditAction::Updated,
                "lead",
                Some(id),
                json!({ "fields": changed, "status": lead.status }),
            )
            .await;
        Ok(lead)
    }

    /// Delete the lead and unlink it from its response
    pub async fn delete(&self, ctx: &TenantContext, id: &str) -> Result<()> {
        ctx.require_edit()?;
        let lead = self.get(ctx, id).await?;

        let mut tx = Transaction::begin(self.store.clone(), "delete_lead");
        let result: Result<()> = async {
            if let Some(response_id) = &lead.response_id {
                tx.update(tables::RESPONSES, response_id, json!({ "lead_id": null }))
                    .await?;
            }
            tx.delete(tables::LEADS, id).await?;
            Ok(())
        }
        .await;
        tx.finish(result).await?;

        self.audit
            .record(
                ctx.agency_id(),
                Some(ctx.user_id()),
                AuditAction::Deleted,
                "lead",
                Some(id),
                json!({ "email": lead.email }),
            )
            .await;
        Ok(())
    }

    pub async fn stats(&self, ctx: &TenantContext) -> Result<LeadStats> {
        let query = Query::new().eq("agency_id", ctx.agency_id());
        let leads: Vec<Lead> = self.store.select_as(tables::LEADS, &query).await?;
        Ok(summarize(&leads))
    }
}

fn summarize(leads: &[Lead]) -> LeadStats {
    let mut stats = LeadStats {
        total: leads.len() as u64,
        ..Default::default()
    };
    let mut score_sum = 0u64;
    for lead in leads {
        *stats.by_status.entry(lead.status.to_string()).or_default() += 1;
        *stats
            .by_qualification
            .entry(lead.qualification.to_string())
            .or_default() += 1;
        score_sum += u64::from(lead.score);
    }
    if !leads.is_empty() {
        stats.average_score = Some(score_sum as f64 / leads.len() as f64);
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::testing::{store, tenant};
    use agency_types::{Agency, LeadQualification, LeadStatus, MemberRole};

    fn lead(agency_id: &str, name: &str, score: u32, qualification: LeadQualification) -> Lead {
        let now = Utc::now();
        Lead {
            id: agency_types::new_id(),
            agency_id: agency_id.to_string(),
            form_id: None,
            response_id: None,
            name: Some(name.to_string()),
            email: Some(format!("{}@example.com", name.to_lowercase())),
            phone: None,
            score,
            qualification,
            status: LeadStatus::New,
            source: "form".to_string(),
            notes: None,
            created_at: now,
            updated_at: now,
        }
    }

    async fn seeded() -> (LeadService, Arc<dyn Store>, Agency) {
        let store = store().await;
        let agency = Agency::new("Acme", "u1");
        for (name, score, q) in [
            ("Ann", 85, LeadQualification::Hot),
            ("Bob", 50, LeadQualification::Warm),
            ("Cid", 10, LeadQualification::Cold),
        ] {
            store
                .insert_as(tables::LEADS, &lead(&agency.id, name, score, q))
                .await
                .unwrap();
        }
        store
            .insert_as(tables::LEADS, &lead("elsewhere", "Dee", 99, LeadQualification::Hot))
            .await
            .unwrap();
        let audit = Arc::new(AuditLogger::new(store.clone()));
        (LeadService::new(store.clone(), audit), store, agency)
    }

    #[tokio::test]
    async fn test_list_filters_and_orders() {
        let (leads, _, agency) = seeded().await;
        let ctx = tenant(&agency, "u1", MemberRole::Viewer);

        let all = leads.list(&ctx, &LeadFilter::default()).await.unwrap();
        let names: Vec<_> = all.iter().filter_map(|l| l.name.as_deref()).collect();
        assert_eq!(names, vec!["Ann", "Bob", "Cid"]);

        let warm_up = leads
            .list(
                &ctx,
                &LeadFilter {
                    min_score: Some(40),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(warm_up.len(), 2);

        let hot = leads
            .list(
                &ctx,
                &LeadFilter {
                    qualification: Some(LeadQualification::Hot),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(hot.len(), 1);

        let by_email = leads
            .list(
                &ctx,
                &LeadFilter {
                    search: Some("bob@".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(by_email[0].name.as_deref(), Some("Bob"));
    }

    #[tokio::test]
    async fn test_update_and_stats() {
        let (leads, _, agency) = seeded().await;
        let ctx = tenant(&agency, "u1", MemberRole::Member);
        let ann = leads
            .list(&ctx, &LeadFilter::default())
            .await
            .unwrap()
            .remove(0);

        let updated = leads
            .update(
                &ctx,
                &ann.id,
                LeadUpdate {
                    status: Some(LeadStatus::Contacted),
                    notes: Some("Called on Monday".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.status, LeadStatus::Contacted);

        let stats = leads.stats(&ctx).await.unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.by_status.get("contacted"), Some(&1));
        assert_eq!(stats.by_status.get("new"), Some(&2));
        assert_eq!(stats.by_qualification.get("hot"), Some(&1));
        let average = stats.average_score.unwrap();
        assert!((average - 145.0 / 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_other_agency_leads_are_hidden() {
        let (leads, store, agency) = seeded().await;
        let ctx = tenant(&agency, "u1", MemberRole::Owner);
        let foreign: Lead = store
            .first_as(tables::LEADS, &Query::new().eq("agency_id", "elsewhere"))
            .await
            .unwrap()
            .unwrap();

        assert!(matches!(
            leads.get(&ctx, &foreign.id).await,
            Err(AgencyError::NotFound(_))
        ));
        assert!(leads.delete(&ctx, &foreign.id).await.is_err());
    }

    #[tokio::test]
    async fn test_delete_unlinks_response() {
        let (leads, store, agency) = seeded().await;
        let ctx = tenant(&agency, "u1", MemberRole::Owner);
        let response = store
            .insert(tables::RESPONSES, json!({ "agency_id": agency.id }))
            .await
            .unwrap();
        let response_id = response["id"].as_str().unwrap().to_string();

        let mut linked = lead(&agency.id, "Eve", 60, LeadQualification::Warm);
        linked.response_id = Some(response_id.clone());
        let linked: Lead = store.insert_as(tables::LEADS, &linked).await.unwrap();
        store
            .update(tables::RESPONSES, &response_id, json!({ "lead_id": linked.id }))
            .await
            .unwrap();

        leads.delete(&ctx, &linked.id).await.unwrap();
        let response = store.get(tables::RESPONSES, &response_id).await.unwrap().unwrap();
        assert!(response["lead_id"].is_null());
        assert!(store.get(tables::LEADS, &linked.id).await.unwrap().is_none());
    }
}
