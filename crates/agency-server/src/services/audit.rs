//! Audit trail of changes inside an agency

use agency_core::ports::{tables, Query};
use agency_core::{Result, Store, StoreExt};
use agency_types::{new_id, AuditAction, AuditLog, Pagination};
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

pub struct AuditLogger {
    store: Arc<dyn Store>,
}

impl AuditLogger {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Best effort: a failed audit write is logged, never surfaced
    pub async fn record(
        &self,
        agency_id: &str,
        user_id: Option<&str>,
        action: AuditAction,
        entity_type: &str,
        entity_id: Option<&str>,
        details: Value,
    ) {
        let entry = AuditLog {
            id: new_id(),
            agency_id: agency_id.to_string(),
            user_id: user_id.map(String::from),
            action,
            entity_type: entity_type.to_string(),
            entity_id: entity_id.map(String::from),
            details,
            created_at: Utc::now(),
        };

        if let Err(e) = self.store.insert_as(tables::AUDIT_LOGS, &entry).await {
            warn!(
                "Failed to write audit log ({:?} {} in agency {}): {}",
                action, entity_type, agency_id, e
            );
        }
    }

    /// Newest first
    pub async fn list(&self, agency_id: &str, page: &Pagination) -> Result<Vec<AuditLog>> {
        let query = Query::new()
            .eq("agency_id", agency_id)
            .order_by("created_at", false)
            .limit(page.limit())
            .offset(page.offset());
        self.store.select_as(tables::AUDIT_LOGS, &query).await
    }
}
