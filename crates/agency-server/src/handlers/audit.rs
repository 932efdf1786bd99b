//! Audit log handler

use super::{ok, ApiResult, PageParams};
use crate::services::TenantContext;
use crate::AppState;
use agency_types::AuditLog;
use axum::extract::{Query, State};

/// Owners and admins only
pub async fn list(
    State(state): State<AppState>,
    ctx: TenantContext,
    Query(params): Query<PageParams>,
) -> ApiResult<Vec<AuditLog>> {
    ctx.require_manage_members()?;
    ok(state.audit.list(ctx.agency_id(), &params.page()).await?)
}
