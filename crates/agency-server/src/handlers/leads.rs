//! Lead handlers

use super::{invalidate, ok, ApiResult, Deleted};
use crate::services::{agency_prefix, TenantContext};
use crate::AppState;
use agency_types::{Lead, LeadFilter, LeadStats, LeadUpdate};
use axum::{
    extract::{Path, Query, State},
    Json,
};

/// `?status=&qualification=&min_score=&search=&limit=&offset=`
pub async fn list(
    State(state): State<AppState>,
    ctx: TenantContext,
    Query(filter): Query<LeadFilter>,
) -> ApiResult<Vec<Lead>> {
    let key = format!("{}leads:{:?}", agency_prefix(ctx.agency_id()), filter);
    let leads = state.leads.clone();
    let data = state
        .dedup
        .run(&key, move || async move { leads.list(&ctx, &filter).await })
        .await?;
    ok(data)
}

pub async fn stats(State(state): State<AppState>, ctx: TenantContext) -> ApiResult<LeadStats> {
    let key = format!("{}leads:stats", agency_prefix(ctx.agency_id()));
    let leads = state.leads.clone();
    let data = state
        .dedup
        .run(&key, move || async move { leads.stats(&ctx).await })
        .await?;
    ok(data)
}

pub async fn get(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<String>,
) -> ApiResult<Lead> {
    ok(state.leads.get(&ctx, &id).await?)
}

pub async fn update(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<String>,
    Json(req): Json<LeadUpdate>,
) -> ApiResult<Lead> {
    let lead = state.leads.update(&ctx, &id, req).await?;
    invalidate(&state, ctx.agency_id());
    ok(lead)
}

pub async fn delete(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<String>,
) -> ApiResult<Deleted> {
    state.leads.delete(&ctx, &id).await?;
    invalidate(&state, ctx.agency_id());
    ok(Deleted::new(id))
}
