//! Agency, membership and subscription handlers
//!
//! `/agencies/:id/...` routes name the agency in the path; the caller must be
//! a member of it. `/subscription` uses the agency selected by the request.

use super::{created, invalidate, ok, ApiResult, Created, Deleted};
use crate::services::{AuthUser, TenantContext};
use crate::AppState;
use agency_types::{
    Agency, AgencyCreate, AgencyMember, AgencyUpdate, MemberAdd, MemberUpdate, SubscriptionStatus,
    TierChange,
};
use axum::{
    extract::{Path, State},
    Json,
};

pub async fn list(State(state): State<AppState>, user: AuthUser) -> ApiResult<Vec<Agency>> {
    ok(state.agencies.list_for_user(&user.user_id).await?)
}

pub async fn create(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<AgencyCreate>,
) -> Created<Agency> {
    created(state.agencies.create(&user, req).await?)
}

pub async fn get(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Agency> {
    let ctx = state.agencies.tenant_for(user, &id).await?;
    ok(ctx.agency)
}

pub async fn update(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    Json(req): Json<AgencyUpdate>,
) -> ApiResult<Agency> {
    let ctx = state.agencies.tenant_for(user, &id).await?;
    let agency = state.agencies.rename(&ctx, req).await?;
    invalidate(&state, &id);
    ok(agency)
}

pub async fn delete(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Deleted> {
    let ctx = state.agencies.tenant_for(user, &id).await?;
    state.agencies.delete(&ctx).await?;
    invalidate(&state, &id);
    ok(Deleted::new(id))
}

pub async fn list_members(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Vec<AgencyMember>> {
    let ctx = state.agencies.tenant_for(user, &id).await?;
    ok(state.agencies.list_members(&ctx).await?)
}

pub async fn add_member(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    Json(req): Json<MemberAdd>,
) -> Created<AgencyMember> {
    let ctx = state.agencies.tenant_for(user, &id).await?;
    let member = state.agencies.add_member(&ctx, req).await?;
    invalidate(&state, &id);
    created(member)
}

pub async fn update_member(
    State(state): State<AppState>,
    user: AuthUser,
    Path((id, member_id)): Path<(String, String)>,
    Json(req): Json<MemberUpdate>,
) -> ApiResult<AgencyMember> {
    let ctx = state.agencies.tenant_for(user, &id).await?;
    let member = state.agencies.update_member(&ctx, &member_id, req).await?;
    invalidate(&state, &id);
    ok(member)
}

pub async fn remove_member(
    State(state): State<AppState>,
    user: AuthUser,
    Path((id, member_id)): Path<(String, String)>,
) -> ApiResult<Deleted> {
    let ctx = state.agencies.tenant_for(user, &id).await?;
    state.agencies.remove_member(&ctx, &member_id).await?;
    invalidate(&state, &id);
    ok(Deleted::new(member_id))
}

pub async fn change_tier(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    Json(req): Json<TierChange>,
) -> ApiResult<Agency> {
    let ctx = state.agencies.tenant_for(user, &id).await?;
    let agency = state.agencies.change_tier(&ctx, req).await?;
    invalidate(&state, &id);
    ok(agency)
}

pub async fn subscription(
    State(state): State<AppState>,
    ctx: TenantContext,
) -> ApiResult<SubscriptionStatus> {
    ok(state.subscriptions.status(&ctx.agency).await?)
}
