//! Contact handlers

use super::{created, invalidate, ok, ApiResult, Created, Deleted};
use crate::services::{agency_prefix, TenantContext};
use crate::AppState;
use agency_types::{Contact, ContactInput, Pagination};
use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
pub struct ContactListParams {
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub offset: Option<u32>,
}

pub async fn list(
    State(state): State<AppState>,
    ctx: TenantContext,
    Query(params): Query<ContactListParams>,
) -> ApiResult<Vec<Contact>> {
    let page = Pagination {
        limit: params.limit,
        offset: params.offset,
    };
    let search = params.search;
    let key = format!(
        "{}contacts:{}:{}:{}",
        agency_prefix(ctx.agency_id()),
        search.as_deref().unwrap_or_default(),
        page.limit(),
        page.offset()
    );
    let contacts = state.contacts.clone();
    let data = state
        .dedup
        .run(&key, move || async move {
            contacts.list(&ctx, search.as_deref(), &page).await
        })
        .await?;
    ok(data)
}

pub async fn create(
    State(state): State<AppState>,
    ctx: TenantContext,
    Json(req): Json<ContactInput>,
) -> Created<Contact> {
    let contact = state.contacts.create(&ctx, req).await?;
    invalidate(&state, ctx.agency_id());
    created(contact)
}

pub async fn get(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<String>,
) -> ApiResult<Contact> {
    ok(state.contacts.get(&ctx, &id).await?)
}

pub async fn update(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<String>,
    Json(req): Json<ContactInput>,
) -> ApiResult<Contact> {
    let contact = state.contacts.update(&ctx, &id, req).await?;
    invalidate(&state, ctx.agency_id());
    ok(contact)
}

pub async fn delete(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<String>,
) -> ApiResult<Deleted> {
    state.contacts.delete(&ctx, &id).await?;
    invalidate(&state, ctx.agency_id());
    ok(Deleted::new(id))
}
