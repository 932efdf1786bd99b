//! Personal todo handlers
//!
//! Todos belong to the caller inside the selected agency, so cache keys carry
//! the user id as well.

use super::{created, invalidate, ok, ApiResult, Created, Deleted};
use crate::services::{agency_prefix, TenantContext};
use crate::AppState;
use agency_types::{Todo, TodoCreate, TodoUpdate};
use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
pub struct TodoListParams {
    #[serde(default)]
    pub completed: Option<bool>,
}

pub async fn list(
    State(state): State<AppState>,
    ctx: TenantContext,
    Query(params): Query<TodoListParams>,
) -> ApiResult<Vec<Todo>> {
    let completed = params.completed;
    let key = format!(
        "{}todos:{}:{:?}",
        agency_prefix(ctx.agency_id()),
        ctx.user_id(),
        completed
    );
    let todos = state.todos.clone();
    let data = state
        .dedup
        .run(&key, move || async move { todos.list(&ctx, completed).await })
        .await?;
    ok(data)
}

pub async fn create(
    State(state): State<AppState>,
    ctx: TenantContext,
    Json(req): Json<TodoCreate>,
) -> Created<Todo> {
    let todo = state.todos.create(&ctx, req).await?;
    invalidate(&state, ctx.agency_id());
    created(todo)
}

pub async fn update(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<String>,
    Json(req): Json<TodoUpdate>,
) -> ApiResult<Todo> {
    let todo = state.todos.update(&ctx, &id, req).await?;
    invalidate(&state, ctx.agency_id());
    ok(todo)
}

pub async fn delete(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<String>,
) -> ApiResult<Deleted> {
    state.todos.delete(&ctx, &id).await?;
    invalidate(&state, ctx.agency_id());
    ok(Deleted::new(id))
}
