//! Form builder handlers

use super::{created, invalidate, ok, ApiResult, Created, Deleted, PageParams};
use crate::services::{agency_prefix, TenantContext};
use crate::AppState;
use agency_types::{
    Form, FormAnalytics, FormCreate, FormResponse, FormStatus, FormUpdate, FormWithQuestions,
    Pagination, Question, QuestionCreate, QuestionOrder, QuestionUpdate,
};
use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;

/// `?status=&limit=&offset=`
#[derive(Debug, Default, Deserialize)]
pub struct FormListParams {
    #[serde(default)]
    pub status: Option<FormStatus>,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub offset: Option<u32>,
}

impl FormListParams {
    fn page(&self) -> Pagination {
        Pagination {
            limit: self.limit,
            offset: self.offset,
        }
    }
}

pub async fn list(
    State(state): State<AppState>,
    ctx: TenantContext,
    Query(params): Query<FormListParams>,
) -> ApiResult<Vec<Form>> {
    let page = params.page();
    let status = params.status;
    let key = format!(
        "{}forms:{}:{}:{}",
        agency_prefix(ctx.agency_id()),
        status.map(|s| s.to_string()).unwrap_or_default(),
        page.limit(),
        page.offset()
    );
    let forms = state.forms.clone();
    let data = state
        .dedup
        .run(&key, move || async move { forms.list(&ctx, status, &page).await })
        .await?;
    ok(data)
}

pub async fn create(
    State(state): State<AppState>,
    ctx: TenantContext,
    Json(req): Json<FormCreate>,
) -> Created<Form> {
    let form = state.forms.create(&ctx, req).await?;
    invalidate(&state, ctx.agency_id());
    created(form)
}

pub async fn get(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<String>,
) -> ApiResult<FormWithQuestions> {
    let key = format!("{}form:{}", agency_prefix(ctx.agency_id()), id);
    let forms = state.forms.clone();
    let data = state
        .dedup
        .run(&key, move || async move { forms.get(&ctx, &id).await })
        .await?;
    ok(data)
}

pub async fn update(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<String>,
    Json(req): Json<FormUpdate>,
) -> ApiResult<Form> {
    let form = state.forms.update(&ctx, &id, req).await?;
    invalidate(&state, ctx.agency_id());
    ok(form)
}

pub async fn delete(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<String>,
) -> ApiResult<Deleted> {
    state.forms.delete(&ctx, &id).await?;
    invalidate(&state, ctx.agency_id());
    ok(Deleted::new(id))
}

pub async fn publish(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<String>,
) -> ApiResult<Form> {
    let form = state.forms.publish(&ctx, &id).await?;
    invalidate(&state, ctx.agency_id());
    ok(form)
}

pub async fn unpublish(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<String>,
) -> ApiResult<Form> {
    let form = state.forms.unpublish(&ctx, &id).await?;
    invalidate(&state, ctx.agency_id());
    ok(form)
}

pub async fn duplicate(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<String>,
) -> Created<FormWithQuestions> {
    let copy = state.forms.duplicate(&ctx, &id).await?;
    invalidate(&state, ctx.agency_id());
    created(copy)
}

pub async fn analytics(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<String>,
) -> ApiResult<FormAnalytics> {
    let key = format!("{}form:{}:analytics", agency_prefix(ctx.agency_id()), id);
    let forms = state.forms.clone();
    let data = state
        .dedup
        .run(&key, move || async move { forms.analytics(&ctx, &id).await })
        .await?;
    ok(data)
}

pub async fn list_questions(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<String>,
) -> ApiResult<Vec<Question>> {
    ok(state.forms.list_questions(&ctx, &id).await?)
}

pub async fn add_question(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<String>,
    Json(req): Json<QuestionCreate>,
) -> Created<Question> {
    let question = state.forms.add_question(&ctx, &id, req).await?;
    invalidate(&state, ctx.agency_id());
    created(question)
}

pub async fn update_question(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path((id, question_id)): Path<(String, String)>,
    Json(req): Json<QuestionUpdate>,
) -> ApiResult<Question> {
    let question = state
        .forms
        .update_question(&ctx, &id, &question_id, req)
        .await?;
    invalidate(&state, ctx.agency_id());
    ok(question)
}

pub async fn delete_question(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path((id, question_id)): Path<(String, String)>,
) -> ApiResult<Deleted> {
    state.forms.delete_question(&ctx, &id, &question_id).await?;
    invalidate(&state, ctx.agency_id());
    ok(Deleted::new(question_id))
}

pub async fn reorder_questions(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<String>,
    Json(req): Json<QuestionOrder>,
) -> ApiResult<Vec<Question>> {
    let questions = state.forms.reorder_questions(&ctx, &id, req).await?;
    invalidate(&state, ctx.agency_id());
    ok(questions)
}

pub async fn list_responses(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<String>,
    Query(params): Query<PageParams>,
) -> ApiResult<Vec<FormResponse>> {
    let key = format!(
        "{}form:{}:responses:{}",
        agency_prefix(ctx.agency_id()),
        id,
        params.key()
    );
    let page = params.page();
    let forms = state.forms.clone();
    let data = state
        .dedup
        .run(&key, move || async move {
            forms.list_responses(&ctx, &id, &page).await
        })
        .await?;
    ok(data)
}
