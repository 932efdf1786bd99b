//! Unauthenticated endpoints used by respondents filling in a published form

use super::{created, invalidate, ok, ApiResult, Created};
use crate::AppState;
use agency_types::{
    FormWithQuestions, NextStep, NextStepRequest, ResponseSubmission, SubmissionReceipt,
};
use axum::{
    extract::{Path, State},
    Json,
};
use tracing::info;

pub async fn get_form(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> ApiResult<FormWithQuestions> {
    ok(state.forms.get_public(&slug).await?)
}

pub async fn next_step(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Json(req): Json<NextStepRequest>,
) -> ApiResult<NextStep> {
    ok(state.forms.next_step(&slug, req).await?)
}

pub async fn submit(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Json(req): Json<ResponseSubmission>,
) -> Created<SubmissionReceipt> {
    let submitted = state.forms.submit(&slug, req).await?;
    info!(
        "Response {} stored for form '{}'",
        submitted.receipt.response_id, slug
    );
    invalidate(&state, &submitted.agency_id);
    created(submitted.receipt)
}
