//! First sign-in handler

use super::{invalidate, ok, ApiResult};
use crate::services::AuthUser;
use crate::AppState;
use agency_types::BootstrapPayload;
use axum::extract::State;

pub async fn bootstrap(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<BootstrapPayload> {
    let payload = state.bootstrap.bootstrap(&user).await?;
    if payload.created {
        invalidate(&state, &payload.agency.id);
    }
    ok(payload)
}
