//! User preference handlers
//!
//! Preferences follow the user across agencies, so only a token is required.

use super::{ok, ApiResult};
use crate::services::AuthUser;
use crate::AppState;
use agency_types::{PreferencesUpdate, UserPreferences};
use axum::{extract::State, Json};

pub async fn get(State(state): State<AppState>, user: AuthUser) -> ApiResult<UserPreferences> {
    ok(state.settings.get(&user.user_id).await?)
}

pub async fn update(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<PreferencesUpdate>,
) -> ApiResult<UserPreferences> {
    ok(state.settings.update(&user.user_id, req).await?)
}

pub async fn reset(State(state): State<AppState>, user: AuthUser) -> ApiResult<UserPreferences> {
    ok(state.settings.reset(&user.user_id).await?)
}
