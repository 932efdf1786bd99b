//! HTTP handlers

pub mod agencies;
pub mod audit;
pub mod bootstrap;
pub mod contacts;
pub mod forms;
pub mod health;
pub mod leads;
pub mod public;
pub mod settings;
pub mod todos;

pub use health::health;

use crate::error::ApiError;
use crate::services::agency_prefix;
use crate::AppState;
use agency_types::{ApiResponse, Pagination};
use axum::{http::StatusCode, Json};
use serde::Deserialize;

pub type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;
pub type Created<T> = Result<(StatusCode, Json<ApiResponse<T>>), ApiError>;

pub fn ok<T>(data: T) -> ApiResult<T> {
    Ok(Json(ApiResponse::ok(data)))
}

pub fn created<T>(data: T) -> Created<T> {
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(data))))
}

/// Body of delete responses
#[derive(Debug, serde::Serialize)]
pub struct Deleted {
    pub id: String,
    pub deleted: bool,
}

impl Deleted {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            deleted: true,
        }
    }
}

/// `?limit=&offset=`
#[derive(Debug, Default, Deserialize)]
pub struct PageParams {
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub offset: Option<u32>,
}

impl PageParams {
    pub fn page(&self) -> Pagination {
        Pagination {
            limit: self.limit,
            offset: self.offset,
        }
    }

    fn key(&self) -> String {
        let page = self.page();
        format!("{}:{}", page.limit(), page.offset())
    }
}

/// Drop cached reads after a write to `agency_id`
pub(crate) fn invalidate(state: &AppState, agency_id: &str) {
    state.dedup.invalidate_prefix(&agency_prefix(agency_id));
}
