//! HTTP error mapping

use agency_core::AgencyError;
use agency_types::ApiErrorBody;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

/// Error returned by handlers; rendered as `{success: false, error, code}`
#[derive(Debug, Error)]
#[error(transparent)]
pub struct ApiError(#[from] pub AgencyError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            AgencyError::NotFound(_) => StatusCode::NOT_FOUND,
            AgencyError::Validation(_) | AgencyError::LogicCycle(_) => StatusCode::BAD_REQUEST,
            AgencyError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AgencyError::Forbidden(_) => StatusCode::FORBIDDEN,
            AgencyError::Conflict(_) => StatusCode::CONFLICT,
            AgencyError::LimitExceeded(_) => StatusCode::PAYMENT_REQUIRED,
            AgencyError::Upstream { .. } => StatusCode::BAD_GATEWAY,
            AgencyError::Storage(_)
            | AgencyError::Serialization(_)
            | AgencyError::Transaction { .. }
            | AgencyError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self.0);
        } else {
            tracing::debug!("Request rejected ({}): {}", status, self.0);
        }

        let body = Json(ApiErrorBody {
            success: false,
            error: self.0.to_string(),
            code: self.0.code().to_string(),
        });
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (AgencyError::not_found("Form", "f1"), StatusCode::NOT_FOUND),
            (AgencyError::LogicCycle("q1".into()), StatusCode::BAD_REQUEST),
            (AgencyError::LimitExceeded("forms".into()), StatusCode::PAYMENT_REQUIRED),
            (
                AgencyError::Upstream {
                    status: 503,
                    message: "down".into(),
                },
                StatusCode::BAD_GATEWAY,
            ),
            (
                AgencyError::Transaction {
                    step: "submit".into(),
                    message: "x".into(),
                },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
    }

    #[tokio::test]
    async fn test_error_envelope() {
        let response = ApiError(AgencyError::Forbidden("viewer".into())).into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["success"], false);
        assert_eq!(body["code"], "forbidden");
        assert_eq!(body["error"], "Forbidden: viewer");
    }
}
