//! Error rendering at the HTTP boundary.
//!
//! Handlers return [`ApiError`], which renders the production shape and
//! attaches an [`ErrorReport`] to the response. In development the
//! [`render_errors`] middleware swaps the body for a verbose one built from
//! that report.

use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use previewd_common::PreviewError;
use serde_json::json;
use tracing::{error, warn};

use crate::config::Environment;

const GENERIC_MESSAGE: &str = "Something went wrong";

pub struct ApiError(pub PreviewError);

impl From<PreviewError> for ApiError {
    fn from(err: PreviewError) -> Self {
        Self(err)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self(PreviewError::Internal(err))
    }
}

/// What went wrong, kept on the response for the rendering middleware.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub status: StatusCode,
    pub message: String,
    pub detail: String,
}

fn production_body(status: StatusCode, message: &str) -> serde_json::Value {
    let message = if status.is_server_error() {
        GENERIC_MESSAGE
    } else {
        message
    };
    json!({"errors": {"message": message, "error": {}}})
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let message = self.0.to_string();
        let detail = match &self.0 {
            PreviewError::Internal(source) => format!("{:#}", source),
            other => other.to_string(),
        };

        if self.0.is_internal() {
            error!(status = status.as_u16(), error = %detail, "request failed");
        } else if status.is_server_error() {
            warn!(status = status.as_u16(), error = %detail, "request failed");
        }

        let mut response = (status, Json(production_body(status, &message))).into_response();
        response.extensions_mut().insert(ErrorReport {
            status,
            message,
            detail,
        });
        response
    }
}

/// Re-render error responses for the configured environment.
pub async fn render_errors(State(environment): State<Environment>, response: Response) -> Response {
    if environment == Environment::Production {
        return response;
    }
    let Some(report) = response.extensions().get::<ErrorReport>().cloned() else {
        return response;
    };
    (
        report.status,
        Json(json!({
            "message": report.message,
            "status": report.status.as_u16(),
            "detail": report.detail,
        })),
    )
        .into_response()
}
