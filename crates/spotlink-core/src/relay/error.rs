use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};

/// Error type for relay handlers
#[derive(Debug)]
pub enum RelayError {
    /// The token endpoint refused the grant (its own 4xx status) or could
    /// not be reached (502/504)
    Upstream {
        status: StatusCode,
        error: &'static str,
        details: Value,
    },
    GenerationTimeout,
    MlUnavailable,
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            RelayError::Upstream {
                status,
                error,
                details,
            } => {
                tracing::warn!(target: "relay::error", status = status.as_u16(), error, details = %details, "Token grant failed");
                (status, json!({ "error": error, "details": details }))
            }
            RelayError::GenerationTimeout => {
                tracing::warn!(target: "relay::error", status = 408, "Music generation timed out");
                (
                    StatusCode::REQUEST_TIMEOUT,
                    json!({ "error": "Music generation timed out" }),
                )
            }
            RelayError::MlUnavailable => {
                tracing::error!(target: "relay::error", status = 500, "ML service unavailable");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "ML service unavailable" }),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}
