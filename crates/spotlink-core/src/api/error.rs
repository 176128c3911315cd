use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Not authenticated - link a Spotify account first")]
    NotAuthenticated,

    #[error("Authorization code rejected (status {status}): {message}")]
    AuthExchange { status: u16, message: String },

    #[error("No refresh token available")]
    NoRefreshToken,

    #[error("Refresh token rejected - reauthorization required: {0}")]
    RefreshRejected(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Network error: {0}")]
    Network(#[source] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Credential storage error: {0}")]
    Storage(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            return body.to_string();
        }
        let mut end = MAX_ERROR_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
    }

    /// Pull a human readable message out of a provider error body.
    ///
    /// Spotify answers `{"error": {"status": 401, "message": "..."}}`, the
    /// relay answers `{"error": "...", "details": ...}`. Anything else is
    /// reported as the (truncated) raw body.
    fn extract_message(status: reqwest::StatusCode, body: &str) -> String {
        if let Ok(json) = serde_json::from_str::<Value>(body) {
            match json.get("error") {
                Some(Value::Object(obj)) => {
                    if let Some(Value::String(msg)) = obj.get("message") {
                        return msg.clone();
                    }
                }
                Some(Value::String(error)) => {
                    return match json.get("details") {
                        Some(Value::String(details)) => format!("{}: {}", error, details),
                        Some(details) if !details.is_null() => {
                            format!("{}: {}", error, Self::truncate_body(&details.to_string()))
                        }
                        _ => error.clone(),
                    };
                }
                _ => {}
            }
            if let Some(Value::String(desc)) = json.get("error_description") {
                return desc.clone();
            }
        }

        if body.trim().is_empty() {
            status
                .canonical_reason()
                .unwrap_or("Unknown error")
                .to_string()
        } else {
            Self::truncate_body(body)
        }
    }

    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        ApiError::Api {
            status: status.as_u16(),
            message: Self::extract_message(status, body),
        }
    }

    /// Map a transport failure, keeping timeouts distinct from other failures.
    pub fn transport(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            ApiError::Timeout(timeout)
        } else {
            ApiError::Network(err)
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Api { status: 401, .. })
    }

    /// True when a relay status means the provider refused a grant.
    ///
    /// OAuth token endpoints answer 400 (`invalid_grant`) or 401
    /// (`invalid_client`). Gateway and server errors mean the provider
    /// could not be asked, not that it said no.
    pub(crate) fn rejects_grant(status: u16) -> bool {
        matches!(status, 400 | 401)
    }

    /// True when the user has to go through authorization again.
    pub fn requires_reauthorization(&self) -> bool {
        matches!(
            self,
            ApiError::NotAuthenticated | ApiError::NoRefreshToken | ApiError::RefreshRejected(_)
        )
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Api { status, .. } | ApiError::AuthExchange { status, .. } => Some(*status),
            _ => None,
        }
    }
}
