use axum::{extract::State, http::StatusCode, Json};
use reqwest::Response;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::{RelayError, RelayState};

const EXCHANGE_FAILED: &str = "Failed to exchange code for token";
const REFRESH_FAILED: &str = "Failed to refresh token";

#[derive(Debug, Deserialize)]
pub struct TokenExchangeRequest {
    pub code: String,
    pub redirect_uri: String,
}

#[derive(Debug, Deserialize)]
pub struct TokenRefreshRequest {
    pub refresh_token: String,
}

pub async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn exchange_token(
    State(state): State<RelayState>,
    Json(body): Json<TokenExchangeRequest>,
) -> Result<Json<Value>, RelayError> {
    debug!(target: "relay", "Exchanging authorization code");
    let settings = &state.settings;
    let grant = [
        ("grant_type", "authorization_code"),
        ("code", body.code.as_str()),
        ("redirect_uri", body.redirect_uri.as_str()),
        ("client_id", settings.client_id.as_str()),
        ("client_secret", settings.client_secret.as_str()),
    ];
    forward_grant(&state, &grant, EXCHANGE_FAILED).await.map(Json)
}

pub async fn refresh_token(
    State(state): State<RelayState>,
    Json(body): Json<TokenRefreshRequest>,
) -> Result<Json<Value>, RelayError> {
    debug!(target: "relay", "Refreshing access token");
    let settings = &state.settings;
    let grant = [
        ("grant_type", "refresh_token"),
        ("refresh_token", body.refresh_token.as_str()),
        ("client_id", settings.client_id.as_str()),
        ("client_secret", settings.client_secret.as_str()),
    ];
    forward_grant(&state, &grant, REFRESH_FAILED).await.map(Json)
}

/// POST a form-encoded grant to the provider token endpoint and pass the JSON through.
///
/// A provider 4xx keeps its status so clients can tell a refused grant
/// from an outage. Transport failures and provider 5xx answer 502, or 504
/// on timeout.
async fn forward_grant(
    state: &RelayState,
    grant: &[(&str, &str)],
    error: &'static str,
) -> Result<Value, RelayError> {
    let upstream = |status: StatusCode, details: Value| RelayError::Upstream {
        status,
        error,
        details,
    };
    let transport_error = |e: reqwest::Error| {
        let status = if e.is_timeout() {
            StatusCode::GATEWAY_TIMEOUT
        } else {
            StatusCode::BAD_GATEWAY
        };
        upstream(status, json!(e.to_string()))
    };

    let response = state
        .http
        .post(&state.settings.token_url)
        .form(grant)
        .timeout(state.settings.token_timeout)
        .send()
        .await
        .map_err(transport_error)?;

    let status = response.status();
    let text = response.text().await.map_err(transport_error)?;
    let payload = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));

    if status.is_client_error() {
        debug!(target: "relay", status = status.as_u16(), "Token endpoint rejected grant");
        return Err(upstream(status, payload));
    }
    if !status.is_success() {
        debug!(target: "relay", status = status.as_u16(), "Token endpoint failed");
        return Err(upstream(StatusCode::BAD_GATEWAY, payload));
    }
    if !payload.is_object() {
        return Err(upstream(
            StatusCode::BAD_GATEWAY,
            json!("Token endpoint returned a non-JSON body"),
        ));
    }
    Ok(payload)
}

pub async fn generate_music(
    State(state): State<RelayState>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, RelayError> {
    let url = format!("{}/generate", state.settings.ml_service_url);
    info!(target: "relay", "Forwarding music generation request");

    let result = state
        .http
        .post(&url)
        .json(&body)
        .timeout(state.settings.generation_timeout)
        .send()
        .await;

    let generation_error = |e: reqwest::Error| {
        if e.is_timeout() {
            RelayError::GenerationTimeout
        } else {
            RelayError::MlUnavailable
        }
    };
    let response = result.map_err(generation_error)?;
    ml_payload(response).await.map(Json)
}

pub async fn available_models(State(state): State<RelayState>) -> Result<Json<Value>, RelayError> {
    ml_get(&state, "models").await.map(Json)
}

pub async fn ml_health(State(state): State<RelayState>) -> Result<Json<Value>, RelayError> {
    ml_get(&state, "health").await.map(Json)
}

async fn ml_get(state: &RelayState, endpoint: &str) -> Result<Value, RelayError> {
    let url = format!("{}/{}", state.settings.ml_service_url, endpoint);
    let response = state
        .http
        .get(&url)
        .timeout(state.settings.token_timeout)
        .send()
        .await
        .map_err(|_| RelayError::MlUnavailable)?;
    ml_payload(response)
        .await
        .map_err(|_| RelayError::MlUnavailable)
}

async fn ml_payload(response: Response) -> Result<Value, RelayError> {
    if !response.status().is_success() {
        debug!(target: "relay", status = response.status().as_u16(), "ML service returned an error");
        return Err(RelayError::MlUnavailable);
    }
    response.json().await.map_err(|e| {
        if e.is_timeout() {
            RelayError::GenerationTimeout
        } else {
            RelayError::MlUnavailable
        }
    })
}
