use std::time::Duration;

use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::debug;

use crate::api::ApiError;

/// Tokens returned for an authorization code
#[derive(Debug, Clone, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

/// Tokens returned for a refresh
#[derive(Debug, Clone, Deserialize)]
pub struct RefreshGrant {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

#[derive(Serialize)]
struct ExchangeBody<'a> {
    code: &'a str,
    redirect_uri: &'a str,
}

#[derive(Serialize)]
struct RefreshBody<'a> {
    refresh_token: &'a str,
}

/// Client for the backend relay that holds the Spotify client secret.
///
/// Provider rejections come back as [`ApiError::Api`]; callers decide
/// what a rejection means for their state.
#[derive(Clone)]
pub struct TokenRelay {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl TokenRelay {
    /// Share an existing connection pool; `timeout` is only used for error reporting.
    pub fn new(client: Client, base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        }
    }

    pub async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<TokenGrant, ApiError> {
        self.post("token", &ExchangeBody { code, redirect_uri }).await
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<RefreshGrant, ApiError> {
        self.post("refresh", &RefreshBody { refresh_token }).await
    }

    async fn post<T: DeserializeOwned, B: Serialize>(&self, endpoint: &str, body: &B) -> Result<T, ApiError> {
        let url = format!("{}/{}", self.base_url, endpoint);
        debug!(url = %url, "Calling token relay");

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| ApiError::transport(e, self.timeout))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ApiError::transport(e, self.timeout))?;

        if !status.is_success() {
            return Err(ApiError::from_status(status, &text));
        }

        serde_json::from_str(&text)
            .map_err(|e| ApiError::InvalidResponse(format!("Token relay {} response: {}", endpoint, e)))
    }
}
