//! API client for communicating with the Spotify Web API.
//!
//! Every call funnels through [`ApiClient::request`]. It attaches the
//! current access token and, when the provider answers 401, refreshes the
//! token through the backend relay and reissues the call exactly once.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use reqwest::{header, Client, Response};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::auth::{self, CredentialPair, TokenRelay, TokenStore, ACCESS_TOKEN_KEY};
use crate::config::ClientSettings;

use super::{ApiError, OutboundRequest};

struct AuthState {
    credentials: CredentialPair,
    /// Bumped on every credential change
    generation: u64,
    /// Set when a refresh rejection cleared the credentials
    rejection: Option<String>,
}

/// Authenticated Spotify client.
///
/// Owned by the composition root and shared by reference (or `Arc`);
/// there is no global instance. Credential writes are serialized and
/// concurrent 401s share a single refresh.
pub struct ApiClient {
    http: Client,
    settings: ClientSettings,
    relay: TokenRelay,
    store: Arc<dyn TokenStore>,
    state: RwLock<AuthState>,
    refresh_gate: Mutex<()>,
}

fn storage_error(err: anyhow::Error) -> ApiError {
    ApiError::Storage(format!("{:#}", err))
}

impl ApiClient {
    /// Create a client, reading any stored credentials once.
    pub fn new(settings: ClientSettings, store: Arc<dyn TokenStore>) -> Result<Self, ApiError> {
        let http = Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .map_err(ApiError::Network)?;

        let credentials = CredentialPair::load(store.as_ref()).map_err(storage_error)?;
        debug!(
            authenticated = credentials.is_authenticated(),
            "Loaded stored Spotify credentials"
        );

        // Cheap clone, shares connection pool
        let relay = TokenRelay::new(
            http.clone(),
            settings.relay_url.clone(),
            settings.request_timeout,
        );

        Ok(Self {
            http,
            settings,
            relay,
            store,
            state: RwLock::new(AuthState {
                credentials,
                generation: 0,
                rejection: None,
            }),
            refresh_gate: Mutex::new(()),
        })
    }

    fn read_state(&self) -> RwLockReadGuard<'_, AuthState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, AuthState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    // ===== Authorization lifecycle =====

    /// URL of the consent page to send the user to
    pub fn authorization_url(&self) -> String {
        auth::authorization_url(&self.settings)
    }

    /// Exchange a one-time authorization code for a credential pair.
    ///
    /// Prior credentials are left untouched when the exchange fails.
    pub async fn complete_authorization(&self, code: &str) -> Result<CredentialPair, ApiError> {
        let grant = self
            .relay
            .exchange_code(code, &self.settings.redirect_uri)
            .await
            .map_err(|e| match e {
                ApiError::Api { status, message } if ApiError::rejects_grant(status) => {
                    warn!(status, message = %message, "Authorization code rejected");
                    ApiError::AuthExchange { status, message }
                }
                other => other,
            })?;

        let credentials = CredentialPair::new(grant.access_token, grant.refresh_token);
        self.store_credentials(&credentials)?;
        info!("Spotify account linked");
        Ok(credentials)
    }

    fn store_credentials(&self, credentials: &CredentialPair) -> Result<(), ApiError> {
        let mut state = self.write_state();
        if let Err(e) = credentials.persist(self.store.as_ref()) {
            // Storage must never pair the new access token with the old
            // refresh token; put the previous pair back.
            if let Err(rollback) = state.credentials.persist(self.store.as_ref()) {
                warn!("Failed to restore previous credentials: {:#}", rollback);
            }
            return Err(storage_error(e));
        }
        state.credentials = credentials.clone();
        state.generation += 1;
        state.rejection = None;
        Ok(())
    }

    /// Obtain a new access token with the stored refresh token.
    ///
    /// A rejected refresh token clears all credentials; the user has to
    /// authorize again.
    pub async fn refresh(&self) -> Result<String, ApiError> {
        let _gate = self.refresh_gate.lock().await;
        self.refresh_locked().await
    }

    /// Caller must hold `refresh_gate`.
    async fn refresh_locked(&self) -> Result<String, ApiError> {
        let (refresh_token, generation) = {
            let state = self.read_state();
            (state.credentials.refresh_token.clone(), state.generation)
        };
        let refresh_token = refresh_token.ok_or(ApiError::NoRefreshToken)?;

        debug!("Refreshing Spotify access token");
        match self.relay.refresh(&refresh_token).await {
            Ok(grant) => self.apply_refreshed(generation, grant.access_token),
            Err(ApiError::Api { status, message }) if ApiError::rejects_grant(status) => {
                warn!(status, message = %message, "Refresh token rejected, clearing credentials");
                self.clear_after_rejection(generation, &message);
                Err(ApiError::RefreshRejected(message))
            }
            // Relay or provider unreachable: the refresh token may still be good
            Err(e) => Err(e),
        }
    }

    fn apply_refreshed(&self, generation: u64, access_token: String) -> Result<String, ApiError> {
        let mut state = self.write_state();
        if state.generation != generation {
            // Logged out or relinked while the refresh was in flight; the
            // newer state wins.
            return state
                .credentials
                .access_token
                .clone()
                .ok_or(ApiError::NotAuthenticated);
        }

        state.credentials.access_token = Some(access_token.clone());
        state.generation += 1;
        state.rejection = None;

        // The in-memory token is valid either way; a failed write only
        // costs a refresh on the next start.
        if let Err(e) = self.store.set(ACCESS_TOKEN_KEY, &access_token) {
            warn!("Failed to persist refreshed access token: {:#}", e);
        }
        info!("Spotify access token refreshed");
        Ok(access_token)
    }

    fn clear_after_rejection(&self, generation: u64, reason: &str) {
        let mut state = self.write_state();
        if state.generation != generation {
            return;
        }
        self.reset(&mut state);
        state.rejection = Some(reason.to_string());
    }

    fn reset(&self, state: &mut AuthState) {
        state.credentials = CredentialPair::default();
        state.generation += 1;
        state.rejection = None;
        if let Err(e) = CredentialPair::clear(self.store.as_ref()) {
            warn!("Failed to remove stored credentials: {:#}", e);
        }
    }

    /// Refresh after a 401 seen with the token from `generation`.
    ///
    /// Callers that queue up behind an in-flight refresh reuse its outcome
    /// instead of refreshing again.
    async fn refresh_after_unauthorized(&self, generation: u64) -> Result<String, ApiError> {
        let _gate = self.refresh_gate.lock().await;
        {
            let state = self.read_state();
            if state.generation != generation {
                debug!("Credentials changed while waiting for refresh");
                return match (&state.credentials.access_token, &state.rejection) {
                    (Some(token), _) => Ok(token.clone()),
                    (None, Some(reason)) => Err(ApiError::RefreshRejected(reason.clone())),
                    (None, None) => Err(ApiError::NotAuthenticated),
                };
            }
        }
        self.refresh_locked().await
    }

    /// True iff an access token is held. No network access.
    pub fn is_authenticated(&self) -> bool {
        self.read_state().credentials.is_authenticated()
    }

    /// Snapshot of the credentials currently held
    pub fn credentials(&self) -> CredentialPair {
        self.read_state().credentials.clone()
    }

    /// Forget all credentials, in memory and in durable storage. Never fails.
    pub fn logout(&self) {
        let mut state = self.write_state();
        self.reset(&mut state);
        info!("Spotify credentials cleared");
    }

    // ===== Request primitive =====

    fn current_token(&self) -> Result<(String, u64), ApiError> {
        let state = self.read_state();
        match state.credentials.access_token {
            Some(ref token) => Ok((token.clone(), state.generation)),
            None => Err(ApiError::NotAuthenticated),
        }
    }

    fn can_refresh(&self, generation: u64) -> bool {
        let state = self.read_state();
        state.credentials.refresh_token.is_some() || state.generation != generation
    }

    /// Issue a call with the current access token.
    ///
    /// Fails with [`ApiError::NotAuthenticated`] before touching the network
    /// when no access token is held. A 401 triggers one refresh and one
    /// reissue; the second outcome is returned as-is. Every other failure
    /// is returned without retrying. Payloads are returned undecoded beyond
    /// JSON parsing; an empty 2xx body is `Value::Null`.
    pub async fn request(&self, request: &OutboundRequest) -> Result<Value, ApiError> {
        let (token, generation) = self.current_token()?;

        match self.send(request, &token).await {
            Err(err) if err.is_unauthorized() && self.can_refresh(generation) => {
                warn!(
                    method = %request.method,
                    path = %request.path,
                    "Access token rejected, refreshing once"
                );
                let token = self.refresh_after_unauthorized(generation).await?;
                self.send(request, &token).await
            }
            result => result,
        }
    }

    fn url_for(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.settings.api_base_url, path)
        } else {
            format!("{}/{}", self.settings.api_base_url, path)
        }
    }

    async fn send(&self, request: &OutboundRequest, token: &str) -> Result<Value, ApiError> {
        let url = self.url_for(&request.path);

        let mut headers = request.headers.clone();
        headers.remove(header::AUTHORIZATION);

        let mut builder = self
            .http
            .request(request.method.clone(), &url)
            .headers(headers)
            .bearer_auth(token);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }

        debug!(method = %request.method, path = %request.path, "Sending Spotify API request");
        let response = builder
            .send()
            .await
            .map_err(|e| ApiError::transport(e, self.settings.request_timeout))?;

        self.read_payload(response).await
    }

    async fn read_payload(&self, response: Response) -> Result<Value, ApiError> {
        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ApiError::transport(e, self.settings.request_timeout))?;

        if !status.is_success() {
            let body = String::from_utf8_lossy(&bytes);
            debug!(status = status.as_u16(), "Spotify API returned an error");
            return Err(ApiError::from_status(status, &body));
        }

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&bytes)
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse JSON response: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use serde_json::json;
    use wiremock::matchers::{any, body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::auth::{MemoryStore, REFRESH_TOKEN_KEY};

    fn settings_for(server: &MockServer) -> ClientSettings {
        ClientSettings::new("test-client")
            .with_api_base_url(format!("{}/v1", server.uri()))
            .with_relay_url(format!("{}/api/spotify", server.uri()))
    }

    fn client_with(server: &MockServer, store: Arc<MemoryStore>) -> ApiClient {
        ApiClient::new(settings_for(server), store).expect("client should build")
    }

    fn expired_store() -> Arc<MemoryStore> {
        Arc::new(MemoryStore::with_entries([
            (ACCESS_TOKEN_KEY, "expired"),
            (REFRESH_TOKEN_KEY, "valid"),
        ]))
    }

    fn unauthorized() -> ResponseTemplate {
        ResponseTemplate::new(401).set_body_json(json!({
            "error": { "status": 401, "message": "The access token expired" }
        }))
    }

    #[tokio::test]
    async fn test_unauthenticated_request_makes_no_network_call() {
        let server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let client = client_with(&server, Arc::new(MemoryStore::new()));
        assert!(!client.is_authenticated());

        let err = client.request(&OutboundRequest::get("/me")).await.unwrap_err();
        assert!(matches!(err, ApiError::NotAuthenticated));
    }

    #[tokio::test]
    async fn test_complete_authorization_stores_both_tokens() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/spotify/token"))
            .and(body_json(json!({
                "code": "one-time-code",
                "redirect_uri": "http://localhost:3000/callback"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "access-1",
                "refresh_token": "refresh-1"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let store = Arc::new(MemoryStore::new());
        let client = client_with(&server, store.clone());

        let pair = client.complete_authorization("one-time-code").await.unwrap();
        assert_eq!(pair, CredentialPair::new("access-1", "refresh-1"));
        assert!(client.is_authenticated());
        assert_eq!(store.get(ACCESS_TOKEN_KEY).unwrap().as_deref(), Some("access-1"));
        assert_eq!(store.get(REFRESH_TOKEN_KEY).unwrap().as_deref(), Some("refresh-1"));
    }

    #[tokio::test]
    async fn test_rejected_code_leaves_prior_state() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/spotify/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "Failed to exchange code for token",
                "details": { "error": "invalid_grant", "error_description": "Invalid authorization code" }
            })))
            .mount(&server)
            .await;

        let store = expired_store();
        let client = client_with(&server, store.clone());

        let err = client.complete_authorization("used-code").await.unwrap_err();
        assert!(matches!(err, ApiError::AuthExchange { status: 400, .. }));
        assert_eq!(client.credentials(), CredentialPair::new("expired", "valid"));
        assert_eq!(store.get(ACCESS_TOKEN_KEY).unwrap().as_deref(), Some("expired"));
    }

    #[tokio::test]
    async fn test_logout_is_idempotent() {
        let server = MockServer::start().await;
        let store = expired_store();
        let client = client_with(&server, store.clone());
        assert!(client.is_authenticated());

        client.logout();
        let once = client.credentials();
        client.logout();

        assert_eq!(client.credentials(), once);
        assert!(!client.is_authenticated());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_401_then_success_refreshes_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/me"))
            .and(header("Authorization", "Bearer expired"))
            .respond_with(unauthorized())
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/me"))
            .and(header("Authorization", "Bearer fresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "user-1" })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/spotify/refresh"))
            .and(body_json(json!({ "refresh_token": "valid" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "access_token": "fresh" })))
            .expect(1)
            .mount(&server)
            .await;

        let store = expired_store();
        let client = client_with(&server, store.clone());

        let profile = client.get_profile().await.unwrap();
        assert_eq!(profile, json!({ "id": "user-1" }));
        assert_eq!(store.get(ACCESS_TOKEN_KEY).unwrap().as_deref(), Some("fresh"));
        // Refresh replaces the access token only
        assert_eq!(store.get(REFRESH_TOKEN_KEY).unwrap().as_deref(), Some("valid"));
        assert_eq!(client.credentials().access_token.as_deref(), Some("fresh"));
    }

    #[tokio::test]
    async fn test_second_401_is_surfaced_without_third_attempt() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/me"))
            .respond_with(unauthorized())
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/spotify/refresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "access_token": "fresh" })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_with(&server, expired_store());
        let err = client.get_profile().await.unwrap_err();
        match err {
            ApiError::Api { status, message } => {
                assert_eq!(status, 401);
                assert_eq!(message, "The access token expired");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        // Still authenticated with the refreshed token
        assert!(client.is_authenticated());
    }

    #[tokio::test]
    async fn test_401_without_refresh_token_is_surfaced_immediately() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/me"))
            .respond_with(unauthorized())
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/spotify/refresh"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let store = Arc::new(MemoryStore::with_entries([(ACCESS_TOKEN_KEY, "expired")]));
        let client = client_with(&server, store);

        let err = client.get_profile().await.unwrap_err();
        assert!(err.is_unauthorized());
    }

    #[tokio::test]
    async fn test_rejected_refresh_clears_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/me"))
            .respond_with(unauthorized())
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/spotify/refresh"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "Failed to refresh token",
                "details": "Refresh token revoked"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let store = expired_store();
        let client = client_with(&server, store.clone());

        let err = client.get_profile().await.unwrap_err();
        assert!(matches!(err, ApiError::RefreshRejected(_)));
        assert!(err.requires_reauthorization());
        assert!(!client.is_authenticated());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_other_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/playlists/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "error": { "status": 404, "message": "Non existing id" }
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/spotify/refresh"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let client = client_with(&server, expired_store());
        let err = client
            .request(&OutboundRequest::get("/playlists/missing"))
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(404));
        assert_eq!(err.to_string(), "API error (status 404): Non existing id");
    }

    #[tokio::test]
    async fn test_concurrent_401s_share_one_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/me"))
            .and(header("Authorization", "Bearer expired"))
            .respond_with(unauthorized())
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/me"))
            .and(header("Authorization", "Bearer fresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "user-1" })))
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/spotify/refresh"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "access_token": "fresh" }))
                    .set_delay(Duration::from_millis(300)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = client_with(&server, expired_store());
        let (first, second) = futures::future::join(client.get_profile(), client.get_profile()).await;
        assert_eq!(first.unwrap(), json!({ "id": "user-1" }));
        assert_eq!(second.unwrap(), json!({ "id": "user-1" }));
    }

    #[tokio::test]
    async fn test_concurrent_callers_see_shared_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/me"))
            .respond_with(unauthorized())
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/spotify/refresh"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(json!({ "error": "Failed to refresh token" }))
                    .set_delay(Duration::from_millis(300)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = client_with(&server, expired_store());
        let (first, second) = futures::future::join(client.get_profile(), client.get_profile()).await;
        assert!(matches!(first, Err(ApiError::RefreshRejected(_))));
        assert!(matches!(second, Err(ApiError::RefreshRejected(_))));
    }

    #[tokio::test]
    async fn test_refresh_without_refresh_token() {
        let server = MockServer::start().await;
        let client = client_with(&server, Arc::new(MemoryStore::new()));
        let err = client.refresh().await.unwrap_err();
        assert!(matches!(err, ApiError::NoRefreshToken));
    }

    #[tokio::test]
    async fn test_refresh_network_failure_keeps_credentials() {
        let server = MockServer::start().await;
        let settings = settings_for(&server).with_relay_url("http://127.0.0.1:9/api/spotify");
        let store = expired_store();
        let client = ApiClient::new(settings, store.clone()).unwrap();

        let err = client.refresh().await.unwrap_err();
        assert!(matches!(err, ApiError::Network(_) | ApiError::Timeout(_)));
        assert!(client.is_authenticated());
        assert_eq!(store.get(REFRESH_TOKEN_KEY).unwrap().as_deref(), Some("valid"));
    }

    #[tokio::test]
    async fn test_slow_response_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/me"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let settings = settings_for(&server).with_request_timeout(Duration::from_millis(200));
        let client = ApiClient::new(settings, expired_store()).unwrap();

        let err = client.get_profile().await.unwrap_err();
        assert!(matches!(err, ApiError::Timeout(d) if d == Duration::from_millis(200)));
    }

    #[tokio::test]
    async fn test_caller_cannot_override_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/me"))
            .and(header("Authorization", "Bearer expired"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "u" })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_with(&server, expired_store());
        let request = OutboundRequest::get("me").header(
            reqwest::header::AUTHORIZATION,
            reqwest::header::HeaderValue::from_static("Bearer forged"),
        );
        assert_eq!(client.request(&request).await.unwrap(), json!({ "id": "u" }));
    }

    /// Memory store whose writes to one key always fail
    struct FlakyStore {
        inner: MemoryStore,
        failing_key: &'static str,
    }

    impl FlakyStore {
        fn new(failing_key: &'static str, entries: [(&str, &str); 2]) -> Arc<Self> {
            Arc::new(Self {
                inner: MemoryStore::with_entries(entries),
                failing_key,
            })
        }
    }

    impl TokenStore for FlakyStore {
        fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
            if key == self.failing_key {
                anyhow::bail!("disk full");
            }
            self.inner.set(key, value)
        }

        fn remove(&self, key: &str) -> anyhow::Result<()> {
            self.inner.remove(key)
        }
    }

    fn token_grant(access: &str, refresh: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "access_token": access,
            "refresh_token": refresh
        }))
    }

    #[tokio::test]
    async fn test_failed_persist_restores_previous_pair() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/spotify/token"))
            .respond_with(token_grant("new-a", "new-r"))
            .expect(1)
            .mount(&server)
            .await;

        let store = FlakyStore::new(
            REFRESH_TOKEN_KEY,
            [(ACCESS_TOKEN_KEY, "old-a"), (REFRESH_TOKEN_KEY, "old-r")],
        );
        let client = ApiClient::new(settings_for(&server), store.clone()).unwrap();

        let err = client.complete_authorization("code").await.unwrap_err();
        assert!(matches!(err, ApiError::Storage(ref m) if m.contains("disk full")));
        assert_eq!(client.credentials(), CredentialPair::new("old-a", "old-r"));
        assert_eq!(store.inner.get(ACCESS_TOKEN_KEY).unwrap().as_deref(), Some("old-a"));
        assert_eq!(store.inner.get(REFRESH_TOKEN_KEY).unwrap().as_deref(), Some("old-r"));
    }

    #[tokio::test]
    async fn test_refreshed_token_kept_in_memory_when_persist_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/me"))
            .and(header("Authorization", "Bearer expired"))
            .respond_with(unauthorized())
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/me"))
            .and(header("Authorization", "Bearer fresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "user-1" })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/spotify/refresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "access_token": "fresh" })))
            .expect(1)
            .mount(&server)
            .await;

        let store = FlakyStore::new(
            ACCESS_TOKEN_KEY,
            [(ACCESS_TOKEN_KEY, "expired"), (REFRESH_TOKEN_KEY, "valid")],
        );
        let client = ApiClient::new(settings_for(&server), store.clone()).unwrap();

        assert_eq!(client.get_profile().await.unwrap(), json!({ "id": "user-1" }));
        assert_eq!(client.credentials().access_token.as_deref(), Some("fresh"));
        assert_eq!(store.inner.get(ACCESS_TOKEN_KEY).unwrap().as_deref(), Some("expired"));
    }

    #[tokio::test]
    async fn test_relay_gateway_error_keeps_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/me"))
            .respond_with(unauthorized())
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/spotify/refresh"))
            .respond_with(ResponseTemplate::new(502).set_body_json(json!({
                "error": "Failed to refresh token",
                "details": "error sending request"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let store = expired_store();
        let client = client_with(&server, store.clone());

        let err = client.get_profile().await.unwrap_err();
        assert_eq!(err.status(), Some(502));
        assert!(!err.requires_reauthorization());
        assert!(client.is_authenticated());
        assert_eq!(store.get(REFRESH_TOKEN_KEY).unwrap().as_deref(), Some("valid"));
    }

    #[tokio::test]
    async fn test_logout_during_refresh_wins() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/me"))
            .respond_with(unauthorized())
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/spotify/refresh"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "access_token": "fresh" }))
                    .set_delay(Duration::from_millis(300)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let store = expired_store();
        let client = client_with(&server, store.clone());

        let logout = async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            client.logout();
        };
        let (result, ()) = futures::future::join(client.get_profile(), logout).await;

        assert!(matches!(result, Err(ApiError::NotAuthenticated)));
        assert!(!client.is_authenticated());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_relink_during_rejected_refresh_is_kept() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/me"))
            .respond_with(unauthorized())
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/spotify/refresh"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(json!({ "error": "Failed to refresh token" }))
                    .set_delay(Duration::from_millis(300)),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/spotify/token"))
            .respond_with(token_grant("relinked-a", "relinked-r"))
            .expect(1)
            .mount(&server)
            .await;

        let store = expired_store();
        let client = client_with(&server, store.clone());

        let relink = async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            client.complete_authorization("new-code").await
        };
        let (result, linked) = futures::future::join(client.get_profile(), relink).await;

        assert!(matches!(result, Err(ApiError::RefreshRejected(_))));
        assert_eq!(linked.unwrap(), CredentialPair::new("relinked-a", "relinked-r"));
        // The rejection of the old refresh token must not wipe the new pair
        assert_eq!(client.credentials(), CredentialPair::new("relinked-a", "relinked-r"));
        assert_eq!(store.get(REFRESH_TOKEN_KEY).unwrap().as_deref(), Some("relinked-r"));
    }
}
