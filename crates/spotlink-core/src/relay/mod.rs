//! Backend relay holding the Spotify client secret.
//!
//! Untrusted clients never see the secret: they post authorization codes
//! and refresh tokens here and the relay forwards them to the provider
//! token endpoint. The relay also proxies the music generation service.

mod error;
mod handlers;

pub use error::RelayError;

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    routing::{get, post},
    Router,
};
use reqwest::Client;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

pub const DEFAULT_TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
pub const DEFAULT_ML_SERVICE_URL: &str = "http://localhost:8000";
pub const DEFAULT_PORT: u16 = 5001;

/// Token grants are quick; fail fast if the provider hangs
const TOKEN_TIMEOUT_SECS: u64 = 10;

/// Music generation can run for minutes
const GENERATION_TIMEOUT_SECS: u64 = 300;

#[derive(Clone)]
pub struct RelaySettings {
    pub client_id: String,
    pub client_secret: String,
    pub token_url: String,
    pub ml_service_url: String,
    pub bind_addr: SocketAddr,
    pub token_timeout: Duration,
    pub generation_timeout: Duration,
}

impl RelaySettings {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            token_url: DEFAULT_TOKEN_URL.to_string(),
            ml_service_url: DEFAULT_ML_SERVICE_URL.to_string(),
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            token_timeout: Duration::from_secs(TOKEN_TIMEOUT_SECS),
            generation_timeout: Duration::from_secs(GENERATION_TIMEOUT_SECS),
        }
    }

    /// Read settings from `SPOTIFY_CLIENT_ID`, `SPOTIFY_CLIENT_SECRET`,
    /// `SPOTIFY_TOKEN_URL`, `ML_SERVICE_URL` and `PORT`.
    pub fn from_env() -> Result<Self> {
        let required = |key: &str| {
            std::env::var(key)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .with_context(|| format!("{} is not set", key))
        };

        let mut settings = Self::new(required("SPOTIFY_CLIENT_ID")?, required("SPOTIFY_CLIENT_SECRET")?);
        if let Ok(url) = std::env::var("SPOTIFY_TOKEN_URL") {
            settings.token_url = url;
        }
        if let Ok(url) = std::env::var("ML_SERVICE_URL") {
            settings.ml_service_url = url.trim_end_matches('/').to_string();
        }
        if let Ok(port) = std::env::var("PORT") {
            let port: u16 = port.parse().with_context(|| format!("Invalid PORT '{}'", port))?;
            settings.bind_addr.set_port(port);
        }
        Ok(settings)
    }
}

/// Relay state shared across handlers
#[derive(Clone)]
pub struct RelayState {
    pub(crate) http: Client,
    pub(crate) settings: RelaySettings,
}

impl RelayState {
    pub fn new(settings: RelaySettings) -> Result<Self> {
        let http = Client::builder()
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { http, settings })
    }
}

/// Create the relay router
pub fn router(state: RelayState) -> Router {
    tracing::debug!(target: "relay", "Creating relay router");

    Router::new()
        .route("/health", get(handlers::health_check))
        // Spotify token relay
        .route("/api/spotify/token", post(handlers::exchange_token))
        .route("/api/spotify/refresh", post(handlers::refresh_token))
        // Music generation proxy
        .route("/api/generate-music", post(handlers::generate_music))
        .route("/api/models/available", get(handlers::available_models))
        .route("/api/models/health", get(handlers::ml_health))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until the process is stopped
pub async fn serve(settings: RelaySettings) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(settings.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", settings.bind_addr))?;
    info!(addr = %listener.local_addr()?, "Relay listening");

    let state = RelayState::new(settings)?;
    axum::serve(listener, router(state))
        .await
        .context("Relay server failed")
}
