//! Application configuration management.
//!
//! This module handles loading the application configuration,
//! which holds the Spotify client id, redirect URI and the endpoints the
//! client talks to. Environment variables override the file.
//!
//! Configuration is stored at `~/.config/spotlink/config.json`.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::auth::SCOPES;

/// Application name used for config/cache directory paths
const APP_NAME: &str = "spotlink";

/// Config file name
const CONFIG_FILE: &str = "config.json";

pub const DEFAULT_REDIRECT_URI: &str = "http://localhost:3000/callback";
pub const DEFAULT_AUTHORIZE_URL: &str = "https://accounts.spotify.com/authorize";
pub const DEFAULT_API_BASE_URL: &str = "https://api.spotify.com/v1";
pub const DEFAULT_RELAY_URL: &str = "http://localhost:5001/api/spotify";

/// HTTP request timeout in seconds.
/// Token refresh and resource calls are short; a hung provider should fail fast.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Where credentials are persisted between runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TokenStoreKind {
    #[default]
    Keyring,
    File,
}

impl std::str::FromStr for TokenStoreKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keyring" | "keychain" => Ok(Self::Keyring),
            "file" => Ok(Self::File),
            other => bail!("Unknown token store '{}' (expected 'keyring' or 'file')", other),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    pub client_id: Option<String>,
    pub redirect_uri: Option<String>,
    pub relay_url: Option<String>,
    pub api_base_url: Option<String>,
    pub request_timeout_secs: Option<u64>,
    #[serde(default)]
    pub token_store: TokenStoreKind,
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            Ok(serde_json::from_str(&contents)?)
        } else {
            Ok(Self::default())
        }
    }

    /// Apply overrides from the process environment
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = non_empty("SPOTIFY_CLIENT_ID") {
            self.client_id = Some(v);
        }
        if let Some(v) = non_empty("SPOTIFY_REDIRECT_URI") {
            self.redirect_uri = Some(v);
        }
        if let Some(v) = non_empty("SPOTLINK_RELAY_URL") {
            self.relay_url = Some(v);
        }
        if let Some(v) = non_empty("SPOTLINK_API_BASE_URL") {
            self.api_base_url = Some(v);
        }
        if let Some(v) = non_empty("SPOTLINK_TOKEN_STORE") {
            self.token_store = v.parse()?;
        }
        Ok(())
    }

    /// Resolve into the settings an [`ApiClient`](crate::api::ApiClient) is built from
    pub fn client_settings(&self) -> Result<ClientSettings> {
        let Some(client_id) = self.client_id.clone().filter(|id| !id.trim().is_empty()) else {
            bail!("Spotify client id is not configured (set SPOTIFY_CLIENT_ID)");
        };

        let mut settings = ClientSettings::new(client_id);
        if let Some(ref uri) = self.redirect_uri {
            settings.redirect_uri = uri.clone();
        }
        if let Some(ref url) = self.relay_url {
            settings.relay_url = url.trim_end_matches('/').to_string();
        }
        if let Some(ref url) = self.api_base_url {
            settings.api_base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(secs) = self.request_timeout_secs {
            if secs == 0 {
                bail!("request_timeout_secs must be greater than zero");
            }
            settings.request_timeout = Duration::from_secs(secs);
        }
        Ok(settings)
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }
}

/// Fully resolved client settings.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub client_id: String,
    pub redirect_uri: String,
    pub authorize_url: String,
    pub api_base_url: String,
    /// Base URL of the backend relay holding the client secret
    pub relay_url: String,
    pub request_timeout: Duration,
    pub scopes: Vec<String>,
}

impl ClientSettings {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            redirect_uri: DEFAULT_REDIRECT_URI.to_string(),
            authorize_url: DEFAULT_AUTHORIZE_URL.to_string(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            relay_url: DEFAULT_RELAY_URL.to_string(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            scopes: SCOPES.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_relay_url(mut self, url: impl Into<String>) -> Self {
        self.relay_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}
