use std::fmt;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::TokenStore;

/// Storage key for the access token
pub const ACCESS_TOKEN_KEY: &str = "spotify_access_token";

/// Storage key for the refresh token
pub const REFRESH_TOKEN_KEY: &str = "spotify_refresh_token";

/// Bearer credentials held by an [`ApiClient`](crate::api::ApiClient).
///
/// No access token means the client is unauthenticated.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialPair {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
}

impl CredentialPair {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: Some(access_token.into()),
            refresh_token: Some(refresh_token.into()),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.access_token.is_some()
    }

    /// Read both tokens from durable storage
    pub fn load(store: &dyn TokenStore) -> Result<Self> {
        Ok(Self {
            access_token: store.get(ACCESS_TOKEN_KEY)?,
            refresh_token: store.get(REFRESH_TOKEN_KEY)?,
        })
    }

    /// Write both tokens to durable storage. Absent tokens are removed.
    pub fn persist(&self, store: &dyn TokenStore) -> Result<()> {
        write_key(store, ACCESS_TOKEN_KEY, self.access_token.as_deref())?;
        write_key(store, REFRESH_TOKEN_KEY, self.refresh_token.as_deref())
    }

    /// Remove both tokens from durable storage
    pub fn clear(store: &dyn TokenStore) -> Result<()> {
        // Attempt both removals even if the first fails
        let access = store.remove(ACCESS_TOKEN_KEY);
        let refresh = store.remove(REFRESH_TOKEN_KEY);
        access.and(refresh)
    }
}

pub(crate) fn write_key(store: &dyn TokenStore, key: &str, value: Option<&str>) -> Result<()> {
    match value {
        Some(value) => store.set(key, value),
        None => store.remove(key),
    }
}

// Tokens stay out of logs and panic messages
impl fmt::Debug for CredentialPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |t: &Option<String>| t.as_ref().map(|_| "<redacted>");
        f.debug_struct("CredentialPair")
            .field("access_token", &redact(&self.access_token))
            .field("refresh_token", &redact(&self.refresh_token))
            .finish()
    }
}
