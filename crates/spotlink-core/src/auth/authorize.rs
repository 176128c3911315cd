use thiserror::Error;
use url::form_urlencoded;

use crate::config::ClientSettings;

/// Permissions requested from the user on every authorization.
pub const SCOPES: &[&str] = &[
    "user-read-private",
    "user-read-email",
    "playlist-read-private",
    "playlist-read-collaborative",
    "playlist-modify-public",
    "playlist-modify-private",
    "user-library-read",
    "user-library-modify",
    "user-read-playback-state",
    "user-modify-playback-state",
    "user-read-currently-playing",
    "streaming",
];

/// Build the consent page URL the user is sent to.
///
/// Deterministic for a given set of settings; no network access.
pub fn authorization_url(settings: &ClientSettings) -> String {
    let query = form_urlencoded::Serializer::new(String::new())
        .append_pair("client_id", &settings.client_id)
        .append_pair("response_type", "code")
        .append_pair("redirect_uri", &settings.redirect_uri)
        .append_pair("scope", &settings.scopes.join(" "))
        .append_pair("show_dialog", "true")
        .finish();
    format!("{}?{}", settings.authorize_url, query)
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CallbackError {
    #[error("Spotify authorization was denied: {0}")]
    Denied(String),

    #[error("No authorization code found in the redirect")]
    MissingCode,
}

/// Extract the authorization code from what the user pasted.
///
/// Accepts the full redirect URL (`http://localhost:3000/callback?code=...`),
/// a bare query string, or the bare code itself.
pub fn parse_callback(input: &str) -> Result<String, CallbackError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CallbackError::MissingCode);
    }

    let query = match input.split_once('?') {
        Some((_, query)) => query,
        None if input.contains('=') => input,
        None => return Ok(input.to_string()),
    };
    // Drop any fragment
    let query = query.split('#').next().unwrap_or_default();

    let mut code = None;
    for (key, value) in form_urlencoded::parse(query.as_bytes()) {
        match key.as_ref() {
            "error" => return Err(CallbackError::Denied(value.into_owned())),
            "code" if !value.is_empty() => code = Some(value.into_owned()),
            _ => {}
        }
    }
    code.ok_or(CallbackError::MissingCode)
}
