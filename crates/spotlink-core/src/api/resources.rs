//! Spotify Web API resources.
//!
//! Thin adapters: each one builds an [`OutboundRequest`] and hands it to
//! [`ApiClient::request`], so every call shares the same refresh policy.
//! Payloads are returned as the provider sent them.

use serde_json::{json, Value};

use super::{ApiClient, ApiError, OutboundRequest};

pub const DEFAULT_PLAYLIST_LIMIT: u32 = 50;
pub const DEFAULT_SEARCH_LIMIT: u32 = 20;
pub const DEFAULT_RECOMMENDATION_LIMIT: u32 = 20;
pub const DEFAULT_SAVED_TRACKS_LIMIT: u32 = 50;

/// Spotify volume is a percentage
const MAX_VOLUME_PERCENT: u8 = 100;

fn segment(id: &str) -> String {
    urlencoding::encode(id).into_owned()
}

impl ApiClient {
    // ===== Profile & library =====

    /// Fetch the current user's profile
    pub async fn get_profile(&self) -> Result<Value, ApiError> {
        self.request(&OutboundRequest::get("/me")).await
    }

    /// Fetch the current user's playlists
    pub async fn get_user_playlists(&self, limit: u32) -> Result<Value, ApiError> {
        self.request(&OutboundRequest::get("/me/playlists").query("limit", limit))
            .await
    }

    /// Fetch the user's saved ("liked") tracks
    pub async fn get_saved_tracks(&self, limit: u32) -> Result<Value, ApiError> {
        self.request(&OutboundRequest::get("/me/tracks").query("limit", limit))
            .await
    }

    /// Save a track to the user's library
    pub async fn save_track(&self, track_id: &str) -> Result<Value, ApiError> {
        self.request(&OutboundRequest::put("/me/tracks").json(json!({ "ids": [track_id] })))
            .await
    }

    // ===== Playlists =====

    /// Create a playlist owned by the current user.
    ///
    /// Looks up the profile first to learn the user id.
    pub async fn create_playlist(
        &self,
        name: &str,
        description: &str,
        public: bool,
    ) -> Result<Value, ApiError> {
        let profile = self.get_profile().await?;
        let user_id = profile
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| ApiError::InvalidResponse("Profile response has no user id".to_string()))?;

        let request = OutboundRequest::post(format!("/users/{}/playlists", segment(user_id))).json(json!({
            "name": name,
            "description": description,
            "public": public,
        }));
        self.request(&request).await
    }

    pub async fn add_tracks_to_playlist(
        &self,
        playlist_id: &str,
        track_uris: &[String],
    ) -> Result<Value, ApiError> {
        let request = OutboundRequest::post(format!("/playlists/{}/tracks", segment(playlist_id)))
            .json(json!({ "uris": track_uris }));
        self.request(&request).await
    }

    // ===== Discovery =====

    pub async fn search_tracks(&self, query: &str, limit: u32) -> Result<Value, ApiError> {
        let request = OutboundRequest::get("/search")
            .query("q", query)
            .query("type", "track")
            .query("limit", limit);
        self.request(&request).await
    }

    /// Recommendations seeded by tracks and/or genres. Empty seed lists are omitted.
    pub async fn get_recommendations(
        &self,
        seed_tracks: &[String],
        seed_genres: &[String],
        limit: u32,
    ) -> Result<Value, ApiError> {
        let mut request = OutboundRequest::get("/recommendations");
        if !seed_tracks.is_empty() {
            request = request.query("seed_tracks", seed_tracks.join(","));
        }
        if !seed_genres.is_empty() {
            request = request.query("seed_genres", seed_genres.join(","));
        }
        self.request(&request.query("limit", limit)).await
    }

    pub async fn get_available_genres(&self) -> Result<Value, ApiError> {
        self.request(&OutboundRequest::get("/recommendations/available-genre-seeds"))
            .await
    }

    // ===== Playback =====

    pub async fn get_current_playback(&self) -> Result<Value, ApiError> {
        self.request(&OutboundRequest::get("/me/player")).await
    }

    /// Start or resume playback, optionally on a device, a context or a list of tracks
    pub async fn start_playback(
        &self,
        device_id: Option<&str>,
        context_uri: Option<&str>,
        uris: Option<&[String]>,
    ) -> Result<Value, ApiError> {
        let mut body = serde_json::Map::new();
        if let Some(context_uri) = context_uri {
            body.insert("context_uri".to_string(), json!(context_uri));
        }
        if let Some(uris) = uris {
            body.insert("uris".to_string(), json!(uris));
        }

        let mut request = OutboundRequest::put("/me/player/play").json(Value::Object(body));
        if let Some(device_id) = device_id {
            request = request.query("device_id", device_id);
        }
        self.request(&request).await
    }

    pub async fn pause_playback(&self) -> Result<Value, ApiError> {
        self.request(&OutboundRequest::put("/me/player/pause")).await
    }

    pub async fn skip_to_next(&self) -> Result<Value, ApiError> {
        self.request(&OutboundRequest::post("/me/player/next")).await
    }

    pub async fn skip_to_previous(&self) -> Result<Value, ApiError> {
        self.request(&OutboundRequest::post("/me/player/previous")).await
    }

    pub async fn set_volume(&self, volume_percent: u8) -> Result<Value, ApiError> {
        if volume_percent > MAX_VOLUME_PERCENT {
            return Err(ApiError::InvalidRequest(format!(
                "Volume must be between 0 and {}, got {}",
                MAX_VOLUME_PERCENT, volume_percent
            )));
        }
        self.request(&OutboundRequest::put("/me/player/volume").query("volume_percent", volume_percent))
            .await
    }
}
