//! REST API client module for the Spotify Web API.
//!
//! This module provides the `ApiClient` for calling the Spotify Web API
//! with a linked account: profile, playlists, search, recommendations,
//! library and playback.
//!
//! The API uses OAuth bearer tokens obtained through the backend relay;
//! an expired access token is refreshed once per failed call.

pub mod client;
pub mod error;
pub mod request;
pub mod resources;

pub use client::ApiClient;
pub use error::ApiError;
pub use request::OutboundRequest;
