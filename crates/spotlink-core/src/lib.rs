//! Core library for spotlink.
//!
//! Links a Spotify account through an OAuth authorization-code flow and
//! calls the Spotify Web API with transparent, single-attempt token
//! refresh. The backend relay that keeps the client secret out of the
//! client lives in [`relay`].

pub mod api;
pub mod auth;
pub mod config;
pub mod relay;

pub use api::{ApiClient, ApiError, OutboundRequest};
pub use auth::{CredentialPair, FileStore, KeyringStore, MemoryStore, TokenStore};
pub use config::{ClientSettings, Config, TokenStoreKind};
