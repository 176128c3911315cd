//! Authentication module for linking a Spotify account.
//!
//! This module provides:
//! - `CredentialPair`: the access/refresh token pair and its storage keys
//! - `TokenStore`: storage port with memory, file and OS keychain adapters
//! - `authorization_url` / `parse_callback`: the consent redirect round trip
//! - `TokenRelay`: code exchange and refresh through the backend relay

pub mod authorize;
pub mod credentials;
mod keychain;
pub mod relay_client;
pub mod store;

pub use authorize::{authorization_url, parse_callback, CallbackError, SCOPES};
pub use credentials::{CredentialPair, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY};
pub use keychain::KeyringStore;
pub use relay_client::{RefreshGrant, TokenGrant, TokenRelay};
pub use store::{FileStore, MemoryStore, TokenStore};
