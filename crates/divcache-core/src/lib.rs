//! Core library for divcache.
//!
//! Reads divination card prices from a Supabase backend using an anonymous
//! identity, so the desktop app never asks the user to log in.
//!
//! - [`store`]: encrypted on-disk persistence of the session blob
//! - [`auth`]: identity lifecycle (restore, anonymous sign-in, sign-out)
//! - [`cache`]: in-memory TTL cache used by the read methods
//! - [`api`]: authorized edge-function and table reads
//! - [`config`]: endpoint, timeout and build-profile settings

pub mod api;
pub mod auth;
pub mod cache;
pub mod config;
pub mod models;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use api::{ApiError, BackendClient};
pub use auth::{AuthError, AuthManager, AuthPhase, AuthStatus, Session, SupabaseAuth};
pub use cache::ResponseCache;
pub use config::{BuildProfile, Config, Endpoint};
pub use models::{CardPrice, League, MarketPrices, PriceSnapshot};
pub use store::{CredentialStore, FileSystem, KeyringSecureStorage, LocalFileSystem, SecureStorage};
