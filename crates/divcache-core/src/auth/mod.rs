//! Authentication module for the anonymous backend identity.
//!
//! This module provides:
//! - `AuthManager`: identity lifecycle with singleflight sign-in/restore
//! - `IdentityProvider`: the provider seam, implemented by `SupabaseAuth`
//! - `Session`: in-memory tokens, persisted in reduced form by the store

pub mod error;
pub mod manager;
pub mod provider;
pub mod session;
pub mod supabase;

pub use error::{AuthError, ProviderError};
pub use manager::AuthManager;
pub use provider::{AuthEvent, IdentityProvider, ProviderFactory, User};
pub use session::{AuthPhase, AuthStatus, PersistedSession, Session};
pub use supabase::SupabaseAuth;
