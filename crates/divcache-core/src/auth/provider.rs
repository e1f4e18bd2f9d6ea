use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::broadcast;

use super::{ProviderError, Session};
use crate::config::Endpoint;

/// Auth-change notifications pushed by a provider.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthEvent {
    SignedIn(Session),
    TokenRefreshed(Session),
    SignedOut,
}

/// Identity as reported by the provider's user endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct User {
    pub id: String,
}

/// Remote identity provider the lifecycle manager drives.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Create a fresh anonymous identity. `Ok(None)` means the provider
    /// accepted the request but handed back no session.
    async fn sign_in_anonymously(&self) -> Result<Option<Session>, ProviderError>;

    /// Adopt a previously stored session, refreshing it if needed.
    async fn set_session(&self, session: &Session) -> Result<Session, ProviderError>;

    /// Session the provider currently holds, if any.
    async fn get_session(&self) -> Option<Session>;

    /// Ask the server who the current token belongs to.
    async fn get_user(&self) -> Result<User, ProviderError>;

    /// Revoke the current session. Local provider state is cleared even when
    /// the revoke call fails.
    async fn sign_out(&self) -> Result<(), ProviderError>;

    /// New receiver of auth-change events.
    fn subscribe(&self) -> broadcast::Receiver<AuthEvent>;
}

/// Builds a provider for an endpoint when the manager is configured.
pub type ProviderFactory = Arc<dyn Fn(&Endpoint) -> Arc<dyn IdentityProvider> + Send + Sync>;
