use thiserror::Error;

/// Failures of the identity lifecycle.
///
/// `Clone` because one authentication attempt is shared by every concurrent
/// caller waiting on it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Supabase client not configured")]
    NotConfigured,

    #[error("{0}")]
    Authentication(String),
}

impl AuthError {
    pub(crate) fn sign_in_failed(reason: impl std::fmt::Display) -> Self {
        AuthError::Authentication(format!("Failed to authenticate: {}", reason))
    }

    pub(crate) fn no_session_returned() -> Self {
        AuthError::Authentication("No session returned from anonymous sign-in".to_string())
    }

    pub(crate) fn not_authenticated() -> Self {
        AuthError::Authentication("Not authenticated".to_string())
    }

    pub(crate) fn superseded() -> Self {
        AuthError::Authentication(
            "Authentication cancelled by sign-out or reconfiguration".to_string(),
        )
    }

    pub(crate) fn retry_exhausted() -> Self {
        AuthError::Authentication("Authentication failed after retry".to_string())
    }
}

/// Errors reported by an identity provider.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Network error: {0}")]
    Http(#[from] reqwest::Error),

    /// The provider answered with an error; `message` is its own wording.
    #[error("{message}")]
    Api { status: u16, message: String },

    #[error("No active session")]
    MissingSession,

    #[error("Invalid response: {0}")]
    Decode(String),
}

impl ProviderError {
    /// True when the provider rejected the credentials themselves.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ProviderError::Api { status: 401 | 403, .. })
    }
}
