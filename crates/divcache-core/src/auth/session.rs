use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Treat a token as expired this many seconds before its real expiry.
const TOKEN_EXPIRY_BUFFER_SECS: i64 = 60;

/// An active provider session.
///
/// Held in memory by the [`AuthManager`](super::AuthManager) for the process
/// lifetime. Only the reduced [`PersistedSession`] ever reaches disk.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub user_id: String,
    /// Access token expiry, when the provider reported one.
    pub expires_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            user_id: user_id.into(),
            expires_at: None,
        }
    }

    pub fn expiring_in(mut self, seconds: i64) -> Self {
        self.expires_at = Some(Utc::now() + Duration::seconds(seconds));
        self
    }

    /// Sessions without a known expiry are never considered expired locally;
    /// the provider decides.
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => {
                Utc::now() + Duration::seconds(TOKEN_EXPIRY_BUFFER_SECS) >= expires_at
            }
            None => false,
        }
    }

    pub fn persisted(&self) -> PersistedSession {
        PersistedSession {
            access_token: self.access_token.clone(),
            refresh_token: self.refresh_token.clone(),
            user_id: self.user_id.clone(),
        }
    }
}

// Custom Debug implementation to avoid logging tokens
impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("user_id", &self.user_id)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// On-disk form of a session: tokens and user id, nothing else.
#[derive(Clone, Serialize, Deserialize)]
pub struct PersistedSession {
    pub access_token: String,
    pub refresh_token: String,
    pub user_id: String,
}

impl From<PersistedSession> for Session {
    fn from(persisted: PersistedSession) -> Self {
        Session::new(
            persisted.access_token,
            persisted.refresh_token,
            persisted.user_id,
        )
    }
}

impl fmt::Debug for PersistedSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistedSession")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("user_id", &self.user_id)
            .finish()
    }
}

/// Identity lifecycle phase.
///
/// ```text
/// Unconfigured -> Configuring -> Authenticated
///       ^                              |
///       +--------- sign_out -----------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthPhase {
    #[default]
    Unconfigured,
    Configuring,
    Authenticated,
}

impl fmt::Display for AuthPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthPhase::Unconfigured => write!(f, "Unconfigured"),
            AuthPhase::Configuring => write!(f, "Configuring..."),
            AuthPhase::Authenticated => write!(f, "Authenticated"),
        }
    }
}

/// Snapshot of the identity state reported to the application.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct AuthStatus {
    pub is_authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl AuthStatus {
    pub fn authenticated(user_id: impl Into<String>) -> Self {
        Self {
            is_authenticated: true,
            user_id: Some(user_id.into()),
        }
    }
}
