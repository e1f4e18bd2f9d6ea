use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, error, warn};

use super::{FileSystem, SecureStorage};
use crate::auth::{PersistedSession, Session};
use crate::config::BuildProfile;

/// Persists the session blob at one fixed path.
///
/// Persistence is an optimization: losing it only means signing in again on
/// the next launch. None of the methods return errors; failures are logged.
pub struct CredentialStore {
    fs: Arc<dyn FileSystem>,
    secure: Arc<dyn SecureStorage>,
    path: PathBuf,
    profile: BuildProfile,
}

impl CredentialStore {
    pub fn new(
        fs: Arc<dyn FileSystem>,
        secure: Arc<dyn SecureStorage>,
        path: PathBuf,
        profile: BuildProfile,
    ) -> Self {
        Self {
            fs,
            secure,
            path,
            profile,
        }
    }

    /// Encrypt and write the session. Without encryption, development builds
    /// write plaintext and production builds write nothing.
    pub async fn save(&self, session: &Session) {
        let json = match serde_json::to_vec(&session.persisted()) {
            Ok(json) => json,
            Err(e) => {
                error!(error = %e, "Failed to serialize session");
                return;
            }
        };

        let blob = if self.secure.is_available().await {
            match self.secure.encrypt(&json).await {
                Ok(blob) => blob,
                Err(e) => {
                    warn!(error = %format!("{:#}", e), "Failed to encrypt session, not persisting");
                    return;
                }
            }
        } else if self.profile.allows_plaintext() {
            warn!(
                path = %self.path.display(),
                "Encryption unavailable, persisting session as plaintext (reduced security)"
            );
            json
        } else {
            debug!("Encryption unavailable, skipping session persistence");
            return;
        };

        match self.fs.write(&self.path, &blob).await {
            Ok(()) => debug!(path = %self.path.display(), "Session persisted"),
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to write session file"),
        }
    }

    /// Read back the stored session. Unreadable files are deleted.
    pub async fn load(&self) -> Option<Session> {
        if !self.fs.exists(&self.path).await {
            return None;
        }

        let encryption_available = self.secure.is_available().await;
        if !encryption_available && !self.profile.allows_plaintext() {
            debug!("Encryption unavailable, ignoring stored session");
            return None;
        }

        match self.read_session(encryption_available).await {
            Ok(session) => {
                debug!(user_id = %session.user_id, "Loaded stored session");
                Some(session)
            }
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %format!("{:#}", e),
                    "Stored session unreadable, removing it"
                );
                self.delete().await;
                None
            }
        }
    }

    /// Remove the stored session if present.
    pub async fn delete(&self) {
        if !self.fs.exists(&self.path).await {
            return;
        }
        match self.fs.delete(&self.path).await {
            Ok(()) => debug!(path = %self.path.display(), "Stored session removed"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("Stored session already gone");
            }
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                warn!(path = %self.path.display(), error = %e, "No permission to remove stored session");
            }
            Err(e) => {
                error!(path = %self.path.display(), error = %e, "Failed to remove stored session");
            }
        }
    }

    async fn read_session(&self, encryption_available: bool) -> Result<Session> {
        let bytes = self
            .fs
            .read(&self.path)
            .await
            .context("Failed to read session file")?;

        if encryption_available {
            match self.secure.decrypt(&bytes).await {
                Ok(plaintext) => {
                    return parse_session(&plaintext).context("Failed to parse decrypted session");
                }
                Err(e) if self.profile.allows_plaintext() => {
                    debug!(error = %e, "Decryption failed, trying plaintext fallback");
                }
                Err(e) => return Err(e.context("Failed to decrypt session file")),
            }
        }

        parse_session(&bytes).context("Failed to parse plaintext session")
    }
}

fn parse_session(bytes: &[u8]) -> Result<Session> {
    let persisted: PersistedSession = serde_json::from_slice(bytes)?;
    Ok(persisted.into())
}
