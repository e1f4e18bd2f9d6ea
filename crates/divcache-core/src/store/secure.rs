//! OS-backed encryption for the session blob.
//!
//! A random master secret lives in the platform keychain (via `keyring`).
//! Each blob gets its own key, derived with Argon2 from the master secret and
//! a random salt, and is sealed with ChaCha20-Poly1305:
//!
//! ```text
//! salt (16) || nonce (12) || ciphertext + tag
//! ```

use anyhow::{anyhow, bail, Context, Result};
use argon2::Argon2;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use keyring::Entry;
use rand::rngs::OsRng;
use rand::RngCore;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

const SERVICE_NAME: &str = "divcache";
const MASTER_SECRET_ACCOUNT: &str = "session-encryption-key";

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;
const TAG_LEN: usize = 16;

/// Platform encryption capability.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SecureStorage: Send + Sync {
    /// Whether `encrypt`/`decrypt` can be used on this machine right now.
    async fn is_available(&self) -> bool;

    async fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>>;

    async fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>>;
}

/// Keychain-backed implementation of [`SecureStorage`].
pub struct KeyringSecureStorage {
    service_name: String,
    master_secret: OnceCell<Vec<u8>>,
}

impl KeyringSecureStorage {
    pub fn new() -> Self {
        Self::with_service_name(SERVICE_NAME)
    }

    pub fn with_service_name(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            master_secret: OnceCell::new(),
        }
    }

    async fn secret(&self) -> Result<&[u8]> {
        let secret = self
            .master_secret
            .get_or_try_init(|| async { self.load_or_create_secret() })
            .await?;
        Ok(secret.as_slice())
    }

    fn load_or_create_secret(&self) -> Result<Vec<u8>> {
        let entry = Entry::new(&self.service_name, MASTER_SECRET_ACCOUNT)
            .context("Failed to create keyring entry")?;

        match entry.get_password() {
            Ok(encoded) => BASE64
                .decode(encoded.trim())
                .context("Master secret in keychain is not valid base64"),
            Err(keyring::Error::NoEntry) => {
                debug!("No master secret in keychain, creating one");
                let mut secret = vec![0u8; KEY_LEN];
                OsRng.fill_bytes(&mut secret);
                entry
                    .set_password(&BASE64.encode(&secret))
                    .context("Failed to store master secret in keychain")?;
                Ok(secret)
            }
            Err(e) => Err(e).context("Failed to read master secret from keychain"),
        }
    }
}

impl Default for KeyringSecureStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SecureStorage for KeyringSecureStorage {
    async fn is_available(&self) -> bool {
        match self.secret().await {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %format!("{:#}", e), "Secure storage unavailable");
                false
            }
        }
    }

    async fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        seal(self.secret().await?, plaintext)
    }

    async fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        open(self.secret().await?, ciphertext)
    }
}

fn derive_key(secret: &[u8], salt: &[u8]) -> Result<[u8; KEY_LEN]> {
    let mut key = [0u8; KEY_LEN];
    Argon2::default()
        .hash_password_into(secret, salt, &mut key)
        .map_err(|e| anyhow!("Key derivation failed: {}", e))?;
    Ok(key)
}

pub(crate) fn seal(secret: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    let mut salt = [0u8; SALT_LEN];
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut salt);
    OsRng.fill_bytes(&mut nonce);

    let key = derive_key(secret, &salt)?;
    let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| anyhow!("Encryption failed"))?;

    let mut blob = Vec::with_capacity(SALT_LEN + NONCE_LEN + ciphertext.len());
    blob.extend_from_slice(&salt);
    blob.extend_from_slice(&nonce);
    blob.extend_from_slice(&ciphertext);
    Ok(blob)
}

pub(crate) fn open(secret: &[u8], blob: &[u8]) -> Result<Vec<u8>> {
    if blob.len() < SALT_LEN + NONCE_LEN + TAG_LEN {
        bail!("Ciphertext too short ({} bytes)", blob.len());
    }
    let (salt, rest) = blob.split_at(SALT_LEN);
    let (nonce, ciphertext) = rest.split_at(NONCE_LEN);

    let key = derive_key(secret, salt)?;
    let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| anyhow!("Decryption failed: blob is corrupt or sealed with another key"))
}
