//! Local credential persistence.
//!
//! This module provides:
//! - `CredentialStore`: save/load/delete of the single session blob
//! - `SecureStorage`: encryption capability, implemented over the OS keychain
//! - `FileSystem`: file access, implemented over `tokio::fs`
//!
//! The blob is ciphertext whenever encryption is available. Development
//! builds may fall back to plaintext JSON; production builds never do.

pub mod credentials;
pub mod fs;
pub mod secure;

pub use credentials::CredentialStore;
pub use fs::{FileSystem, LocalFileSystem};
pub use secure::{KeyringSecureStorage, SecureStorage};

#[cfg(test)]
pub use secure::MockSecureStorage;
