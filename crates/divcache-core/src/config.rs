//! Application configuration management.
//!
//! Configuration is stored at `~/.config/divcache/config.json` and can be
//! overridden with `DIVCACHE_*` environment variables (the CLI loads a `.env`
//! file first). The encrypted session blob lives in the per-user data
//! directory, see [`Config::session_path`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Application name used for config/data directory paths
const APP_NAME: &str = "divcache";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Session blob file name in the data directory
pub const SESSION_FILE: &str = "supabase-session.enc";

/// Edge function deadline used when none is configured.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

const ENV_URL: &str = "DIVCACHE_SUPABASE_URL";
const ENV_ANON_KEY: &str = "DIVCACHE_SUPABASE_ANON_KEY";
const ENV_TIMEOUT: &str = "DIVCACHE_REQUEST_TIMEOUT_SECS";
const ENV_PROFILE: &str = "DIVCACHE_PROFILE";

/// Controls what happens when OS-backed encryption is unavailable.
///
/// Development builds fall back to plaintext session files; production builds
/// refuse to write unencrypted secrets at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildProfile {
    Development,
    Production,
}

impl BuildProfile {
    /// Profile of the running binary.
    pub fn current() -> Self {
        if cfg!(debug_assertions) {
            BuildProfile::Development
        } else {
            BuildProfile::Production
        }
    }

    pub fn allows_plaintext(self) -> bool {
        self == BuildProfile::Development
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "development" | "dev" => Some(BuildProfile::Development),
            "production" | "prod" => Some(BuildProfile::Production),
            _ => None,
        }
    }
}

impl Default for BuildProfile {
    fn default() -> Self {
        Self::current()
    }
}

/// Base URL and anon key of the backend project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub url: String,
    pub anon_key: String,
}

impl Endpoint {
    pub fn new(url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            anon_key: anon_key.into(),
        }
    }

    /// URL without a trailing slash, ready for path concatenation.
    pub fn base_url(&self) -> &str {
        self.url.trim_end_matches('/')
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    pub supabase_url: Option<String>,
    pub supabase_anon_key: Option<String>,
    pub request_timeout_secs: Option<u64>,
    pub profile: Option<BuildProfile>,
}

impl Config {
    /// Load the config file (if any) and apply environment overrides.
    pub fn load() -> Result<Self> {
        let config = Self::from_file(&Self::config_path()?)?;
        Ok(config.with_overrides(|key| std::env::var(key).ok()))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    /// Apply `DIVCACHE_*` overrides using the given variable lookup.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(url) = lookup(ENV_URL) {
            self.supabase_url = Some(url);
        }
        if let Some(key) = lookup(ENV_ANON_KEY) {
            self.supabase_anon_key = Some(key);
        }
        if let Some(raw) = lookup(ENV_TIMEOUT) {
            match raw.trim().parse() {
                Ok(secs) => self.request_timeout_secs = Some(secs),
                Err(_) => warn!(value = %raw, "Ignoring invalid {}", ENV_TIMEOUT),
            }
        }
        if let Some(raw) = lookup(ENV_PROFILE) {
            match BuildProfile::parse(&raw) {
                Some(profile) => self.profile = Some(profile),
                None => warn!(value = %raw, "Ignoring invalid {}", ENV_PROFILE),
            }
        }
        self
    }

    /// Backend endpoint, if both URL and key are present and non-empty.
    pub fn endpoint(&self) -> Option<Endpoint> {
        match (&self.supabase_url, &self.supabase_anon_key) {
            (Some(url), Some(key)) if !url.trim().is_empty() && !key.trim().is_empty() => {
                Some(Endpoint::new(url.trim(), key.trim()))
            }
            _ => None,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(
            self.request_timeout_secs
                .filter(|secs| *secs > 0)
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
        )
    }

    pub fn profile(&self) -> BuildProfile {
        self.profile.unwrap_or_default()
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Fixed location of the persisted session blob.
    pub fn session_path() -> Result<PathBuf> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME).join(SESSION_FILE))
    }
}
