//! In-memory response caching.
//!
//! `ResponseCache` memoizes read results per composite key (for example game
//! plus league) and treats entries older than 5 minutes as absent. Nothing is
//! persisted; the cache lives as long as the backend client that owns it.

pub mod response;

pub use response::{cache_key, CachedData, ResponseCache, CACHE_TTL_MINUTES};
