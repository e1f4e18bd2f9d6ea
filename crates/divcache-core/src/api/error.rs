use reqwest::StatusCode;
use thiserror::Error;

use crate::auth::AuthError;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("Edge Function {endpoint} timed out after {secs}s")]
    Timeout { endpoint: String, secs: u64 },

    #[error(transparent)]
    Network(#[from] reqwest::Error),

    #[error("{0}")]
    Query(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Message for a snapshot payload without a usable `snapshot` object.
pub(crate) const INVALID_SNAPSHOT_STRUCTURE: &str = "Invalid response structure from Supabase";

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            return body.to_string();
        }
        let mut end = MAX_ERROR_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
    }

    /// Non-2xx reply from an edge function.
    pub fn function_failed(name: &str, status: StatusCode, body: &str) -> Self {
        ApiError::Query(format!(
            "Edge Function {} failed ({}): {}",
            name,
            status.as_u16(),
            Self::truncate_body(body)
        ))
    }

    /// Non-2xx reply from a table read.
    pub fn query_failed(table: &str, status: StatusCode, body: &str) -> Self {
        ApiError::Query(format!(
            "Query on {} failed ({}): {}",
            table,
            status.as_u16(),
            Self::truncate_body(body)
        ))
    }

    pub fn invalid_snapshot() -> Self {
        ApiError::Query(INVALID_SNAPSHOT_STRUCTURE.to_string())
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ApiError::Timeout { .. })
    }
}
