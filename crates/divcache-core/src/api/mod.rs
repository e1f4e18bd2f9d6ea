//! Backend client for the Supabase project.
//!
//! This module provides the `BackendClient` that reads league and price
//! snapshot data. Every read is authorized with the anonymous session held
//! by the [`AuthManager`](crate::auth::AuthManager); snapshot reads are
//! cached for five minutes.
//!
//! Table reads go through the PostgREST endpoint (`/rest/v1`), everything
//! else through edge functions (`/functions/v1`).

pub mod client;
pub mod error;

pub use client::BackendClient;
pub use error::ApiError;
