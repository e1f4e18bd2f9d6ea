//! Supabase GoTrue implementation of [`IdentityProvider`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, Response};
use serde::Deserialize;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

use super::{AuthEvent, IdentityProvider, ProviderError, ProviderFactory, Session, User};
use crate::config::Endpoint;

/// HTTP request timeout for auth calls.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Capacity of the auth-change broadcast channel.
const EVENT_CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    user: Option<User>,
}

impl TokenResponse {
    fn into_session(self) -> Option<Session> {
        let session = Session::new(self.access_token?, self.refresh_token?, self.user?.id);
        Some(match self.expires_in {
            Some(secs) => session.expiring_in(secs),
            None => session,
        })
    }
}

/// GoTrue reports errors under different keys depending on the endpoint.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    msg: Option<String>,
    error_description: Option<String>,
    message: Option<String>,
    error: Option<String>,
}

pub struct SupabaseAuth {
    client: Client,
    endpoint: Endpoint,
    session: RwLock<Option<Session>>,
    events: broadcast::Sender<AuthEvent>,
}

impl SupabaseAuth {
    pub fn new(endpoint: Endpoint) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Failed to build auth HTTP client, using defaults");
                Client::new()
            });
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            client,
            endpoint,
            session: RwLock::new(None),
            events,
        }
    }

    /// Factory for [`AuthManager`](super::AuthManager) wiring.
    pub fn factory() -> ProviderFactory {
        Arc::new(|endpoint: &Endpoint| {
            Arc::new(SupabaseAuth::new(endpoint.clone())) as Arc<dyn IdentityProvider>
        })
    }

    fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.endpoint.base_url(), path)
    }

    /// Exchange a refresh token for a new session and adopt it.
    pub async fn refresh_session(&self, refresh_token: &str) -> Result<Session, ProviderError> {
        debug!("Refreshing session");
        let response = self
            .client
            .post(self.auth_url("token"))
            .query(&[("grant_type", "refresh_token")])
            .header("apikey", &self.endpoint.anon_key)
            .json(&serde_json::json!({ "refresh_token": refresh_token }))
            .send()
            .await?;

        let response = Self::check_response(response).await?;
        let body: TokenResponse = response.json().await?;
        let session = body
            .into_session()
            .ok_or_else(|| ProviderError::Decode("refresh response carried no session".into()))?;

        self.adopt(session.clone()).await;
        info!(user_id = %session.user_id, "Session refreshed");
        self.emit(AuthEvent::TokenRefreshed(session.clone()));
        Ok(session)
    }

    async fn fetch_user(&self, access_token: &str) -> Result<User, ProviderError> {
        let response = self
            .client
            .get(self.auth_url("user"))
            .header("apikey", &self.endpoint.anon_key)
            .bearer_auth(access_token)
            .send()
            .await?;

        let response = Self::check_response(response).await?;
        response
            .json()
            .await
            .map_err(|e| ProviderError::Decode(format!("user response: {}", e)))
    }

    async fn check_response(response: Response) -> Result<Response, ProviderError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let parsed: ErrorBody = serde_json::from_str(&body).unwrap_or_default();
        let message = parsed
            .msg
            .or(parsed.error_description)
            .or(parsed.message)
            .or(parsed.error)
            .unwrap_or_else(|| {
                if body.trim().is_empty() {
                    status.to_string()
                } else {
                    body
                }
            });
        Err(ProviderError::Api {
            status: status.as_u16(),
            message,
        })
    }

    async fn adopt(&self, session: Session) {
        *self.session.write().await = Some(session);
    }

    fn emit(&self, event: AuthEvent) {
        // No receivers is fine
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl IdentityProvider for SupabaseAuth {
    async fn sign_in_anonymously(&self) -> Result<Option<Session>, ProviderError> {
        debug!("Signing in anonymously");
        let response = self
            .client
            .post(self.auth_url("signup"))
            .header("apikey", &self.endpoint.anon_key)
            .header(header::CONTENT_TYPE, "application/json")
            .json(&serde_json::json!({}))
            .send()
            .await?;

        let response = Self::check_response(response).await?;
        let body: TokenResponse = response.json().await?;
        let Some(session) = body.into_session() else {
            return Ok(None);
        };

        self.adopt(session.clone()).await;
        info!(user_id = %session.user_id, "Anonymous sign-in succeeded");
        self.emit(AuthEvent::SignedIn(session.clone()));
        Ok(Some(session))
    }

    async fn set_session(&self, session: &Session) -> Result<Session, ProviderError> {
        if !session.is_expired() {
            match self.fetch_user(&session.access_token).await {
                Ok(user) => {
                    let adopted = Session {
                        user_id: user.id,
                        ..session.clone()
                    };
                    self.adopt(adopted.clone()).await;
                    self.emit(AuthEvent::SignedIn(adopted.clone()));
                    return Ok(adopted);
                }
                Err(e) if e.is_unauthorized() => {
                    debug!(error = %e, "Stored access token rejected, trying refresh token");
                }
                Err(e) => return Err(e),
            }
        }
        self.refresh_session(&session.refresh_token).await
    }

    async fn get_session(&self) -> Option<Session> {
        self.session.read().await.clone()
    }

    async fn get_user(&self) -> Result<User, ProviderError> {
        let session = self
            .get_session()
            .await
            .ok_or(ProviderError::MissingSession)?;
        self.fetch_user(&session.access_token).await
    }

    async fn sign_out(&self) -> Result<(), ProviderError> {
        let session = self.session.write().await.take();
        let result = match session {
            Some(session) => {
                let sent = self
                    .client
                    .post(self.auth_url("logout"))
                    .header("apikey", &self.endpoint.anon_key)
                    .bearer_auth(&session.access_token)
                    .send()
                    .await;
                match sent {
                    Ok(response) => Self::check_response(response).await.map(|_| ()),
                    Err(e) => Err(e.into()),
                }
            }
            None => Ok(()),
        };
        self.emit(AuthEvent::SignedOut);
        result
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}
