//! # Authentication lifecycle
//!
//! `AuthManager` owns the anonymous identity for the whole process. It is
//! built once at startup and shared behind an `Arc`.
//!
//! ## Singleflight
//!
//! `ensure_authenticated` collapses concurrent callers onto one in-flight
//! attempt. The check for an existing attempt and the creation of a new one
//! happen under a single lock acquisition, so two callers can never both
//! start a sign-in. The attempt clears itself from the slot before its result
//! is delivered.
//!
//! Sign-out and reconfigure bump a generation counter. An attempt that
//! finishes under an older generation neither persists nor adopts its
//! session; its callers get an error.
//!
//! ## Listener
//!
//! After the first successful attempt the manager subscribes to provider
//! auth-change events (once per configured provider): sign-out deletes the
//! stored credential, token refresh persists the new session.

use std::sync::{Arc, Weak};

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use super::{
    AuthError, AuthEvent, AuthPhase, AuthStatus, IdentityProvider, ProviderFactory, Session, User,
};
use crate::config::Endpoint;
use crate::store::CredentialStore;

type AuthAttempt = Shared<BoxFuture<'static, Result<Session, AuthError>>>;

/// Live auth-change subscription. Dropping it unsubscribes.
struct ListenerHandle {
    task: JoinHandle<()>,
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[derive(Default)]
struct State {
    phase: AuthPhase,
    endpoint: Option<Endpoint>,
    provider: Option<Arc<dyn IdentityProvider>>,
    session: Option<Session>,
    in_flight: Option<AuthAttempt>,
    listener: Option<ListenerHandle>,
    /// Bumped on sign-out and reconfigure so a stale attempt cannot write
    /// its result back.
    generation: u64,
}

impl State {
    fn reset(&mut self) -> Option<ListenerHandle> {
        self.generation += 1;
        self.phase = AuthPhase::Unconfigured;
        self.endpoint = None;
        self.provider = None;
        self.session = None;
        self.in_flight = None;
        self.listener.take()
    }
}

struct Inner {
    store: CredentialStore,
    factory: ProviderFactory,
    state: Mutex<State>,
}

pub struct AuthManager {
    inner: Arc<Inner>,
}

impl AuthManager {
    pub fn new(store: CredentialStore, factory: ProviderFactory) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                factory,
                state: Mutex::new(State::default()),
            }),
        }
    }

    /// Point the manager at a backend and authenticate right away.
    ///
    /// Empty `url` or `api_key` leaves the manager unconfigured.
    #[instrument(skip(self, api_key))]
    pub async fn configure(&self, url: &str, api_key: &str) -> Result<(), AuthError> {
        if url.trim().is_empty() || api_key.trim().is_empty() {
            warn!("Backend URL or key missing, staying unconfigured");
            return Ok(());
        }

        let previous_listener = {
            let mut state = self.inner.state.lock().await;
            let previous_listener = state.reset();
            let endpoint = Endpoint::new(url.trim(), api_key.trim());
            state.provider = Some((self.inner.factory)(&endpoint));
            state.endpoint = Some(endpoint);
            state.phase = AuthPhase::Configuring;
            previous_listener
        };
        drop(previous_listener);

        info!("Backend configured");
        self.ensure_authenticated().await.map(|_| ())
    }

    pub async fn is_configured(&self) -> bool {
        self.inner.state.lock().await.provider.is_some()
    }

    pub async fn phase(&self) -> AuthPhase {
        self.inner.state.lock().await.phase
    }

    pub async fn endpoint(&self) -> Option<Endpoint> {
        self.inner.state.lock().await.endpoint.clone()
    }

    pub async fn provider(&self) -> Option<Arc<dyn IdentityProvider>> {
        self.inner.state.lock().await.provider.clone()
    }

    /// Return the current session, restoring or signing in if needed.
    ///
    /// At most one restore/sign-in runs at a time no matter how many callers
    /// arrive concurrently; they all receive the same outcome.
    pub async fn ensure_authenticated(&self) -> Result<Session, AuthError> {
        let attempt = {
            let mut state = self.inner.state.lock().await;
            let provider = state.provider.clone().ok_or(AuthError::NotConfigured)?;

            if state.phase == AuthPhase::Authenticated {
                if let Some(session) = &state.session {
                    return Ok(session.clone());
                }
            }

            if let Some(attempt) = state.in_flight.clone() {
                debug!("Joining in-flight authentication attempt");
                attempt
            } else {
                debug!("Starting authentication attempt");
                state.phase = AuthPhase::Configuring;
                let attempt =
                    Self::authenticate(Arc::clone(&self.inner), provider, state.generation)
                        .boxed()
                        .shared();
                state.in_flight = Some(attempt.clone());
                attempt
            }
        };
        attempt.await
    }

    /// Drop the authenticated state and run the restore/sign-in protocol
    /// again, e.g. after the server rejected a token that looked valid.
    pub async fn reauthenticate(&self) -> Result<Session, AuthError> {
        {
            let mut state = self.inner.state.lock().await;
            if state.in_flight.is_none() && state.phase == AuthPhase::Authenticated {
                state.phase = AuthPhase::Configuring;
                state.session = None;
            }
        }
        self.ensure_authenticated().await
    }

    /// Probe the server with the provider's current token.
    pub async fn verify_identity(&self) -> Result<User, AuthError> {
        let provider = self.provider().await.ok_or(AuthError::NotConfigured)?;
        provider
            .get_user()
            .await
            .map_err(|e| AuthError::Authentication(e.to_string()))
    }

    /// Access token of the provider's active session.
    pub async fn access_token(&self) -> Result<String, AuthError> {
        let provider = self.provider().await.ok_or(AuthError::NotConfigured)?;
        provider
            .get_session()
            .await
            .map(|session| session.access_token)
            .ok_or_else(AuthError::not_authenticated)
    }

    /// Never fails; an unconfigured manager is simply unauthenticated.
    pub async fn auth_status(&self) -> AuthStatus {
        let Some(provider) = self.provider().await else {
            return AuthStatus::default();
        };
        match provider.get_session().await {
            Some(session) => AuthStatus::authenticated(session.user_id),
            None => AuthStatus::default(),
        }
    }

    /// Unsubscribe, revoke and forget the stored credential. Each step runs
    /// even if an earlier one fails; local state is always cleared.
    #[instrument(skip(self))]
    pub async fn sign_out(&self) {
        let (provider, listener) = {
            let mut state = self.inner.state.lock().await;
            let Some(provider) = state.provider.clone() else {
                debug!("Sign-out requested while unconfigured");
                return;
            };
            let listener = state.reset();
            (provider, listener)
        };

        drop(listener);

        if let Err(e) = provider.sign_out().await {
            warn!(error = %e, "Provider sign-out failed");
        }
        self.inner.store.delete().await;
        info!("Signed out");
    }

    async fn authenticate(
        inner: Arc<Inner>,
        provider: Arc<dyn IdentityProvider>,
        generation: u64,
    ) -> Result<Session, AuthError> {
        let result = Self::restore_or_sign_in(&inner.store, provider.as_ref()).await;

        // Held across the save so a concurrent sign-out deletes after us
        let mut state = inner.state.lock().await;
        if state.generation != generation {
            debug!("Discarding result of a superseded authentication attempt");
            return Err(AuthError::superseded());
        }
        state.in_flight = None;
        match &result {
            Ok(session) => {
                inner.store.save(session).await;
                state.phase = AuthPhase::Authenticated;
                state.session = Some(session.clone());
                if state.listener.is_none() {
                    state.listener = Some(Self::listen(&inner, provider.as_ref()));
                }
            }
            Err(e) => warn!(error = %e, "Authentication attempt failed"),
        }
        result
    }

    async fn restore_or_sign_in(
        store: &CredentialStore,
        provider: &dyn IdentityProvider,
    ) -> Result<Session, AuthError> {
        if let Some(stored) = store.load().await {
            match provider.set_session(&stored).await {
                Ok(session) => {
                    info!(user_id = %session.user_id, "Restored stored session");
                    return Ok(session);
                }
                Err(e) => {
                    warn!(error = %e, "Stored session rejected, falling back to anonymous sign-in");
                }
            }
        }

        match provider.sign_in_anonymously().await {
            Ok(Some(session)) => {
                info!(user_id = %session.user_id, "Signed in anonymously");
                Ok(session)
            }
            Ok(None) => Err(AuthError::no_session_returned()),
            Err(e) => Err(AuthError::sign_in_failed(e)),
        }
    }

    fn listen(inner: &Arc<Inner>, provider: &dyn IdentityProvider) -> ListenerHandle {
        let mut events = provider.subscribe();
        let weak: Weak<Inner> = Arc::downgrade(inner);
        debug!("Subscribing to auth-change events");

        let task = tokio::spawn(async move {
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Auth event listener lagged");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                Self::on_auth_event(&inner, event).await;
            }
        });
        ListenerHandle { task }
    }

    async fn on_auth_event(inner: &Inner, event: AuthEvent) {
        match event {
            AuthEvent::SignedOut => {
                info!("Provider signed out, removing stored session");
                inner.store.delete().await;
            }
            AuthEvent::TokenRefreshed(session) => {
                debug!(user_id = %session.user_id, "Token refreshed, persisting session");
                inner.store.save(&session).await;
                let mut state = inner.state.lock().await;
                if state.phase == AuthPhase::Authenticated {
                    state.session = Some(session);
                }
            }
            AuthEvent::SignedIn(_) => {}
        }
    }
}
