//! Shared fakes for unit tests.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::auth::{AuthEvent, IdentityProvider, ProviderError, ProviderFactory, Session, User};
use crate::config::{BuildProfile, Endpoint};
use crate::store::{CredentialStore, LocalFileSystem, MockSecureStorage};

pub(crate) const FAKE_USER_ID: &str = "anon-user-1";

#[derive(Debug, Clone)]
pub(crate) enum SignInOutcome {
    Succeed,
    NoSession,
    Fail(String),
}

/// In-memory identity provider that counts every call.
pub(crate) struct FakeProvider {
    pub sign_in_calls: AtomicUsize,
    pub set_session_calls: AtomicUsize,
    pub get_user_calls: AtomicUsize,
    pub sign_out_calls: AtomicUsize,
    pub subscribe_calls: AtomicUsize,
    sign_in_delay: Mutex<Duration>,
    sign_in_outcome: Mutex<SignInOutcome>,
    reject_stored: AtomicBool,
    probe_failures: AtomicUsize,
    fail_sign_out: AtomicBool,
    session: Mutex<Option<Session>>,
    events: broadcast::Sender<AuthEvent>,
}

impl FakeProvider {
    pub fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(16);
        Arc::new(Self {
            sign_in_calls: AtomicUsize::new(0),
            set_session_calls: AtomicUsize::new(0),
            get_user_calls: AtomicUsize::new(0),
            sign_out_calls: AtomicUsize::new(0),
            subscribe_calls: AtomicUsize::new(0),
            sign_in_delay: Mutex::new(Duration::ZERO),
            sign_in_outcome: Mutex::new(SignInOutcome::Succeed),
            reject_stored: AtomicBool::new(false),
            probe_failures: AtomicUsize::new(0),
            fail_sign_out: AtomicBool::new(false),
            session: Mutex::new(None),
            events,
        })
    }

    pub fn set_sign_in_delay(&self, delay: Duration) {
        *self.sign_in_delay.lock().unwrap() = delay;
    }

    pub fn set_sign_in_outcome(&self, outcome: SignInOutcome) {
        *self.sign_in_outcome.lock().unwrap() = outcome;
    }

    pub fn reject_stored_sessions(&self) {
        self.reject_stored.store(true, Ordering::SeqCst);
    }

    /// Make the next `count` identity probes fail with 401.
    pub fn fail_next_probes(&self, count: usize) {
        self.probe_failures.store(count, Ordering::SeqCst);
    }

    pub fn fail_sign_out(&self) {
        self.fail_sign_out.store(true, Ordering::SeqCst);
    }

    pub fn emit(&self, event: AuthEvent) {
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl IdentityProvider for FakeProvider {
    async fn sign_in_anonymously(&self) -> Result<Option<Session>, ProviderError> {
        let call = self.sign_in_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let delay = *self.sign_in_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let outcome = self.sign_in_outcome.lock().unwrap().clone();
        match outcome {
            SignInOutcome::Succeed => {
                let session = Session::new(
                    format!("anon-token-{call}"),
                    format!("anon-refresh-{call}"),
                    FAKE_USER_ID,
                );
                *self.session.lock().unwrap() = Some(session.clone());
                Ok(Some(session))
            }
            SignInOutcome::NoSession => Ok(None),
            SignInOutcome::Fail(message) => Err(ProviderError::Api {
                status: 422,
                message,
            }),
        }
    }

    async fn set_session(&self, session: &Session) -> Result<Session, ProviderError> {
        self.set_session_calls.fetch_add(1, Ordering::SeqCst);
        if self.reject_stored.load(Ordering::SeqCst) {
            return Err(ProviderError::Api {
                status: 401,
                message: "invalid JWT".to_string(),
            });
        }
        *self.session.lock().unwrap() = Some(session.clone());
        Ok(session.clone())
    }

    async fn get_session(&self) -> Option<Session> {
        self.session.lock().unwrap().clone()
    }

    async fn get_user(&self) -> Result<User, ProviderError> {
        self.get_user_calls.fetch_add(1, Ordering::SeqCst);
        if self.probe_failures.load(Ordering::SeqCst) > 0 {
            self.probe_failures.fetch_sub(1, Ordering::SeqCst);
            return Err(ProviderError::Api {
                status: 401,
                message: "JWT expired".to_string(),
            });
        }
        let session = self
            .session
            .lock()
            .unwrap()
            .clone()
            .ok_or(ProviderError::MissingSession)?;
        Ok(User {
            id: session.user_id,
        })
    }

    async fn sign_out(&self) -> Result<(), ProviderError> {
        self.sign_out_calls.fetch_add(1, Ordering::SeqCst);
        *self.session.lock().unwrap() = None;
        if self.fail_sign_out.load(Ordering::SeqCst) {
            return Err(ProviderError::Api {
                status: 500,
                message: "revoke failed".to_string(),
            });
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        self.events.subscribe()
    }
}

pub(crate) fn factory_for(provider: &Arc<FakeProvider>) -> ProviderFactory {
    let provider = Arc::clone(provider);
    Arc::new(move |_: &Endpoint| Arc::clone(&provider) as Arc<dyn IdentityProvider>)
}

pub(crate) fn xor(data: &[u8]) -> Vec<u8> {
    data.iter().map(|b| b ^ 0x5a).collect()
}

/// Secure storage double that "encrypts" with a fixed XOR.
pub(crate) fn xor_storage(available: bool) -> MockSecureStorage {
    let mut secure = MockSecureStorage::new();
    secure.expect_is_available().returning(move || available);
    secure.expect_encrypt().returning(|data| Ok(xor(data)));
    secure.expect_decrypt().returning(|data| Ok(xor(data)));
    secure
}

pub(crate) fn store_at(
    path: &Path,
    profile: BuildProfile,
    secure: MockSecureStorage,
) -> CredentialStore {
    CredentialStore::new(
        Arc::new(LocalFileSystem),
        Arc::new(secure),
        path.to_path_buf(),
        profile,
    )
}

/// Poll `condition` until it holds, failing the test after two seconds.
pub(crate) async fn wait_until(condition: impl Fn() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}
