//! Authorized reads against the Supabase project.
//!
//! Edge functions are called with a hard deadline; when it elapses the
//! request is dropped and the caller gets [`ApiError::Timeout`] naming the
//! function. Snapshot reads verify the token with an identity probe first and
//! re-authenticate at most once when the probe is rejected.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{header, Client, RequestBuilder};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use super::ApiError;
use crate::auth::{AuthError, AuthManager, AuthStatus};
use crate::cache::{cache_key, ResponseCache};
use crate::config::{Endpoint, DEFAULT_REQUEST_TIMEOUT_SECS};
use crate::models::{CardPrices, League, MarketPrices, PriceSnapshot};

// ============================================================================
// Constants
// ============================================================================

/// Edge function returning the newest price snapshot of a league.
const SNAPSHOT_FUNCTION: &str = "get-latest-snapshot";

/// Table listing known leagues per game.
const LEAGUES_TABLE: &str = "poe_leagues";

#[derive(Debug, Serialize)]
struct SnapshotRequest<'a> {
    game: &'a str,
    league: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotResponse {
    snapshot: SnapshotRow,
    card_prices: CardPriceSets,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotRow {
    fetched_at: String,
    exchange_chaos_to_divine: f64,
    stash_chaos_to_divine: f64,
    #[serde(default)]
    stacked_deck_chaos_cost: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct CardPriceSets {
    #[serde(default)]
    exchange: CardPrices,
    #[serde(default)]
    stash: CardPrices,
}

/// Flatten the edge function payload into a [`PriceSnapshot`].
///
/// A null stacked deck cost becomes 0; every other deviation is an error.
fn normalize_snapshot(raw: Value) -> Result<PriceSnapshot, ApiError> {
    if !raw.get("snapshot").is_some_and(Value::is_object) {
        return Err(ApiError::invalid_snapshot());
    }

    let SnapshotResponse {
        snapshot,
        card_prices,
    } = serde_json::from_value(raw)
        .map_err(|e| ApiError::Query(format!("Invalid snapshot payload: {}", e)))?;

    Ok(PriceSnapshot {
        timestamp: snapshot.fetched_at,
        stacked_deck_chaos_cost: snapshot.stacked_deck_chaos_cost.unwrap_or(0.0),
        exchange: MarketPrices {
            chaos_to_divine_ratio: snapshot.exchange_chaos_to_divine,
            card_prices: card_prices.exchange,
        },
        stash: MarketPrices {
            chaos_to_divine_ratio: snapshot.stash_chaos_to_divine,
            card_prices: card_prices.stash,
        },
    })
}

/// Backend client shared by the whole application.
/// Clone is cheap - the HTTP pool, auth manager and cache are all shared.
#[derive(Clone)]
pub struct BackendClient {
    client: Client,
    auth: Arc<AuthManager>,
    snapshots: Arc<ResponseCache<PriceSnapshot>>,
    request_timeout: Duration,
}

impl BackendClient {
    pub fn new(auth: Arc<AuthManager>) -> Result<Self, ApiError> {
        // No client-wide timeout; each call carries its own deadline
        let client = Client::builder().build()?;

        Ok(Self {
            client,
            auth,
            snapshots: Arc::new(ResponseCache::new()),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        })
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn auth(&self) -> &Arc<AuthManager> {
        &self.auth
    }

    /// Point the client at a project and sign in.
    pub async fn configure(&self, url: &str, api_key: &str) -> Result<(), ApiError> {
        self.auth.configure(url, api_key).await?;
        Ok(())
    }

    pub async fn is_configured(&self) -> bool {
        self.auth.is_configured().await
    }

    pub async fn auth_status(&self) -> AuthStatus {
        self.auth.auth_status().await
    }

    pub async fn sign_out(&self) {
        self.auth.sign_out().await
    }

    fn authorized(&self, request: RequestBuilder, endpoint: &Endpoint, token: &str) -> RequestBuilder {
        request
            .header("apikey", &endpoint.anon_key)
            .header(header::ACCEPT, "application/json")
            .bearer_auth(token)
    }

    async fn credentials(&self) -> Result<(Endpoint, String), ApiError> {
        let endpoint = self.auth.endpoint().await.ok_or(AuthError::NotConfigured)?;
        let token = self.auth.access_token().await?;
        Ok((endpoint, token))
    }

    /// Invoke an edge function with a JSON payload and decode its JSON reply.
    #[instrument(skip(self, payload))]
    pub async fn call_endpoint<T, B>(&self, name: &str, payload: &B) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let (endpoint, token) = self.credentials().await?;
        let url = format!("{}/functions/v1/{}", endpoint.base_url(), name);
        let request = self
            .authorized(self.client.post(&url), &endpoint, &token)
            .json(payload);

        let exchange = async {
            let response = request.send().await?;
            let status = response.status();
            let body = response.text().await?;
            Ok::<_, reqwest::Error>((status, body))
        };

        let (status, body) = match tokio::time::timeout(self.request_timeout, exchange).await {
            Ok(result) => result?,
            Err(_) => {
                let secs = self.request_timeout.as_secs();
                warn!(endpoint = name, timeout_secs = secs, "Edge function timed out");
                return Err(ApiError::Timeout {
                    endpoint: name.to_string(),
                    secs,
                });
            }
        };

        if !status.is_success() {
            return Err(ApiError::function_failed(name, status, &body));
        }

        serde_json::from_str(&body).map_err(|e| {
            ApiError::Query(format!("Invalid response from Edge Function {}: {}", name, e))
        })
    }

    /// Active leagues of a game, newest first.
    #[instrument(skip(self))]
    pub async fn get_leagues(&self, game: &str) -> Result<Vec<League>, ApiError> {
        self.auth.ensure_authenticated().await?;
        let (endpoint, token) = self.credentials().await?;

        let url = format!("{}/rest/v1/{}", endpoint.base_url(), LEAGUES_TABLE);
        let game_filter = format!("eq.{}", game);
        let response = self
            .authorized(self.client.get(&url), &endpoint, &token)
            .query(&[
                ("select", "*"),
                ("game", game_filter.as_str()),
                ("is_active", "eq.true"),
                ("order", "start_at.desc"),
            ])
            .timeout(self.request_timeout)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ApiError::query_failed(LEAGUES_TABLE, status, &body));
        }
        if body.trim().is_empty() {
            return Ok(Vec::new());
        }

        let leagues: Option<Vec<League>> = serde_json::from_str(&body)
            .map_err(|e| ApiError::Query(format!("Invalid response from {}: {}", LEAGUES_TABLE, e)))?;
        let leagues = leagues.unwrap_or_default();
        debug!(count = leagues.len(), "Fetched leagues");
        Ok(leagues)
    }

    /// Latest price snapshot of a league, served from cache for 5 minutes.
    ///
    /// Concurrent misses on the same key each fetch; only authentication
    /// is shared between them.
    #[instrument(skip(self))]
    pub async fn get_latest_snapshot(
        &self,
        game: &str,
        league: &str,
    ) -> Result<PriceSnapshot, ApiError> {
        let key = cache_key(&["snapshot", game, league]);
        if let Some(snapshot) = self.snapshots.get(&key) {
            debug!("Snapshot served from cache");
            return Ok(snapshot);
        }

        self.ensure_live_session().await?;

        let raw: Value = self
            .call_endpoint(SNAPSHOT_FUNCTION, &SnapshotRequest { game, league })
            .await?;
        let snapshot = normalize_snapshot(raw)?;

        self.snapshots.set(key, snapshot.clone());
        info!(timestamp = %snapshot.timestamp, "Fetched price snapshot");
        Ok(snapshot)
    }

    /// Make sure the server still accepts our token. One forced
    /// re-authentication is allowed; a second rejected probe is fatal.
    async fn ensure_live_session(&self) -> Result<(), ApiError> {
        self.auth.ensure_authenticated().await?;

        match self.auth.verify_identity().await {
            Ok(_) => return Ok(()),
            Err(e) => warn!(error = %e, "Identity probe rejected, re-authenticating"),
        }

        self.auth.reauthenticate().await?;

        match self.auth.verify_identity().await {
            Ok(user) => {
                debug!(user_id = %user.id, "Identity probe accepted after re-authentication");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Identity probe rejected again, giving up");
                Err(AuthError::retry_exhausted().into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use serde_json::json;
    use tempfile::TempDir;
    use wiremock::matchers::{any, body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::config::BuildProfile;
    use crate::testing::{factory_for, store_at, xor_storage, FakeProvider};

    const SNAPSHOT_PATH: &str = "/functions/v1/get-latest-snapshot";

    struct Harness {
        server: MockServer,
        provider: Arc<FakeProvider>,
        client: BackendClient,
        _dir: TempDir,
    }

    fn unconfigured_client(provider: &Arc<FakeProvider>, dir: &TempDir) -> BackendClient {
        let store = store_at(
            &dir.path().join("supabase-session.enc"),
            BuildProfile::Development,
            xor_storage(true),
        );
        let auth = Arc::new(AuthManager::new(store, factory_for(provider)));
        BackendClient::new(auth).unwrap()
    }

    async fn harness() -> Harness {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let provider = FakeProvider::new();
        let client = unconfigured_client(&provider, &dir);
        client.configure(&server.uri(), "anon-key").await.unwrap();
        Harness {
            server,
            provider,
            client,
            _dir: dir,
        }
    }

    fn raw_snapshot() -> Value {
        json!({
            "snapshot": {
                "id": "s1",
                "leagueId": "l1",
                "fetchedAt": "2025-01-01T00:00:00Z",
                "exchangeChaosToDivine": 150,
                "stashChaosToDivine": 148,
                "stackedDeckChaosCost": 1.5
            },
            "cardPrices": {
                "exchange": { "The Doctor": { "chaosValue": 900, "divineValue": 6 } },
                "stash": { "The Doctor": { "chaosValue": 880, "divineValue": 5.9 } }
            }
        })
    }

    async fn mount_snapshot(server: &MockServer, body: Value) {
        Mock::given(method("POST"))
            .and(path(SNAPSHOT_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
    }

    async fn requests_to(server: &MockServer, route: &str) -> usize {
        server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|request| request.url.path() == route)
            .count()
    }

    #[tokio::test]
    async fn test_call_endpoint_sends_signed_json_request() {
        let h = harness().await;
        Mock::given(method("POST"))
            .and(path("/functions/v1/echo"))
            .and(header("apikey", "anon-key"))
            .and(header("authorization", "Bearer anon-token-1"))
            .and(header("content-type", "application/json"))
            .and(body_json(json!({"x": 1})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(1)
            .mount(&h.server)
            .await;

        let reply: Value = h.client.call_endpoint("echo", &json!({"x": 1})).await.unwrap();
        assert_eq!(reply, json!({"ok": true}));
    }

    #[tokio::test]
    async fn test_call_endpoint_reports_non_success_status() {
        let h = harness().await;
        Mock::given(method("POST"))
            .and(path("/functions/v1/echo"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&h.server)
            .await;

        let err = h
            .client
            .call_endpoint::<Value, _>("echo", &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Query(_)));
        assert_eq!(err.to_string(), "Edge Function echo failed (500): boom");
    }

    #[tokio::test]
    async fn test_call_endpoint_times_out_with_named_error() {
        let h = harness().await;
        Mock::given(method("POST"))
            .and(path("/functions/v1/slow"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({}))
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&h.server)
            .await;

        let client = h.client.clone().with_request_timeout(Duration::from_secs(1));
        let err = client
            .call_endpoint::<Value, _>("slow", &json!({}))
            .await
            .unwrap_err();

        assert!(err.is_timeout());
        assert_eq!(err.to_string(), "Edge Function slow timed out after 1s");
    }

    #[test]
    fn test_default_deadline_is_ten_seconds() {
        let err = ApiError::Timeout {
            endpoint: SNAPSHOT_FUNCTION.to_string(),
            secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        };
        assert!(err.to_string().contains("timed out after 10s"));
    }

    #[tokio::test]
    async fn test_unconfigured_client_makes_no_requests() {
        let server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let provider = FakeProvider::new();
        let client = unconfigured_client(&provider, &dir);

        assert!(!client.is_configured().await);
        assert_eq!(client.auth_status().await, AuthStatus::default());

        let err = client
            .call_endpoint::<Value, _>("echo", &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Auth(AuthError::NotConfigured)));

        let err = client.get_leagues("poe1").await.unwrap_err();
        assert_eq!(err.to_string(), "Supabase client not configured");

        let err = client.get_latest_snapshot("poe1", "Settlers").await.unwrap_err();
        assert!(matches!(err, ApiError::Auth(AuthError::NotConfigured)));
        assert_eq!(provider.sign_in_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_snapshot_is_normalized() {
        let h = harness().await;
        Mock::given(method("POST"))
            .and(path(SNAPSHOT_PATH))
            .and(body_json(json!({"game": "poe1", "league": "Settlers"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(raw_snapshot()))
            .expect(1)
            .mount(&h.server)
            .await;

        let snapshot = h.client.get_latest_snapshot("poe1", "Settlers").await.unwrap();

        assert_eq!(
            serde_json::to_value(&snapshot).unwrap(),
            json!({
                "timestamp": "2025-01-01T00:00:00Z",
                "stackedDeckChaosCost": 1.5,
                "exchange": {
                    "chaosToDivineRatio": 150.0,
                    "cardPrices": { "The Doctor": { "chaosValue": 900.0, "divineValue": 6.0 } }
                },
                "stash": {
                    "chaosToDivineRatio": 148.0,
                    "cardPrices": { "The Doctor": { "chaosValue": 880.0, "divineValue": 5.9 } }
                }
            })
        );
        assert_eq!(h.provider.get_user_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_snapshot_cached_for_five_minutes() {
        let h = harness().await;
        mount_snapshot(&h.server, raw_snapshot()).await;

        let first = h.client.get_latest_snapshot("poe1", "Settlers").await.unwrap();
        let second = h.client.get_latest_snapshot("poe1", "Settlers").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(requests_to(&h.server, SNAPSHOT_PATH).await, 1);

        h.client
            .snapshots
            .backdate("snapshot:poe1:Settlers", chrono::Duration::minutes(6));
        h.client.get_latest_snapshot("poe1", "Settlers").await.unwrap();
        assert_eq!(requests_to(&h.server, SNAPSHOT_PATH).await, 2);
    }

    #[tokio::test]
    async fn test_snapshot_cache_keys_are_independent() {
        let h = harness().await;
        mount_snapshot(&h.server, raw_snapshot()).await;

        h.client.get_latest_snapshot("poe1", "Settlers").await.unwrap();
        h.client.get_latest_snapshot("poe2", "Dawn").await.unwrap();
        assert_eq!(requests_to(&h.server, SNAPSHOT_PATH).await, 2);
    }

    #[tokio::test]
    async fn test_snapshot_survives_one_rejected_probe() {
        let h = harness().await;
        mount_snapshot(&h.server, raw_snapshot()).await;
        h.provider.fail_next_probes(1);

        let snapshot = h.client.get_latest_snapshot("poe1", "Settlers").await.unwrap();
        assert_eq!(snapshot.exchange.chaos_to_divine_ratio, 150.0);
        assert_eq!(h.provider.get_user_calls.load(Ordering::SeqCst), 2);
        // Re-authentication restored the stored session instead of signing in again
        assert_eq!(h.provider.sign_in_calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.provider.set_session_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_snapshot_fails_after_second_rejected_probe() {
        let h = harness().await;
        Mock::given(method("POST"))
            .and(path(SNAPSHOT_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(raw_snapshot()))
            .expect(0)
            .mount(&h.server)
            .await;
        h.provider.fail_next_probes(2);

        let err = h.client.get_latest_snapshot("poe1", "Settlers").await.unwrap_err();
        assert!(matches!(err, ApiError::Auth(AuthError::Authentication(_))));
        assert_eq!(err.to_string(), "Authentication failed after retry");
        assert_eq!(h.provider.get_user_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_null_stacked_deck_cost_defaults_to_zero() {
        let h = harness().await;
        let mut raw = raw_snapshot();
        raw["snapshot"]["stackedDeckChaosCost"] = Value::Null;
        mount_snapshot(&h.server, raw).await;

        let snapshot = h.client.get_latest_snapshot("poe1", "Settlers").await.unwrap();
        assert_eq!(snapshot.stacked_deck_chaos_cost, 0.0);
    }

    #[tokio::test]
    async fn test_missing_snapshot_is_rejected_and_not_cached() {
        for body in [json!({"cardPrices": {}}), json!({"snapshot": null, "cardPrices": {}})] {
            let h = harness().await;
            mount_snapshot(&h.server, body).await;

            let err = h.client.get_latest_snapshot("poe1", "Settlers").await.unwrap_err();
            assert!(matches!(err, ApiError::Query(_)));
            assert_eq!(err.to_string(), "Invalid response structure from Supabase");
            assert!(h.client.snapshots.is_empty());
        }
    }

    #[test]
    fn test_malformed_snapshot_is_a_hard_error() {
        let mut raw = raw_snapshot();
        raw["snapshot"]["exchangeChaosToDivine"] = json!("lots");
        let err = normalize_snapshot(raw).unwrap_err();
        assert!(err.to_string().starts_with("Invalid snapshot payload"));

        let mut raw = raw_snapshot();
        raw.as_object_mut().unwrap().remove("cardPrices");
        assert!(normalize_snapshot(raw).is_err());
    }

    #[tokio::test]
    async fn test_get_leagues_filters_active_rows_of_game() {
        let h = harness().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/poe_leagues"))
            .and(query_param("select", "*"))
            .and(query_param("game", "eq.poe1"))
            .and(query_param("is_active", "eq.true"))
            .and(query_param("order", "start_at.desc"))
            .and(header("apikey", "anon-key"))
            .and(header("authorization", "Bearer anon-token-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"id": "2", "game": "poe1", "league_id": "Settlers", "name": "Settlers", "start_at": "2024-07-26T20:00:00+00:00", "is_active": true},
                {"id": "1", "game": "poe1", "league_id": "Standard", "name": "Standard", "start_at": null, "is_active": true}
            ])))
            .expect(1)
            .mount(&h.server)
            .await;

        let leagues = h.client.get_leagues("poe1").await.unwrap();
        assert_eq!(leagues.len(), 2);
        assert_eq!(leagues[0].name, "Settlers");
        assert!(leagues[1].start_at.is_none());
    }

    #[tokio::test]
    async fn test_get_leagues_empty_or_null_is_empty() {
        for body in ["[]", "null", ""] {
            let h = harness().await;
            Mock::given(method("GET"))
                .and(path("/rest/v1/poe_leagues"))
                .respond_with(ResponseTemplate::new(200).set_body_string(body))
                .mount(&h.server)
                .await;

            assert!(h.client.get_leagues("poe2").await.unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn test_get_leagues_reports_query_error() {
        let h = harness().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/poe_leagues"))
            .respond_with(
                ResponseTemplate::new(401).set_body_json(json!({"message": "JWT expired"})),
            )
            .mount(&h.server)
            .await;

        let err = h.client.get_leagues("poe1").await.unwrap_err();
        assert!(matches!(err, ApiError::Query(_)));
        assert_eq!(
            err.to_string(),
            r#"Query on poe_leagues failed (401): {"message":"JWT expired"}"#
        );
    }

    #[tokio::test]
    async fn test_sign_out_clears_identity() {
        let h = harness().await;
        assert!(h.client.auth_status().await.is_authenticated);

        h.client.sign_out().await;
        assert!(!h.client.is_configured().await);
        assert!(!h.client.auth_status().await.is_authenticated);
        assert_eq!(h.provider.sign_out_calls.load(Ordering::SeqCst), 1);
    }
}
