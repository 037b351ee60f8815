//! The token gate: hands out a currently valid HubSpot access token and
//! refreshes it when the stored one has expired.
//!
//! Refreshes are single-flight. The first caller that needs a refresh spawns
//! it as a task and parks a shared handle in `inflight`; everyone arriving
//! while it runs awaits that same handle and receives the same token or the
//! same error. The task runs to completion even if every waiter goes away, so
//! a response the provider already accepted is always persisted.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use super::clock::{Clock, SystemClock};
use super::record::TokenRecord;
use crate::error::TokenError;
use crate::providers::{OAuthProvider, TokenSet};
use crate::store::TokenStore;

type Flight = Shared<BoxFuture<'static, Result<String, TokenError>>>;

struct InFlight {
    shared: Flight,
    task: AbortHandle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RefreshMode {
    /// Started because a caller saw an expired record. Re-checks the store
    /// first, since a flight that just finished may already have fixed it.
    IfExpired,
    /// Explicit refresh request; always calls the provider.
    Force,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenState {
    Absent,
    Valid,
    Expired,
}

/// Snapshot of the stored record, safe to expose (no token material).
#[derive(Debug, Clone, Serialize)]
pub struct TokenStatus {
    pub state: TokenState,
    pub expires_at: Option<DateTime<Utc>>,
    pub has_refresh_token: bool,
    pub store: String,
}

pub struct TokenGate {
    store: Arc<dyn TokenStore>,
    provider: Arc<dyn OAuthProvider>,
    clock: Arc<dyn Clock>,
    inflight: Mutex<Option<InFlight>>,
}

impl TokenGate {
    pub fn new(store: Arc<dyn TokenStore>, provider: Arc<dyn OAuthProvider>) -> Self {
        Self {
            store,
            provider,
            clock: Arc::new(SystemClock),
            inflight: Mutex::new(None),
        }
    }

    /// Replace the wall clock (tests).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn provider(&self) -> &dyn OAuthProvider {
        self.provider.as_ref()
    }

    /// Get a currently valid access token, refreshing if the stored one expired.
    ///
    /// The fast path is a single store read with no network traffic.
    pub async fn get_valid_access_token(&self) -> Result<String, TokenError> {
        let record = self
            .store
            .load()
            .await?
            .filter(|r| !r.access_token.is_empty())
            .ok_or_else(TokenError::no_access_token)?;

        if record.is_valid_at(self.clock.now_millis()) {
            return Ok(record.access_token);
        }

        debug!(
            expired_at = ?record.expires_at(),
            "Stored access token expired, refreshing"
        );
        self.join_flight(RefreshMode::IfExpired).await
    }

    /// Exchange the stored refresh token for a new access token.
    ///
    /// Joins a refresh already in flight instead of starting a second one.
    pub async fn refresh_access_token(&self) -> Result<String, TokenError> {
        self.join_flight(RefreshMode::Force).await
    }

    /// Persist the first record after an authorization-code exchange.
    pub async fn install(&self, tokens: &TokenSet) -> Result<TokenRecord, TokenError> {
        if tokens.access_token.is_empty() {
            return Err(TokenError::Authentication(
                "authorization response carried no access token".into(),
            ));
        }
        let record = TokenRecord::issued(tokens, self.clock.now_millis());
        self.store.save(&record).await?;
        if !record.has_refresh_token() {
            warn!("Authorization response carried no refresh token; refresh will not be possible");
        }
        info!(
            store = self.store.name(),
            expires_in = record.expires_in,
            "Stored new HubSpot authorization"
        );
        Ok(record)
    }

    /// Current lifecycle state of the stored record.
    pub async fn status(&self) -> Result<TokenStatus, TokenError> {
        let record = self.store.load().await?;
        let now = self.clock.now_millis();
        let status = match record {
            None => TokenStatus {
                state: TokenState::Absent,
                expires_at: None,
                has_refresh_token: false,
                store: self.store.name().to_string(),
            },
            Some(r) => TokenStatus {
                state: if r.is_valid_at(now) {
                    TokenState::Valid
                } else {
                    TokenState::Expired
                },
                expires_at: r.expires_at(),
                has_refresh_token: r.has_refresh_token(),
                store: self.store.name().to_string(),
            },
        };
        Ok(status)
    }

    async fn join_flight(&self, mode: RefreshMode) -> Result<String, TokenError> {
        let flight = {
            let mut slot = self.inflight.lock().await;
            match slot.as_ref() {
                // A finished task left behind by departed waiters is stale.
                Some(running) if !running.task.is_finished() => {
                    debug!("Joining in-flight token refresh");
                    running.shared.clone()
                }
                _ => {
                    let task = tokio::spawn(refresh_flight(
                        self.store.clone(),
                        self.provider.clone(),
                        self.clock.clone(),
                        mode,
                    ));
                    let abort = task.abort_handle();
                    let shared = task
                        .map(|joined| {
                            joined.unwrap_or_else(|e| {
                                Err(TokenError::TokenRefresh {
                                    status: None,
                                    body: format!("refresh task failed: {e}"),
                                })
                            })
                        })
                        .boxed()
                        .shared();
                    *slot = Some(InFlight {
                        shared: shared.clone(),
                        task: abort,
                    });
                    shared
                }
            }
        };

        let outcome = flight.clone().await;

        let mut slot = self.inflight.lock().await;
        if slot
            .as_ref()
            .is_some_and(|current| current.shared.ptr_eq(&flight))
        {
            *slot = None;
        }
        outcome
    }
}

async fn refresh_flight(
    store: Arc<dyn TokenStore>,
    provider: Arc<dyn OAuthProvider>,
    clock: Arc<dyn Clock>,
    mode: RefreshMode,
) -> Result<String, TokenError> {
    let record = store.load().await?.ok_or_else(TokenError::no_refresh_token)?;

    if mode == RefreshMode::IfExpired && record.is_valid_at(clock.now_millis()) {
        debug!("Token already refreshed by an earlier flight");
        return Ok(record.access_token);
    }

    let refresh_token = match record.refresh_token.as_deref() {
        Some(token) if !token.is_empty() => token,
        _ => return Err(TokenError::no_refresh_token()),
    };

    info!(provider = provider.id(), "Refreshing access token");
    let tokens = provider.refresh_token(refresh_token).await.map_err(|e| {
        warn!(provider = provider.id(), status = ?e.status, "Token refresh rejected: {e}");
        TokenError::TokenRefresh {
            status: e.status,
            body: e.message,
        }
    })?;

    let updated = record.refreshed(&tokens, clock.now_millis());
    store.save(&updated).await?;

    info!(
        store = store.name(),
        expires_in = updated.expires_in,
        rotated = updated.refresh_token != record.refresh_token,
        "Access token refreshed"
    );
    Ok(updated.access_token)
}

impl std::fmt::Debug for TokenGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenGate")
            .field("store", &self.store.name())
            .field("provider", &self.provider.id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::store::MemoryTokenStore;
    use crate::token::ManualClock;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const T0: i64 = 1_700_000_000_000;

    /// Provider stub that counts refresh calls and answers from a script.
    struct ScriptedProvider {
        calls: AtomicUsize,
        delay: Duration,
        outcome: Result<TokenSet, ProviderError>,
    }

    impl ScriptedProvider {
        fn ok(access: &str, expires_in: u64) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                delay: Duration::ZERO,
                outcome: Ok(TokenSet {
                    access_token: access.into(),
                    refresh_token: None,
                    token_type: Some("bearer".into()),
                    expires_in,
                }),
            }
        }

        fn rejecting(status: u16, body: &str) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                delay: Duration::ZERO,
                outcome: Err(ProviderError::rejected(status, body)),
            }
        }

        fn slow(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl OAuthProvider for ScriptedProvider {
        fn id(&self) -> &str {
            "scripted"
        }

        fn display_name(&self) -> &str {
            "Scripted"
        }

        fn authorize_url(&self, _state: Option<&str>) -> String {
            String::new()
        }

        async fn exchange_code(&self, _code: &str) -> Result<TokenSet, ProviderError> {
            self.outcome.clone()
        }

        async fn refresh_token(&self, _refresh_token: &str) -> Result<TokenSet, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.outcome.clone()
        }
    }

    fn stored(obtained_at: i64, expires_in: i64, refresh: Option<&str>) -> TokenRecord {
        TokenRecord {
            access_token: "T1".into(),
            refresh_token: refresh.map(String::from),
            obtained_at,
            expires_in,
        }
    }

    fn gate(
        record: Option<TokenRecord>,
        provider: Arc<ScriptedProvider>,
        clock: Arc<ManualClock>,
    ) -> (TokenGate, Arc<MemoryTokenStore>) {
        let store = Arc::new(MemoryTokenStore::new(record));
        let gate = TokenGate::new(store.clone(), provider).with_clock(clock);
        (gate, store)
    }

    #[tokio::test]
    async fn fresh_token_is_returned_without_refresh() {
        let provider = Arc::new(ScriptedProvider::ok("T2", 1800));
        let clock = Arc::new(ManualClock::at(T0 + 1_000));
        let (gate, _) = gate(Some(stored(T0, 1800, Some("R1"))), provider.clone(), clock);

        assert_eq!(gate.get_valid_access_token().await.unwrap(), "T1");
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn expired_token_triggers_one_refresh_and_persists() {
        let provider = Arc::new(ScriptedProvider::ok("T2", 1800));
        let clock = Arc::new(ManualClock::at(T0 + 1_800_000));
        let (gate, store) = gate(Some(stored(T0, 1800, Some("R1"))), provider.clone(), clock);

        assert_eq!(gate.get_valid_access_token().await.unwrap(), "T2");
        assert_eq!(provider.calls(), 1);

        let saved = store.snapshot().await.unwrap();
        assert_eq!(saved.access_token, "T2");
        assert_eq!(saved.refresh_token.as_deref(), Some("R1"));
        assert_eq!(saved.obtained_at, T0 + 1_800_000);
    }

    #[tokio::test]
    async fn missing_record_is_an_authentication_error() {
        let provider = Arc::new(ScriptedProvider::ok("T2", 1800));
        let (gate, _) = gate(None, provider.clone(), Arc::new(ManualClock::at(T0)));

        let err = gate.get_valid_access_token().await.unwrap_err();
        assert_eq!(err, TokenError::no_access_token());
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn empty_access_token_reads_as_absent() {
        let provider = Arc::new(ScriptedProvider::ok("T2", 1800));
        let mut record = stored(T0, 1800, Some("R1"));
        record.access_token.clear();
        let (gate, _) = gate(Some(record), provider.clone(), Arc::new(ManualClock::at(T0)));

        let err = gate.get_valid_access_token().await.unwrap_err();
        assert_eq!(err, TokenError::no_access_token());
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn missing_refresh_token_is_a_configuration_error() {
        let provider = Arc::new(ScriptedProvider::ok("T2", 1800));
        let (gate, _) = gate(
            Some(stored(T0, 1800, None)),
            provider.clone(),
            Arc::new(ManualClock::at(T0)),
        );

        let err = gate.refresh_access_token().await.unwrap_err();
        assert!(matches!(err, TokenError::Configuration(_)));
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn rejected_refresh_leaves_record_untouched() {
        let provider = Arc::new(ScriptedProvider::rejecting(400, r#"{"message":"invalid_grant"}"#));
        let clock = Arc::new(ManualClock::at(T0 + 10_000_000));
        let original = stored(T0, 1800, Some("R1"));
        let (gate, store) = gate(Some(original.clone()), provider, clock);

        let err = gate.get_valid_access_token().await.unwrap_err();
        match err {
            TokenError::TokenRefresh { status, body } => {
                assert_eq!(status, Some(400));
                assert!(body.contains("invalid_grant"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(store.snapshot().await, Some(original));
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_refresh() {
        let provider =
            Arc::new(ScriptedProvider::ok("T2", 1800).slow(Duration::from_millis(50)));
        let clock = Arc::new(ManualClock::at(T0 + 1_800_000));
        let (gate, _) = gate(Some(stored(T0, 1800, Some("R1"))), provider.clone(), clock);
        let gate = Arc::new(gate);

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let gate = gate.clone();
                tokio::spawn(async move { gate.get_valid_access_token().await })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "T2");
        }
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_failure() {
        let provider = Arc::new(
            ScriptedProvider::rejecting(400, "invalid_grant").slow(Duration::from_millis(50)),
        );
        let clock = Arc::new(ManualClock::at(T0 + 1_800_000));
        let (gate, _) = gate(Some(stored(T0, 1800, Some("R1"))), provider.clone(), clock);
        let gate = Arc::new(gate);

        let results = futures::future::join_all(
            (0..8).map(|_| {
                let gate = gate.clone();
                async move { gate.get_valid_access_token().await }
            }),
        )
        .await;

        let first = results[0].clone().unwrap_err();
        assert!(results.iter().all(|r| r.as_ref().unwrap_err() == &first));
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn refreshed_token_is_reused_until_it_expires() {
        let provider = Arc::new(ScriptedProvider::ok("T2", 1800));
        let clock = Arc::new(ManualClock::at(T0));
        let (gate, _) = gate(Some(stored(0, 60, Some("R1"))), provider.clone(), clock.clone());

        assert_eq!(gate.get_valid_access_token().await.unwrap(), "T2");
        assert_eq!(provider.calls(), 1);

        clock.set(T0 + 1_700_000);
        assert_eq!(gate.get_valid_access_token().await.unwrap(), "T2");
        assert_eq!(provider.calls(), 1);

        clock.set(T0 + 1_900_000);
        gate.get_valid_access_token().await.unwrap();
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn later_flight_after_failure_calls_provider_again() {
        let provider = Arc::new(ScriptedProvider::rejecting(500, "boom"));
        let clock = Arc::new(ManualClock::at(T0 + 1_800_000));
        let (gate, _) = gate(Some(stored(T0, 1800, Some("R1"))), provider.clone(), clock);

        assert!(gate.get_valid_access_token().await.is_err());
        assert!(gate.get_valid_access_token().await.is_err());
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn install_creates_first_record_and_status_tracks_it() {
        let provider = Arc::new(ScriptedProvider::ok("T2", 1800));
        let clock = Arc::new(ManualClock::at(T0));
        let (gate, _) = gate(None, provider, clock.clone());

        assert_eq!(gate.status().await.unwrap().state, TokenState::Absent);

        let tokens = TokenSet {
            access_token: "A1".into(),
            refresh_token: Some("R1".into()),
            token_type: None,
            expires_in: 1800,
        };
        let record = gate.install(&tokens).await.unwrap();
        assert_eq!(record.obtained_at, T0);

        let status = gate.status().await.unwrap();
        assert_eq!(status.state, TokenState::Valid);
        assert!(status.has_refresh_token);

        clock.advance(1_800_000);
        assert_eq!(gate.status().await.unwrap().state, TokenState::Expired);
    }

    #[tokio::test]
    async fn refresh_completes_after_its_caller_is_dropped() {
        let provider =
            Arc::new(ScriptedProvider::ok("T2", 1800).slow(Duration::from_millis(50)));
        let clock = Arc::new(ManualClock::at(T0 + 1_800_000));
        let (gate, store) = gate(Some(stored(T0, 1800, Some("R1"))), provider.clone(), clock);

        let dropped =
            tokio::time::timeout(Duration::from_millis(10), gate.get_valid_access_token()).await;
        assert!(dropped.is_err());

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(store.snapshot().await.unwrap().access_token, "T2");

        assert_eq!(gate.get_valid_access_token().await.unwrap(), "T2");
        assert_eq!(provider.calls(), 1);
    }
}
