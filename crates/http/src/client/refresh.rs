//! Single-flight renewal of the access token
//!
//! Every request rejected with 401 ends up here at roughly the same moment
//! after the access token expires. Only the first caller starts a refresh
//! cycle; everyone else joins it and observes the same outcome. The cycle runs
//! on its own task so a caller that gives up never cancels a refresh other
//! callers are waiting on.
//!
//! ```text
//! idle --renew()--> in-flight --ok--> succeeded --> idle
//!                             \--err-> failed ----> idle
//! ```

use super::auth::AuthApi;
use super::error::ClientError;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use warden_core::{SessionStore, User};

/// Called once per failed cycle so the presentation layer can send the user
/// back to a login surface
pub type SessionExpiredHook = Arc<dyn Fn() + Send + Sync>;

type Outcome = Result<Renewal, RenewalError>;

/// Result of a successful cycle, shared by every joined caller
#[derive(Clone, PartialEq, Eq)]
pub struct Renewal {
    pub access_token: String,
    pub user: Option<User>,
}

impl fmt::Debug for Renewal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Renewal")
            .field("access_token", &"<redacted>")
            .field("user", &self.user)
            .finish()
    }
}

/// Why a cycle failed. Cloned to every joined caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenewalError {
    /// The refresh endpoint answered with an error, typically a missing,
    /// expired or revoked refresh cookie
    #[error("refresh rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },

    /// The refresh call never produced a usable response
    #[error("refresh request failed: {0}")]
    Transport(String),

    /// The session was ended or replaced while the refresh was in flight,
    /// so the renewed token was discarded
    #[error("session ended while renewal was in flight")]
    SessionEnded,

    /// The cycle stopped without publishing an outcome
    #[error("renewal stopped before reporting an outcome")]
    Abandoned,
}

impl From<ClientError> for RenewalError {
    fn from(err: ClientError) -> Self {
        match err.status() {
            Some(status) => Self::Rejected {
                status,
                message: err.to_string(),
            },
            None => Self::Transport(err.to_string()),
        }
    }
}

#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<CoordinatorInner>,
}

struct CoordinatorInner {
    api: Arc<dyn AuthApi>,
    store: SessionStore,
    state: Mutex<CycleState>,
    on_expired: Option<SessionExpiredHook>,
}

#[derive(Default)]
struct CycleState {
    /// Present while a cycle is in flight
    in_flight: Option<watch::Receiver<Option<Outcome>>>,
    /// Number of cycles that have finished
    completed: u64,
    /// Outcome of the most recent finished cycle
    last: Option<Outcome>,
}

impl RefreshCoordinator {
    /// `on_expired` runs once for every failed cycle, after the store is cleared
    pub fn new(
        api: Arc<dyn AuthApi>,
        store: SessionStore,
        on_expired: Option<SessionExpiredHook>,
    ) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                api,
                store,
                state: Mutex::default(),
                on_expired,
            }),
        }
    }

    /// Number of finished cycles.
    ///
    /// Read it before dispatching a request and hand it to [`Self::renew`] if
    /// that request is rejected, so a cycle that finished in between is reused
    /// instead of starting another one.
    pub fn generation(&self) -> u64 {
        self.inner.lock_state().completed
    }

    /// True while a cycle is in flight
    pub fn is_renewing(&self) -> bool {
        self.inner.lock_state().in_flight.is_some()
    }

    /// Renew the access token, or join the renewal already under way.
    ///
    /// `observed_generation` is the value of [`Self::generation`] when the
    /// rejected request was sent.
    ///
    /// # Errors
    ///
    /// Returns the cycle's [`RenewalError`]; by then the session store has
    /// been cleared.
    pub async fn renew(&self, observed_generation: u64) -> Result<Renewal, RenewalError> {
        let mut cycle = {
            let mut state = self.inner.lock_state();

            // A closed channel means the cycle task died without reporting
            let joinable = state
                .in_flight
                .as_ref()
                .filter(|cycle| cycle.has_changed().is_ok())
                .cloned();

            if let Some(cycle) = joinable {
                debug!("Joining in-flight session renewal");
                cycle
            } else {
                if state.completed > observed_generation {
                    if let Some(outcome) = state.last.clone() {
                        debug!("Reusing renewal that finished after the request was sent");
                        return outcome;
                    }
                }

                let (tx, rx) = watch::channel(None);
                state.in_flight = Some(rx.clone());

                let epoch = self.inner.store.epoch();
                let inner = Arc::clone(&self.inner);
                tokio::spawn(async move { inner.run_cycle(epoch, tx).await });
                rx
            }
        };

        let outcome = cycle
            .wait_for(Option::is_some)
            .await
            .map_err(|_| RenewalError::Abandoned)?
            .clone();
        outcome.unwrap_or(Err(RenewalError::Abandoned))
    }
}

impl CoordinatorInner {
    fn lock_state(&self) -> MutexGuard<'_, CycleState> {
        // The state is only ever replaced whole, so a poisoned lock still holds a usable value
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn run_cycle(self: Arc<Self>, epoch: u64, tx: watch::Sender<Option<Outcome>>) {
        info!("Renewing access token");

        let outcome = match self.api.refresh().await {
            Ok(response) => {
                let user = response.user.or_else(|| self.store.read().user);
                if self
                    .store
                    .apply_renewal(epoch, user.clone(), response.access_token.clone())
                {
                    info!("Access token renewed");
                    Ok(Renewal {
                        access_token: response.access_token,
                        user,
                    })
                } else {
                    info!("Session ended during renewal, discarding renewed token");
                    Err(RenewalError::SessionEnded)
                }
            }
            Err(e) => {
                let error = RenewalError::from(e);
                warn!(error = %error, "Session renewal failed, clearing session");
                self.store.clear();
                if let Some(hook) = &self.on_expired {
                    hook();
                }
                Err(error)
            }
        };

        {
            let mut state = self.lock_state();
            state.last = Some(outcome.clone());
            state.completed += 1;
            state.in_flight = None;
        }

        tx.send_replace(Some(outcome));
    }
}

impl fmt::Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock_state();
        f.debug_struct("RefreshCoordinator")
            .field("renewing", &state.in_flight.is_some())
            .field("completed", &state.completed)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::auth::MockAuthApi;
    use crate::types::{LoginRequest, RegisterRequest, TokenResponse};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;
    use warden_core::MemoryPersistence;
    use warden_core::tests::sample_user;

    /// Refresh endpoint that parks until released
    struct GatedAuthApi {
        refresh_calls: AtomicUsize,
        release: Notify,
        token: Option<&'static str>,
    }

    impl GatedAuthApi {
        fn succeeding(token: &'static str) -> Arc<Self> {
            Arc::new(Self {
                refresh_calls: AtomicUsize::new(0),
                release: Notify::new(),
                token: Some(token),
            })
        }

        fn rejecting() -> Arc<Self> {
            Arc::new(Self {
                refresh_calls: AtomicUsize::new(0),
                release: Notify::new(),
                token: None,
            })
        }

        fn calls(&self) -> usize {
            self.refresh_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AuthApi for GatedAuthApi {
        async fn login(&self, _: &LoginRequest) -> Result<TokenResponse, ClientError> {
            unreachable!("login is not used by the coordinator")
        }

        async fn register(&self, _: &RegisterRequest) -> Result<User, ClientError> {
            unreachable!("register is not used by the coordinator")
        }

        async fn refresh(&self) -> Result<TokenResponse, ClientError> {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            self.release.notified().await;
            match self.token {
                Some(token) => Ok(TokenResponse {
                    access_token: token.to_string(),
                    token_type: "bearer".to_string(),
                    user: None,
                }),
                None => Err(ClientError::AuthenticationFailed(
                    "Invalid refresh token".to_string(),
                )),
            }
        }

        async fn logout(&self) -> Result<(), ClientError> {
            unreachable!("logout is not used by the coordinator")
        }

        async fn current_user(&self, _: &str) -> Result<User, ClientError> {
            unreachable!("current_user is not used by the coordinator")
        }
    }

    async fn wait_for_refresh_call(api: &GatedAuthApi) {
        while api.calls() == 0 {
            tokio::task::yield_now().await;
        }
    }

    fn authenticated_store(token: &str) -> SessionStore {
        let store = SessionStore::in_memory();
        store.set_authenticated(sample_user(), token);
        store
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_refresh() {
        let api = GatedAuthApi::succeeding("fresh");
        let store = authenticated_store("stale");
        let coordinator = RefreshCoordinator::new(api.clone(), store.clone(), None);
        let generation = coordinator.generation();

        let callers: Vec<_> = (0..5)
            .map(|_| {
                let coordinator = coordinator.clone();
                tokio::spawn(async move { coordinator.renew(generation).await })
            })
            .collect();

        wait_for_refresh_call(&api).await;
        assert!(coordinator.is_renewing());
        api.release.notify_one();

        for caller in callers {
            let renewal = caller.await.unwrap().unwrap();
            assert_eq!(renewal.access_token, "fresh");
            assert_eq!(renewal.user, Some(sample_user()));
        }

        assert_eq!(api.calls(), 1);
        assert!(!coordinator.is_renewing());
        assert_eq!(coordinator.generation(), 1);
        assert_eq!(store.access_token().as_deref(), Some("fresh"));
        assert!(store.is_authenticated());
    }

    #[tokio::test]
    async fn late_caller_reuses_finished_cycle() {
        let api = GatedAuthApi::succeeding("fresh");
        let coordinator = RefreshCoordinator::new(api.clone(), authenticated_store("stale"), None);
        let generation = coordinator.generation();

        let first = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.renew(generation).await })
        };
        wait_for_refresh_call(&api).await;
        api.release.notify_one();
        first.await.unwrap().unwrap();

        // Sent before the cycle finished, rejected after it
        let late = coordinator.renew(generation).await.unwrap();

        assert_eq!(late.access_token, "fresh");
        assert_eq!(api.calls(), 1);
    }

    #[tokio::test]
    async fn new_expiry_after_a_cycle_starts_another() {
        let api = GatedAuthApi::succeeding("fresh");
        let coordinator = RefreshCoordinator::new(api.clone(), authenticated_store("stale"), None);

        for expected_calls in 1..=2 {
            let generation = coordinator.generation();
            let caller = {
                let coordinator = coordinator.clone();
                tokio::spawn(async move { coordinator.renew(generation).await })
            };
            while api.calls() < expected_calls {
                tokio::task::yield_now().await;
            }
            api.release.notify_one();
            caller.await.unwrap().unwrap();
        }

        assert_eq!(api.calls(), 2);
        assert_eq!(coordinator.generation(), 2);
    }

    #[tokio::test]
    async fn failure_clears_session_for_every_caller() {
        let api = GatedAuthApi::rejecting();
        let store = authenticated_store("stale");
        let hook_calls = Arc::new(AtomicUsize::new(0));
        let hook: SessionExpiredHook = {
            let hook_calls = Arc::clone(&hook_calls);
            Arc::new(move || {
                hook_calls.fetch_add(1, Ordering::SeqCst);
            })
        };
        let coordinator = RefreshCoordinator::new(api.clone(), store.clone(), Some(hook));
        let generation = coordinator.generation();

        let callers: Vec<_> = (0..3)
            .map(|_| {
                let coordinator = coordinator.clone();
                tokio::spawn(async move { coordinator.renew(generation).await })
            })
            .collect();

        wait_for_refresh_call(&api).await;
        api.release.notify_one();

        for caller in callers {
            let err = caller.await.unwrap().unwrap_err();
            assert!(matches!(err, RenewalError::Rejected { status: 401, .. }));
        }

        assert_eq!(api.calls(), 1);
        assert_eq!(hook_calls.load(Ordering::SeqCst), 1);
        assert!(!store.is_authenticated());
        assert!(store.access_token().is_none());

        // Joined late: sees the failure, no second attempt
        let late = coordinator.renew(generation).await;
        assert!(late.is_err());
        assert_eq!(api.calls(), 1);
    }

    #[tokio::test]
    async fn abandoned_caller_does_not_cancel_cycle() {
        let api = GatedAuthApi::succeeding("fresh");
        let store = authenticated_store("stale");
        let coordinator = RefreshCoordinator::new(api.clone(), store.clone(), None);
        let generation = coordinator.generation();

        let leader = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.renew(generation).await })
        };
        wait_for_refresh_call(&api).await;
        leader.abort();

        let follower = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.renew(generation).await })
        };
        tokio::task::yield_now().await;
        api.release.notify_one();

        assert_eq!(follower.await.unwrap().unwrap().access_token, "fresh");
        assert_eq!(api.calls(), 1);
        assert_eq!(store.access_token().as_deref(), Some("fresh"));
    }

    #[tokio::test]
    async fn logout_during_renewal_wins() {
        let api = GatedAuthApi::succeeding("fresh");
        let storage = MemoryPersistence::default();
        let store = SessionStore::new(Arc::new(storage.clone()));
        store.set_authenticated(sample_user(), "stale");
        let hook_calls = Arc::new(AtomicUsize::new(0));
        let hook: SessionExpiredHook = {
            let hook_calls = Arc::clone(&hook_calls);
            Arc::new(move || {
                hook_calls.fetch_add(1, Ordering::SeqCst);
            })
        };
        let coordinator = RefreshCoordinator::new(api.clone(), store.clone(), Some(hook));
        let generation = coordinator.generation();

        let caller = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.renew(generation).await })
        };
        wait_for_refresh_call(&api).await;
        store.clear();
        api.release.notify_one();

        let err = caller.await.unwrap().unwrap_err();
        assert_eq!(err, RenewalError::SessionEnded);
        assert!(!store.is_authenticated());
        assert!(store.access_token().is_none());
        assert!(storage.raw_entry().is_none());
        assert_eq!(hook_calls.load(Ordering::SeqCst), 0);
        assert_eq!(api.calls(), 1);
    }

    #[tokio::test]
    async fn renewal_without_known_user_stores_token_only() {
        let api = GatedAuthApi::succeeding("fresh");
        let store = SessionStore::in_memory();
        let coordinator = RefreshCoordinator::new(api.clone(), store.clone(), None);

        let caller = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.renew(0).await })
        };
        wait_for_refresh_call(&api).await;
        api.release.notify_one();

        let renewal = caller.await.unwrap().unwrap();
        assert!(renewal.user.is_none());
        assert_eq!(store.access_token().as_deref(), Some("fresh"));
        assert!(!store.is_authenticated());
    }

    #[tokio::test]
    async fn returned_user_replaces_stored_user() {
        let mut renamed = sample_user();
        renamed.full_name = Some("Countess of Lovelace".to_string());
        let returned = renamed.clone();

        let mut api = MockAuthApi::new();
        api.expect_refresh().times(1).returning(move || {
            Ok(TokenResponse {
                access_token: "fresh".to_string(),
                token_type: "bearer".to_string(),
                user: Some(returned.clone()),
            })
        });
        let store = authenticated_store("stale");
        let coordinator = RefreshCoordinator::new(Arc::new(api), store.clone(), None);

        let renewal = coordinator.renew(0).await.unwrap();

        assert_eq!(renewal.user, Some(renamed.clone()));
        assert_eq!(store.read().user, Some(renamed));
    }

    #[tokio::test]
    async fn transport_errors_are_fatal() {
        let mut api = MockAuthApi::new();
        api.expect_refresh().times(1).returning(|| {
            Err(ClientError::Configuration("connection refused".to_string()))
        });
        let store = authenticated_store("stale");
        let coordinator = RefreshCoordinator::new(Arc::new(api), store.clone(), None);

        let err = coordinator.renew(0).await.unwrap_err();

        assert!(matches!(err, RenewalError::Transport(_)));
        assert!(!store.is_authenticated());
    }
}
