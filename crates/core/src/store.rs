//! Process-wide session state
//!
//! [`SessionStore`] is the single source of truth for the current session.
//! It is cheap to clone; every clone observes the same state. Writes go
//! through [`SessionStore::set_authenticated`], [`SessionStore::set_access_token`],
//! [`SessionStore::apply_renewal`] and [`SessionStore::clear`], and each write
//! is mirrored to the injected [`SessionPersistence`] before it becomes
//! visible.

use crate::persistence::{MemoryPersistence, SessionPersistence};
use crate::types::{Session, User};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    state: watch::Sender<Session>,
    /// Advances whenever the session is replaced or ended. Only modified
    /// inside the watch modify closures, so it moves in step with `state`.
    epoch: AtomicU64,
    persistence: Arc<dyn SessionPersistence>,
}

impl SessionStore {
    /// Create a store, restoring whatever the persistence backend holds
    pub fn new(persistence: Arc<dyn SessionPersistence>) -> Self {
        let session = match persistence.load() {
            Ok(Some(persisted)) => {
                debug!(user_id = %persisted.user.id, "Restored persisted session");
                Session::from(persisted)
            }
            Ok(None) => Session::default(),
            Err(e) => {
                warn!(error = %e, "Failed to load persisted session, starting empty");
                Session::default()
            }
        };

        let (state, _) = watch::channel(session);
        Self {
            inner: Arc::new(StoreInner {
                state,
                epoch: AtomicU64::new(0),
                persistence,
            }),
        }
    }

    /// Store backed by process memory only
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryPersistence::default()))
    }

    /// Current session snapshot
    pub fn read(&self) -> Session {
        self.inner.state.borrow().clone()
    }

    pub fn access_token(&self) -> Option<String> {
        self.inner.state.borrow().access_token.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.state.borrow().is_authenticated()
    }

    /// Identifies the current session.
    ///
    /// Changes on [`Self::set_authenticated`] and [`Self::clear`], never on a
    /// token swap.
    pub fn epoch(&self) -> u64 {
        self.inner.epoch.load(Ordering::SeqCst)
    }

    /// Replace the session with an authenticated one and persist it
    pub fn set_authenticated(&self, user: User, access_token: impl Into<String>) {
        let session = Session::authenticated(user, access_token);
        self.inner.state.send_modify(|current| {
            self.inner.epoch.fetch_add(1, Ordering::SeqCst);
            self.persist(&session);
            *current = session;
        });
    }

    /// Swap the access token, keeping whatever user is already held.
    ///
    /// The result is only persisted when it forms a complete session.
    pub fn set_access_token(&self, access_token: impl Into<String>) {
        let access_token = access_token.into();
        self.inner.state.send_modify(|current| {
            current.access_token = Some(access_token);
            self.persist(current);
        });
    }

    /// Store a renewed token, unless the session was replaced or ended after
    /// `epoch` was read.
    ///
    /// `user` replaces the held user when given. Returns `false` when the
    /// write was skipped.
    pub fn apply_renewal(
        &self,
        epoch: u64,
        user: Option<User>,
        access_token: impl Into<String>,
    ) -> bool {
        let access_token = access_token.into();
        self.inner.state.send_if_modified(|current| {
            if self.inner.epoch.load(Ordering::SeqCst) != epoch {
                return false;
            }
            if let Some(user) = user {
                current.user = Some(user);
            }
            current.access_token = Some(access_token);
            self.persist(current);
            true
        })
    }

    /// Reset to the empty session and drop the persisted entry
    pub fn clear(&self) {
        self.inner.state.send_modify(|current| {
            self.inner.epoch.fetch_add(1, Ordering::SeqCst);
            if let Err(e) = self.inner.persistence.clear() {
                warn!(error = %e, "Failed to remove persisted session");
            }
            *current = Session::default();
        });
    }

    /// Receive every future session change
    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.inner.state.subscribe()
    }

    fn persist(&self, session: &Session) {
        let result = match session.to_persisted() {
            Some(persisted) => self.inner.persistence.save(&persisted),
            None => self.inner.persistence.clear(),
        };
        if let Err(e) = result {
            warn!(error = %e, "Failed to persist session");
        }
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionStore")
            .field("session", &*self.inner.state.borrow())
            .field("epoch", &self.epoch())
            .finish_non_exhaustive()
    }
}
