//! Warden core types and utilities
//!
//! Holds the client-side session model, the [`SessionStore`] that owns it,
//! the persistence seam used to survive restarts, and client configuration.

pub mod config;
pub mod error;
pub mod persistence;
pub mod store;
pub mod types;

#[cfg(any(test, feature = "tests"))]
pub mod tests;

pub use config::ClientConfig;
pub use error::{CoreError, CoreResult};
pub use persistence::{FilePersistence, MemoryPersistence, SessionPersistence};
pub use store::SessionStore;
pub use types::{PersistedSession, Session, User};
