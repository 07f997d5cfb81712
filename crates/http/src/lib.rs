//! Warden HTTP client
//!
//! Keeps every outgoing request authenticated with the current access token
//! and renews the session transparently when the API rejects it. Renewal is
//! single-flight: however many requests fail at once, one refresh call is made
//! and every caller replays against its outcome.

#[macro_use]
extern crate tracing;

pub mod client;
pub mod types;

pub use client::error::ClientError;
pub use client::{SessionManager, SessionManagerBuilder};
pub use client::auth::{AuthApi, AuthService};
pub use client::gateway::AuthGateway;
pub use client::refresh::{RefreshCoordinator, Renewal, RenewalError};

// Re-export commonly used types
pub use warden_core::{ClientConfig, Session, SessionStore, User};
