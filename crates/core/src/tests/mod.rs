//! Shared fixtures and conformance suites
//!
//! Enabled with the `tests` feature so downstream crates and third-party
//! persistence backends can reuse them.


use crate::types::{PersistedSession, User};

/// A user as the API would return it
pub fn sample_user() -> User {
    User {
        id: "user-1".to_string(),
        email: "ada@example.com".to_string(),
        full_name: Some("Ada Lovelace".to_string()),
        is_active: true,
        is_superuser: false,
        created_at: None,
        updated_at: None,
    }
}

pub fn persisted_session(access_token: &str) -> PersistedSession {
    PersistedSession::new(sample_user(), access_token)
}
