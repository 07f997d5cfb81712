use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity record returned by the API.
///
/// Treated as opaque by the session machinery; unknown fields are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub is_superuser: bool,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

const fn default_true() -> bool {
    true
}

impl User {
    /// Name to show for this user, falling back to the email address
    pub fn display_name(&self) -> &str {
        self.full_name.as_deref().unwrap_or(&self.email)
    }
}

/// The authenticated identity and credential bound to this client.
///
/// The refresh token never appears here; it only lives in the HTTP client's
/// cookie jar.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub user: Option<User>,
    pub access_token: Option<String>,
}

impl Session {
    pub fn authenticated(user: User, access_token: impl Into<String>) -> Self {
        Self {
            user: Some(user),
            access_token: Some(access_token.into()),
        }
    }

    /// True iff both the user and the access token are present
    pub fn is_authenticated(&self) -> bool {
        self.user.is_some() && self.access_token.is_some()
    }

    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }

    /// The persistable form of this session, if it is complete
    pub fn to_persisted(&self) -> Option<PersistedSession> {
        match (&self.user, &self.access_token) {
            (Some(user), Some(token)) => Some(PersistedSession::new(user.clone(), token.clone())),
            _ => None,
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("user", &self.user)
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// What gets written to durable storage: the user and access token pair
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedSession {
    pub user: User,
    pub access_token: String,
    pub saved_at: DateTime<Utc>,
}

impl PersistedSession {
    pub fn new(user: User, access_token: impl Into<String>) -> Self {
        Self {
            user,
            access_token: access_token.into(),
            saved_at: Utc::now(),
        }
    }
}

impl fmt::Debug for PersistedSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistedSession")
            .field("user", &self.user)
            .field("access_token", &"<redacted>")
            .field("saved_at", &self.saved_at)
            .finish()
    }
}

impl From<PersistedSession> for Session {
    fn from(persisted: PersistedSession) -> Self {
        Self::authenticated(persisted.user, persisted.access_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn user_deserializes_api_payload_and_ignores_unknown_fields() {
        let user: User = serde_json::from_value(json!({
            "id": "42",
            "email": "ada@example.com",
            "full_name": "Ada Lovelace",
            "is_active": true,
            "is_superuser": false,
            "created_at": "2024-03-01T12:00:00Z",
            "updated_at": "2024-03-02T12:00:00+00:00",
            "hashed_password": "never-sent-but-ignored"
        }))
        .unwrap();

        assert_eq!(user.id, "42");
        assert_eq!(user.display_name(), "Ada Lovelace");
        assert!(user.created_at.is_some());
    }

    #[test]
    fn minimal_user_gets_defaults() {
        let user: User =
            serde_json::from_value(json!({ "id": "1", "email": "x@example.com" })).unwrap();
        assert!(user.is_active);
        assert!(!user.is_superuser);
        assert_eq!(user.display_name(), "x@example.com");
    }

    #[test]
    fn session_is_authenticated_only_with_user_and_token() {
        let user: User =
            serde_json::from_value(json!({ "id": "1", "email": "x@example.com" })).unwrap();

        assert!(!Session::default().is_authenticated());

        let token_only = Session {
            user: None,
            access_token: Some("tok".into()),
        };
        assert!(!token_only.is_authenticated());
        assert!(token_only.to_persisted().is_none());

        let user_only = Session {
            user: Some(user.clone()),
            access_token: None,
        };
        assert!(!user_only.is_authenticated());

        assert!(Session::authenticated(user, "tok").is_authenticated());
    }

    #[test]
    fn debug_output_redacts_tokens() {
        let user: User =
            serde_json::from_value(json!({ "id": "1", "email": "x@example.com" })).unwrap();
        let session = Session::authenticated(user.clone(), "super-secret");
        let persisted = PersistedSession::new(user, "super-secret");

        assert!(!format!("{session:?}").contains("super-secret"));
        assert!(!format!("{persisted:?}").contains("super-secret"));
    }
}
