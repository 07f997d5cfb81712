//! Request and response bodies of the authentication API

use serde::{Deserialize, Serialize};
use std::fmt;
use warden_core::User;

/// `POST /auth/login` body
#[derive(Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

impl LoginRequest {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginRequest")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// `POST /auth/register` body
#[derive(Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
}

impl fmt::Debug for RegisterRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisterRequest")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .field("full_name", &self.full_name)
            .finish()
    }
}

/// Token issued by login and refresh.
///
/// Any refresh token the server echoes in the body is deliberately not
/// modelled; the cookie jar is the only place it lives.
#[derive(Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub user: Option<User>,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("user", &self.user)
            .finish()
    }
}

/// FastAPI-style error body, `{"detail": "..."}`
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorBody {
    pub detail: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn token_response_ignores_refresh_token_in_body() {
        let response: TokenResponse = serde_json::from_value(json!({
            "access_token": "access",
            "refresh_token": "must-not-be-kept",
            "token_type": "bearer"
        }))
        .unwrap();

        assert_eq!(response.access_token, "access");
        assert!(response.user.is_none());
        let reserialized = serde_json::to_string(&response).unwrap();
        assert!(!reserialized.contains("must-not-be-kept"));
    }

    #[test]
    fn register_request_omits_missing_full_name() {
        let body = serde_json::to_value(RegisterRequest {
            email: "a@example.com".into(),
            password: "hunter22".into(),
            full_name: None,
        })
        .unwrap();

        assert_eq!(body, json!({ "email": "a@example.com", "password": "hunter22" }));
    }

    #[test]
    fn debug_never_prints_secrets() {
        let login = LoginRequest::new("a@example.com", "hunter22");
        assert!(!format!("{login:?}").contains("hunter22"));

        let token: TokenResponse =
            serde_json::from_value(json!({ "access_token": "secret-token" })).unwrap();
        assert_eq!(token.token_type, "bearer");
        assert!(!format!("{token:?}").contains("secret-token"));
    }
}
