//! Client error types

use super::refresh::RenewalError;
use crate::types::ErrorBody;
use thiserror::Error;
use warden_core::CoreError;

/// Client error types
#[derive(Debug, Error)]
pub enum ClientError {
    /// Network or request error
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Server returned an error status
    #[error("Server error {status}: {message}")]
    ServerError { status: u16, message: String },

    /// The server rejected the credentials, including a replay that was
    /// rejected again after a successful renewal
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Renewal was impossible; the local session has been cleared and the
    /// user has to log in again
    #[error("Session expired: {0}")]
    SessionExpired(#[source] RenewalError),

    /// Resource not found
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Bad request
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Forbidden
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Request body failed server-side validation
    #[error("Validation failed: {0}")]
    Unprocessable(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl ClientError {
    /// Create error from HTTP status code
    pub fn from_status(status: reqwest::StatusCode, message: String) -> Self {
        match status.as_u16() {
            400 => Self::BadRequest(message),
            401 => Self::AuthenticationFailed(message),
            403 => Self::Forbidden(message),
            404 => Self::NotFound(message),
            422 => Self::Unprocessable(message),
            _ => Self::ServerError {
                status: status.as_u16(),
                message,
            },
        }
    }

    /// Build the error for a non-success response, preferring the API's `detail` message
    pub async fn from_response(response: reqwest::Response) -> Self {
        let status = response.status();
        let message = match response.text().await {
            Ok(body) => extract_message(&body).unwrap_or_else(|| status.to_string()),
            Err(_) => status.to_string(),
        };
        Self::from_status(status, message)
    }

    /// HTTP status behind this error, if it came from a response
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::BadRequest(_) => Some(400),
            Self::AuthenticationFailed(_) => Some(401),
            Self::Forbidden(_) => Some(403),
            Self::NotFound(_) => Some(404),
            Self::Unprocessable(_) => Some(422),
            Self::ServerError { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// The server rejected the credentials of this request
    pub const fn is_auth_failure(&self) -> bool {
        matches!(self, Self::AuthenticationFailed(_))
    }

    /// The session is gone and the user must log in again
    pub const fn is_session_expired(&self) -> bool {
        matches!(self, Self::SessionExpired(_))
    }
}

fn extract_message(body: &str) -> Option<String> {
    let body = body.trim();
    if body.is_empty() {
        return None;
    }
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody {
            detail: serde_json::Value::String(detail),
        }) => Some(detail),
        Ok(ErrorBody { detail }) => Some(detail.to_string()),
        Err(_) => Some(body.to_string()),
    }
}
