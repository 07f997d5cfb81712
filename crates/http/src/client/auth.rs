//! Authentication API client methods
//!
//! Pure transport: one typed call per endpoint, no retries and no session
//! bookkeeping. Errors are returned exactly as the API produced them.

use super::error::ClientError;
use crate::types::{LoginRequest, RegisterRequest, TokenResponse};
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, header};
use warden_core::User;

/// The remote authentication endpoints
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuthApi: Send + Sync {
    /// `POST /auth/login`; the server also sets the refresh cookie
    async fn login(&self, request: &LoginRequest) -> Result<TokenResponse, ClientError>;

    /// `POST /auth/register`
    async fn register(&self, request: &RegisterRequest) -> Result<User, ClientError>;

    /// `POST /auth/refresh` with an empty body; the refresh cookie rides along
    async fn refresh(&self) -> Result<TokenResponse, ClientError>;

    /// `POST /auth/logout`; the server clears the refresh cookie
    async fn logout(&self) -> Result<(), ClientError>;

    /// `GET /users/me` with an explicit access token
    async fn current_user(&self, access_token: &str) -> Result<User, ClientError>;
}

/// [`AuthApi`] over HTTP
#[derive(Debug, Clone)]
pub struct AuthService {
    client: Client,
    base_url: String,
}

impl AuthService {
    /// `client` must have a cookie store so the refresh cookie set by login is
    /// sent back on refresh and logout
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        self.client.request(method, url)
    }

    async fn execute<T: serde::de::DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, ClientError> {
        let response = request.send().await?;

        if response.status().is_success() {
            Ok(response.json().await?)
        } else {
            Err(ClientError::from_response(response).await)
        }
    }
}

#[async_trait]
impl AuthApi for AuthService {
    async fn login(&self, request: &LoginRequest) -> Result<TokenResponse, ClientError> {
        let req = self.request(Method::POST, "/auth/login").json(request);
        self.execute(req).await
    }

    async fn register(&self, request: &RegisterRequest) -> Result<User, ClientError> {
        let req = self.request(Method::POST, "/auth/register").json(request);
        self.execute(req).await
    }

    async fn refresh(&self) -> Result<TokenResponse, ClientError> {
        let req = self
            .request(Method::POST, "/auth/refresh")
            .json(&serde_json::json!({}));
        self.execute(req).await
    }

    async fn logout(&self) -> Result<(), ClientError> {
        let response = self
            .request(Method::POST, "/auth/logout")
            .json(&serde_json::json!({}))
            .send()
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(ClientError::from_response(response).await)
        }
    }

    async fn current_user(&self, access_token: &str) -> Result<User, ClientError> {
        let req = self
            .request(Method::GET, "/users/me")
            .header(header::AUTHORIZATION, format!("Bearer {access_token}"));
        self.execute(req).await
    }
}
