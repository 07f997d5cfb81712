//! Outbound request pipeline
//!
//! [`AuthGateway`] attaches the current access token to each request. When the
//! API answers 401 it hands over to the [`RefreshCoordinator`] and replays the
//! request once with the renewed token. A replay that is rejected again is
//! returned to the caller as-is and never re-queued.

use super::error::ClientError;
use super::refresh::RefreshCoordinator;
use reqwest::header::{self, HeaderValue};
use reqwest::{Client, Method, Request, RequestBuilder, Response, StatusCode};
use warden_core::SessionStore;

#[derive(Clone, Debug)]
pub struct AuthGateway {
    client: Client,
    base_url: String,
    store: SessionStore,
    refresher: RefreshCoordinator,
}

impl AuthGateway {
    pub fn new(
        client: Client,
        base_url: impl Into<String>,
        store: SessionStore,
        refresher: RefreshCoordinator,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            store,
            refresher,
        }
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Create a request builder for an API path.
    ///
    /// The token is attached when the request is sent, not here, so a builder
    /// created before a renewal still goes out with the fresh token.
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        self.client.request(method, url)
    }

    /// Send a request through the session.
    ///
    /// Every response other than 401 is returned untouched, whatever its
    /// status.
    ///
    /// # Errors
    ///
    /// - [`ClientError::SessionExpired`] when the session could not be renewed
    /// - [`ClientError::AuthenticationFailed`] when the request is rejected
    ///   again after a renewal, or cannot be replayed
    /// - [`ClientError::Request`] for transport failures
    pub async fn send(&self, request: RequestBuilder) -> Result<Response, ClientError> {
        let request = request.build()?;
        let generation = self.refresher.generation();
        let token = self.store.access_token();
        // Streaming bodies cannot be cloned and therefore cannot be replayed
        let replay = request.try_clone();

        let response = self.dispatch(request, token.as_deref()).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let Some(replay) = replay else {
            debug!(url = %response.url(), "Rejected request cannot be replayed");
            return Err(ClientError::from_response(response).await);
        };

        debug!(url = %replay.url(), "Access token rejected, renewing session");
        let renewal = self
            .refresher
            .renew(generation)
            .await
            .map_err(ClientError::SessionExpired)?;

        let response = self.dispatch(replay, Some(&renewal.access_token)).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            warn!(url = %response.url(), "Request rejected again after session renewal");
            return Err(ClientError::from_response(response).await);
        }

        Ok(response)
    }

    /// Send a request and decode a JSON body
    pub async fn execute<T: serde::de::DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, ClientError> {
        let response = self.send(request).await?;

        if response.status().is_success() {
            Ok(response.json().await?)
        } else {
            Err(ClientError::from_response(response).await)
        }
    }

    /// Send a request whose successful response carries no body
    pub async fn execute_empty(&self, request: RequestBuilder) -> Result<(), ClientError> {
        let response = self.send(request).await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(ClientError::from_response(response).await)
        }
    }

    async fn dispatch(
        &self,
        mut request: Request,
        access_token: Option<&str>,
    ) -> Result<Response, ClientError> {
        if let Some(token) = access_token {
            let mut value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|e| {
                ClientError::Configuration(format!("access token is not a valid header value: {e}"))
            })?;
            value.set_sensitive(true);
            request.headers_mut().insert(header::AUTHORIZATION, value);
        }

        trace!(method = %request.method(), url = %request.url(), "Dispatching request");
        Ok(self.client.execute(request).await?)
    }
}
