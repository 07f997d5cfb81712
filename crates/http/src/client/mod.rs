//! Warden session client
//!
//! [`SessionManager`] wires the session store, the auth endpoints, the refresh
//! coordinator and the request gateway around one HTTP client, so the refresh
//! cookie set at login is the one sent back on refresh and logout.

pub mod auth;
pub mod error;
pub mod gateway;
pub mod refresh;

use auth::{AuthApi, AuthService};
use error::ClientError;
use gateway::AuthGateway;
use refresh::{RefreshCoordinator, SessionExpiredHook};
use reqwest::{ClientBuilder, Method};
use std::sync::Arc;
use std::time::Duration;
use warden_core::{
    ClientConfig, FilePersistence, MemoryPersistence, SessionPersistence, SessionStore, User,
};

use crate::types::{LoginRequest, RegisterRequest};

const DEFAULT_USER_AGENT: &str = concat!("warden-client/", env!("CARGO_PKG_VERSION"));

/// Session-aware API client
#[derive(Clone)]
pub struct SessionManager {
    auth: Arc<dyn AuthApi>,
    store: SessionStore,
    refresher: RefreshCoordinator,
    gateway: AuthGateway,
}

impl SessionManager {
    /// Create a new client with default configuration and in-memory persistence
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        Self::builder().base_url(base_url).build()
    }

    /// Create a new client builder
    pub fn builder() -> SessionManagerBuilder {
        SessionManagerBuilder::default()
    }

    /// Build from loaded configuration, persisting the session under `state_dir`
    pub fn from_config(config: &ClientConfig) -> Result<Self, ClientError> {
        config.validate()?;

        let mut builder = Self::builder()
            .base_url(config.base_url())
            .user_agent(config.user_agent.clone())
            .persistence(Arc::new(FilePersistence::from_config(config)));
        if let Some(timeout) = config.timeout() {
            builder = builder.timeout(timeout);
        }
        builder.build()
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        self.gateway.base_url()
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Pipeline for arbitrary API calls made on behalf of the session
    pub fn gateway(&self) -> &AuthGateway {
        &self.gateway
    }

    pub fn refresher(&self) -> &RefreshCoordinator {
        &self.refresher
    }

    /// Log in with email and password and establish the session.
    ///
    /// When the login response does not include the user, it is fetched from
    /// `/users/me` with the new token before the session is stored.
    pub async fn login(&self, email: &str, password: &str) -> Result<User, ClientError> {
        let tokens = self.auth.login(&LoginRequest::new(email, password)).await?;

        let user = match tokens.user {
            Some(user) => user,
            None => self.auth.current_user(&tokens.access_token).await?,
        };

        self.store.set_authenticated(user.clone(), tokens.access_token);
        info!(user_id = %user.id, "Logged in");
        Ok(user)
    }

    /// Create an account; does not log in
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        full_name: Option<String>,
    ) -> Result<User, ClientError> {
        let request = RegisterRequest {
            email: email.to_string(),
            password: password.to_string(),
            full_name,
        };
        let user = self.auth.register(&request).await?;
        info!(user_id = %user.id, "Registered account");
        Ok(user)
    }

    /// End the session on the server and locally.
    ///
    /// The local session is cleared even when the endpoint fails; the
    /// endpoint's error is still returned.
    pub async fn logout(&self) -> Result<(), ClientError> {
        let result = self.auth.logout().await;
        self.store.clear();

        match &result {
            Ok(()) => info!("Logged out"),
            Err(e) => warn!(error = %e, "Logout endpoint failed, local session cleared anyway"),
        }
        result
    }

    /// Fetch the current user through the gateway, renewing the session if needed
    pub async fn current_user(&self) -> Result<User, ClientError> {
        let request = self.gateway.request(Method::GET, "/users/me");
        self.gateway.execute(request).await
    }
}

/// Builder for SessionManager
#[derive(Default)]
pub struct SessionManagerBuilder {
    base_url: Option<String>,
    timeout: Option<Duration>,
    user_agent: Option<String>,
    persistence: Option<Arc<dyn SessionPersistence>>,
    auth_api: Option<Arc<dyn AuthApi>>,
    on_session_expired: Option<SessionExpiredHook>,
}

impl SessionManagerBuilder {
    /// Set the base URL, including any API prefix
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Set the request timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the user agent
    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    /// Where the session survives restarts; defaults to process memory
    pub fn persistence(mut self, persistence: Arc<dyn SessionPersistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Replace the HTTP auth endpoints, mainly for tests
    pub fn auth_api(mut self, api: Arc<dyn AuthApi>) -> Self {
        self.auth_api = Some(api);
        self
    }

    /// Called once whenever a renewal fails and the session is dropped
    pub fn on_session_expired(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_session_expired = Some(Arc::new(hook));
        self
    }

    /// Build the client
    pub fn build(self) -> Result<SessionManager, ClientError> {
        let base_url = self
            .base_url
            .ok_or_else(|| ClientError::Configuration("base_url is required".into()))?;

        // Ensure base_url ends without a trailing slash
        let base_url = base_url.trim_end_matches('/').to_string();

        // The cookie store carries the refresh token between login, refresh and logout
        let mut client_builder = ClientBuilder::new().cookie_store(true);

        if let Some(timeout) = self.timeout {
            client_builder = client_builder.timeout(timeout);
        }

        client_builder = client_builder
            .user_agent(self.user_agent.unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()));

        let client = client_builder.build()?;

        let persistence = self
            .persistence
            .unwrap_or_else(|| Arc::new(MemoryPersistence::default()));
        let store = SessionStore::new(persistence);

        let auth = self
            .auth_api
            .unwrap_or_else(|| Arc::new(AuthService::new(client.clone(), base_url.clone())));

        let refresher =
            RefreshCoordinator::new(Arc::clone(&auth), store.clone(), self.on_session_expired);
        let gateway = AuthGateway::new(client, base_url, store.clone(), refresher.clone());

        Ok(SessionManager {
            auth,
            store,
            refresher,
            gateway,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::auth::MockAuthApi;
    use crate::types::TokenResponse;
    use warden_core::tests::sample_user;

    fn manager_with(api: MockAuthApi) -> SessionManager {
        SessionManager::builder()
            .base_url("http://localhost:8000/api/v1/")
            .auth_api(Arc::new(api))
            .build()
            .unwrap()
    }

    #[test]
    fn builder_requires_base_url() {
        let result = SessionManager::builder().build();
        assert!(matches!(result, Err(ClientError::Configuration(_))));
    }

    #[test]
    fn builder_trims_trailing_slash() {
        let manager = manager_with(MockAuthApi::new());
        assert_eq!(manager.base_url(), "http://localhost:8000/api/v1");
    }

    #[test]
    fn from_config_rejects_invalid_config() {
        let config = ClientConfig {
            api_url: "nope".to_string(),
            ..ClientConfig::default()
        };
        assert!(matches!(
            SessionManager::from_config(&config),
            Err(ClientError::Core(_))
        ));
    }

    #[tokio::test]
    async fn login_fetches_user_when_response_has_none() {
        let mut api = MockAuthApi::new();
        api.expect_login().times(1).returning(|_| {
            Ok(TokenResponse {
                access_token: "access".to_string(),
                token_type: "bearer".to_string(),
                user: None,
            })
        });
        api.expect_current_user()
            .withf(|token| token.to_string() == "access")
            .times(1)
            .returning(|_| Ok(sample_user()));

        let manager = manager_with(api);
        let user = manager.login("ada@example.com", "pw").await.unwrap();

        assert_eq!(user, sample_user());
        assert!(manager.store().is_authenticated());
    }

    #[tokio::test]
    async fn failed_login_leaves_session_empty() {
        let mut api = MockAuthApi::new();
        api.expect_login().times(1).returning(|_| {
            Err(ClientError::AuthenticationFailed(
                "Incorrect email or password".to_string(),
            ))
        });

        let manager = manager_with(api);
        let err = manager.login("ada@example.com", "wrong").await.unwrap_err();

        assert!(err.is_auth_failure());
        assert!(!manager.store().is_authenticated());
    }

    #[tokio::test]
    async fn logout_clears_session_even_if_endpoint_fails() {
        let mut api = MockAuthApi::new();
        api.expect_logout().times(1).returning(|| {
            Err(ClientError::ServerError {
                status: 503,
                message: "unavailable".to_string(),
            })
        });

        let manager = manager_with(api);
        manager.store().set_authenticated(sample_user(), "access");

        let result = manager.logout().await;

        assert!(result.is_err());
        assert!(!manager.store().is_authenticated());
    }

    #[tokio::test]
    async fn register_does_not_log_in() {
        let mut api = MockAuthApi::new();
        api.expect_register()
            .withf(|request| request.full_name.as_deref() == Some("Ada Lovelace"))
            .times(1)
            .returning(|_| Ok(sample_user()));

        let manager = manager_with(api);
        let user = manager
            .register("ada@example.com", "pw", Some("Ada Lovelace".to_string()))
            .await
            .unwrap();

        assert_eq!(user.email, "ada@example.com");
        assert!(!manager.store().is_authenticated());
    }
}
