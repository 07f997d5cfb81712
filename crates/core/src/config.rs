//! Client configuration
//!
//! Loaded from built-in defaults, then an optional file, then `WARDEN_*`
//! environment variables (for example `WARDEN_API_URL`).

use crate::error::{CoreError, CoreResult};
use crate::persistence::DEFAULT_STORAGE_KEY;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Origin of the remote API
    pub api_url: String,

    /// Path prefix all endpoints live under
    pub api_prefix: String,

    /// Transport timeout in seconds, 0 disables it
    pub timeout_secs: u64,

    /// User agent sent with every request
    pub user_agent: String,

    /// Name of the storage entry holding the persisted session
    pub storage_key: String,

    /// Directory for persisted session and logs
    pub state_dir: PathBuf,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8000".to_string(),
            api_prefix: "/api/v1".to_string(),
            timeout_secs: 30,
            user_agent: concat!("warden-client/", env!("CARGO_PKG_VERSION")).to_string(),
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
            state_dir: default_state_dir(),
        }
    }
}

/// `WARDEN_STATE_DIR`, else the platform data directory
pub fn default_state_dir() -> PathBuf {
    std::env::var("WARDEN_STATE_DIR").map_or_else(
        |_| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("warden")
        },
        PathBuf::from,
    )
}

impl ClientConfig {
    /// Load configuration with defaults, an optional file and environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if the
    /// resulting configuration fails validation
    pub fn load(path: Option<&Path>) -> CoreResult<Self> {
        let defaults = Self::default();

        let mut builder = ::config::Config::builder()
            .set_default("api_url", defaults.api_url)?
            .set_default("api_prefix", defaults.api_prefix)?
            .set_default("timeout_secs", defaults.timeout_secs)?
            .set_default("user_agent", defaults.user_agent)?
            .set_default("storage_key", defaults.storage_key)?
            .set_default("state_dir", defaults.state_dir.to_string_lossy().to_string())?;

        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path));
        }

        let settings = builder
            .add_source(::config::Environment::with_prefix("WARDEN"))
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the configuration can produce working endpoints
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`] describing the first problem found
    pub fn validate(&self) -> CoreResult<()> {
        let url = Url::parse(&self.api_url).map_err(|e| {
            CoreError::invalid_config(format!("api_url `{}` is not a valid URL: {e}", self.api_url))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(CoreError::invalid_config(format!(
                "api_url must use http or https, got `{}`",
                url.scheme()
            )));
        }
        if !self.api_prefix.is_empty() && !self.api_prefix.starts_with('/') {
            return Err(CoreError::invalid_config(format!(
                "api_prefix must start with `/`, got `{}`",
                self.api_prefix
            )));
        }
        if self.storage_key.trim().is_empty() {
            return Err(CoreError::invalid_config("storage_key must not be empty"));
        }
        Ok(())
    }

    /// Base URL endpoints are resolved against, without a trailing slash
    pub fn base_url(&self) -> String {
        format!(
            "{}{}",
            self.api_url.trim_end_matches('/'),
            self.api_prefix.trim_end_matches('/')
        )
    }

    pub const fn timeout(&self) -> Option<Duration> {
        if self.timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.timeout_secs))
        }
    }
}
