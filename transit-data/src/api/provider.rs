//! HTTP implementation of [`TransitApi`].
//!
//! Requests are plain `GET`s against `{base_url}/stops`, `{base_url}/routes`
//! and `{base_url}/park-ride`, authenticated with a bearer token when one is
//! configured.
//!
//! # Example
//!
//! ```no_run
//! use transit_data::api::{HttpTransitApi, HttpTransitApiConfig, TransitApi};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let api = HttpTransitApi::with_config(
//!     HttpTransitApiConfig::new("https://api.transport.example/v1").with_token("secret"),
//! )?;
//! let stops = api.fetch_stops().await?;
//! println!("{} stops", stops.stops.len());
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use serde::de::DeserializeOwned;

use super::{ApiError, ParkRidePayload, RoutesPayload, StopsPayload, TransitApi};

/// Error type for [`HttpTransitApi`] construction failures.
#[derive(Debug, thiserror::Error)]
pub enum ProviderBuildError {
    /// Failed to build the HTTP client.
    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),
}

/// Default user agent for transit API requests.
pub const DEFAULT_USER_AGENT: &str = "transit-cache/0.1";

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Configuration for [`HttpTransitApi`].
#[derive(Clone)]
pub struct HttpTransitApiConfig {
    /// Base URL of the API (e.g., `"https://api.transport.example/v1"`).
    pub base_url: String,
    /// Request timeout duration.
    pub timeout: Duration,
    /// User agent string for requests.
    pub user_agent: String,
    /// Bearer token sent with every request.
    pub token: Option<String>,
}

impl std::fmt::Debug for HttpTransitApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransitApiConfig")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .field("user_agent", &self.user_agent)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Default for HttpTransitApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_owned(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            token: None,
        }
    }
}

impl HttpTransitApiConfig {
    /// Create a new configuration with the given base URL.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// Set the request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the user agent string.
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Set the bearer token.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
}

/// `reqwest`-backed transit API client.
#[derive(Debug)]
pub struct HttpTransitApi {
    client: Client,
    config: HttpTransitApiConfig,
}

impl HttpTransitApi {
    /// Create a client with default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client fails to build.
    pub fn new(base_url: impl Into<String>) -> Result<Self, ProviderBuildError> {
        Self::with_config(HttpTransitApiConfig::new(base_url))
    }

    /// Create a client with explicit configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client fails to build.
    pub fn with_config(config: HttpTransitApiConfig) -> Result<Self, ProviderBuildError> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .connect_timeout(config.timeout)
            .timeout(config.timeout)
            .build()
            .map_err(ProviderBuildError::HttpClient)?;
        Ok(Self { client, config })
    }

    fn endpoint_url(&self, path: &str) -> String {
        format!("{}/{path}", self.config.base_url.trim_end_matches('/'))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let url = self.endpoint_url(path);
        debug!("GET {url}");

        let mut request = self.client.get(&url);
        if let Some(token) = &self.config.token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .map_err(|err| self.convert_reqwest_error(&err, &url))?
            .error_for_status()
            .map_err(|err| self.convert_reqwest_error(&err, &url))?;

        response.json().await.map_err(|err| ApiError::Decode {
            url,
            message: err.to_string(),
        })
    }

    /// Convert a reqwest error to an [`ApiError`].
    fn convert_reqwest_error(&self, error: &reqwest::Error, url: &str) -> ApiError {
        if error.is_timeout() {
            return ApiError::Timeout {
                url: url.to_owned(),
                timeout_secs: self.config.timeout.as_secs(),
            };
        }

        if let Some(status) = error.status() {
            return ApiError::Http {
                url: url.to_owned(),
                status: status.as_u16(),
                message: error.to_string(),
            };
        }

        if error.is_decode() {
            return ApiError::Decode {
                url: url.to_owned(),
                message: error.to_string(),
            };
        }

        ApiError::Network {
            url: url.to_owned(),
            message: error.to_string(),
        }
    }
}

#[async_trait]
impl TransitApi for HttpTransitApi {
    async fn fetch_stops(&self) -> Result<StopsPayload, ApiError> {
        self.get_json("stops").await
    }

    async fn fetch_routes(&self) -> Result<RoutesPayload, ApiError> {
        self.get_json("routes").await
    }

    async fn fetch_park_ride(&self) -> Result<ParkRidePayload, ApiError> {
        self.get_json("park-ride").await
    }
}
