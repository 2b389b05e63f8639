//! Client side of the transit authority API.
//!
//! [`TransitApi`] is the seam between the sync services and the network.
//! [`HttpTransitApi`] talks JSON over HTTPS; tests use the stub in
//! [`test_support`].

use async_trait::async_trait;
use thiserror::Error;

mod payload;
mod provider;

#[doc(hidden)]
pub mod test_support;

pub use payload::{
    ParkRidePayload, PayloadError, RoutesPayload, StopsPayload, WireFacility, WireRoute, WireStop,
};
pub use provider::{
    DEFAULT_USER_AGENT, HttpTransitApi, HttpTransitApiConfig, ProviderBuildError,
};

/// Errors raised while talking to the transit authority.
///
/// Cloneable so that every caller sharing one sync run receives the same
/// failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// The request did not complete within the configured timeout.
    #[error("request to {url} timed out after {timeout_secs}s")]
    Timeout {
        /// Requested URL.
        url: String,
        /// Timeout that elapsed.
        timeout_secs: u64,
    },
    /// The service answered with a non-success status.
    #[error("request to {url} failed with status {status}: {message}")]
    Http {
        /// Requested URL.
        url: String,
        /// HTTP status code.
        status: u16,
        /// Error text reported by the client.
        message: String,
    },
    /// The connection failed before a response arrived.
    #[error("network error contacting {url}: {message}")]
    Network {
        /// Requested URL.
        url: String,
        /// Error text reported by the client.
        message: String,
    },
    /// The response body was not the expected JSON document.
    #[error("failed to decode response from {url}: {message}")]
    Decode {
        /// Requested URL.
        url: String,
        /// Decoder error text.
        message: String,
    },
}

impl ApiError {
    /// Whether retrying the same request may succeed.
    ///
    /// Timeouts, connection failures, throttling (429) and server errors
    /// (5xx) are transient. Client errors and undecodable bodies are not.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Network { .. } => true,
            Self::Http { status, .. } => *status == 429 || *status >= 500,
            Self::Decode { .. } => false,
        }
    }
}

/// Remote source of transit reference data.
#[async_trait]
pub trait TransitApi: Send + Sync {
    /// Fetch the full stop list.
    async fn fetch_stops(&self) -> Result<StopsPayload, ApiError>;

    /// Fetch route metadata.
    async fn fetch_routes(&self) -> Result<RoutesPayload, ApiError>;

    /// Fetch park-and-ride facilities.
    async fn fetch_park_ride(&self) -> Result<ParkRidePayload, ApiError>;
}
