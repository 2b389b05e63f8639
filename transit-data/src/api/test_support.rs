//! Test utilities for transit API consumers.
//!
//! [`StubTransitApi`] serves canned payloads, counts requests per endpoint
//! and can inject failures or latency, so sync behaviour can be verified
//! without a network.

use std::{
    collections::VecDeque,
    sync::{
        Mutex, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;

use super::{ApiError, ParkRidePayload, RoutesPayload, StopsPayload, TransitApi};

/// Endpoints served by [`StubTransitApi`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// `GET /stops`.
    Stops,
    /// `GET /routes`.
    Routes,
    /// `GET /park-ride`.
    ParkRide,
}

/// Deterministic [`TransitApi`] double.
///
/// # Example
///
/// ```
/// use transit_data::api::{StopsPayload, TransitApi, WireStop};
/// use transit_data::api::test_support::{Endpoint, StubTransitApi};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), transit_data::api::ApiError> {
/// let stub = StubTransitApi::new().with_stops(StopsPayload {
///     stops: vec![WireStop::default()],
/// });
/// let payload = stub.fetch_stops().await?;
/// assert_eq!(payload.stops.len(), 1);
/// assert_eq!(stub.request_count(Endpoint::Stops), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct StubTransitApi {
    stops: Mutex<StopsPayload>,
    routes: Mutex<RoutesPayload>,
    park_ride: Mutex<ParkRidePayload>,
    failures: Mutex<VecDeque<ApiError>>,
    latency: Option<Duration>,
    stops_requests: AtomicUsize,
    routes_requests: AtomicUsize,
    park_ride_requests: AtomicUsize,
}

impl StubTransitApi {
    /// Create a stub serving empty documents.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `payload` from the stops endpoint.
    #[must_use]
    pub fn with_stops(self, payload: StopsPayload) -> Self {
        self.set_stops(payload);
        self
    }

    /// Serve `payload` from the routes endpoint.
    #[must_use]
    pub fn with_routes(self, payload: RoutesPayload) -> Self {
        self.set_routes(payload);
        self
    }

    /// Serve `payload` from the park-and-ride endpoint.
    #[must_use]
    pub fn with_park_ride(self, payload: ParkRidePayload) -> Self {
        *lock(&self.park_ride) = payload;
        self
    }

    /// Delay every response by `latency`.
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Replace the stops document served from now on.
    pub fn set_stops(&self, payload: StopsPayload) {
        *lock(&self.stops) = payload;
    }

    /// Replace the routes document served from now on.
    pub fn set_routes(&self, payload: RoutesPayload) {
        *lock(&self.routes) = payload;
    }

    /// Fail the next request, whichever endpoint it targets, with `error`.
    /// Queued failures are consumed in order.
    pub fn fail_next(&self, error: ApiError) {
        lock(&self.failures).push_back(error);
    }

    /// Number of requests received by `endpoint`, including failed ones.
    #[must_use]
    pub fn request_count(&self, endpoint: Endpoint) -> usize {
        self.counter(endpoint).load(Ordering::SeqCst)
    }

    const fn counter(&self, endpoint: Endpoint) -> &AtomicUsize {
        match endpoint {
            Endpoint::Stops => &self.stops_requests,
            Endpoint::Routes => &self.routes_requests,
            Endpoint::ParkRide => &self.park_ride_requests,
        }
    }

    async fn respond<T: Clone>(&self, endpoint: Endpoint, body: &Mutex<T>) -> Result<T, ApiError> {
        self.counter(endpoint).fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if let Some(error) = lock(&self.failures).pop_front() {
            return Err(error);
        }
        Ok(lock(body).clone())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl TransitApi for StubTransitApi {
    async fn fetch_stops(&self) -> Result<StopsPayload, ApiError> {
        self.respond(Endpoint::Stops, &self.stops).await
    }

    async fn fetch_routes(&self) -> Result<RoutesPayload, ApiError> {
        self.respond(Endpoint::Routes, &self.routes).await
    }

    async fn fetch_park_ride(&self) -> Result<ParkRidePayload, ApiError> {
        self.respond(Endpoint::ParkRide, &self.park_ride).await
    }
}

/// Build a transient network failure for `path`.
#[must_use]
pub fn network_error(path: &str) -> ApiError {
    ApiError::Network {
        url: format!("http://stub.invalid/{path}"),
        message: "connection reset".to_owned(),
    }
}
