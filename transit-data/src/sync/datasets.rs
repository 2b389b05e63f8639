//! The datasets synced from the transit authority.

use async_trait::async_trait;
use log::debug;
use transit_core::{ParkRideFacility, RouteRecord, StopRecord, StoreError, StoreTransaction};

use super::{Dataset, RequestGate, SyncError, SyncService};
use crate::{
    api::{ParkRidePayload, PayloadError, RoutesPayload, StopsPayload, TransitApi},
    flags::{FeatureFlags, StopCachingPolicy},
};

/// Stops plus the routes serving them, written in one transaction.
#[derive(Debug, Clone, Copy, Default)]
pub struct StopsDataset;

/// Validated stops and routes of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct StopsBatch {
    /// Stops admitted by the caching flags.
    pub stops: Vec<StopRecord>,
    /// Route metadata.
    pub routes: Vec<RouteRecord>,
}

#[async_trait]
impl Dataset for StopsDataset {
    type Payload = (StopsPayload, RoutesPayload);
    type Batch = StopsBatch;

    const NAME: &'static str = "stops";
    const REQUESTS: u32 = 2;

    fn skip_reason(&self, flags: &dyn FeatureFlags) -> Option<&'static str> {
        StopCachingPolicy::from_flags(flags)
            .is_disabled()
            .then_some("local caching is disabled and no high-priority stops are configured")
    }

    async fn fetch(
        &self,
        api: &dyn TransitApi,
        gate: &RequestGate<'_>,
    ) -> Result<Self::Payload, SyncError> {
        let stops = gate.send("stops", || api.fetch_stops()).await?;
        let routes = gate.send("routes", || api.fetch_routes()).await?;
        Ok((stops, routes))
    }

    fn validate(
        &self,
        (stops, routes): Self::Payload,
        flags: &dyn FeatureFlags,
    ) -> Result<Self::Batch, PayloadError> {
        let mut stops = stops.into_records()?;
        let routes = routes.into_records()?;

        let policy = StopCachingPolicy::from_flags(flags);
        if !policy.caching_enabled {
            let fetched = stops.len();
            stops.retain(|stop| policy.admits(&stop.stop_id));
            debug!(
                "local caching disabled; keeping {} of {fetched} stops",
                stops.len()
            );
        }
        Ok(StopsBatch { stops, routes })
    }

    fn write(transaction: &StoreTransaction<'_>, batch: &Self::Batch) -> Result<usize, StoreError> {
        let (stops, routes) = transaction.upsert_stops_and_routes(&batch.stops, &batch.routes)?;
        Ok(stops + routes)
    }
}

/// Park-and-ride facilities.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParkRideDataset;

#[async_trait]
impl Dataset for ParkRideDataset {
    type Payload = ParkRidePayload;
    type Batch = Vec<ParkRideFacility>;

    const NAME: &'static str = "park_ride";
    const REQUESTS: u32 = 1;

    async fn fetch(
        &self,
        api: &dyn TransitApi,
        gate: &RequestGate<'_>,
    ) -> Result<Self::Payload, SyncError> {
        gate.send("park_ride", || api.fetch_park_ride()).await
    }

    fn validate(
        &self,
        payload: Self::Payload,
        _flags: &dyn FeatureFlags,
    ) -> Result<Self::Batch, PayloadError> {
        payload.into_records()
    }

    fn write(transaction: &StoreTransaction<'_>, batch: &Self::Batch) -> Result<usize, StoreError> {
        transaction.upsert_park_ride(batch)
    }
}

/// Sync service for stops and routes.
pub type StopsIngestionManager = SyncService<StopsDataset>;

/// Sync service for park-and-ride facilities.
pub type ParkRideIngestionManager = SyncService<ParkRideDataset>;
