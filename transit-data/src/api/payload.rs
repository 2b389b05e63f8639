//! JSON documents returned by the transit authority API.
//!
//! Every field is optional on the wire so that validation can name the
//! missing field and the offending record instead of failing the whole
//! document with a decoder error.

use geo::Coord;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use transit_core::{
    ParkRideFacility, RecordError, RouteRecord, StopRecord, TransportMode, UnknownTransportMode,
};

/// Problems found while turning a payload into validated records.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PayloadError {
    /// The document held no records.
    #[error("{dataset} payload is empty")]
    Empty {
        /// Dataset being validated.
        dataset: &'static str,
    },
    /// A record omitted a required field.
    #[error("{dataset} record {index} is missing {field}")]
    MissingField {
        /// Dataset being validated.
        dataset: &'static str,
        /// Position of the record in the document.
        index: usize,
        /// Name of the missing field.
        field: &'static str,
    },
    /// A record carried an unknown transport mode.
    #[error("{dataset} record {index} has an unknown transport mode")]
    UnknownMode {
        /// Dataset being validated.
        dataset: &'static str,
        /// Position of the record in the document.
        index: usize,
        /// Parse failure.
        #[source]
        source: UnknownTransportMode,
    },
    /// A record failed domain validation.
    #[error("{dataset} record {index} is invalid")]
    InvalidRecord {
        /// Dataset being validated.
        dataset: &'static str,
        /// Position of the record in the document.
        index: usize,
        /// Validation failure.
        #[source]
        source: RecordError,
    },
}

/// Response body of `GET {base}/stops`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StopsPayload {
    /// Stops in authority order.
    #[serde(default)]
    pub stops: Vec<WireStop>,
}

/// One stop as sent on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WireStop {
    /// Stable stop identifier.
    pub id: Option<String>,
    /// Display name.
    pub name: Option<String>,
    /// WGS84 latitude.
    pub lat: Option<f64>,
    /// WGS84 longitude.
    pub lon: Option<f64>,
    /// Transport mode codes such as `"bus"` or `"light_rail"`.
    #[serde(default)]
    pub modes: Vec<String>,
}

/// Response body of `GET {base}/routes`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoutesPayload {
    /// Routes in authority order.
    #[serde(default)]
    pub routes: Vec<WireRoute>,
}

/// One route as sent on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WireRoute {
    /// Stable route identifier.
    pub id: Option<String>,
    /// Public line name.
    pub short_name: Option<String>,
    /// Descriptive name.
    pub long_name: Option<String>,
    /// Transport mode code.
    pub mode: Option<String>,
}

/// Response body of `GET {base}/park-ride`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParkRidePayload {
    /// Facilities in authority order.
    #[serde(default)]
    pub facilities: Vec<WireFacility>,
}

/// One park-and-ride facility as sent on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WireFacility {
    /// Stable facility identifier.
    pub id: Option<String>,
    /// Display name.
    pub name: Option<String>,
    /// WGS84 latitude.
    pub lat: Option<f64>,
    /// WGS84 longitude.
    pub lon: Option<f64>,
    /// Number of parking spaces, when published.
    pub capacity: Option<u32>,
}

struct Cursor {
    dataset: &'static str,
    index: usize,
}

impl Cursor {
    fn require<T>(&self, value: Option<T>, field: &'static str) -> Result<T, PayloadError> {
        value.ok_or(PayloadError::MissingField {
            dataset: self.dataset,
            index: self.index,
            field,
        })
    }

    fn mode(&self, code: &str) -> Result<TransportMode, PayloadError> {
        code.parse().map_err(|source| PayloadError::UnknownMode {
            dataset: self.dataset,
            index: self.index,
            source,
        })
    }

    fn record<T>(&self, built: Result<T, RecordError>) -> Result<T, PayloadError> {
        built.map_err(|source| PayloadError::InvalidRecord {
            dataset: self.dataset,
            index: self.index,
            source,
        })
    }
}

impl StopsPayload {
    /// Validate every stop. An empty list is rejected.
    pub fn into_records(self) -> Result<Vec<StopRecord>, PayloadError> {
        const DATASET: &str = "stops";
        if self.stops.is_empty() {
            return Err(PayloadError::Empty { dataset: DATASET });
        }
        self.stops
            .into_iter()
            .enumerate()
            .map(|(index, stop)| {
                let cursor = Cursor {
                    dataset: DATASET,
                    index,
                };
                let id = cursor.require(stop.id, "id")?;
                let name = cursor.require(stop.name, "name")?;
                let lat = cursor.require(stop.lat, "lat")?;
                let lon = cursor.require(stop.lon, "lon")?;
                let modes = stop
                    .modes
                    .iter()
                    .map(|code| cursor.mode(code))
                    .collect::<Result<_, _>>()?;
                cursor.record(StopRecord::new(id, name, Coord { x: lon, y: lat }, modes))
            })
            .collect()
    }
}

impl RoutesPayload {
    /// Validate every route. An empty list is accepted.
    pub fn into_records(self) -> Result<Vec<RouteRecord>, PayloadError> {
        self.routes
            .into_iter()
            .enumerate()
            .map(|(index, route)| {
                let cursor = Cursor {
                    dataset: "routes",
                    index,
                };
                let id = cursor.require(route.id, "id")?;
                let short_name = cursor.require(route.short_name, "short_name")?;
                let mode = cursor.mode(&cursor.require(route.mode, "mode")?)?;
                cursor.record(RouteRecord::new(id, short_name, route.long_name, mode))
            })
            .collect()
    }
}

impl ParkRidePayload {
    /// Validate every facility. An empty list is rejected.
    pub fn into_records(self) -> Result<Vec<ParkRideFacility>, PayloadError> {
        const DATASET: &str = "park_ride";
        if self.facilities.is_empty() {
            return Err(PayloadError::Empty { dataset: DATASET });
        }
        self.facilities
            .into_iter()
            .enumerate()
            .map(|(index, facility)| {
                let cursor = Cursor {
                    dataset: DATASET,
                    index,
                };
                let id = cursor.require(facility.id, "id")?;
                let name = cursor.require(facility.name, "name")?;
                let lat = cursor.require(facility.lat, "lat")?;
                let lon = cursor.require(facility.lon, "lon")?;
                cursor.record(ParkRideFacility::new(
                    id,
                    name,
                    Coord { x: lon, y: lat },
                    facility.capacity,
                ))
            })
            .collect()
    }
}

impl From<&StopRecord> for WireStop {
    fn from(stop: &StopRecord) -> Self {
        Self {
            id: Some(stop.stop_id.clone()),
            name: Some(stop.name.clone()),
            lat: Some(stop.location.y),
            lon: Some(stop.location.x),
            modes: stop.modes.iter().map(|mode| mode.code().to_owned()).collect(),
        }
    }
}

impl From<&RouteRecord> for WireRoute {
    fn from(route: &RouteRecord) -> Self {
        Self {
            id: Some(route.route_id.clone()),
            short_name: Some(route.short_name.clone()),
            long_name: route.long_name.clone(),
            mode: Some(route.mode.code().to_owned()),
        }
    }
}

impl From<&ParkRideFacility> for WireFacility {
    fn from(facility: &ParkRideFacility) -> Self {
        Self {
            id: Some(facility.facility_id.clone()),
            name: Some(facility.name.clone()),
            lat: Some(facility.location.y),
            lon: Some(facility.location.x),
            capacity: facility.capacity,
        }
    }
}
