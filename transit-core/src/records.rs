//! Reference records persisted by the store.

use std::collections::BTreeSet;

use geo::Coord;
use thiserror::Error;

use crate::TransportMode;

/// Errors returned when constructing a reference record.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RecordError {
    /// The identifier was empty or whitespace.
    #[error("{record} identifier must not be blank")]
    BlankId {
        /// Kind of record being built.
        record: &'static str,
    },
    /// The display name was empty or whitespace.
    #[error("{record} {id} must have a name")]
    BlankName {
        /// Kind of record being built.
        record: &'static str,
        /// Identifier of the offending record.
        id: String,
    },
    /// The coordinate was not finite or fell outside WGS84 bounds.
    #[error("{record} {id} has an invalid location (lon {lon}, lat {lat})")]
    InvalidLocation {
        /// Kind of record being built.
        record: &'static str,
        /// Identifier of the offending record.
        id: String,
        /// Longitude in degrees.
        lon: f64,
        /// Latitude in degrees.
        lat: f64,
    },
}

fn require_id(record: &'static str, id: String) -> Result<String, RecordError> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        return Err(RecordError::BlankId { record });
    }
    if trimmed.len() == id.len() {
        Ok(id)
    } else {
        Ok(trimmed.to_owned())
    }
}

fn require_name(record: &'static str, id: &str, name: String) -> Result<String, RecordError> {
    if name.trim().is_empty() {
        return Err(RecordError::BlankName {
            record,
            id: id.to_owned(),
        });
    }
    Ok(name)
}

fn require_location(
    record: &'static str,
    id: &str,
    location: Coord<f64>,
) -> Result<Coord<f64>, RecordError> {
    let Coord { x: lon, y: lat } = location;
    let valid = lon.is_finite()
        && lat.is_finite()
        && (-180.0..=180.0).contains(&lon)
        && (-90.0..=90.0).contains(&lat);
    if valid {
        Ok(location)
    } else {
        Err(RecordError::InvalidLocation {
            record,
            id: id.to_owned(),
            lon,
            lat,
        })
    }
}

/// A boarding point published by the transit authority.
///
/// Coordinates are WGS84 with `x = longitude` and `y = latitude`.
///
/// # Examples
/// ```
/// use std::collections::BTreeSet;
/// use geo::Coord;
/// use transit_core::{StopRecord, TransportMode};
///
/// let stop = StopRecord::new(
///     "200060",
///     "Central Station",
///     Coord { x: 151.2065, y: -33.8832 },
///     BTreeSet::from([TransportMode::Train, TransportMode::LightRail]),
/// )?;
/// assert_eq!(stop.stop_id, "200060");
/// # Ok::<(), transit_core::RecordError>(())
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StopRecord {
    /// Stable external identifier; unique within the store.
    pub stop_id: String,
    /// Display name.
    pub name: String,
    /// Position of the stop.
    pub location: Coord<f64>,
    /// Modes serving the stop.
    pub modes: BTreeSet<TransportMode>,
}

impl StopRecord {
    /// Validate and construct a stop. Surrounding whitespace is trimmed from
    /// the identifier.
    pub fn new(
        stop_id: impl Into<String>,
        name: impl Into<String>,
        location: Coord<f64>,
        modes: BTreeSet<TransportMode>,
    ) -> Result<Self, RecordError> {
        let stop_id = require_id("stop", stop_id.into())?;
        let name = require_name("stop", &stop_id, name.into())?;
        let location = require_location("stop", &stop_id, location)?;
        Ok(Self {
            stop_id,
            name,
            location,
            modes,
        })
    }
}

/// Route metadata ingested alongside the stop list.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RouteRecord {
    /// Stable external identifier.
    pub route_id: String,
    /// Short public name, such as a line number.
    pub short_name: String,
    /// Optional descriptive name.
    pub long_name: Option<String>,
    /// Mode operating the route.
    pub mode: TransportMode,
}

impl RouteRecord {
    /// Validate and construct a route.
    pub fn new(
        route_id: impl Into<String>,
        short_name: impl Into<String>,
        long_name: Option<String>,
        mode: TransportMode,
    ) -> Result<Self, RecordError> {
        let route_id = require_id("route", route_id.into())?;
        let short_name = require_name("route", &route_id, short_name.into())?;
        Ok(Self {
            route_id,
            short_name,
            long_name: long_name.filter(|name| !name.trim().is_empty()),
            mode,
        })
    }
}

/// A park-and-ride car park.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ParkRideFacility {
    /// Stable external identifier.
    pub facility_id: String,
    /// Display name.
    pub name: String,
    /// Entrance location.
    pub location: Coord<f64>,
    /// Number of spaces, when published.
    pub capacity: Option<u32>,
}

impl ParkRideFacility {
    /// Validate and construct a facility.
    pub fn new(
        facility_id: impl Into<String>,
        name: impl Into<String>,
        location: Coord<f64>,
        capacity: Option<u32>,
    ) -> Result<Self, RecordError> {
        let facility_id = require_id("facility", facility_id.into())?;
        let name = require_name("facility", &facility_id, name.into())?;
        let location = require_location("facility", &facility_id, location)?;
        Ok(Self {
            facility_id,
            name,
            location,
            capacity,
        })
    }
}
