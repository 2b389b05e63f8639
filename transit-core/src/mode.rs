//! Transport modes served by a stop or route.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// A kind of public transport vehicle.
///
/// # Examples
/// ```
/// use transit_core::TransportMode;
///
/// let mode: TransportMode = "light_rail".parse().expect("known mode");
/// assert_eq!(mode, TransportMode::LightRail);
/// assert_eq!(mode.to_string(), "light_rail");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum TransportMode {
    /// Regular bus services.
    Bus,
    /// Street-running trams.
    Tram,
    /// Heavy rail.
    Train,
    /// Underground or metro lines.
    Metro,
    /// Ferries and water taxis.
    Ferry,
    /// Light rail on a dedicated corridor.
    LightRail,
    /// Long-distance coaches.
    Coach,
}

/// Error returned when a wire code does not name a [`TransportMode`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown transport mode {code:?}")]
pub struct UnknownTransportMode {
    /// The rejected code.
    pub code: String,
}

impl TransportMode {
    /// Every mode in bitmask order.
    pub const ALL: [Self; 7] = [
        Self::Bus,
        Self::Tram,
        Self::Train,
        Self::Metro,
        Self::Ferry,
        Self::LightRail,
        Self::Coach,
    ];

    /// Stable wire and storage code.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Bus => "bus",
            Self::Tram => "tram",
            Self::Train => "train",
            Self::Metro => "metro",
            Self::Ferry => "ferry",
            Self::LightRail => "light_rail",
            Self::Coach => "coach",
        }
    }

    /// Bit used for this mode in the persisted `transport_modes` column.
    ///
    /// Bits are part of the on-disk format and must never be reassigned.
    #[must_use]
    pub const fn bit(self) -> i64 {
        match self {
            Self::Bus => 1,
            Self::Tram => 1 << 1,
            Self::Train => 1 << 2,
            Self::Metro => 1 << 3,
            Self::Ferry => 1 << 4,
            Self::LightRail => 1 << 5,
            Self::Coach => 1 << 6,
        }
    }
}

impl fmt::Display for TransportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for TransportMode {
    type Err = UnknownTransportMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalised = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        Self::ALL
            .into_iter()
            .find(|mode| mode.code() == normalised)
            .ok_or_else(|| UnknownTransportMode { code: s.to_owned() })
    }
}

/// Pack a set of modes into the persisted bitmask.
#[must_use]
pub fn encode_modes(modes: &BTreeSet<TransportMode>) -> i64 {
    modes.iter().fold(0, |mask, mode| mask | mode.bit())
}

/// Unpack a persisted bitmask. Unknown bits are ignored.
#[must_use]
pub fn decode_modes(mask: i64) -> BTreeSet<TransportMode> {
    TransportMode::ALL
        .into_iter()
        .filter(|mode| mask & mode.bit() != 0)
        .collect()
}
