//! Distance and altitude bounded inclusion against a fixed base.
use serde::{Deserialize, Serialize};

use crate::{feed::Position, geodesy::distance_km};

/// The point everything is measured from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Base {
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lon: f64,
}

/// How close an aircraft has to be to count as nearby.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Range {
    /// Maximum great-circle distance from the base, inclusive.
    pub radius_km: f64,
    /// Maximum barometric altitude, inclusive.
    pub altitude_max_ft: i32,
}

impl Default for Range {
    fn default() -> Self {
        Self {
            radius_km: 25.0,
            altitude_max_ft: 10_000,
        }
    }
}

/// A [`Position`] inside the range, with its distance from the base.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NearbyAircraft {
    /// The reported position.
    #[serde(flatten)]
    pub position: Position,
    /// Distance from the base in kilometers.
    pub distance_km: f64,
}

impl std::ops::Deref for NearbyAircraft {
    type Target = Position;

    fn deref(&self) -> &Self::Target {
        &self.position
    }
}

/// Keep the aircraft within `range` of `base`, in input order.
///
/// Aircraft without a position fix are skipped.
#[must_use]
pub fn filter_aircraft(aircraft: &[Position], base: Base, range: Range) -> Vec<NearbyAircraft> {
    aircraft
        .iter()
        .filter(|a| a.has_fix())
        .filter_map(|a| {
            let distance_km = distance_km(base.lat, base.lon, a.lat, a.lon);
            (distance_km <= range.radius_km && a.alt_baro <= range.altitude_max_ft).then(|| {
                NearbyAircraft {
                    position: a.clone(),
                    distance_km,
                }
            })
        })
        .collect()
}
