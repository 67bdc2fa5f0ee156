//! Archival of every sighting to a search backend.
use std::time::Duration;

use futures::{
    future::{self, BoxFuture},
    FutureExt,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;

use crate::{feed::Position, filter::Base, geodesy::distance_km};

#[cfg(feature = "http")]
mod elasticsearch;

#[cfg(feature = "http")]
pub use self::elasticsearch::ElasticsearchCataloger;

/// An error that can occur when archiving.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Cataloging is enabled without a backend URL.
    #[error("cataloger URL is required when cataloging is enabled")]
    MissingUrl,
    /// The request could not be sent.
    #[cfg(feature = "http")]
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    /// The backend answered with an error status.
    #[error("request failed with status {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, as text.
        body: String,
    },
    /// A record could not be serialized.
    #[error("encode record failed: {0}")]
    Encode(#[from] serde_json::Error),
    /// Every attempt failed.
    #[error("bulk request failed after {attempts} attempts: {source}")]
    Exhausted {
        /// How many requests were sent.
        attempts: u32,
        /// The error of the last attempt.
        source: Box<CatalogError>,
    },
    /// Cataloging is enabled but was compiled out.
    #[error("cataloging support is not compiled in")]
    Unsupported,
}

/// One archived sighting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AircraftRecord {
    /// Transponder address.
    pub hex: String,
    /// Callsign.
    pub flight: String,
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lon: f64,
    /// Barometric altitude in feet.
    pub alt_baro: i32,
    /// When the batch was archived.
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    /// Distance from the base, 0 without a position fix.
    pub distance_km: f64,
    /// Base latitude.
    pub base_lat: f64,
    /// Base longitude.
    pub base_lon: f64,
}

impl AircraftRecord {
    /// Describe `position` as seen from `base` at `timestamp`.
    #[must_use]
    pub fn new(position: &Position, base: Base, timestamp: OffsetDateTime) -> Self {
        let distance_km = if position.has_fix() {
            distance_km(base.lat, base.lon, position.lat, position.lon)
        } else {
            0.0
        };

        Self {
            hex: position.hex.clone(),
            flight: position.flight.clone(),
            lat: position.lat,
            lon: position.lon,
            alt_baro: position.alt_baro,
            timestamp,
            distance_km,
            base_lat: base.lat,
            base_lon: base.lon,
        }
    }
}

/// A sink for aircraft snapshots.
pub trait Cataloger: Send + Sync {
    /// Archive a whole snapshot.
    fn catalog_aircraft<'a>(
        &'a self,
        aircraft: &'a [Position],
        base: Base,
    ) -> BoxFuture<'a, Result<(), CatalogError>>;

    /// Check that the backend is reachable.
    fn health_check(&self) -> BoxFuture<'_, Result<(), CatalogError>>;

    /// Release resources.
    ///
    /// # Errors
    ///
    /// Implementation specific.
    fn close(&self) -> Result<(), CatalogError>;
}

/// Accepts and drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpCataloger;

impl Cataloger for NoOpCataloger {
    fn catalog_aircraft<'a>(
        &'a self,
        _aircraft: &'a [Position],
        _base: Base,
    ) -> BoxFuture<'a, Result<(), CatalogError>> {
        future::ok(()).boxed()
    }

    fn health_check(&self) -> BoxFuture<'_, Result<(), CatalogError>> {
        future::ok(()).boxed()
    }

    fn close(&self) -> Result<(), CatalogError> {
        Ok(())
    }
}

/// Search backend settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogConfig {
    /// Whether to archive at all.
    pub enabled: bool,
    /// Base URL of the cluster.
    pub url: String,
    /// Index every record is written to.
    pub index: String,
    /// Basic auth user, used together with `password`.
    pub username: String,
    /// Basic auth password.
    pub password: String,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Extra attempts after a failed bulk request.
    pub max_retries: u32,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: String::new(),
            index: "aircraft".to_owned(),
            username: String::new(),
            password: String::new(),
            timeout: Duration::from_secs(30),
            max_retries: 3,
        }
    }
}

/// Build the configured cataloger, the no-op one when disabled.
///
/// # Errors
///
/// Fails when enabled without a URL.
pub fn from_config(config: &CatalogConfig) -> Result<Box<dyn Cataloger>, CatalogError> {
    if !config.enabled {
        return Ok(Box::new(NoOpCataloger));
    }

    #[cfg(feature = "http")]
    return Ok(Box::new(ElasticsearchCataloger::new(config.clone())?));

    #[cfg(not(feature = "http"))]
    Err(CatalogError::Unsupported)
}
