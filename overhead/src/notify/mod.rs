//! Alert delivery.
//!
//! Every transport implements [`Notify`]. [`from_config`] builds the enabled
//! set and wraps more than one of them in a [`Multi`].
use std::time::Duration;

use futures::{
    future::{self, BoxFuture},
    FutureExt,
};
use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;

use crate::filter::NearbyAircraft;

#[cfg(feature = "amqp")]
mod broker;
mod console;
mod multi;
#[cfg(feature = "http")]
mod webhook;

#[cfg(feature = "amqp")]
pub use self::broker::{AmqpConnection, Broker, Publish};
pub use self::{console::Console, multi::Multi};
#[cfg(feature = "http")]
pub use self::webhook::Webhook;

/// Alert type for an aircraft inside the configured range.
pub const AIRCRAFT_NEARBY: &str = "aircraft_nearby";

/// Default timeout for network transports.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// An error that can occur when delivering an alert.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// The alert could not be serialized.
    #[error("encode alert failed: {0}")]
    Encode(#[from] serde_json::Error),
    /// The webhook request failed.
    #[cfg(feature = "http")]
    #[error("failed to send webhook: {0}")]
    Http(#[from] reqwest::Error),
    /// The webhook answered with something other than 2xx.
    #[error("webhook returned status {0}")]
    Status(u16),
    /// The message broker reported an error.
    #[cfg(feature = "amqp")]
    #[error("broker error: {0}")]
    Broker(#[from] lapin::Error),
    /// The broker connection is gone.
    #[error("broker connection is not available")]
    Disconnected,
    /// The transport did not answer in time.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    /// An enabled transport is missing a required setting.
    #[error("{0} is required")]
    Missing(&'static str),
    /// An enabled transport was compiled out.
    #[error("{0} support is not compiled in")]
    Unsupported(&'static str),
    /// Nothing to deliver alerts to.
    #[error("no notifiers configured")]
    NoneConfigured,
}

/// A single alert, as delivered to every transport.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertData {
    /// When the alert was raised.
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    /// The aircraft that triggered it.
    pub aircraft: NearbyAircraft,
    /// What kind of alert this is, e.g. [`AIRCRAFT_NEARBY`].
    pub alert_type: String,
    /// Human readable summary.
    pub description: String,
}

impl AlertData {
    /// An [`AIRCRAFT_NEARBY`] alert for `aircraft`.
    #[must_use]
    pub fn nearby(aircraft: NearbyAircraft, timestamp: OffsetDateTime) -> Self {
        let description = format!(
            "Aircraft {} detected within {:.1} km at {} ft altitude",
            aircraft.hex, aircraft.distance_km, aircraft.alt_baro
        );

        Self {
            timestamp,
            aircraft,
            alert_type: AIRCRAFT_NEARBY.to_owned(),
            description,
        }
    }

    fn to_json(&self) -> Result<Vec<u8>, NotifyError> {
        serde_json::to_vec(self).map_err(Into::into)
    }
}

/// A destination for alerts.
///
/// Implementations must tolerate being called repeatedly and rapidly.
pub trait Notify: Send + Sync {
    /// Short transport name for logs.
    fn name(&self) -> &'static str;

    /// Deliver one alert.
    fn notify<'a>(&'a self, alert: &'a AlertData) -> BoxFuture<'a, Result<(), NotifyError>>;

    /// Release any connection held by the transport.
    fn close(&self) -> BoxFuture<'_, Result<(), NotifyError>> {
        future::ok(()).boxed()
    }
}

/// Discards every alert.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOp;

impl Notify for NoOp {
    fn name(&self) -> &'static str {
        "noop"
    }

    fn notify<'a>(&'a self, _alert: &'a AlertData) -> BoxFuture<'a, Result<(), NotifyError>> {
        future::ok(()).boxed()
    }
}

/// Webhook settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookConfig {
    /// Whether to post alerts.
    pub enabled: bool,
    /// Endpoint receiving a JSON `POST` per alert.
    pub url: String,
    /// Request timeout.
    pub timeout: Duration,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: String::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Message broker (AMQP) settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    /// Whether to publish alerts.
    pub enabled: bool,
    /// `amqp://` connection URL.
    pub url: String,
    /// Topic exchange, declared durable on connect.
    pub exchange: String,
    /// Routing key for every alert.
    pub routing_key: String,
    /// Connect and publish timeout.
    pub timeout: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: String::new(),
            exchange: String::new(),
            routing_key: String::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Which transports to deliver to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifierConfig {
    /// Print alerts to stdout.
    pub console: bool,
    /// Webhook transport.
    pub webhook: WebhookConfig,
    /// Broker transport.
    pub broker: BrokerConfig,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            console: true,
            webhook: WebhookConfig::default(),
            broker: BrokerConfig::default(),
        }
    }
}

/// Build the enabled transports.
///
/// # Errors
///
/// Fails when nothing is enabled, when an enabled transport is missing a
/// setting, or when the broker cannot be reached.
pub async fn from_config(config: &NotifierConfig) -> Result<Box<dyn Notify>, NotifyError> {
    let mut notifiers: Vec<Box<dyn Notify>> = Vec::new();

    if config.console {
        notifiers.push(Box::new(Console::new()));
    }

    if config.webhook.enabled {
        #[cfg(feature = "http")]
        notifiers.push(Box::new(Webhook::new(config.webhook.clone())?));
        #[cfg(not(feature = "http"))]
        return Err(NotifyError::Unsupported("webhook"));
    }

    if config.broker.enabled {
        #[cfg(feature = "amqp")]
        notifiers.push(Box::new(Broker::connect(config.broker.clone()).await?));
        #[cfg(not(feature = "amqp"))]
        return Err(NotifyError::Unsupported("broker"));
    }

    match notifiers.len() {
        0 => Err(NotifyError::NoneConfigured),
        1 => Ok(notifiers.remove(0)),
        _ => Ok(Box::new(Multi::new(notifiers))),
    }
}
