//! Aircraft positions from a PiAware/dump1090 `aircraft.json` feed.
use futures::future::BoxFuture;
#[cfg(feature = "geo-types")]
use geo_types::{point, Point};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// An error that can occur when fetching the feed.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The request could not be sent or the response could not be read.
    #[cfg(feature = "http")]
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    /// The feed answered with something other than 2xx.
    #[error("unexpected status {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, as text.
        body: String,
    },
    /// The document could not be parsed.
    #[error("decode json failed: {0}")]
    Decode(#[from] serde_json::Error),
}

/// A single aircraft as reported by the feed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// ICAO 24-bit transponder address.
    pub hex: String,
    /// Callsign, empty when unknown.
    #[serde(default, deserialize_with = "trimmed")]
    pub flight: String,
    /// Latitude in degrees. `(0, 0)` means no position fix.
    #[serde(default)]
    pub lat: f64,
    /// Longitude in degrees.
    #[serde(default)]
    pub lon: f64,
    /// Barometric altitude in feet.
    #[serde(default, deserialize_with = "altitude_serde::deserialize")]
    pub alt_baro: i32,
}

impl Position {
    /// Whether the feed had a position fix for this aircraft.
    #[must_use]
    pub fn has_fix(&self) -> bool {
        #[allow(clippy::float_cmp)]
        let sentinel = self.lat == 0.0 && self.lon == 0.0;
        !sentinel
    }

    /// Get the reported location.
    #[must_use]
    #[cfg(feature = "geo-types")]
    pub fn location(&self) -> Point<f64> {
        point! { x: self.lon, y: self.lat }
    }
}

fn trimmed<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    // dump1090 pads callsigns to eight characters
    String::deserialize(deserializer).map(|s| s.trim().to_owned())
}

mod altitude_serde {
    use serde::{de, Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Feet(f64),
        Label(String),
    }

    #[allow(clippy::cast_possible_truncation)]
    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<i32, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Raw::deserialize(deserializer)? {
            Raw::Feet(ft) => Ok(ft.round() as i32),
            Raw::Label(label) if label == "ground" => Ok(0),
            Raw::Label(other) => Err(de::Error::custom(format!("invalid altitude {other:?}"))),
        }
    }
}

/// The `aircraft.json` document.
#[derive(Debug, Clone, Deserialize)]
pub struct Snapshot {
    /// Feed timestamp (unix seconds).
    #[serde(default)]
    pub now: f64,
    /// Every aircraft the receiver currently tracks.
    #[serde(default)]
    pub aircraft: Vec<Position>,
}

impl std::str::FromStr for Snapshot {
    type Err = FetchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_str(s).map_err(Into::into)
    }
}

/// Something that can produce the current set of aircraft.
pub trait Fetch: Send + Sync {
    /// Fetch every aircraft listed at `url`.
    fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Vec<Position>, FetchError>>;
}

#[cfg(feature = "http")]
pub use self::http::HttpFetcher;

#[cfg(feature = "http")]
mod http {
    use std::time::Duration;

    use futures::{future::BoxFuture, FutureExt};
    #[cfg(feature = "tracing")]
    use tracing::debug;

    use super::{Fetch, FetchError, Position, Snapshot};

    const TIMEOUT: Duration = Duration::from_secs(10);

    /// Fetches the feed over HTTP with a bounded timeout.
    #[derive(Debug, Clone)]
    pub struct HttpFetcher {
        client: reqwest::Client,
    }

    impl HttpFetcher {
        /// Create a fetcher with the default ten second timeout.
        ///
        /// # Errors
        ///
        /// Fails if the TLS backend cannot be initialized.
        pub fn new() -> Result<Self, FetchError> {
            Self::with_timeout(TIMEOUT)
        }

        /// Create a fetcher with a custom timeout.
        ///
        /// # Errors
        ///
        /// Fails if the TLS backend cannot be initialized.
        pub fn with_timeout(timeout: Duration) -> Result<Self, FetchError> {
            let client = reqwest::Client::builder().timeout(timeout).build()?;
            Ok(Self { client })
        }

        async fn get(&self, url: &str) -> Result<Vec<Position>, FetchError> {
            let response = self.client.get(url).send().await?;
            let status = response.status();
            let body = response.text().await?;

            if !status.is_success() {
                return Err(FetchError::Status {
                    status: status.as_u16(),
                    body,
                });
            }

            let snapshot: Snapshot = body.parse()?;

            #[cfg(feature = "tracing")]
            debug!(url, aircraft = snapshot.aircraft.len(), "fetched feed");

            Ok(snapshot.aircraft)
        }
    }

    impl Fetch for HttpFetcher {
        fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Vec<Position>, FetchError>> {
            self.get(url).boxed()
        }
    }
}
