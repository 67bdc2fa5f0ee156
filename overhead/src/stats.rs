//! Running counters for the monitoring loop.
use std::{
    collections::HashMap,
    sync::{PoisonError, RwLock},
    time::{Duration, Instant},
};

use serde::Serialize;
use time::OffsetDateTime;

/// Scrape counters and the set of aircraft seen so far.
#[derive(Debug)]
pub struct Stats {
    started: Instant,
    start_time: OffsetDateTime,
    inner: RwLock<Counters>,
}

#[derive(Debug, Default)]
struct Counters {
    scrape_count: u64,
    scrape_failures: u64,
    unique_aircraft: HashMap<String, OffsetDateTime>,
}

impl Counters {
    /// Successful scrapes as a percentage of all scrapes.
    ///
    /// Reads 100 until the first successful scrape, failures included.
    #[allow(clippy::cast_precision_loss)]
    fn success_rate(&self) -> f64 {
        if self.scrape_count == 0 {
            return 100.0;
        }

        let total = self.scrape_count + self.scrape_failures;
        self.scrape_count as f64 / total as f64 * 100.0
    }
}

/// A point-in-time copy of [`Stats`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    /// Time since the counters were created.
    #[serde(serialize_with = "duration_secs_serde::serialize")]
    pub uptime: Duration,
    /// Successful scrapes.
    pub scrape_count: u64,
    /// Failed scrapes.
    pub scrape_failures: u64,
    /// See [`Stats::snapshot`].
    pub success_rate: f64,
    /// Distinct transponders seen.
    pub unique_aircraft: usize,
    /// When the counters were created.
    #[serde(with = "time::serde::rfc3339")]
    pub start_time: OffsetDateTime,
}

mod duration_secs_serde {
    use std::time::Duration;

    use serde::Serializer;

    pub(super) fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }
}

impl Stats {
    /// Start counting now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            start_time: OffsetDateTime::now_utc(),
            inner: RwLock::default(),
        }
    }

    /// Record a successful scrape.
    pub fn record_scrape(&self) {
        self.write().scrape_count += 1;
    }

    /// Record a failed scrape.
    pub fn record_scrape_failure(&self) {
        self.write().scrape_failures += 1;
    }

    /// Remember `hex` with the current time unless it was seen before.
    pub fn record_aircraft(&self, hex: &str) {
        if hex.is_empty() {
            return;
        }

        self.write()
            .unique_aircraft
            .entry(hex.to_owned())
            .or_insert_with(OffsetDateTime::now_utc);
    }

    /// Copy out the current counters.
    ///
    /// `success_rate` is `scrapes / (scrapes + failures) * 100`, and 100
    /// while there has not been a single successful scrape.
    pub fn snapshot(&self) -> StatsSnapshot {
        let inner = self.read();

        StatsSnapshot {
            uptime: self.started.elapsed(),
            scrape_count: inner.scrape_count,
            scrape_failures: inner.scrape_failures,
            success_rate: inner.success_rate(),
            unique_aircraft: inner.unique_aircraft.len(),
            start_time: self.start_time,
        }
    }

    /// Every transponder seen so far with its first sighting, oldest first.
    pub fn unique_aircraft(&self) -> Vec<(String, OffsetDateTime)> {
        let mut aircraft: Vec<_> = self
            .read()
            .unique_aircraft
            .iter()
            .map(|(hex, first_seen)| (hex.clone(), *first_seen))
            .collect();
        aircraft.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        aircraft
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Counters> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Counters> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}
