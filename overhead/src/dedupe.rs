//! Time-windowed suppression of repeat alerts.
//!
//! Every permitted alert leaves two records behind, one keyed by the
//! transponder alone (`":" + hex`) and one keyed by callsign and transponder
//! (`flight + ":" + hex`). A sighting is alerted on when either of its keys
//! is absent or older than the blockout window, so a known callsign showing
//! up on a new transponder (or the reverse) still alerts.
use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, PoisonError, RwLock,
    },
    time::{Duration, Instant},
};

use crate::feed::Position;

/// Source of the current instant.
pub trait Clock: Send + Sync {
    /// The current instant.
    fn now(&self) -> Instant;
}

/// The monotonic system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    epoch: Instant,
    elapsed_ns: AtomicU64,
}

impl ManualClock {
    /// Create a clock frozen at the current instant.
    #[must_use]
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            elapsed_ns: AtomicU64::new(0),
        }
    }

    /// Move the clock forward.
    #[allow(clippy::cast_possible_truncation)]
    pub fn advance(&self, by: Duration) {
        self.elapsed_ns
            .fetch_add(by.as_nanos() as u64, Ordering::SeqCst);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.epoch + Duration::from_nanos(self.elapsed_ns.load(Ordering::SeqCst))
    }
}

/// Deduplication settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DedupeConfig {
    /// When false every sighting alerts and no state is kept.
    pub enabled: bool,
    /// Minimum time between two alerts for the same key.
    pub blockout: Duration,
}

impl Default for DedupeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            blockout: Duration::from_secs(15 * 60),
        }
    }
}

/// When a key was last alerted on.
#[derive(Debug, Clone)]
pub struct AlertRecord {
    /// Callsign at the time of the alert.
    pub tail_number: String,
    /// Transponder address at the time of the alert.
    pub transponder: String,
    /// When the alert was permitted.
    pub last_alerted: Instant,
}

/// Introspection of a [`Deduplicator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DedupeStats {
    /// Whether suppression is active.
    pub enabled: bool,
    /// The configured blockout window.
    pub blockout: Duration,
    /// Records currently held.
    pub active_records: usize,
}

/// Decides whether a sighting is worth another alert.
///
/// Safe to share between threads; the read-decide-write sequence of
/// [`Deduplicator::should_alert`] runs under a single write lock.
pub struct Deduplicator {
    config: DedupeConfig,
    clock: Arc<dyn Clock>,
    records: RwLock<HashMap<String, AlertRecord>>,
}

impl Deduplicator {
    /// Create an empty deduplicator on the system clock.
    #[must_use]
    pub fn new(config: DedupeConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create an empty deduplicator on a custom clock.
    #[must_use]
    pub fn with_clock(config: DedupeConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Whether `aircraft` should be alerted on now.
    ///
    /// A `true` answer is committed immediately: the caller is expected to
    /// alert, and the same identity stays suppressed for the blockout window
    /// whether or not delivery succeeds.
    pub fn should_alert(&self, aircraft: &Position) -> bool {
        if !self.config.enabled {
            return true;
        }

        let tail_key = tail_key(&aircraft.flight, &aircraft.hex);
        let transponder_key = transponder_key(&aircraft.hex);

        let mut records = self
            .records
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let now = self.clock.now();

        let stale = |key: &str| {
            records.get(key).map_or(true, |record| {
                now.saturating_duration_since(record.last_alerted) >= self.config.blockout
            })
        };
        let should_alert = stale(&tail_key) || stale(&transponder_key);

        if should_alert {
            let record = AlertRecord {
                tail_number: aircraft.flight.clone(),
                transponder: aircraft.hex.clone(),
                last_alerted: now,
            };
            // a callsign-less aircraft only owns its transponder key
            if !aircraft.flight.is_empty() {
                records.insert(tail_key, record.clone());
            }
            records.insert(transponder_key, record);

            let horizon = self.config.blockout.saturating_mul(2);
            records.retain(|_, record| now.saturating_duration_since(record.last_alerted) <= horizon);
        }

        should_alert
    }

    /// Current settings and record count.
    pub fn stats(&self) -> DedupeStats {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);

        DedupeStats {
            enabled: self.config.enabled,
            blockout: self.config.blockout,
            active_records: records.len(),
        }
    }
}

impl fmt::Debug for Deduplicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deduplicator")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

fn tail_key(flight: &str, hex: &str) -> String {
    format!("{flight}:{hex}")
}

fn transponder_key(hex: &str) -> String {
    format!(":{hex}")
}
