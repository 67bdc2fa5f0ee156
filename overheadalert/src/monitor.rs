use std::sync::Arc;

use overhead::{
    catalog::Cataloger,
    dedupe::Deduplicator,
    feed::{Fetch, FetchError},
    filter::{filter_aircraft, Base, Range},
    notify::{AlertData, Notify},
    stats::Stats,
};
use time::OffsetDateTime;
use tracing::{debug, error, info, instrument, warn};

/// Counts from one monitoring cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub total: usize,
    pub in_range: usize,
    pub alerts_sent: usize,
    pub notify_failures: usize,
}

/// Fetch, archive, filter, deduplicate, notify.
pub struct MonitorService {
    pub data_url: String,
    pub base: Base,
    pub range: Range,
    pub fetcher: Box<dyn Fetch>,
    pub notifier: Box<dyn Notify>,
    pub cataloger: Box<dyn Cataloger>,
    pub deduplicator: Arc<Deduplicator>,
    pub stats: Arc<Stats>,
}

impl MonitorService {
    /// Run one cycle.
    ///
    /// Only a failed fetch aborts the cycle. Archival and delivery failures
    /// are logged and counted.
    #[instrument(skip(self), fields(url = %self.data_url))]
    pub async fn run_cycle(&self) -> Result<CycleReport, FetchError> {
        let aircraft = self.fetcher.fetch(&self.data_url).await?;

        for a in &aircraft {
            self.stats.record_aircraft(&a.hex);
        }

        if let Err(e) = self.cataloger.catalog_aircraft(&aircraft, self.base).await {
            error!("failed to catalog aircraft: {e}");
        }

        let nearby = filter_aircraft(&aircraft, self.base, self.range);
        let mut report = CycleReport {
            total: aircraft.len(),
            in_range: nearby.len(),
            ..CycleReport::default()
        };

        if nearby.is_empty() {
            info!(
                total_aircraft = report.total,
                radius_km = self.range.radius_km,
                altitude_max = self.range.altitude_max_ft,
                "no aircraft in range"
            );
            return Ok(report);
        }

        info!(
            aircraft_count = report.in_range,
            total_seen = report.total,
            "aircraft detected in range"
        );

        for a in nearby {
            if !self.deduplicator.should_alert(&a) {
                debug!(hex = %a.hex, flight = %a.flight, "alert suppressed");
                continue;
            }

            let alert = AlertData::nearby(a, OffsetDateTime::now_utc());
            let a = &alert.aircraft;

            match self.notifier.notify(&alert).await {
                Ok(()) => {
                    report.alerts_sent += 1;
                    info!(
                        hex = %a.hex,
                        flight = %a.flight,
                        distance_km = a.distance_km,
                        altitude_ft = a.alt_baro,
                        lat = a.lat,
                        lon = a.lon,
                        "aircraft alert sent"
                    );
                }
                Err(e) => {
                    report.notify_failures += 1;
                    error!(hex = %a.hex, notifier = self.notifier.name(), "failed to send alert: {e}");
                }
            }
        }

        if report.alerts_sent > 0 {
            info!(
                alerts_sent = report.alerts_sent,
                aircraft_in_range = report.in_range,
                "monitoring cycle completed"
            );
        } else {
            debug!(?report, "monitoring cycle completed");
        }

        Ok(report)
    }

    /// Run a cycle and count it as a successful or failed scrape.
    pub async fn tick(&self) -> Option<CycleReport> {
        match self.run_cycle().await {
            Ok(report) => {
                self.stats.record_scrape();
                Some(report)
            }
            Err(e) => {
                self.stats.record_scrape_failure();
                error!("failed to fetch aircraft: {e}");
                None
            }
        }
    }

    pub fn log_heartbeat(&self) {
        let stats = self.stats.snapshot();
        let dedupe = self.deduplicator.stats();

        info!(
            uptime = %humantime::format_duration(std::time::Duration::from_secs(stats.uptime.as_secs())),
            scrapes = stats.scrape_count,
            failures = stats.scrape_failures,
            success_rate = format_args!("{:.1}%", stats.success_rate),
            unique_aircraft = stats.unique_aircraft,
            dedupe_records = dedupe.active_records,
            "heartbeat"
        );
    }

    pub async fn close(&self) {
        if let Err(e) = self.notifier.close().await {
            warn!(notifier = self.notifier.name(), "failed to close notifier: {e}");
        }
        if let Err(e) = self.cataloger.close() {
            warn!("failed to close cataloger: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io,
        sync::{
            atomic::{AtomicBool, AtomicUsize, Ordering},
            Arc, Mutex,
        },
        time::Duration,
    };

    use futures::{
        future::{self, BoxFuture},
        FutureExt,
    };
    use overhead::{
        catalog::{CatalogError, Cataloger, NoOpCataloger},
        dedupe::{DedupeConfig, Deduplicator, ManualClock},
        feed::{Fetch, FetchError, Position},
        filter::{Base, Range},
        notify::{AlertData, Notify, NotifyError},
        stats::Stats,
    };

    use super::{CycleReport, MonitorService};

    const BASE: Base = Base {
        lat: 37.6213,
        lon: -122.3790,
    };

    struct Feed(Mutex<Result<Vec<Position>, ()>>);

    impl Feed {
        fn ok(aircraft: Vec<Position>) -> Self {
            Self(Mutex::new(Ok(aircraft)))
        }

        fn failing() -> Self {
            Self(Mutex::new(Err(())))
        }
    }

    impl Fetch for Feed {
        fn fetch<'a>(&'a self, _url: &'a str) -> BoxFuture<'a, Result<Vec<Position>, FetchError>> {
            let res = match &*self.0.lock().unwrap() {
                Ok(aircraft) => Ok(aircraft.clone()),
                Err(()) => Err(FetchError::Status {
                    status: 502,
                    body: "bad gateway".into(),
                }),
            };
            future::ready(res).boxed()
        }
    }

    #[derive(Default)]
    struct Sent {
        alerts: Mutex<Vec<AlertData>>,
        fail: AtomicBool,
        closed: AtomicBool,
    }

    struct Recorder(Arc<Sent>);

    impl Notify for Recorder {
        fn name(&self) -> &'static str {
            "recorder"
        }

        fn notify<'a>(&'a self, alert: &'a AlertData) -> BoxFuture<'a, Result<(), NotifyError>> {
            self.0.alerts.lock().unwrap().push(alert.clone());
            if self.0.fail.load(Ordering::SeqCst) {
                future::err(NotifyError::Status(503)).boxed()
            } else {
                future::ok(()).boxed()
            }
        }

        fn close(&self) -> BoxFuture<'_, Result<(), NotifyError>> {
            self.0.closed.store(true, Ordering::SeqCst);
            future::ok(()).boxed()
        }
    }

    struct BrokenCatalog(Arc<AtomicUsize>);

    impl Cataloger for BrokenCatalog {
        fn catalog_aircraft<'a>(
            &'a self,
            _aircraft: &'a [Position],
            _base: Base,
        ) -> BoxFuture<'a, Result<(), CatalogError>> {
            self.0.fetch_add(1, Ordering::SeqCst);
            future::err(CatalogError::MissingUrl).boxed()
        }

        fn health_check(&self) -> BoxFuture<'_, Result<(), CatalogError>> {
            future::ok(()).boxed()
        }

        fn close(&self) -> Result<(), CatalogError> {
            Ok(())
        }
    }

    fn position(hex: &str, flight: &str, lat: f64, alt_baro: i32) -> Position {
        Position {
            hex: hex.into(),
            flight: flight.into(),
            lat,
            lon: BASE.lon,
            alt_baro,
        }
    }

    fn service(fetcher: Feed, sent: &Arc<Sent>, clock: Arc<ManualClock>) -> MonitorService {
        MonitorService {
            data_url: "http://receiver.local/data/aircraft.json".into(),
            base: BASE,
            range: Range::default(),
            fetcher: Box::new(fetcher),
            notifier: Box::new(Recorder(sent.clone())),
            cataloger: Box::new(NoOpCataloger),
            deduplicator: Arc::new(Deduplicator::with_clock(DedupeConfig::default(), clock)),
            stats: Arc::new(Stats::new()),
        }
    }

    #[tokio::test]
    async fn alerts_once_per_blockout() {
        let sent = Arc::new(Sent::default());
        let clock = Arc::new(ManualClock::new());
        let service = service(
            Feed::ok(vec![position("ABC123", "TEST123", BASE.lat, 5000)]),
            &sent,
            clock.clone(),
        );

        let first = service.run_cycle().await.unwrap();
        let second = service.run_cycle().await.unwrap();
        clock.advance(Duration::from_secs(15 * 60));
        let third = service.run_cycle().await.unwrap();

        assert_eq!(
            first,
            CycleReport {
                total: 1,
                in_range: 1,
                alerts_sent: 1,
                notify_failures: 0,
            }
        );
        assert_eq!(second.alerts_sent, 0);
        assert_eq!(second.in_range, 1);
        assert_eq!(third.alerts_sent, 1);

        let alerts = sent.alerts.lock().unwrap();
        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts[0].alert_type, "aircraft_nearby");
        assert_eq!(
            alerts[0].description,
            "Aircraft ABC123 detected within 0.0 km at 5000 ft altitude"
        );
    }

    #[tokio::test]
    async fn filters_before_alerting() {
        let sent = Arc::new(Sent::default());
        let service = service(
            Feed::ok(vec![
                position("AAA111", "NEAR", BASE.lat + 0.1, 3000),
                position("BBB222", "HIGH", BASE.lat, 35_000),
                position("CCC333", "FAR", BASE.lat + 1.0, 3000),
                position("DDD444", "NOFIX", 0.0, 3000),
            ]),
            &sent,
            Arc::new(ManualClock::new()),
        );

        let report = service.run_cycle().await.unwrap();

        assert_eq!(report.total, 4);
        assert_eq!(report.in_range, 1);
        assert_eq!(report.alerts_sent, 1);
        assert_eq!(sent.alerts.lock().unwrap()[0].aircraft.hex, "AAA111");
        assert_eq!(service.stats.snapshot().unique_aircraft, 4);
    }

    #[tokio::test]
    async fn fetch_failure_aborts_cycle() {
        let sent = Arc::new(Sent::default());
        let service = service(Feed::failing(), &sent, Arc::new(ManualClock::new()));

        let err = service.run_cycle().await.unwrap_err();

        assert!(matches!(err, FetchError::Status { status: 502, .. }));
        assert!(sent.alerts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn tick_records_scrapes() {
        let sent = Arc::new(Sent::default());
        let ok = service(Feed::ok(vec![]), &sent, Arc::new(ManualClock::new()));
        let failing = service(Feed::failing(), &sent, Arc::new(ManualClock::new()));

        assert_eq!(ok.tick().await, Some(CycleReport::default()));
        assert_eq!(failing.tick().await, None);

        assert_eq!(ok.stats.snapshot().scrape_count, 1);
        assert_eq!(failing.stats.snapshot().scrape_failures, 1);
        assert_eq!(failing.stats.snapshot().scrape_count, 0);
    }

    #[tokio::test]
    async fn catalog_failure_is_not_fatal() {
        let sent = Arc::new(Sent::default());
        let attempts = Arc::new(AtomicUsize::new(0));
        let mut service = service(
            Feed::ok(vec![position("ABC123", "TEST123", BASE.lat, 5000)]),
            &sent,
            Arc::new(ManualClock::new()),
        );
        service.cataloger = Box::new(BrokenCatalog(attempts.clone()));

        let report = service.run_cycle().await.unwrap();

        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(report.alerts_sent, 1);
    }

    #[tokio::test]
    async fn notify_failure_continues() {
        let sent = Arc::new(Sent::default());
        sent.fail.store(true, Ordering::SeqCst);
        let service = service(
            Feed::ok(vec![
                position("AAA111", "ONE", BASE.lat, 3000),
                position("BBB222", "TWO", BASE.lat, 4000),
            ]),
            &sent,
            Arc::new(ManualClock::new()),
        );

        let first = service.run_cycle().await.unwrap();
        let second = service.run_cycle().await.unwrap();

        assert_eq!(first.notify_failures, 2);
        assert_eq!(first.alerts_sent, 0);
        assert_eq!(sent.alerts.lock().unwrap().len(), 2);
        // the window was claimed before delivery
        assert_eq!(second.notify_failures, 0);
        assert_eq!(second.alerts_sent, 0);
    }

    #[tokio::test]
    async fn close_closes_notifier() {
        let sent = Arc::new(Sent::default());
        let service = service(Feed::ok(vec![]), &sent, Arc::new(ManualClock::new()));

        service.close().await;

        assert!(sent.closed.load(Ordering::SeqCst));
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Captured {
        fn install(&self) -> tracing::subscriber::DefaultGuard {
            let writer = self.clone();
            let subscriber = tracing_subscriber::fmt()
                .with_ansi(false)
                .with_max_level(tracing::Level::INFO)
                .with_writer(move || writer.clone())
                .finish();
            tracing::subscriber::set_default(subscriber)
        }

        fn lines(&self) -> Vec<String> {
            String::from_utf8_lossy(&self.0.lock().unwrap())
                .lines()
                .map(ToOwned::to_owned)
                .collect()
        }
    }

    #[tokio::test]
    async fn logs_delivered_alerts() {
        let logs = Captured::default();
        let _guard = logs.install();
        let sent = Arc::new(Sent::default());
        let service = service(
            Feed::ok(vec![position("ABC123", "TEST123", BASE.lat, 5000)]),
            &sent,
            Arc::new(ManualClock::new()),
        );

        service.run_cycle().await.unwrap();

        let lines = logs.lines();
        let sent_line = lines
            .iter()
            .find(|line| line.contains("aircraft alert sent"))
            .unwrap();
        assert!(sent_line.contains("hex=ABC123"), "{sent_line}");
        assert!(sent_line.contains("flight=TEST123"), "{sent_line}");
        assert!(sent_line.contains("altitude_ft=5000"), "{sent_line}");
        assert!(lines.iter().any(|line| line.contains("aircraft detected in range")));
        assert!(lines
            .iter()
            .any(|line| line.contains("monitoring cycle completed") && line.contains("alerts_sent=1")));
    }

    #[tokio::test]
    async fn logs_empty_sky() {
        let logs = Captured::default();
        let _guard = logs.install();
        let sent = Arc::new(Sent::default());
        let service = service(
            Feed::ok(vec![position("FAR001", "FAR", BASE.lat + 1.0, 5000)]),
            &sent,
            Arc::new(ManualClock::new()),
        );

        let report = service.run_cycle().await.unwrap();

        assert_eq!(report.in_range, 0);
        let lines = logs.lines();
        let line = lines
            .iter()
            .find(|line| line.contains("no aircraft in range"))
            .unwrap();
        assert!(line.contains("total_aircraft=1"), "{line}");
    }
}
