use std::sync::Arc;

use anyhow::Context;
use overhead::{catalog, dedupe::Deduplicator, feed::HttpFetcher, notify, stats::Stats};
use structopt::StructOpt;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::{
    config::{Args, Config},
    monitor::MonitorService,
};

mod config;
mod monitor;

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    let config = Config::load(Args::from_args()).context("failed to load configuration")?;
    init_logging(config.json_logs);

    let notifier = notify::from_config(&config.notifier)
        .await
        .context("failed to create notifier")?;
    let cataloger = catalog::from_config(&config.catalog).context("failed to create cataloger")?;

    if config.catalog.enabled {
        match cataloger.health_check().await {
            Ok(()) => info!(url = %config.catalog.url, index = %config.catalog.index, "cataloger ready"),
            Err(e) => warn!("cataloger health check failed: {e}"),
        }
    }

    let service = MonitorService {
        data_url: config.data_url.clone(),
        base: config.base,
        range: config.range,
        fetcher: Box::new(HttpFetcher::new().context("failed to create HTTP client")?),
        notifier,
        cataloger,
        deduplicator: Arc::new(Deduplicator::new(config.dedupe)),
        stats: Arc::new(Stats::new()),
    };

    info!(
        lat = config.base.lat,
        lon = config.base.lon,
        radius_km = config.range.radius_km,
        altitude_max_ft = config.range.altitude_max_ft,
        interval = %humantime::format_duration(config.interval),
        url = %config.data_url,
        notifier = service.notifier.name(),
        dedupe = config.dedupe.enabled,
        blockout = %humantime::format_duration(config.dedupe.blockout),
        cataloger = config.catalog.enabled,
        "starting aircraft monitor"
    );

    let mut poll = interval(config.interval);
    poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut heartbeat = interval_at(Instant::now() + config.heartbeat, config.heartbeat);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = poll.tick() => {
                service.tick().await;
            }
            _ = heartbeat.tick() => service.log_heartbeat(),
            res = &mut shutdown => {
                res.context("failed to listen for shutdown signal")?;
                info!("shutting down");
                break;
            }
        }
    }

    service.close().await;
    service.log_heartbeat();

    Ok(())
}
