//! Settings from defaults, a JSON file, the environment and flags, in
//! increasing precedence.
use std::{
    io,
    path::{Path, PathBuf},
    time::Duration,
};

use overhead::{
    catalog::CatalogConfig,
    dedupe::DedupeConfig,
    filter::{Base, Range},
    notify::{BrokerConfig, NotifierConfig, WebhookConfig},
};
use serde::Deserialize;
use structopt::StructOpt;
use thiserror::Error;

const DEFAULT_CONFIG_PATH: &str = "config.json";
const DEFAULT_DATA_URL: &str = "http://localhost:8080/data/aircraft.json";
const MAX_DURATION: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {source}", path.display())]
    Io { source: io::Error, path: PathBuf },
    #[error("failed to parse config file '{}': {source}", path.display())]
    Parse {
        source: serde_json::Error,
        path: PathBuf,
    },
    #[error("invalid duration for {key}: {source}")]
    Duration {
        key: &'static str,
        source: humantime::DurationError,
    },
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("{0} must not exceed 100 years")]
    TooLarge(&'static str),
}

/// Alert when aircraft fly over a fixed point.
#[derive(Debug, Default, StructOpt)]
#[structopt(name = "overheadalert")]
pub struct Args {
    /// JSON config file
    #[structopt(long, env = "WFO_CONFIG", parse(from_os_str))]
    pub config: Option<PathBuf>,
    /// Time between feed polls, e.g. "1m"
    #[structopt(long, env = "WFO_INTERVAL")]
    pub interval: Option<humantime::Duration>,
    /// Radius of interest in km
    #[structopt(long, env = "WFO_RADIUS_KM")]
    pub radius: Option<f64>,
    /// Altitude ceiling in feet
    #[structopt(long, env = "WFO_ALTITUDE_MAX")]
    pub altitude: Option<i32>,
    /// Base latitude
    #[structopt(long, env = "WFO_BASE_LAT", allow_hyphen_values = true)]
    pub lat: Option<f64>,
    /// Base longitude
    #[structopt(long, env = "WFO_BASE_LON", allow_hyphen_values = true)]
    pub lon: Option<f64>,
    /// aircraft.json URL
    #[structopt(long, env = "WFO_DATA_URL")]
    pub url: Option<String>,
    /// Time between heartbeat log lines
    #[structopt(long, env = "WFO_HEARTBEAT")]
    pub heartbeat: Option<humantime::Duration>,
    /// Log JSON lines instead of text
    #[structopt(long)]
    pub json_logs: bool,

    /// Print alerts to stdout
    #[structopt(long, env = "WFO_CONSOLE")]
    pub console: Option<bool>,

    #[structopt(long, env = "WFO_WEBHOOK_ENABLED")]
    pub webhook_enabled: Option<bool>,
    #[structopt(long, env = "WFO_WEBHOOK_URL")]
    pub webhook_url: Option<String>,
    #[structopt(long, env = "WFO_WEBHOOK_TIMEOUT")]
    pub webhook_timeout: Option<humantime::Duration>,

    #[structopt(long, env = "WFO_RABBITMQ_ENABLED")]
    pub rabbitmq_enabled: Option<bool>,
    #[structopt(long, env = "WFO_RABBITMQ_URL")]
    pub rabbitmq_url: Option<String>,
    #[structopt(long, env = "WFO_RABBITMQ_EXCHANGE")]
    pub rabbitmq_exchange: Option<String>,
    #[structopt(long, env = "WFO_RABBITMQ_ROUTING_KEY")]
    pub rabbitmq_routing_key: Option<String>,
    #[structopt(long, env = "WFO_RABBITMQ_TIMEOUT")]
    pub rabbitmq_timeout: Option<humantime::Duration>,

    /// Suppress repeat alerts for the same aircraft
    #[structopt(long, env = "WFO_ALERT_DEDUPE_ENABLED")]
    pub alert_dedupe_enabled: Option<bool>,
    /// Minimum time between alerts for the same aircraft
    #[structopt(long, env = "WFO_ALERT_BLOCKOUT_MIN")]
    pub alert_blockout: Option<humantime::Duration>,

    #[structopt(long, env = "WFO_CATALOGER_ENABLED")]
    pub cataloger_enabled: Option<bool>,
    #[structopt(long, env = "WFO_CATALOGER_URL")]
    pub cataloger_url: Option<String>,
    #[structopt(long, env = "WFO_CATALOGER_INDEX")]
    pub cataloger_index: Option<String>,
    #[structopt(long, env = "WFO_CATALOGER_USERNAME")]
    pub cataloger_username: Option<String>,
    #[structopt(long, env = "WFO_CATALOGER_PASSWORD", hide_env_values = true)]
    pub cataloger_password: Option<String>,
    #[structopt(long, env = "WFO_CATALOGER_TIMEOUT")]
    pub cataloger_timeout: Option<humantime::Duration>,
    #[structopt(long, env = "WFO_CATALOGER_MAX_RETRIES")]
    pub cataloger_max_retries: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct FileConfig {
    scrape_interval: Option<String>,
    radius_km: Option<f64>,
    altitude_max: Option<i32>,
    base_lat: Option<f64>,
    base_lon: Option<f64>,
    #[serde(rename = "DataURL")]
    data_url: Option<String>,
    heartbeat: Option<String>,
    #[serde(default)]
    notifier: FileNotifier,
    #[serde(default)]
    alert_dedupe: FileDedupe,
    #[serde(default)]
    cataloger: FileCataloger,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct FileNotifier {
    console: Option<bool>,
    #[serde(default)]
    webhook: FileWebhook,
    #[serde(default, rename = "RabbitMQ")]
    rabbitmq: FileBroker,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct FileWebhook {
    enabled: Option<bool>,
    #[serde(rename = "URL")]
    url: Option<String>,
    timeout: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct FileBroker {
    enabled: Option<bool>,
    #[serde(rename = "URL")]
    url: Option<String>,
    exchange: Option<String>,
    routing_key: Option<String>,
    timeout: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct FileDedupe {
    enabled: Option<bool>,
    blockout_min: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct FileCataloger {
    enabled: Option<bool>,
    #[serde(rename = "URL")]
    url: Option<String>,
    index: Option<String>,
    username: Option<String>,
    password: Option<String>,
    timeout: Option<String>,
    max_retries: Option<u32>,
}

impl FileConfig {
    fn construct_from_path(path: &Path) -> Result<Self, ConfigError> {
        let string = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            source,
            path: path.to_owned(),
        })?;

        serde_json::from_str(&string).map_err(|source| ConfigError::Parse {
            source,
            path: path.to_owned(),
        })
    }
}

/// Fully resolved settings.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub interval: Duration,
    pub heartbeat: Duration,
    pub base: Base,
    pub range: Range,
    pub data_url: String,
    pub json_logs: bool,
    pub notifier: NotifierConfig,
    pub dedupe: DedupeConfig,
    pub catalog: CatalogConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            heartbeat: Duration::from_secs(5 * 60),
            base: Base::default(),
            range: Range::default(),
            data_url: DEFAULT_DATA_URL.to_owned(),
            json_logs: false,
            notifier: NotifierConfig::default(),
            dedupe: DedupeConfig::default(),
            catalog: CatalogConfig::default(),
        }
    }
}

fn duration(
    key: &'static str,
    flag: Option<humantime::Duration>,
    file: Option<String>,
    default: Duration,
) -> Result<Duration, ConfigError> {
    if let Some(d) = flag {
        return Ok(d.into());
    }

    file.map_or(Ok(default), |s| {
        humantime::parse_duration(&s).map_err(|source| ConfigError::Duration { key, source })
    })
}

impl Config {
    /// Layer the config file (if any) under `args`.
    ///
    /// A missing file is only an error when its path was given explicitly.
    pub fn load(args: Args) -> Result<Self, ConfigError> {
        let file = match &args.config {
            Some(path) => FileConfig::construct_from_path(path)?,
            None => match FileConfig::construct_from_path(Path::new(DEFAULT_CONFIG_PATH)) {
                Err(ConfigError::Io { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
                    FileConfig::default()
                }
                res => res?,
            },
        };

        Self::merge(args, file)
    }

    fn merge(args: Args, file: FileConfig) -> Result<Self, ConfigError> {
        let default = Self::default();
        let FileConfig {
            scrape_interval,
            radius_km,
            altitude_max,
            base_lat,
            base_lon,
            data_url,
            heartbeat,
            notifier,
            alert_dedupe,
            cataloger,
        } = file;

        let config = Self {
            interval: duration("interval", args.interval, scrape_interval, default.interval)?,
            heartbeat: duration("heartbeat", args.heartbeat, heartbeat, default.heartbeat)?,
            base: Base {
                lat: args.lat.or(base_lat).unwrap_or(default.base.lat),
                lon: args.lon.or(base_lon).unwrap_or(default.base.lon),
            },
            range: Range {
                radius_km: args.radius.or(radius_km).unwrap_or(default.range.radius_km),
                altitude_max_ft: args
                    .altitude
                    .or(altitude_max)
                    .unwrap_or(default.range.altitude_max_ft),
            },
            data_url: args.url.or(data_url).unwrap_or(default.data_url),
            json_logs: args.json_logs,
            notifier: NotifierConfig {
                console: args
                    .console
                    .or(notifier.console)
                    .unwrap_or(default.notifier.console),
                webhook: WebhookConfig {
                    enabled: args
                        .webhook_enabled
                        .or(notifier.webhook.enabled)
                        .unwrap_or(default.notifier.webhook.enabled),
                    url: args
                        .webhook_url
                        .or(notifier.webhook.url)
                        .unwrap_or(default.notifier.webhook.url),
                    timeout: duration(
                        "webhook timeout",
                        args.webhook_timeout,
                        notifier.webhook.timeout,
                        default.notifier.webhook.timeout,
                    )?,
                },
                broker: BrokerConfig {
                    enabled: args
                        .rabbitmq_enabled
                        .or(notifier.rabbitmq.enabled)
                        .unwrap_or(default.notifier.broker.enabled),
                    url: args
                        .rabbitmq_url
                        .or(notifier.rabbitmq.url)
                        .unwrap_or(default.notifier.broker.url),
                    exchange: args
                        .rabbitmq_exchange
                        .or(notifier.rabbitmq.exchange)
                        .unwrap_or(default.notifier.broker.exchange),
                    routing_key: args
                        .rabbitmq_routing_key
                        .or(notifier.rabbitmq.routing_key)
                        .unwrap_or(default.notifier.broker.routing_key),
                    timeout: duration(
                        "rabbitmq timeout",
                        args.rabbitmq_timeout,
                        notifier.rabbitmq.timeout,
                        default.notifier.broker.timeout,
                    )?,
                },
            },
            dedupe: DedupeConfig {
                enabled: args
                    .alert_dedupe_enabled
                    .or(alert_dedupe.enabled)
                    .unwrap_or(default.dedupe.enabled),
                blockout: duration(
                    "alert blockout",
                    args.alert_blockout,
                    alert_dedupe.blockout_min,
                    default.dedupe.blockout,
                )?,
            },
            catalog: CatalogConfig {
                enabled: args
                    .cataloger_enabled
                    .or(cataloger.enabled)
                    .unwrap_or(default.catalog.enabled),
                url: args
                    .cataloger_url
                    .or(cataloger.url)
                    .unwrap_or(default.catalog.url),
                index: args
                    .cataloger_index
                    .or(cataloger.index)
                    .unwrap_or(default.catalog.index),
                username: args
                    .cataloger_username
                    .or(cataloger.username)
                    .unwrap_or(default.catalog.username),
                password: args
                    .cataloger_password
                    .or(cataloger.password)
                    .unwrap_or(default.catalog.password),
                timeout: duration(
                    "cataloger timeout",
                    args.cataloger_timeout,
                    cataloger.timeout,
                    default.catalog.timeout,
                )?,
                max_retries: args
                    .cataloger_max_retries
                    .or(cataloger.max_retries)
                    .unwrap_or(default.catalog.max_retries),
            },
        };

        // tokio intervals panic on a zero period
        if config.interval.is_zero() {
            return Err(ConfigError::Zero("interval"));
        }
        if config.heartbeat.is_zero() {
            return Err(ConfigError::Zero("heartbeat"));
        }
        for (key, value) in [
            ("interval", config.interval),
            ("heartbeat", config.heartbeat),
            ("alert blockout", config.dedupe.blockout),
        ] {
            if value > MAX_DURATION {
                return Err(ConfigError::TooLarge(key));
            }
        }

        Ok(config)
    }
}
