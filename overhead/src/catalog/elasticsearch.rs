use std::time::Duration;

use futures::{future::BoxFuture, FutureExt};
use reqwest::{header::CONTENT_TYPE, RequestBuilder};
use serde_json::json;
use time::OffsetDateTime;
#[cfg(feature = "tracing")]
use tracing::{debug, warn};

use super::{AircraftRecord, CatalogConfig, CatalogError, Cataloger};
use crate::{feed::Position, filter::Base};

/// Writes snapshots to Elasticsearch through the bulk API.
#[derive(Debug, Clone)]
pub struct ElasticsearchCataloger {
    config: CatalogConfig,
    client: reqwest::Client,
}

impl ElasticsearchCataloger {
    /// Create a cataloger for `config.url`.
    ///
    /// # Errors
    ///
    /// Fails without a URL or when the HTTP client cannot be built.
    pub fn new(mut config: CatalogConfig) -> Result<Self, CatalogError> {
        if config.url.is_empty() {
            return Err(CatalogError::MissingUrl);
        }
        if config.index.is_empty() {
            config.index = CatalogConfig::default().index;
        }
        if config.timeout.is_zero() {
            config.timeout = CatalogConfig::default().timeout;
        }
        config.url = config.url.trim_end_matches('/').to_owned();

        let client = reqwest::Client::builder().timeout(config.timeout).build()?;

        Ok(Self { config, client })
    }

    fn bulk_body(&self, aircraft: &[Position], base: Base) -> Result<String, CatalogError> {
        let timestamp = OffsetDateTime::now_utc();
        let action = json!({ "index": { "_index": self.config.index } }).to_string();

        let mut body = String::new();
        for position in aircraft {
            let record = AircraftRecord::new(position, base, timestamp);
            body.push_str(&action);
            body.push('\n');
            body.push_str(&serde_json::to_string(&record)?);
            body.push('\n');
        }

        Ok(body)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        if self.config.username.is_empty() || self.config.password.is_empty() {
            request
        } else {
            request.basic_auth(&self.config.username, Some(&self.config.password))
        }
    }

    async fn send_bulk(&self, body: String) -> Result<(), CatalogError> {
        let mut attempt = 0;

        loop {
            match self.bulk_once(body.clone()).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < self.config.max_retries => {
                    #[cfg(feature = "tracing")]
                    warn!(attempt = attempt + 1, "bulk request failed, retrying: {e}");
                    #[cfg(not(feature = "tracing"))]
                    drop(e);

                    attempt += 1;
                    tokio::time::sleep(Duration::from_secs(attempt.into())).await;
                }
                Err(e) => {
                    return Err(CatalogError::Exhausted {
                        attempts: attempt + 1,
                        source: Box::new(e),
                    })
                }
            }
        }
    }

    async fn bulk_once(&self, body: String) -> Result<(), CatalogError> {
        let request = self
            .client
            .post(format!("{}/_bulk", self.config.url))
            .header(CONTENT_TYPE, "application/x-ndjson")
            .body(body);

        let response = self.authorized(request).send().await?;
        check(response).await
    }

    async fn catalog(&self, aircraft: &[Position], base: Base) -> Result<(), CatalogError> {
        if aircraft.is_empty() {
            return Ok(());
        }

        let body = self.bulk_body(aircraft, base)?;
        self.send_bulk(body).await?;

        #[cfg(feature = "tracing")]
        debug!(aircraft = aircraft.len(), index = %self.config.index, "cataloged snapshot");

        Ok(())
    }

    async fn health(&self) -> Result<(), CatalogError> {
        let request = self
            .client
            .get(format!("{}/_cluster/health", self.config.url));

        let response = self.authorized(request).send().await?;
        check(response).await
    }
}

async fn check(response: reqwest::Response) -> Result<(), CatalogError> {
    let status = response.status();
    if status.is_client_error() || status.is_server_error() {
        let body = response.text().await.unwrap_or_default();
        return Err(CatalogError::Status {
            status: status.as_u16(),
            body,
        });
    }
    Ok(())
}

impl Cataloger for ElasticsearchCataloger {
    fn catalog_aircraft<'a>(
        &'a self,
        aircraft: &'a [Position],
        base: Base,
    ) -> BoxFuture<'a, Result<(), CatalogError>> {
        self.catalog(aircraft, base).boxed()
    }

    fn health_check(&self) -> BoxFuture<'_, Result<(), CatalogError>> {
        self.health().boxed()
    }

    fn close(&self) -> Result<(), CatalogError> {
        // connections are pooled by the client and dropped with it
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::ElasticsearchCataloger;
    use crate::{
        catalog::{CatalogConfig, CatalogError, Cataloger},
        feed::Position,
        filter::Base,
        testing::{serve_once, serve_sequence},
    };

    const BASE: Base = Base {
        lat: 37.6213,
        lon: -122.3790,
    };

    fn cataloger(url: String, max_retries: u32) -> ElasticsearchCataloger {
        ElasticsearchCataloger::new(CatalogConfig {
            enabled: true,
            url,
            max_retries,
            ..CatalogConfig::default()
        })
        .unwrap()
    }

    fn aircraft() -> Vec<Position> {
        vec![
            Position {
                hex: "ABC123".into(),
                flight: "TEST123".into(),
                lat: 37.7213,
                lon: -122.3790,
                alt_baro: 5000,
            },
            Position {
                hex: "DEF456".into(),
                ..Position::default()
            },
        ]
    }

    #[test]
    fn defaults_fill_in() {
        let cataloger = ElasticsearchCataloger::new(CatalogConfig {
            enabled: true,
            url: "http://localhost:9200/".into(),
            index: String::new(),
            timeout: std::time::Duration::ZERO,
            ..CatalogConfig::default()
        })
        .unwrap();

        assert_eq!(cataloger.config.url, "http://localhost:9200");
        assert_eq!(cataloger.config.index, "aircraft");
        assert_eq!(cataloger.config.timeout.as_secs(), 30);
    }

    #[test]
    fn bulk_body_is_ndjson() {
        let body = cataloger("http://localhost:9200".into(), 0)
            .bulk_body(&aircraft(), BASE)
            .unwrap();

        let lines: Vec<serde_json::Value> = body
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0]["index"]["_index"], "aircraft");
        assert_eq!(lines[1]["hex"], "ABC123");
        assert!((lines[1]["distance_km"].as_f64().unwrap() - 11.1).abs() < 0.1);
        assert_eq!(lines[3]["hex"], "DEF456");
        assert_eq!(lines[3]["distance_km"], 0.0);
        assert!(body.ends_with('\n'));
    }

    #[tokio::test]
    async fn posts_bulk_with_auth() {
        let (url, request) = serve_once(200, r#"{"errors":false}"#).await;
        let cataloger = ElasticsearchCataloger::new(CatalogConfig {
            enabled: true,
            url,
            username: "elastic".into(),
            password: "changeme".into(),
            ..CatalogConfig::default()
        })
        .unwrap();

        cataloger.catalog_aircraft(&aircraft(), BASE).await.unwrap();

        let request = request.await.unwrap();
        let lower = request.to_lowercase();
        assert!(request.starts_with("POST /_bulk HTTP/1.1"));
        assert!(lower.contains("content-type: application/x-ndjson"));
        // base64("elastic:changeme")
        assert!(request.contains("ZWxhc3RpYzpjaGFuZ2VtZQ=="));
    }

    #[tokio::test]
    async fn empty_snapshot_sends_nothing() {
        // nothing listens here, so any request would fail
        let cataloger = cataloger("http://127.0.0.1:9".into(), 0);

        cataloger.catalog_aircraft(&[], BASE).await.unwrap();
    }

    #[tokio::test]
    async fn retries_until_success() {
        let (url, requests) = serve_sequence(vec![
            (503, "unavailable".to_owned()),
            (200, "{}".to_owned()),
        ])
        .await;

        cataloger(url, 3)
            .catalog_aircraft(&aircraft(), BASE)
            .await
            .unwrap();

        assert_eq!(requests.await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let (url, _requests) = serve_sequence(vec![
            (500, "first".to_owned()),
            (400, "second".to_owned()),
        ])
        .await;

        let err = cataloger(url, 1)
            .catalog_aircraft(&aircraft(), BASE)
            .await
            .unwrap_err();

        match err {
            CatalogError::Exhausted { attempts, source } => {
                assert_eq!(attempts, 2);
                assert!(
                    matches!(*source, CatalogError::Status { status: 400, ref body } if body == "second")
                );
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn health_check() {
        let (url, request) = serve_once(200, r#"{"status":"green"}"#).await;

        cataloger(url, 0).health_check().await.unwrap();

        assert!(request.await.unwrap().starts_with("GET /_cluster/health"));
    }

    #[tokio::test]
    async fn unhealthy() {
        let (url, _request) = serve_once(503, "red").await;

        let err = cataloger(url, 0).health_check().await.unwrap_err();
        assert!(matches!(err, CatalogError::Status { status: 503, .. }));
    }
}
