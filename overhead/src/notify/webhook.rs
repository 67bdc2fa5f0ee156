use futures::{future::BoxFuture, FutureExt};
use reqwest::header::CONTENT_TYPE;
#[cfg(feature = "tracing")]
use tracing::debug;

use super::{AlertData, Notify, NotifyError, WebhookConfig};

/// Posts every alert as JSON to an HTTP endpoint.
#[derive(Debug, Clone)]
pub struct Webhook {
    url: String,
    client: reqwest::Client,
}

impl Webhook {
    /// Create a webhook notifier.
    ///
    /// # Errors
    ///
    /// Fails without a URL or when the HTTP client cannot be built.
    pub fn new(config: WebhookConfig) -> Result<Self, NotifyError> {
        if config.url.is_empty() {
            return Err(NotifyError::Missing("webhook URL"));
        }

        let client = reqwest::Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            url: config.url,
            client,
        })
    }

    async fn post(&self, alert: &AlertData) -> Result<(), NotifyError> {
        let body = alert.to_json()?;

        let response = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Status(status.as_u16()));
        }

        #[cfg(feature = "tracing")]
        debug!(url = %self.url, %status, "webhook delivered");

        Ok(())
    }
}

impl Notify for Webhook {
    fn name(&self) -> &'static str {
        "webhook"
    }

    fn notify<'a>(&'a self, alert: &'a AlertData) -> BoxFuture<'a, Result<(), NotifyError>> {
        self.post(alert).boxed()
    }
}
