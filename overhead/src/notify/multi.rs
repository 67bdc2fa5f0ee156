use std::fmt;

use futures::{future::BoxFuture, FutureExt};
#[cfg(feature = "tracing")]
use tracing::warn;

use super::{AlertData, Notify, NotifyError};

/// Fans an alert out to several transports.
///
/// Every transport is attempted even when an earlier one fails; the last
/// error is returned.
pub struct Multi {
    notifiers: Vec<Box<dyn Notify>>,
}

impl Multi {
    /// Wrap `notifiers`, which are called in order.
    #[must_use]
    pub fn new(notifiers: Vec<Box<dyn Notify>>) -> Self {
        Self { notifiers }
    }

    async fn notify_all(&self, alert: &AlertData) -> Result<(), NotifyError> {
        let mut last_err = None;

        for notifier in &self.notifiers {
            if let Err(e) = notifier.notify(alert).await {
                #[cfg(feature = "tracing")]
                warn!(notifier = notifier.name(), hex = %alert.aircraft.hex, "notify failed: {e}");
                last_err = Some(e);
            }
        }

        last_err.map_or(Ok(()), Err)
    }

    async fn close_all(&self) -> Result<(), NotifyError> {
        let mut last_err = None;

        for notifier in &self.notifiers {
            if let Err(e) = notifier.close().await {
                last_err = Some(e);
            }
        }

        last_err.map_or(Ok(()), Err)
    }
}

impl Notify for Multi {
    fn name(&self) -> &'static str {
        "multi"
    }

    fn notify<'a>(&'a self, alert: &'a AlertData) -> BoxFuture<'a, Result<(), NotifyError>> {
        self.notify_all(alert).boxed()
    }

    fn close(&self) -> BoxFuture<'_, Result<(), NotifyError>> {
        self.close_all().boxed()
    }
}

impl fmt::Debug for Multi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.notifiers.iter().map(|n| n.name()))
            .finish()
    }
}
