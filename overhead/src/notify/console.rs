use std::io::{self, Write};

use futures::{
    future::{self, BoxFuture},
    FutureExt,
};
#[cfg(feature = "tracing")]
use tracing::info;

use super::{AlertData, Notify, NotifyError};

/// Prints every alert to stdout as a JSON line.
#[derive(Debug, Clone, Copy, Default)]
pub struct Console;

impl Console {
    /// Create a console notifier.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn render(alert: &AlertData) -> Result<String, NotifyError> {
        let json = serde_json::to_string(alert)?;
        Ok(format!("ALERT: {} - {json}", alert.alert_type))
    }
}

impl Notify for Console {
    fn name(&self) -> &'static str {
        "console"
    }

    fn notify<'a>(&'a self, alert: &'a AlertData) -> BoxFuture<'a, Result<(), NotifyError>> {
        let res = Self::render(alert).map(|line| {
            #[cfg(feature = "tracing")]
            info!(hex = %alert.aircraft.hex, alert_type = %alert.alert_type, "{}", alert.description);

            // a closed stdout is not worth failing the alert over
            let _ = writeln!(io::stdout().lock(), "{line}");
        });

        future::ready(res).boxed()
    }
}
