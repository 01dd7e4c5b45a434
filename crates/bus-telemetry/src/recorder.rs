//! Background task feeding the Prometheus registry from a live dispatcher.

use event_bus::Dispatcher;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::metrics::{record_diagnostic, record_queue_metrics};

/// Spawn a task that snapshots queue metrics every `interval` and counts
/// every diagnostic the dispatcher publishes.
///
/// The task runs until aborted through the returned handle.
pub fn spawn_recorder(dispatcher: Dispatcher, interval: Duration) -> JoinHandle<()> {
    let mut diagnostics = dispatcher.diagnostics();
    let period = interval.max(Duration::from_millis(1));

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = ticker.tick() => record_queue_metrics(&dispatcher.metrics()),
                received = diagnostics.recv() => match received {
                    Ok(diagnostic) => record_diagnostic(&diagnostic),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Metrics recorder lagged behind diagnostics");
                    }
                    Err(RecvError::Closed) => {
                        debug!("Diagnostics channel closed; recorder stopping");
                        break;
                    }
                },
            }
        }
    })
}
