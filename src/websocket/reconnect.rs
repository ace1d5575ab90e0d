//! Reconnection policy layered over a feed connector
//!
//! Plain feed connections die on the first transport error. This wrapper
//! watches for that, backs off, and opens a fresh inner connection while
//! presenting a single long-lived connection to its handler. The handler
//! sees `FeedError::Reconnecting` for each retry and the raw transport
//! error never, so an error it receives is terminal only when it is
//! `MaxReconnectAttemptsExceeded`.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use super::connection::{deliver_error, deliver_snapshot, handler_slot, HandlerSlot};
use super::{FeedCloser, FeedConnector, FeedHandler};
use crate::config::ReconnectPolicy;
use crate::error::FeedError;
use crate::instrument::Instrument;
use crate::orderbook::OrderbookSnapshot;
use crate::telemetry::PipelineMetrics;

/// Wraps a connector with exponential backoff and jitter
pub struct ReconnectingConnector {
    inner: Arc<dyn FeedConnector>,
    policy: ReconnectPolicy,
    metrics: Option<Arc<PipelineMetrics>>,
}

impl ReconnectingConnector {
    pub fn new(inner: Arc<dyn FeedConnector>, policy: ReconnectPolicy) -> Self {
        Self {
            inner,
            policy,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<PipelineMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

impl FeedConnector for ReconnectingConnector {
    fn open(&self, instrument: Instrument, handler: Box<dyn FeedHandler>) -> FeedCloser {
        let slot = handler_slot(handler);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        tokio::spawn(supervise(
            self.inner.clone(),
            self.policy.clone(),
            self.metrics.clone(),
            instrument,
            slot.clone(),
            shutdown_rx,
        ));

        FeedCloser::new(slot, shutdown_tx)
    }
}

/// Forwards inner connection callbacks to the outer handler, diverting
/// transport failures to the supervisor
struct Relay {
    outer: HandlerSlot,
    attempts: Arc<AtomicU32>,
    failures: mpsc::UnboundedSender<FeedError>,
}

impl FeedHandler for Relay {
    fn on_snapshot(&mut self, snapshot: OrderbookSnapshot) {
        self.attempts.store(0, Ordering::Relaxed);
        deliver_snapshot(&self.outer, snapshot);
    }

    fn on_error(&mut self, error: FeedError) {
        if error.is_transport() {
            let _ = self.failures.send(error);
        } else {
            deliver_error(&self.outer, error);
        }
    }
}

async fn supervise(
    inner: Arc<dyn FeedConnector>,
    policy: ReconnectPolicy,
    metrics: Option<Arc<PipelineMetrics>>,
    instrument: Instrument,
    slot: HandlerSlot,
    mut shutdown: oneshot::Receiver<()>,
) {
    let attempts = Arc::new(AtomicU32::new(0));

    loop {
        let (failure_tx, mut failure_rx) = mpsc::unbounded_channel();
        let relay = Relay {
            outer: slot.clone(),
            attempts: attempts.clone(),
            failures: failure_tx,
        };
        let mut connection = inner.open(instrument, Box::new(relay));

        let failure = tokio::select! {
            biased;
            _ = &mut shutdown => None,
            failure = failure_rx.recv() => failure,
        };
        connection.close();

        let Some(cause) = failure else {
            debug!(instrument = %instrument, "Reconnecting feed shut down");
            return;
        };
        if let Some(metrics) = &metrics {
            metrics.record_error(instrument, &cause);
        }

        let attempt = attempts.fetch_add(1, Ordering::Relaxed) + 1;
        if policy.exhausted(attempt) {
            error!(
                instrument = %instrument,
                attempts = attempt - 1,
                error = %cause,
                "Giving up on depth feed"
            );
            deliver_error(&slot, FeedError::MaxReconnectAttemptsExceeded);
            return;
        }

        let delay = policy.delay_with_jitter(attempt);
        warn!(
            instrument = %instrument,
            attempt,
            error = %cause,
            delay_ms = delay.as_millis() as u64,
            "Reconnecting after error..."
        );
        if let Some(metrics) = &metrics {
            metrics.record_reconnect(instrument);
        }
        let notified = deliver_error(
            &slot,
            FeedError::Reconnecting {
                attempt,
                reason: cause.to_string(),
            },
        );
        if !notified {
            return;
        }

        tokio::select! {
            biased;
            _ = &mut shutdown => {
                debug!(instrument = %instrument, "Shut down while waiting to reconnect");
                return;
            }
            _ = sleep(delay) => {}
        }
        info!(instrument = %instrument, attempt, "Reopening depth feed");
    }
}
