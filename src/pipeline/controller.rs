//! Pipeline controller
//!
//! Composes feed connection, metrics and spread history for one selected
//! instrument at a time.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::{PipelinePhase, PipelineState};
use crate::config::HistoryConfig;
use crate::error::FeedError;
use crate::instrument::Instrument;
use crate::orderbook::{
    imbalance, spread, DepthChart, OrderbookSnapshot, SpreadHistory, SpreadSample,
};
use crate::telemetry::PipelineMetrics;
use crate::websocket::{FeedCloser, FeedConnector, FeedHandler};

/// Mutable pipeline data, guarded by `Shared::core`
struct PipelineCore {
    state: PipelineState,
    history: SpreadHistory,
}

impl PipelineCore {
    fn apply_snapshot(&mut self, snapshot: OrderbookSnapshot) {
        let spread = spread(&snapshot);
        let imbalance = imbalance(&snapshot);
        self.history
            .push(SpreadSample::new(snapshot.received_at, spread));

        self.state.phase = PipelinePhase::Streaming;
        self.state.spread = spread;
        self.state.imbalance = imbalance;
        self.state.depth_chart = DepthChart::from_snapshot(&snapshot);
        self.state.spread_history = self.history.samples().to_vec();
        self.state.snapshot = Some(snapshot);
        self.state.updates += 1;
    }

    fn reset(&mut self, instrument: Instrument, phase: PipelinePhase) {
        self.history.clear();
        self.state = PipelineState::new(instrument, phase);
    }
}

struct Shared {
    core: Mutex<PipelineCore>,
    state_tx: watch::Sender<PipelineState>,
    metrics: Option<Arc<PipelineMetrics>>,
}

impl Shared {
    /// Apply `f` and publish the result as one replacement
    fn update<R>(&self, f: impl FnOnce(&mut PipelineCore) -> R) -> R {
        let mut core = self.core.lock();
        let result = f(&mut core);
        self.state_tx.send_replace(core.state.clone());
        result
    }
}

/// Handler bound to one connection of the controller
struct PipelineFeedHandler {
    shared: Arc<Shared>,
    instrument: Instrument,
}

impl FeedHandler for PipelineFeedHandler {
    fn on_snapshot(&mut self, snapshot: OrderbookSnapshot) {
        let instrument = self.instrument;
        let metrics = self.shared.metrics.clone();

        self.shared.update(|core| {
            let previous = core.state.phase;
            core.apply_snapshot(snapshot);

            if previous != PipelinePhase::Streaming {
                info!(instrument = %instrument, from = ?previous, "Depth feed streaming");
            }
            if let Some(metrics) = metrics {
                metrics.record_snapshot(
                    instrument,
                    core.state.spread,
                    core.state.imbalance,
                    core.history.len(),
                );
            }
        });
    }

    fn on_error(&mut self, error: FeedError) {
        let instrument = self.instrument;
        if let Some(metrics) = &self.shared.metrics {
            metrics.record_error(instrument, &error);
        }

        self.shared.update(|core| {
            match &error {
                FeedError::MalformedMessage(reason) => {
                    debug!(instrument = %instrument, reason = %reason, "Malformed depth message dropped");
                }
                e if e.is_transport() => {
                    warn!(instrument = %instrument, error = %e, "Depth feed disconnected");
                    core.state.phase = PipelinePhase::Disconnected;
                }
                FeedError::Reconnecting { attempt, .. } => {
                    info!(instrument = %instrument, attempt, "Depth feed reconnecting");
                    core.state.phase = PipelinePhase::Reconnecting;
                }
                FeedError::MaxReconnectAttemptsExceeded => {
                    warn!(instrument = %instrument, "Depth feed reconnection abandoned");
                    core.state.phase = PipelinePhase::Disconnected;
                }
                e => {
                    warn!(instrument = %instrument, error = %e, "Depth feed error");
                }
            }
            core.state.last_error = Some(error.to_string());
        });
    }
}

/// Runs the depth pipeline for the selected instrument.
///
/// At most one feed connection is live per controller. Switching instrument
/// or shutting down closes the current connection before anything else
/// happens, so a stale connection can never touch the reset state.
pub struct PipelineController {
    connector: Arc<dyn FeedConnector>,
    shared: Arc<Shared>,
    connection: Option<FeedCloser>,
    instrument: Instrument,
}

impl PipelineController {
    pub fn new(
        connector: Arc<dyn FeedConnector>,
        instrument: Instrument,
        history: HistoryConfig,
        metrics: Option<Arc<PipelineMetrics>>,
    ) -> Self {
        let state = PipelineState::new(instrument, PipelinePhase::Idle);
        let (state_tx, _) = watch::channel(state.clone());
        let shared = Arc::new(Shared {
            core: Mutex::new(PipelineCore {
                state,
                history: SpreadHistory::new(history),
            }),
            state_tx,
            metrics,
        });

        Self {
            connector,
            shared,
            connection: None,
            instrument,
        }
    }

    /// Open the feed. Reopens after a disconnect; no-op while running.
    pub fn start(&mut self) {
        match self.phase() {
            PipelinePhase::Idle => {}
            PipelinePhase::Disconnected => self.close_connection(),
            phase => {
                debug!(phase = ?phase, "Pipeline already running");
                return;
            }
        }

        info!(instrument = %self.instrument, "Starting depth pipeline");
        self.shared.update(|core| {
            core.state.phase = PipelinePhase::Connecting;
            core.state.last_error = None;
        });
        self.open_connection();
    }

    /// Replace the feed with one for `instrument`, resetting all derived state.
    ///
    /// Selecting the current instrument again reopens a disconnected feed
    /// and is otherwise a no-op while running.
    pub fn switch_instrument(&mut self, instrument: Instrument) {
        let running = self.connection.is_some();
        if running && instrument == self.instrument {
            if self.phase() == PipelinePhase::Disconnected {
                self.start();
            } else {
                debug!(instrument = %instrument, "Already subscribed");
            }
            return;
        }

        info!(from = %self.instrument, to = %instrument, running, "Switching instrument");
        // closer first: no callback of the old feed may run after this
        self.close_connection();
        self.instrument = instrument;

        if !running {
            self.shared
                .update(|core| core.reset(instrument, PipelinePhase::Idle));
            return;
        }

        // stays SwitchingInstrument until the first snapshot of the new feed
        self.shared
            .update(|core| core.reset(instrument, PipelinePhase::SwitchingInstrument));
        self.open_connection();
    }

    /// Close the feed and go idle. The last data stays readable.
    pub fn shutdown(&mut self) {
        self.close_connection();
        self.shared
            .update(|core| core.state.phase = PipelinePhase::Idle);
        info!(instrument = %self.instrument, "Depth pipeline stopped");
    }

    pub fn instrument(&self) -> Instrument {
        self.instrument
    }

    pub fn phase(&self) -> PipelinePhase {
        self.shared.state_tx.borrow().phase
    }

    /// Current state, with the spread history trimmed to the window
    pub fn state(&self) -> PipelineState {
        self.state_at(Utc::now())
    }

    /// Current state as seen at `now`
    pub fn state_at(&self, now: DateTime<Utc>) -> PipelineState {
        let core = self.shared.core.lock();
        let mut state = core.state.clone();
        state.retain_history_within(now, core.history.window());
        state
    }

    /// Receiver notified after every state replacement.
    ///
    /// Published history is trimmed at each append and by
    /// [`expire_history`](Self::expire_history); use
    /// [`PipelineState::retain_history_within`] for an exact read.
    pub fn subscribe(&self) -> watch::Receiver<PipelineState> {
        self.shared.state_tx.subscribe()
    }

    /// Evict history samples older than the window at `now` and publish
    /// the result if anything was dropped. Keeps subscribers current
    /// while the feed is quiet.
    pub fn expire_history(&self, now: DateTime<Utc>) {
        let mut core = self.shared.core.lock();
        let before = core.history.len();
        core.history.evict_before(now);
        if core.history.len() == before {
            return;
        }
        core.state.spread_history = core.history.samples().to_vec();
        if let Some(metrics) = &self.shared.metrics {
            metrics.record_history_len(self.instrument, core.history.len());
        }
        self.shared.state_tx.send_replace(core.state.clone());
    }

    fn open_connection(&mut self) {
        let handler = PipelineFeedHandler {
            shared: self.shared.clone(),
            instrument: self.instrument,
        };
        self.connection = Some(self.connector.open(self.instrument, Box::new(handler)));
    }

    // Must not run under the core lock: close waits for in-flight callbacks
    fn close_connection(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            connection.close();
        }
    }
}

impl Drop for PipelineController {
    fn drop(&mut self) {
        if self.connection.is_some() {
            self.shutdown();
        }
    }
}
