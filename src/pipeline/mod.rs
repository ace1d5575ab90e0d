//! Pipeline module
//!
//! Owns the live feed for the selected instrument and publishes the derived
//! state to consumers.

mod controller;

pub use controller::PipelineController;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::instrument::Instrument;
use crate::orderbook::{BookMetrics, DepthChart, OrderbookSnapshot, SpreadSample};

/// Lifecycle phase of the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelinePhase {
    Idle,
    Connecting,
    Streaming,
    /// New instrument selected, waiting for its first snapshot
    SwitchingInstrument,
    /// Transport failed and a reconnect is scheduled; last data is stale
    Reconnecting,
    /// Transport failed and nothing is reconnecting; last data is stale
    Disconnected,
}

/// State published to consumers after every update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineState {
    pub instrument: Instrument,
    /// Display name of the pair, e.g. `BTC-USD`
    pub label: String,
    pub phase: PipelinePhase,
    /// `None` until the first snapshot for this instrument arrives
    pub snapshot: Option<OrderbookSnapshot>,
    pub spread: Decimal,
    pub imbalance: Option<Decimal>,
    pub depth_chart: DepthChart,
    pub spread_history: Vec<SpreadSample>,
    pub last_error: Option<String>,
    /// Snapshots applied since the instrument was selected
    pub updates: u64,
}

impl PipelineState {
    pub fn new(instrument: Instrument, phase: PipelinePhase) -> Self {
        Self {
            instrument,
            label: instrument.label().to_string(),
            phase,
            snapshot: None,
            spread: Decimal::ZERO,
            imbalance: None,
            depth_chart: DepthChart::default(),
            spread_history: Vec::new(),
            last_error: None,
            updates: 0,
        }
    }

    /// No data received yet, as opposed to a received but empty book
    pub fn is_awaiting_data(&self) -> bool {
        self.snapshot.is_none()
    }

    /// Imbalance as a percentage rounded to two decimals
    pub fn imbalance_percent(&self) -> Option<Decimal> {
        self.imbalance
            .map(|ratio| (ratio * Decimal::ONE_HUNDRED).round_dp(2))
    }

    /// Full metric bundle for the current snapshot
    pub fn metrics(&self) -> Option<BookMetrics> {
        self.snapshot.as_ref().map(BookMetrics::from_snapshot)
    }

    /// Drop history samples that fell out of `window` by `now`.
    ///
    /// The published history is captured at the last append, so readers
    /// trim it before serving it.
    pub fn retain_history_within(&mut self, now: DateTime<Utc>, window: Duration) {
        let expired = self
            .spread_history
            .partition_point(|s| now - s.timestamp > window);
        self.spread_history.drain(..expired);
    }
}
