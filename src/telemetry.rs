//! Prometheus metrics for the depth pipeline

use prometheus::{
    Encoder, GaugeVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::error::FeedError;
use crate::instrument::Instrument;

/// Counters and gauges updated by the pipeline, labelled by instrument
pub struct PipelineMetrics {
    registry: Registry,
    snapshots: IntCounterVec,
    feed_errors: IntCounterVec,
    reconnects: IntCounterVec,
    spread: GaugeVec,
    imbalance: GaugeVec,
    history_len: IntGaugeVec,
}

impl PipelineMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new_custom(Some("depth_pulse".to_string()), None)?;

        let snapshots = IntCounterVec::new(
            Opts::new("snapshots_total", "Depth snapshots applied"),
            &["instrument"],
        )?;
        let feed_errors = IntCounterVec::new(
            Opts::new("feed_errors_total", "Feed errors by kind"),
            &["instrument", "kind"],
        )?;
        let reconnects = IntCounterVec::new(
            Opts::new("reconnects_total", "Feed reconnect attempts"),
            &["instrument"],
        )?;
        let spread = GaugeVec::new(
            Opts::new("spread", "Best ask minus best bid"),
            &["instrument"],
        )?;
        let imbalance = GaugeVec::new(
            Opts::new("imbalance", "Order book volume imbalance in [-1, 1]"),
            &["instrument"],
        )?;
        let history_len = IntGaugeVec::new(
            Opts::new("spread_history_len", "Samples held in the spread history"),
            &["instrument"],
        )?;

        registry.register(Box::new(snapshots.clone()))?;
        registry.register(Box::new(feed_errors.clone()))?;
        registry.register(Box::new(reconnects.clone()))?;
        registry.register(Box::new(spread.clone()))?;
        registry.register(Box::new(imbalance.clone()))?;
        registry.register(Box::new(history_len.clone()))?;

        Ok(Self {
            registry,
            snapshots,
            feed_errors,
            reconnects,
            spread,
            imbalance,
            history_len,
        })
    }

    pub fn record_snapshot(
        &self,
        instrument: Instrument,
        spread: Decimal,
        imbalance: Option<Decimal>,
        history_len: usize,
    ) {
        let label = [instrument.code()];
        self.snapshots.with_label_values(&label).inc();
        self.spread
            .with_label_values(&label)
            .set(spread.to_f64().unwrap_or(0.0));
        // undefined imbalance is exported as NaN
        self.imbalance
            .with_label_values(&label)
            .set(imbalance.and_then(|v| v.to_f64()).unwrap_or(f64::NAN));
        self.record_history_len(instrument, history_len);
    }

    pub fn record_history_len(&self, instrument: Instrument, history_len: usize) {
        self.history_len
            .with_label_values(&[instrument.code()])
            .set(history_len as i64);
    }

    pub fn record_error(&self, instrument: Instrument, error: &FeedError) {
        self.feed_errors
            .with_label_values(&[instrument.code(), error.kind()])
            .inc();
    }

    pub fn record_reconnect(&self, instrument: Instrument) {
        self.reconnects.with_label_values(&[instrument.code()]).inc();
    }

    /// Prometheus text exposition of every metric
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_render_contains_recorded_series() {
        let metrics = PipelineMetrics::new().unwrap();
        metrics.record_snapshot(Instrument::Btc, dec!(0.01), Some(dec!(0.25)), 12);
        metrics.record_error(Instrument::Btc, &FeedError::MalformedMessage("x".into()));
        metrics.record_reconnect(Instrument::Eth);

        let text = metrics.render().unwrap();
        assert!(text.contains("depth_pulse_snapshots_total{instrument=\"btc\"} 1"));
        assert!(text.contains("kind=\"malformed_message\""));
        assert!(text.contains("depth_pulse_reconnects_total{instrument=\"eth\"} 1"));
        assert!(text.contains("depth_pulse_spread_history_len{instrument=\"btc\"} 12"));
    }
}
