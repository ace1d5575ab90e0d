//! Spread history for charting
//!
//! A sliding time window with a hard point cap. When the window holds more
//! points than the cap, every `step`-th sample is kept, so a bursty feed
//! thins out across the whole window instead of being cut off at one end.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::HistoryConfig;

/// Spread observed at one instant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpreadSample {
    pub timestamp: DateTime<Utc>,
    pub spread: Decimal,
}

impl SpreadSample {
    pub fn new(timestamp: DateTime<Utc>, spread: Decimal) -> Self {
        Self { timestamp, spread }
    }
}

/// Time- and size-bounded spread series, ordered by timestamp
#[derive(Debug, Clone)]
pub struct SpreadHistory {
    samples: Vec<SpreadSample>,
    window: Duration,
    max_samples: usize,
}

impl SpreadHistory {
    pub fn new(config: HistoryConfig) -> Self {
        Self {
            samples: Vec::with_capacity(config.max_samples + 1),
            window: config.window,
            max_samples: config.max_samples.max(1),
        }
    }

    /// Append a sample, evict expired ones, then decimate if over the cap.
    ///
    /// A timestamp earlier than the newest sample is clamped to it so the
    /// series stays ordered when the wall clock steps backwards.
    pub fn push(&mut self, mut sample: SpreadSample) {
        if let Some(last) = self.samples.last() {
            if sample.timestamp < last.timestamp {
                sample.timestamp = last.timestamp;
            }
        }
        self.samples.push(sample);

        self.evict_before(sample.timestamp);
        self.decimate();
    }

    /// Drop samples older than the window relative to `now`
    pub fn evict_before(&mut self, now: DateTime<Utc>) {
        let expired = self
            .samples
            .partition_point(|s| now - s.timestamp > self.window);
        if expired > 0 {
            self.samples.drain(..expired);
        }
    }

    // step = ceil(len / cap) keeps ceil(len / step) <= cap points
    fn decimate(&mut self) {
        let len = self.samples.len();
        if len <= self.max_samples {
            return;
        }
        let step = len.div_ceil(self.max_samples);
        self.samples = self.samples.iter().copied().step_by(step).collect();
    }

    pub fn samples(&self) -> &[SpreadSample] {
        &self.samples
    }

    /// Samples still inside the window at `now`, for reads between appends
    pub fn samples_within(&self, now: DateTime<Utc>) -> &[SpreadSample] {
        let expired = self
            .samples
            .partition_point(|s| now - s.timestamp > self.window);
        &self.samples[expired..]
    }

    pub fn latest(&self) -> Option<&SpreadSample> {
        self.samples.last()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn max_samples(&self) -> usize {
        self.max_samples
    }
}

impl Default for SpreadHistory {
    fn default() -> Self {
        Self::new(HistoryConfig::default())
    }
}
