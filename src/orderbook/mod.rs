//! Order book module
//!
//! Top-N depth snapshots, the metrics derived from them and the
//! spread history that backs the chart.

mod history;
mod metrics;

pub use history::{SpreadHistory, SpreadSample};
pub use metrics::{
    ask_depth, bid_depth, cumulative_depth, imbalance, mid_price, spread, spread_bps, BookMetrics,
    DepthChart, DepthPoint,
};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Side of the order book
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Bid,
    Ask,
}

/// A single level in the order book
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Decimal,
    pub quantity: Decimal,
}

impl PriceLevel {
    pub fn new(price: Decimal, quantity: Decimal) -> Self {
        Self { price, quantity }
    }
}

/// Top-N bid/ask levels as delivered by one feed message.
///
/// Bids are descending and asks ascending, as the venue sends them. A
/// snapshot is never edited: each message produces a new one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderbookSnapshot {
    pub last_update_id: Option<u64>,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
    pub received_at: DateTime<Utc>,
}

impl OrderbookSnapshot {
    pub fn new(bids: Vec<PriceLevel>, asks: Vec<PriceLevel>, received_at: DateTime<Utc>) -> Self {
        Self {
            last_update_id: None,
            bids,
            asks,
            received_at,
        }
    }

    pub fn empty(received_at: DateTime<Utc>) -> Self {
        Self::new(Vec::new(), Vec::new(), received_at)
    }

    pub fn best_bid(&self) -> Option<&PriceLevel> {
        self.bids.first()
    }

    pub fn best_ask(&self) -> Option<&PriceLevel> {
        self.asks.first()
    }

    pub fn levels(&self, side: Side) -> &[PriceLevel] {
        match side {
            Side::Bid => &self.bids,
            Side::Ask => &self.asks,
        }
    }

    /// Both sides empty
    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }
}
