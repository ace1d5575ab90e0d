//! Order book metrics calculation
//!
//! Pure functions over a snapshot. Spread looks at top-of-book only while
//! imbalance sums every level present; the two answer different questions
//! (gap at the touch vs. skew of the visible depth).

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{OrderbookSnapshot, PriceLevel, Side};

/// Best ask minus best bid, or zero when either side is empty
pub fn spread(snapshot: &OrderbookSnapshot) -> Decimal {
    match (snapshot.best_bid(), snapshot.best_ask()) {
        (Some(bid), Some(ask)) => ask.price - bid.price,
        _ => Decimal::ZERO,
    }
}

/// `(bid_vol - ask_vol) / (bid_vol + ask_vol)` over all levels.
///
/// `None` when there is no volume on either side; callers decide how to
/// render that.
pub fn imbalance(snapshot: &OrderbookSnapshot) -> Option<Decimal> {
    let bid_volume = bid_depth(snapshot);
    let ask_volume = ask_depth(snapshot);

    let total = bid_volume.checked_add(ask_volume)?;
    if total > Decimal::ZERO {
        Some((bid_volume - ask_volume) / total)
    } else {
        None
    }
}

/// Average of best bid and best ask
pub fn mid_price(snapshot: &OrderbookSnapshot) -> Option<Decimal> {
    match (snapshot.best_bid(), snapshot.best_ask()) {
        (Some(bid), Some(ask)) => Some(bid.price.checked_add(ask.price)? / Decimal::TWO),
        _ => None,
    }
}

/// Spread in basis points of the mid price
pub fn spread_bps(snapshot: &OrderbookSnapshot) -> Option<Decimal> {
    match mid_price(snapshot) {
        Some(mid) if mid > Decimal::ZERO => {
            (spread(snapshot) / mid).checked_mul(Decimal::from(10000))
        }
        _ => None,
    }
}

pub fn bid_depth(snapshot: &OrderbookSnapshot) -> Decimal {
    total_quantity(&snapshot.bids)
}

pub fn ask_depth(snapshot: &OrderbookSnapshot) -> Decimal {
    total_quantity(&snapshot.asks)
}

// Saturates at Decimal::MAX instead of panicking
fn total_quantity(levels: &[PriceLevel]) -> Decimal {
    levels
        .iter()
        .fold(Decimal::ZERO, |acc, l| acc.saturating_add(l.quantity))
}

/// One point of a market depth curve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepthPoint {
    pub price: Decimal,
    pub cumulative_quantity: Decimal,
}

/// Running quantity from the touch outwards, one point per level
pub fn cumulative_depth(snapshot: &OrderbookSnapshot, side: Side) -> Vec<DepthPoint> {
    snapshot
        .levels(side)
        .iter()
        .scan(Decimal::ZERO, |running, level| {
            *running = running.saturating_add(level.quantity);
            Some(DepthPoint {
                price: level.price,
                cumulative_quantity: *running,
            })
        })
        .collect()
}

/// Cumulative depth curves for both sides, the data behind a depth chart
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepthChart {
    pub bids: Vec<DepthPoint>,
    pub asks: Vec<DepthPoint>,
}

impl DepthChart {
    pub fn from_snapshot(snapshot: &OrderbookSnapshot) -> Self {
        Self {
            bids: cumulative_depth(snapshot, Side::Bid),
            asks: cumulative_depth(snapshot, Side::Ask),
        }
    }
}

/// Computed metrics for an order book
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BookMetrics {
    /// Best ask minus best bid (zero on a one-sided book)
    pub spread: Decimal,

    /// Simple imbalance over all levels
    pub imbalance: Option<Decimal>,

    /// Mid price (average of best bid and ask)
    pub mid_price: Option<Decimal>,

    /// Spread in basis points
    pub spread_bps: Option<Decimal>,

    /// Total bid depth (volume)
    pub bid_depth: Decimal,

    /// Total ask depth (volume)
    pub ask_depth: Decimal,

    pub bid_levels: usize,
    pub ask_levels: usize,
}

impl BookMetrics {
    pub fn from_snapshot(snapshot: &OrderbookSnapshot) -> Self {
        Self {
            spread: spread(snapshot),
            imbalance: imbalance(snapshot),
            mid_price: mid_price(snapshot),
            spread_bps: spread_bps(snapshot),
            bid_depth: bid_depth(snapshot),
            ask_depth: ask_depth(snapshot),
            bid_levels: snapshot.bids.len(),
            ask_levels: snapshot.asks.len(),
        }
    }
}
