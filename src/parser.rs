//! Parser module for Binance partial book depth messages
//!
//! Turns a raw payload into an [`OrderbookSnapshot`] or a
//! [`FeedError::MalformedMessage`].

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};
use std::str::FromStr;

use crate::error::{FeedError, Result};
use crate::orderbook::{OrderbookSnapshot, PriceLevel};

/// Partial book depth payload (`<symbol>@depth<N>@<speed>ms`)
#[derive(Debug, Clone, Deserialize)]
pub struct DepthMessage {
    /// Last update ID
    #[serde(rename = "lastUpdateId", default)]
    pub last_update_id: Option<u64>,

    /// Bids, best first
    #[serde(deserialize_with = "deserialize_price_levels")]
    pub bids: Vec<PriceLevel>,

    /// Asks, best first
    #[serde(deserialize_with = "deserialize_price_levels")]
    pub asks: Vec<PriceLevel>,
}

/// Combined stream message wrapper
#[derive(Debug, Clone, Deserialize)]
pub struct StreamMessage {
    /// Stream name
    pub stream: String,

    /// Data payload
    pub data: serde_json::Value,
}

impl DepthMessage {
    /// Parse a raw WebSocket payload, unwrapping a combined stream envelope
    pub fn parse(raw: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(raw)?;

        if value.get("stream").is_some() && value.get("data").is_some() {
            let envelope: StreamMessage = serde_json::from_value(value)?;
            if !envelope.stream.contains("depth") {
                return Err(FeedError::MalformedMessage(format!(
                    "unexpected stream {}",
                    envelope.stream
                )));
            }
            return Ok(serde_json::from_value(envelope.data)?);
        }

        Ok(serde_json::from_value(value)?)
    }

    /// Build a snapshot holding at most `max_levels` levels per side
    pub fn into_snapshot(self, max_levels: usize, received_at: DateTime<Utc>) -> OrderbookSnapshot {
        let mut bids = self.bids;
        let mut asks = self.asks;
        bids.truncate(max_levels);
        asks.truncate(max_levels);

        OrderbookSnapshot {
            last_update_id: self.last_update_id,
            bids,
            asks,
            received_at,
        }
    }
}

/// Decode a wire payload straight into a snapshot
pub fn parse_snapshot(
    raw: &str,
    max_levels: usize,
    received_at: DateTime<Utc>,
) -> Result<OrderbookSnapshot> {
    Ok(DepthMessage::parse(raw)?.into_snapshot(max_levels, received_at))
}

/// Custom deserializer for price levels from array of string pairs
fn deserialize_price_levels<'de, D>(deserializer: D) -> std::result::Result<Vec<PriceLevel>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Vec<Vec<String>> = Deserialize::deserialize(deserializer)?;
    let levels: Vec<PriceLevel> = raw
        .into_iter()
        .map(|pair| {
            if pair.len() != 2 {
                return Err(serde::de::Error::custom("Invalid price level format"));
            }
            let price = Decimal::from_str(&pair[0]).map_err(serde::de::Error::custom)?;
            let quantity = Decimal::from_str(&pair[1]).map_err(serde::de::Error::custom)?;
            if price.is_sign_negative() || quantity.is_sign_negative() {
                return Err(serde::de::Error::custom(format!(
                    "negative price level [{}, {}]",
                    pair[0], pair[1]
                )));
            }
            Ok(PriceLevel { price, quantity })
        })
        .collect::<std::result::Result<_, D::Error>>()?;

    // Side volume must stay representable for the imbalance sums
    levels
        .iter()
        .try_fold(Decimal::ZERO, |acc, l| acc.checked_add(l.quantity))
        .ok_or_else(|| serde::de::Error::custom("side volume overflows"))?;

    Ok(levels)
}
