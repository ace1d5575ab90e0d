//! Trading pairs the depth feed can be subscribed to

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::FeedError;

/// Instrument selecting which depth channel to subscribe to.
///
/// All pairs are quoted in USDT on the wire and labelled as USD for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Instrument {
    Btc,
    Eth,
    Ltc,
    Xrp,
}

impl Instrument {
    pub const ALL: [Instrument; 4] = [
        Instrument::Btc,
        Instrument::Eth,
        Instrument::Ltc,
        Instrument::Xrp,
    ];

    /// Base asset code, lowercase (e.g. `btc`)
    pub fn code(&self) -> &'static str {
        match self {
            Instrument::Btc => "btc",
            Instrument::Eth => "eth",
            Instrument::Ltc => "ltc",
            Instrument::Xrp => "xrp",
        }
    }

    /// Binance stream symbol (e.g. `btcusdt`)
    pub fn stream_symbol(&self) -> String {
        format!("{}usdt", self.code())
    }

    /// Human readable pair label (e.g. `BTC-USD`)
    pub fn label(&self) -> String {
        format!("{}-USD", self.code().to_uppercase())
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Instrument {
    type Err = FeedError;

    /// Accepts `btc`, `BTC`, `btcusdt` and `BTCUSDT` style names.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        let code = lower.strip_suffix("usdt").unwrap_or(&lower);
        Instrument::ALL
            .into_iter()
            .find(|i| i.code() == code)
            .ok_or_else(|| FeedError::UnknownInstrument(s.to_string()))
    }
}
