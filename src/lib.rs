//! Depth Pulse - streaming order book analytics
//!
//! This crate subscribes to a Binance partial book depth stream for one
//! instrument and derives the current spread, the order book imbalance and a
//! bounded, decimated spread history suitable for charting.

pub mod config;
pub mod error;
pub mod instrument;
pub mod orderbook;
pub mod parser;
pub mod pipeline;
pub mod telemetry;
pub mod websocket;

pub use config::{Config, FeedSettings, HistoryConfig, ReconnectPolicy};
pub use error::{FeedError, Result};
pub use instrument::Instrument;
pub use orderbook::{BookMetrics, OrderbookSnapshot, PriceLevel, SpreadHistory, SpreadSample};
pub use parser::{parse_snapshot, DepthMessage};
pub use pipeline::{PipelineController, PipelinePhase, PipelineState};
pub use telemetry::PipelineMetrics;
pub use websocket::{
    BinanceConnector, FeedCloser, FeedConnection, FeedConnector, FeedHandler,
    ReconnectingConnector,
};
