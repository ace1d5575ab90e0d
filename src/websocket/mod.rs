//! WebSocket module for Binance depth feed connections

mod client;
mod connection;
mod reconnect;

pub use client::WebSocketClient;
pub use connection::{
    BinanceConnector, ChannelConnector, ChannelSource, FeedCloser, FeedConnection, FeedConnector,
    FeedHandler, FeedSource,
};
pub use reconnect::ReconnectingConnector;
