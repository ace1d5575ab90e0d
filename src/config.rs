//! Configuration module for the depth pipeline

use serde::Deserialize;
use std::env;
use std::time::Duration;

use crate::error::{FeedError, Result};
use crate::instrument::Instrument;

/// Depth levels Binance offers on partial book depth streams
pub const SUPPORTED_DEPTH_LEVELS: [usize; 3] = [5, 10, 20];
/// Update speeds (ms) Binance offers on partial book depth streams
pub const SUPPORTED_UPDATE_SPEEDS_MS: [u64; 2] = [100, 1000];
/// Longest accepted spread history window (one day)
pub const MAX_HISTORY_WINDOW_SECS: u64 = 86_400;

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Instrument subscribed at startup
    pub instrument: Instrument,

    /// WebSocket endpoint for Binance
    pub ws_endpoint: String,

    /// Order book depth levels per side (5, 10 or 20)
    pub depth_levels: usize,

    /// Stream update speed in milliseconds (100 or 1000)
    pub update_speed_ms: u64,

    /// Spread history window and point cap
    pub history_window_secs: u64,
    pub history_max_samples: usize,

    /// Receive timeout before a keepalive ping is sent
    pub recv_timeout_secs: u64,

    /// Reconnection settings
    pub reconnect_delay_ms: u64,
    pub max_reconnect_delay_ms: u64,
    pub max_reconnect_attempts: u32,
    pub reconnect_jitter: f64,

    /// Status log interval in seconds
    pub status_interval_secs: u64,

    /// Port for the health/state/metrics HTTP server
    pub http_port: u16,
}

impl Config {
    /// Load configuration from environment variables
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let instrument: Instrument = env::var("INSTRUMENT")
            .unwrap_or_else(|_| "btc".to_string())
            .parse()?;

        let config = Self {
            instrument,
            ws_endpoint: env::var("WS_ENDPOINT")
                .unwrap_or_else(|_| "wss://stream.binance.com:9443/ws".to_string()),
            depth_levels: env_or("DEPTH_LEVELS", 10),
            update_speed_ms: env_or("UPDATE_SPEED_MS", 100),
            history_window_secs: env_or("HISTORY_WINDOW_SECS", 60),
            history_max_samples: env_or("HISTORY_MAX_SAMPLES", 60),
            recv_timeout_secs: env_or("RECV_TIMEOUT_SECS", 45),
            reconnect_delay_ms: env_or("RECONNECT_DELAY_MS", 1000),
            max_reconnect_delay_ms: env_or("MAX_RECONNECT_DELAY_MS", 60_000),
            max_reconnect_attempts: env_or("MAX_RECONNECT_ATTEMPTS", 10),
            reconnect_jitter: env_or("RECONNECT_JITTER", 0.2),
            status_interval_secs: env_or("STATUS_INTERVAL_SECS", 30),
            http_port: env_or("HTTP_PORT", 9090),
        };
        config.validate()?;

        Ok(config)
    }

    /// Reject values the feed or the history buffer cannot work with
    pub fn validate(&self) -> Result<()> {
        if !SUPPORTED_DEPTH_LEVELS.contains(&self.depth_levels) {
            return Err(FeedError::ConfigError(format!(
                "DEPTH_LEVELS must be one of {:?}, got {}",
                SUPPORTED_DEPTH_LEVELS, self.depth_levels
            )));
        }
        if !SUPPORTED_UPDATE_SPEEDS_MS.contains(&self.update_speed_ms) {
            return Err(FeedError::ConfigError(format!(
                "UPDATE_SPEED_MS must be one of {:?}, got {}",
                SUPPORTED_UPDATE_SPEEDS_MS, self.update_speed_ms
            )));
        }
        if self.history_window_secs == 0 || self.history_max_samples == 0 {
            return Err(FeedError::ConfigError(
                "history window and sample cap must be non-zero".to_string(),
            ));
        }
        if self.history_window_secs > MAX_HISTORY_WINDOW_SECS {
            return Err(FeedError::ConfigError(format!(
                "HISTORY_WINDOW_SECS must be at most {}, got {}",
                MAX_HISTORY_WINDOW_SECS, self.history_window_secs
            )));
        }
        if !(0.0..=1.0).contains(&self.reconnect_jitter) {
            return Err(FeedError::ConfigError(format!(
                "RECONNECT_JITTER must be within [0, 1], got {}",
                self.reconnect_jitter
            )));
        }
        Ok(())
    }

    pub fn feed_settings(&self) -> FeedSettings {
        FeedSettings {
            ws_endpoint: self.ws_endpoint.clone(),
            depth_levels: self.depth_levels,
            update_speed_ms: self.update_speed_ms,
            recv_timeout: Duration::from_secs(self.recv_timeout_secs),
        }
    }

    pub fn history_config(&self) -> HistoryConfig {
        HistoryConfig {
            window: chrono::Duration::seconds(self.history_window_secs as i64),
            max_samples: self.history_max_samples,
        }
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            base_delay: Duration::from_millis(self.reconnect_delay_ms),
            max_delay: Duration::from_millis(self.max_reconnect_delay_ms),
            max_attempts: self.max_reconnect_attempts,
            jitter_ratio: self.reconnect_jitter,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            instrument: Instrument::Btc,
            ws_endpoint: "wss://stream.binance.com:9443/ws".to_string(),
            depth_levels: 10,
            update_speed_ms: 100,
            history_window_secs: 60,
            history_max_samples: 60,
            recv_timeout_secs: 45,
            reconnect_delay_ms: 1000,
            max_reconnect_delay_ms: 60_000,
            max_reconnect_attempts: 10,
            reconnect_jitter: 0.2,
            status_interval_secs: 30,
            http_port: 9090,
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Settings for a single depth stream subscription
#[derive(Debug, Clone)]
pub struct FeedSettings {
    pub ws_endpoint: String,
    pub depth_levels: usize,
    pub update_speed_ms: u64,
    pub recv_timeout: Duration,
}

impl FeedSettings {
    /// Partial book depth stream URL, e.g. `.../ws/btcusdt@depth10@100ms`
    pub fn stream_url(&self, instrument: Instrument) -> String {
        format!(
            "{}/{}@depth{}@{}ms",
            self.ws_endpoint.trim_end_matches('/'),
            instrument.stream_symbol(),
            self.depth_levels,
            self.update_speed_ms
        )
    }
}

impl Default for FeedSettings {
    fn default() -> Self {
        Config::default().feed_settings()
    }
}

/// Spread history bounds
#[derive(Debug, Clone, Copy)]
pub struct HistoryConfig {
    pub window: chrono::Duration,
    pub max_samples: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            window: chrono::Duration::seconds(60),
            max_samples: 60,
        }
    }
}

/// Exponential backoff with jitter for reconnecting a dropped feed
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Consecutive failures tolerated; 0 means retry forever
    pub max_attempts: u32,
    /// Extra random delay as a fraction of the computed delay
    pub jitter_ratio: f64,
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt `attempt` (1-based), without jitter
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.pow(attempt.min(6));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Backoff plus a uniform random share of it
    pub fn delay_with_jitter(&self, attempt: u32) -> Duration {
        let delay = self.backoff(attempt);
        if self.jitter_ratio <= 0.0 {
            return delay;
        }
        let extra = delay.mul_f64(self.jitter_ratio * rand::random::<f64>());
        delay + extra
    }

    pub fn exhausted(&self, attempts: u32) -> bool {
        self.max_attempts > 0 && attempts > self.max_attempts
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Config::default().reconnect_policy()
    }
}
