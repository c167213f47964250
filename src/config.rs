//! Configuration module for the depth stream

use std::env;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{MarketDataError, Result};
use crate::store::{RetryPolicy, StoreConfig};
use crate::websocket::StreamEndpoint;

pub const DEFAULT_WS_ENDPOINT: &str = "wss://stream.binance.com:9443/ws";

/// Application configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Config {
    /// Trading symbol to follow (e.g., "BTCUSDT")
    pub symbol: String,

    /// WebSocket base endpoint for Binance
    pub ws_endpoint: String,

    /// Depth levels requested and kept per side
    pub depth_levels: usize,

    /// Stream update interval requested from the exchange
    pub depth_interval_ms: u64,

    /// Reconnection settings
    pub max_retry_attempts: u32,
    pub retry_delays_ms: Vec<u64>,

    /// Fallback tick used to coalesce inbound frames
    pub flush_interval_ms: u64,

    /// Port of the health/metrics HTTP server
    pub http_port: u16,
}

impl Config {
    /// Load configuration from `.env` and environment variables
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup, defaults filling gaps
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let retry_delays_ms = match lookup("RETRY_DELAYS_MS") {
            Some(raw) => parse_delays(&raw)?,
            None => defaults.retry_delays_ms,
        };

        Ok(Self {
            symbol: lookup("SYMBOL")
                .map(|s| s.trim().to_uppercase())
                .unwrap_or(defaults.symbol),
            ws_endpoint: lookup("WS_ENDPOINT").unwrap_or(defaults.ws_endpoint),
            depth_levels: parse_or("DEPTH_LEVELS", &lookup, defaults.depth_levels)?,
            depth_interval_ms: parse_or("DEPTH_INTERVAL_MS", &lookup, defaults.depth_interval_ms)?,
            max_retry_attempts: parse_or("MAX_RETRY_ATTEMPTS", &lookup, defaults.max_retry_attempts)?,
            retry_delays_ms,
            flush_interval_ms: parse_or("FLUSH_INTERVAL_MS", &lookup, defaults.flush_interval_ms)?,
            http_port: parse_or("HTTP_PORT", &lookup, defaults.http_port)?,
        })
    }

    /// Stream endpoint settings for the WebSocket client
    pub fn endpoint(&self) -> StreamEndpoint {
        StreamEndpoint {
            base_url: self.ws_endpoint.clone(),
            levels: self.depth_levels,
            interval_ms: self.depth_interval_ms,
        }
    }

    /// Store settings derived from this configuration
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            endpoint: self.endpoint(),
            depth: self.depth_levels,
            retry: RetryPolicy {
                max_attempts: self.max_retry_attempts,
                delays: self
                    .retry_delays_ms
                    .iter()
                    .map(|ms| Duration::from_millis(*ms))
                    .collect(),
            },
            flush_interval: Duration::from_millis(self.flush_interval_ms),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            symbol: "BTCUSDT".to_string(),
            ws_endpoint: DEFAULT_WS_ENDPOINT.to_string(),
            depth_levels: 10,
            depth_interval_ms: 100,
            max_retry_attempts: 3,
            retry_delays_ms: vec![250, 500, 1000],
            flush_interval_ms: 16,
            http_port: 9090,
        }
    }
}

fn parse_or<T, F>(key: &str, lookup: &F, default: T) -> Result<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| MarketDataError::ConfigError(format!("{key}: invalid value {raw:?}"))),
        None => Ok(default),
    }
}

/// Comma-separated millisecond delays; `split` always yields at least one part
fn parse_delays(raw: &str) -> Result<Vec<u64>> {
    raw.split(',')
        .map(|part| {
            part.trim().parse::<u64>().map_err(|_| {
                MarketDataError::ConfigError(format!("RETRY_DELAYS_MS: invalid delay {part:?}"))
            })
        })
        .collect()
}
