//! Parser module for Binance partial depth messages
//!
//! Handles deserialization of `<symbol>@depth<N>@<interval>ms` payloads. The
//! frame-level fields are strict; individual price levels are not, a malformed
//! entry is dropped here and never fails the frame.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{MarketDataError, Result};

/// A single (price, quantity) pair exactly as it arrived on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RawLevel {
    pub price: String,
    pub quantity: String,
}

impl RawLevel {
    pub fn new(price: impl Into<String>, quantity: impl Into<String>) -> Self {
        Self {
            price: price.into(),
            quantity: quantity.into(),
        }
    }
}

/// Binance partial book depth message
///
/// Every frame is a complete top-of-book snapshot, not a delta.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DepthFrame {
    /// Last update ID the snapshot reflects
    #[serde(rename = "lastUpdateId", alias = "sequenceId")]
    pub sequence_id: u64,

    /// Bid levels, in wire order
    #[serde(deserialize_with = "deserialize_raw_levels")]
    pub bids: Vec<RawLevel>,

    /// Ask levels, in wire order
    #[serde(deserialize_with = "deserialize_raw_levels")]
    pub asks: Vec<RawLevel>,
}

impl DepthFrame {
    /// Parse a raw WebSocket text payload
    ///
    /// Invalid JSON yields [`MarketDataError::ParseError`]; valid JSON missing
    /// `bids`/`asks` arrays or a numeric update id yields
    /// [`MarketDataError::InvalidFrame`].
    pub fn parse(raw: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(raw)?;
        Self::from_value(value)
    }

    /// Validate an already-decoded JSON value
    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| MarketDataError::InvalidFrame(e.to_string()))
    }
}

/// Text of one tuple element; Binance sends strings but bare numbers are tolerated
fn level_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn raw_level(entry: &Value) -> Option<RawLevel> {
    let pair = entry.as_array()?;
    if pair.len() < 2 {
        return None;
    }
    Some(RawLevel {
        price: level_text(&pair[0])?,
        quantity: level_text(&pair[1])?,
    })
}

/// Custom deserializer for price levels: the side must be an array, its
/// entries are kept only when they look like `[price, quantity]`
fn deserialize_raw_levels<'de, D>(deserializer: D) -> std::result::Result<Vec<RawLevel>, D::Error>
where
    D: Deserializer<'de>,
{
    let entries: Vec<Value> = Deserialize::deserialize(deserializer)?;
    let total = entries.len();
    let levels: Vec<RawLevel> = entries.iter().filter_map(raw_level).collect();
    if levels.len() < total {
        tracing::trace!(dropped = total - levels.len(), "Dropped malformed level entries");
    }
    Ok(levels)
}
