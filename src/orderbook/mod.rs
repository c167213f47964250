//! Order book module
//!
//! Normalized ladder types shared by the store and its consumers.

mod metrics;
mod normalizer;

pub use metrics::{depth_ratios, BookMetrics, DepthRow, SpreadMetrics};
pub use normalizer::{normalize_frame, normalize_side, NormalizedBook, DEFAULT_DEPTH};

use serde::{Deserialize, Serialize};

/// Side of the order book
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Bid,
    Ask,
}

/// A single level in the order book
///
/// Both fields are finite and non-negative once produced by the normalizer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Level {
    pub price: f64,
    pub quantity: f64,
}

/// Connection status carried by every snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Idle,
    Connecting,
    Connected,
    Error,
}

impl Status {
    /// Short display label
    pub fn label(&self) -> &'static str {
        match self {
            Status::Idle => "Idle",
            Status::Connecting => "Connecting",
            Status::Connected => "Live",
            Status::Error => "Error",
        }
    }
}

/// Order book state exposed to consumers
///
/// Always replaced as a whole; bids are strictly descending and asks strictly
/// ascending by price.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// `None` only before the first connect and after a disconnect
    pub symbol: Option<String>,
    pub status: Status,
    pub bids: Vec<Level>,
    pub asks: Vec<Level>,
    pub error: Option<String>,
    /// Update id of the frame the ladder was built from
    pub sequence_id: Option<u64>,
}

impl Snapshot {
    /// Fresh state for a connection attempt on `symbol`
    pub fn connecting(symbol: &str) -> Self {
        Self {
            symbol: Some(symbol.to_string()),
            status: Status::Connecting,
            ..Self::default()
        }
    }

    /// Whether this is the pristine, disconnected state
    pub fn is_pristine(&self) -> bool {
        *self == Self::default()
    }
}
