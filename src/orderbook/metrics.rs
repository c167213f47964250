//! Order book metrics calculation
//!
//! Figures derived from a snapshot's ladder. Nothing here feeds back into
//! the store.

use serde::{Deserialize, Serialize};

use super::{Level, Snapshot};

/// Levels considered for the top-of-book imbalance
const IMBALANCE_LEVELS: usize = 5;

/// Best prices and the gap between them
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SpreadMetrics {
    pub best_bid: Option<f64>,
    pub best_ask: Option<f64>,
    /// `best_ask - best_bid`
    pub spread: Option<f64>,
    /// Spread as a fraction of the mid price
    pub spread_pct: Option<f64>,
}

impl SpreadMetrics {
    pub fn from_levels(bids: &[Level], asks: &[Level]) -> Self {
        let best_bid = bids.first().map(|l| l.price);
        let best_ask = asks.first().map(|l| l.price);

        let (Some(bid), Some(ask)) = (best_bid, best_ask) else {
            return Self {
                best_bid,
                best_ask,
                spread: None,
                spread_pct: None,
            };
        };

        let spread = ask - bid;
        let mid = (ask + bid) / 2.0;

        Self {
            best_bid,
            best_ask,
            spread: Some(spread),
            spread_pct: (mid > 0.0).then(|| spread / mid),
        }
    }

    /// Mid price (average of best bid and ask)
    pub fn mid_price(&self) -> Option<f64> {
        Some((self.best_bid? + self.best_ask?) / 2.0)
    }
}

/// A level with its quantity relative to the largest visible one
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DepthRow {
    pub price: f64,
    pub quantity: f64,
    /// `quantity / max quantity` over the visible rows, 0 when all are empty
    pub bar_ratio: f64,
}

/// Depth bars for the first `rows` levels of one side
pub fn depth_ratios(levels: &[Level], rows: usize) -> Vec<DepthRow> {
    let visible = &levels[..levels.len().min(rows)];
    let max_qty = visible.iter().fold(0.0_f64, |max, l| max.max(l.quantity));

    visible
        .iter()
        .map(|l| DepthRow {
            price: l.price,
            quantity: l.quantity,
            bar_ratio: if max_qty > 0.0 { l.quantity / max_qty } else { 0.0 },
        })
        .collect()
}

/// Computed metrics for a snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BookMetrics {
    #[serde(flatten)]
    pub spread: SpreadMetrics,

    /// Mid price (average of best bid and ask)
    pub mid_price: Option<f64>,

    /// Spread in basis points of mid
    pub spread_bps: Option<f64>,

    /// Simple imbalance: (bid_vol - ask_vol) / (bid_vol + ask_vol)
    pub imbalance: Option<f64>,

    /// Total bid depth (volume)
    pub bid_depth: f64,

    /// Total ask depth (volume)
    pub ask_depth: f64,

    /// Number of bid levels
    pub bid_levels: usize,

    /// Number of ask levels
    pub ask_levels: usize,
}

impl BookMetrics {
    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        let spread = SpreadMetrics::from_levels(&snapshot.bids, &snapshot.asks);

        Self {
            spread,
            mid_price: spread.mid_price(),
            spread_bps: spread.spread_pct.map(|pct| pct * 10_000.0),
            imbalance: imbalance(&snapshot.bids, &snapshot.asks, IMBALANCE_LEVELS),
            bid_depth: snapshot.bids.iter().map(|l| l.quantity).sum(),
            ask_depth: snapshot.asks.iter().map(|l| l.quantity).sum(),
            bid_levels: snapshot.bids.len(),
            ask_levels: snapshot.asks.len(),
        }
    }

    /// Check if the order book is healthy (has valid data)
    pub fn is_healthy(&self) -> bool {
        self.mid_price.is_some()
            && self.spread_bps.is_some()
            && self.bid_levels > 0
            && self.ask_levels > 0
    }
}

/// Order book imbalance at the top `levels` of each side
fn imbalance(bids: &[Level], asks: &[Level], levels: usize) -> Option<f64> {
    let bid_volume: f64 = bids.iter().take(levels).map(|l| l.quantity).sum();
    let ask_volume: f64 = asks.iter().take(levels).map(|l| l.quantity).sum();

    let total = bid_volume + ask_volume;
    (total > 0.0).then(|| (bid_volume - ask_volume) / total)
}
