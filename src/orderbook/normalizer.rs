//! Level normalization
//!
//! Turns textual wire levels into a validated, sorted and truncated ladder.
//! Pure and deterministic: the same frame always yields the same book.

use std::cmp::Reverse;

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use super::{Level, Side};
use crate::parser::{DepthFrame, RawLevel};

/// Levels kept per side unless configured otherwise
pub const DEFAULT_DEPTH: usize = 10;

/// Both sides of a normalized frame
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizedBook {
    pub sequence_id: u64,
    pub bids: Vec<Level>,
    pub asks: Vec<Level>,
}

/// Parse one wire level, rejecting anything that is not a finite, non-negative number
fn to_level(raw: &RawLevel) -> Option<Level> {
    let price: f64 = raw.price.trim().parse().ok()?;
    let quantity: f64 = raw.quantity.trim().parse().ok()?;

    if !price.is_finite() || !quantity.is_finite() {
        return None;
    }
    if price < 0.0 || quantity < 0.0 {
        return None;
    }

    Some(Level { price, quantity })
}

/// Normalize one side of the book
///
/// Bids come out strictly descending, asks strictly ascending. A price seen
/// twice keeps its first occurrence in wire order. Truncation to `depth`
/// happens after validation and sorting.
pub fn normalize_side(raw: &[RawLevel], side: Side, depth: usize) -> Vec<Level> {
    let mut levels: Vec<Level> = raw.iter().filter_map(to_level).collect();

    // Stable sort, so duplicates stay in arrival order for dedup below
    match side {
        Side::Bid => levels.sort_by_key(|l| Reverse(OrderedFloat(l.price))),
        Side::Ask => levels.sort_by_key(|l| OrderedFloat(l.price)),
    }
    levels.dedup_by(|later, first| later.price == first.price);
    levels.truncate(depth);

    levels
}

/// Normalize a full depth frame
pub fn normalize_frame(frame: &DepthFrame, depth: usize) -> NormalizedBook {
    NormalizedBook {
        sequence_id: frame.sequence_id,
        bids: normalize_side(&frame.bids, Side::Bid, depth),
        asks: normalize_side(&frame.asks, Side::Ask, depth),
    }
}
