//! Bar: the unit the entry filter consumes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Maximum number of bars retained by [`BarHistory`].
pub const HISTORY_CAPACITY: usize = 500;

/// OHLCV bar for the traded instrument.
///
/// Bars synthesised from a position snapshot carry the same price in all four
/// OHLC fields and zero volume. A real OHLCV feed can fill them properly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    /// Flat bar from a single observed price.
    pub fn from_price(timestamp: DateTime<Utc>, price: f64) -> Self {
        Self {
            timestamp,
            open: price,
            high: price,
            low: price,
            close: price,
            volume: 0.0,
        }
    }
}

/// Rolling bar history, newest last, bounded at a fixed capacity.
#[derive(Debug, Clone)]
pub struct BarHistory {
    bars: VecDeque<Bar>,
    capacity: usize,
}

impl BarHistory {
    pub fn new() -> Self {
        Self::with_capacity(HISTORY_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity >= 1, "history capacity must be >= 1");
        Self {
            bars: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a bar, dropping the oldest one when full.
    pub fn push(&mut self, bar: Bar) {
        if self.bars.len() == self.capacity {
            self.bars.pop_front();
        }
        self.bars.push_back(bar);
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn latest(&self) -> Option<&Bar> {
        self.bars.back()
    }

    /// Close prices, oldest first.
    pub fn closes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.close).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Bar> {
        self.bars.iter()
    }
}

impl Default for BarHistory {
    fn default() -> Self {
        Self::new()
    }
}
