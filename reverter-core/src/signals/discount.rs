//! Mean-reversion discount filter.
//!
//! Fires when the current price trades at least `discount_pct` below the
//! trailing SMA of the last `window` closes. This is a level filter, not a
//! crossover: it fires on every qualifying bar until a trade is opened.

use crate::domain::BarHistory;
use crate::indicators::Sma;
use serde::{Deserialize, Serialize};

/// Lower bound on the averaging window regardless of the slow length.
pub const MIN_WINDOW: usize = 20;

/// Averaging window for a given slow-average length.
pub fn window_for(slow: usize) -> usize {
    slow.max(MIN_WINDOW)
}

/// Outcome of one entry check.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum EntryCheck {
    /// Not enough history yet.
    Warmup { have: usize, need: usize },
    /// Price is at or below the discounted average.
    Fire { average: f64, threshold: f64 },
    /// Price is above the discounted average.
    Pass { average: f64, threshold: f64 },
}

impl EntryCheck {
    pub fn fires(&self) -> bool {
        matches!(self, EntryCheck::Fire { .. })
    }
}

#[derive(Debug, Clone)]
pub struct DiscountEntry {
    sma: Sma,
    discount_pct: f64,
}

impl DiscountEntry {
    pub fn new(window: usize, discount_pct: f64) -> Self {
        assert!(
            (0.0..1.0).contains(&discount_pct),
            "discount_pct must be in [0, 1)"
        );
        Self {
            sma: Sma::new(window),
            discount_pct,
        }
    }

    pub fn window(&self) -> usize {
        self.sma.period()
    }

    /// Check `price` against the history (which should already contain the
    /// bar that produced `price`).
    pub fn check(&self, history: &BarHistory, price: f64) -> EntryCheck {
        let need = self.window();
        let Some(average) = self.sma.latest(history) else {
            return EntryCheck::Warmup {
                have: history.len(),
                need,
            };
        };
        let threshold = average * (1.0 - self.discount_pct);
        if price <= threshold {
            EntryCheck::Fire { average, threshold }
        } else {
            EntryCheck::Pass { average, threshold }
        }
    }
}
