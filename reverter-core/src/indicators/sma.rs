//! Simple Moving Average (SMA).
//!
//! Mean of the last `period` closes. Undefined (None) until `period` bars exist
//! or when any close in the window is NaN.

use crate::domain::BarHistory;

#[derive(Debug, Clone)]
pub struct Sma {
    period: usize,
    name: String,
}

impl Sma {
    pub fn new(period: usize) -> Self {
        assert!(period >= 1, "SMA period must be >= 1");
        Self {
            period,
            name: format!("sma_{period}"),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn period(&self) -> usize {
        self.period
    }

    /// Trailing SMA over a close series, oldest first.
    pub fn trailing(&self, closes: &[f64]) -> Option<f64> {
        if closes.len() < self.period {
            return None;
        }
        let window = &closes[closes.len() - self.period..];
        if window.iter().any(|c| c.is_nan()) {
            return None;
        }
        Some(window.iter().sum::<f64>() / self.period as f64)
    }

    /// Trailing SMA of the close prices in a bar history.
    pub fn latest(&self, history: &BarHistory) -> Option<f64> {
        if history.len() < self.period {
            return None;
        }
        let closes: Vec<f64> = history
            .iter()
            .skip(history.len() - self.period)
            .map(|b| b.close)
            .collect();
        self.trailing(&closes)
    }
}
