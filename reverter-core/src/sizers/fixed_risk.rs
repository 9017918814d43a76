//! Fixed-risk sizer
//!
//! Risks a fixed fraction of equity per trade with the stop a fixed fraction
//! below entry.
//!
//! # Formula
//! ```text
//! risk_per_share = price * loss_threshold_pct
//! quantity       = floor(equity * risk_pct / risk_per_share)
//! stop           = price * (1 - loss_threshold_pct)
//! target         = price * (1 + loss_threshold_pct * reward_multiple)
//! ```
//!
//! # Example
//! equity 10 000, risk 0.5%, loss threshold 0.8%, price 100
//! → risk/share 0.8, quantity floor(50 / 0.8) = 62, stop 99.2, target 101.6.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Fully sized entry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EntryPlan {
    pub quantity: f64,
    pub price: f64,
    pub risk_per_share: f64,
    pub stop: f64,
    pub target: f64,
}

/// Why an entry signal was not turned into an order.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum SizingRejection {
    #[error("risk per share {0} is not positive")]
    NonPositiveRisk(f64),

    #[error("equity {equity} buys no whole shares at risk/share {risk_per_share}")]
    ZeroQuantity { equity: f64, risk_per_share: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedRiskSizer {
    /// Fraction of equity risked per trade (e.g. 0.005 = 0.5%)
    pub risk_pct: f64,

    /// Stop distance as a fraction of entry price
    pub loss_threshold_pct: f64,

    /// Target distance in multiples of the stop distance
    pub reward_multiple: f64,
}

impl FixedRiskSizer {
    pub fn new(risk_pct: f64, loss_threshold_pct: f64, reward_multiple: f64) -> Self {
        Self {
            risk_pct,
            loss_threshold_pct,
            reward_multiple,
        }
    }

    /// Risk per share at `price`. Checked before equity is fetched.
    pub fn risk_per_share(&self, price: f64) -> Result<f64, SizingRejection> {
        let risk = price * self.loss_threshold_pct;
        if risk > 0.0 && risk.is_finite() {
            Ok(risk)
        } else {
            Err(SizingRejection::NonPositiveRisk(risk))
        }
    }

    pub fn plan(&self, price: f64, equity: f64) -> Result<EntryPlan, SizingRejection> {
        let risk_per_share = self.risk_per_share(price)?;
        let quantity = ((equity * self.risk_pct) / risk_per_share).floor();
        if !(quantity > 0.0) {
            return Err(SizingRejection::ZeroQuantity {
                equity,
                risk_per_share,
            });
        }
        Ok(EntryPlan {
            quantity,
            price,
            risk_per_share,
            stop: price * (1.0 - self.loss_threshold_pct),
            target: price * (1.0 + self.loss_threshold_pct * self.reward_multiple),
        })
    }
}
