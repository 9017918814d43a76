//! Order side.

use serde::{Deserialize, Serialize};

/// Direction of a market order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(&self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    /// Signed quantity as the broker expects it: positive buys, negative sells.
    pub fn signed(&self, quantity: f64) -> f64 {
        match self {
            Side::Buy => quantity,
            Side::Sell => -quantity,
        }
    }

    /// Side of the order that brings `exposure` back to zero.
    ///
    /// Returns None for zero exposure.
    pub fn closing(exposure: f64) -> Option<Self> {
        if exposure > 0.0 {
            Some(Side::Sell)
        } else if exposure < 0.0 {
            Some(Side::Buy)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
