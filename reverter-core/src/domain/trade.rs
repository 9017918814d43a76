//! Open trade and its exit rules.

use serde::{Deserialize, Serialize};

/// Why a trade was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    SessionClose,
    TakeProfit,
    SoftStop,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::SessionClose => "session_close",
            ExitReason::TakeProfit => "take_profit",
            ExitReason::SoftStop => "soft_stop",
        }
    }
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single long trade the agent may hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub quantity: f64,
    pub entry_price: f64,
    pub stop_price: f64,
    pub target_price: f64,
    /// Consecutive polls observed at or below the stop.
    pub consecutive_stop_polls: u32,
}

impl Trade {
    pub fn new(quantity: f64, entry_price: f64, stop_price: f64, target_price: f64) -> Self {
        Self {
            quantity,
            entry_price,
            stop_price,
            target_price,
            consecutive_stop_polls: 0,
        }
    }

    /// Evaluate the exit rules for one new price, in priority order:
    /// session close, take profit, confirmed soft stop.
    ///
    /// The breach counter only moves when neither of the first two fire.
    pub fn evaluate_exit(
        &mut self,
        price: f64,
        session_closing: bool,
        confirm_polls: u32,
    ) -> Option<ExitReason> {
        if session_closing {
            return Some(ExitReason::SessionClose);
        }
        if price >= self.target_price {
            return Some(ExitReason::TakeProfit);
        }
        if price <= self.stop_price {
            self.consecutive_stop_polls += 1;
        } else {
            self.consecutive_stop_polls = 0;
        }
        if self.consecutive_stop_polls >= confirm_polls {
            return Some(ExitReason::SoftStop);
        }
        None
    }
}
