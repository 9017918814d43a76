//! Indicators over the rolling bar history.
//!
//! Only the trailing simple moving average is needed by the entry filter.

pub mod sma;

pub use sma::Sma;

/// Build a bar history from close prices for testing, one minute apart.
#[cfg(test)]
pub fn make_history(closes: &[f64]) -> crate::domain::BarHistory {
    use crate::domain::{Bar, BarHistory};
    use chrono::TimeZone;
    let base = chrono::Utc.with_ymd_and_hms(2024, 1, 2, 14, 30, 0).unwrap();
    let mut history = BarHistory::new();
    for (i, &close) in closes.iter().enumerate() {
        history.push(Bar::from_price(
            base + chrono::Duration::minutes(i as i64),
            close,
        ));
    }
    history
}

/// Assert two f64 values are approximately equal (within epsilon).
#[cfg(test)]
pub fn assert_approx(actual: f64, expected: f64, epsilon: f64) {
    assert!(
        (actual - expected).abs() < epsilon,
        "assert_approx failed: actual={actual}, expected={expected}, diff={}, epsilon={epsilon}",
        (actual - expected).abs()
    );
}

/// Default epsilon for indicator tests.
#[cfg(test)]
pub const DEFAULT_EPSILON: f64 = 1e-10;
