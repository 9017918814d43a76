//! Position snapshot as reported by the broker.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Raw position reading for one instrument.
///
/// `quantity` includes any resting seed quantity; compensation happens in the
/// position oracle, never here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub quantity: f64,
    pub current_price: f64,
    /// The payload exactly as returned.
    pub raw: Value,
}

#[derive(Debug, Error, PartialEq)]
pub enum SnapshotError {
    #[error("position payload is not an object")]
    NotAnObject,

    #[error("position payload field `{0}` is missing or not numeric")]
    BadField(&'static str),
}

impl PositionSnapshot {
    /// Parse a portfolio payload (`quantity`, `currentPrice`).
    ///
    /// A missing quantity reads as 0. Numbers sent as strings are accepted.
    pub fn from_payload(raw: Value) -> Result<Self, SnapshotError> {
        let obj = raw.as_object().ok_or(SnapshotError::NotAnObject)?;
        let quantity = match obj.get("quantity") {
            None | Some(Value::Null) => 0.0,
            Some(v) => numeric(v).ok_or(SnapshotError::BadField("quantity"))?,
        };
        let current_price = obj
            .get("currentPrice")
            .and_then(numeric)
            .ok_or(SnapshotError::BadField("currentPrice"))?;
        Ok(Self {
            quantity,
            current_price,
            raw,
        })
    }
}

fn numeric(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
