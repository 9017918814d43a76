//! Position Sizers: determine trade quantity
//!
//! Sizers translate a risk budget into a whole-share quantity plus the stop and
//! target levels implied by that budget. They use account equity but know
//! nothing about why the entry fired.

pub mod fixed_risk;

pub use fixed_risk::{EntryPlan, FixedRiskSizer, SizingRejection};
