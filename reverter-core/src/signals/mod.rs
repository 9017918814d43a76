//! Entry signals: market-data-only decisions.
//!
//! Signals never look at the account. They answer "is this a price worth
//! buying?" and nothing else; sizing and order placement live elsewhere.

pub mod discount;

pub use discount::{window_for, DiscountEntry, EntryCheck, MIN_WINDOW};
