//! Reverter Core: domain types and decision logic for a single-instrument
//! mean-reversion agent.
//!
//! Nothing in this crate performs I/O:
//! - Domain types (bars, bar history, positions, trades, venue schedule)
//! - Trailing SMA indicator
//! - Discount entry filter
//! - Fixed-risk position sizing
//! - The trade lifecycle machine (Idle → ArmedEntry → InTrade → Idle, Stopping)

pub mod domain;
pub mod indicators;
pub mod lifecycle;
pub mod signals;
pub mod sizers;

pub use lifecycle::{Action, HoldReason, Lifecycle, LifecycleConfig, Observation, Phase, Transition};
