//! Domain types for the reverter agent

pub mod bar;
pub mod order;
pub mod position;
pub mod schedule;
pub mod trade;

pub use bar::{Bar, BarHistory, HISTORY_CAPACITY};
pub use order::Side;
pub use position::{PositionSnapshot, SnapshotError};
pub use schedule::{ClockState, EventKind, ScheduleEvent, SessionSchedule};
pub use trade::{ExitReason, Trade};

/// Quantities below this magnitude are treated as flat.
pub const POSITION_EPSILON: f64 = 1e-6;
