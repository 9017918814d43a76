//! Venue schedule and the clock state derived from it.
//!
//! The schedule is a sorted list of OPEN/CLOSE boundaries. Every clock query is
//! a pure fold over that list at a given instant, so tests can drive it with
//! synthetic events and fixed times.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    Open,
    Close,
}

impl EventKind {
    /// Parse the broker's event type label. Unknown labels yield None.
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "OPEN" => Some(EventKind::Open),
            "CLOSE" => Some(EventKind::Close),
            _ => None,
        }
    }
}

/// A single session boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleEvent {
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
}

impl ScheduleEvent {
    pub fn new(timestamp: DateTime<Utc>, kind: EventKind) -> Self {
        Self { timestamp, kind }
    }
}

/// Open/closed status and distance to the next boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClockState {
    pub is_open: bool,
    /// Whole seconds until the next OPEN; 0 when open or unknown.
    pub seconds_to_open: u64,
    /// Whole minutes until the next CLOSE; 0 when closed or unknown.
    pub minutes_to_close: u64,
}

/// Venue events for one working schedule, sorted ascending.
#[derive(Debug, Clone, Default)]
pub struct SessionSchedule {
    events: Vec<ScheduleEvent>,
}

impl SessionSchedule {
    pub fn new(mut events: Vec<ScheduleEvent>) -> Self {
        events.sort_by_key(|e| e.timestamp);
        Self { events }
    }

    pub fn events(&self) -> &[ScheduleEvent] {
        &self.events
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Derive the clock state at `now`.
    pub fn state_at(&self, now: DateTime<Utc>) -> ClockState {
        let mut is_open = false;
        let mut next_open = None;
        let mut next_close = None;

        for event in &self.events {
            if event.timestamp <= now {
                is_open = event.kind == EventKind::Open;
                continue;
            }
            match event.kind {
                EventKind::Close if is_open && next_close.is_none() => {
                    next_close = Some(event.timestamp)
                }
                EventKind::Open if !is_open && next_open.is_none() => {
                    next_open = Some(event.timestamp)
                }
                _ => {}
            }
            if next_open.is_some() && next_close.is_some() {
                break;
            }
        }

        let seconds_to_open = next_open
            .map(|t| (t - now).num_seconds().max(0) as u64)
            .unwrap_or(0);
        let minutes_to_close = next_close
            .map(|t| ((t - now).num_seconds() / 60).max(0) as u64)
            .unwrap_or(0);

        ClockState {
            is_open,
            seconds_to_open,
            minutes_to_close,
        }
    }
}
