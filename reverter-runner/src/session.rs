//! Session clock backed by the venue's working schedule.
//!
//! The schedule is fetched once at startup; afterwards every clock query is a
//! pure fold over the cached events at the injected clock's "now".

use std::sync::Arc;

use chrono::{DateTime, Utc};
use reverter_core::domain::{ClockState, EventKind, ScheduleEvent, SessionSchedule};
use thiserror::Error;
use tracing::{info, warn};

use crate::broker::{Broker, BrokerError, Exchange, Instrument, TimeEvent, Transport};
use crate::time::Clock;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("instrument '{0}' not found in broker metadata")]
    UnknownInstrument(String),

    #[error("working schedule {schedule_id} for '{symbol}' not found")]
    UnknownSchedule { symbol: String, schedule_id: i64 },

    #[error(transparent)]
    Broker(#[from] BrokerError),
}

pub struct SessionClock {
    symbol: String,
    schedule: SessionSchedule,
    clock: Arc<dyn Clock>,
}

impl SessionClock {
    /// Fetch instruments and exchanges and build the schedule for `symbol`.
    pub fn load<T: Transport>(broker: &Broker<T>, symbol: &str) -> Result<Self, StartupError> {
        let instruments = broker.instruments()?;
        let exchanges = broker.exchanges()?;
        let schedule = resolve_schedule(&instruments, &exchanges, symbol)?;
        info!(
            symbol,
            events = schedule.events().len(),
            "session schedule loaded"
        );
        Ok(Self::from_schedule(symbol, schedule, broker.clock_handle()))
    }

    pub fn from_schedule(symbol: &str, schedule: SessionSchedule, clock: Arc<dyn Clock>) -> Self {
        Self {
            symbol: symbol.to_string(),
            schedule,
            clock,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn schedule(&self) -> &SessionSchedule {
        &self.schedule
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn clock(&self) -> ClockState {
        self.schedule.state_at(self.clock.now())
    }

    /// True once no boundary lies ahead, i.e. the cached week has run out.
    pub fn is_exhausted(&self) -> bool {
        let now = self.clock.now();
        self.schedule.events().iter().all(|e| e.timestamp <= now)
    }

    /// Re-fetch the schedule, keeping the current one if the fetch fails.
    pub fn refresh<T: Transport>(&mut self, broker: &Broker<T>) -> Result<(), StartupError> {
        let fresh = Self::load(broker, &self.symbol)?;
        self.schedule = fresh.schedule;
        Ok(())
    }
}

/// Find the working schedule for `symbol` and parse its events.
pub fn resolve_schedule(
    instruments: &[Instrument],
    exchanges: &[Exchange],
    symbol: &str,
) -> Result<SessionSchedule, StartupError> {
    let instrument = instruments
        .iter()
        .find(|i| i.ticker == symbol)
        .ok_or_else(|| StartupError::UnknownInstrument(symbol.to_string()))?;

    let schedule_id = instrument
        .working_schedule_id
        .ok_or_else(|| StartupError::UnknownSchedule {
            symbol: symbol.to_string(),
            schedule_id: -1,
        })?;

    let working = exchanges
        .iter()
        .flat_map(|e| e.working_schedules.iter())
        .find(|s| s.id == schedule_id)
        .ok_or_else(|| StartupError::UnknownSchedule {
            symbol: symbol.to_string(),
            schedule_id,
        })?;

    let events = working.time_events.iter().filter_map(parse_event).collect();
    Ok(SessionSchedule::new(events))
}

fn parse_event(ev: &TimeEvent) -> Option<ScheduleEvent> {
    let (date, kind) = match (&ev.date, &ev.kind) {
        (Some(d), Some(k)) => (d, k),
        _ => return None,
    };
    let kind = EventKind::parse(kind)?;
    match DateTime::parse_from_rfc3339(date) {
        Ok(ts) => Some(ScheduleEvent::new(ts.with_timezone(&Utc), kind)),
        Err(e) => {
            warn!(date = %date, error = %e, "skipping malformed schedule event");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::WorkingSchedule;
    use chrono::TimeZone;

    fn event(date: Option<&str>, kind: Option<&str>) -> TimeEvent {
        TimeEvent {
            date: date.map(str::to_string),
            kind: kind.map(str::to_string),
        }
    }

    fn venue() -> (Vec<Instrument>, Vec<Exchange>) {
        let instruments = vec![
            Instrument {
                ticker: "OTHER_EQ".into(),
                name: None,
                working_schedule_id: Some(1),
            },
            Instrument {
                ticker: "ITMl_EQ".into(),
                name: Some("ITM Power".into()),
                working_schedule_id: Some(53),
            },
        ];
        let exchanges = vec![Exchange {
            id: Some(7),
            name: Some("LSE".into()),
            working_schedules: vec![
                WorkingSchedule {
                    id: 1,
                    time_events: vec![],
                },
                WorkingSchedule {
                    id: 53,
                    time_events: vec![
                        event(Some("2024-01-02T16:30:00Z"), Some("CLOSE")),
                        event(Some("2024-01-02T08:00:00Z"), Some("OPEN")),
                        event(None, Some("OPEN")),
                        event(Some("2024-01-02T12:00:00Z"), None),
                        event(Some("2024-01-02T12:00:00Z"), Some("AUCTION")),
                        event(Some("yesterday"), Some("CLOSE")),
                    ],
                },
            ],
        }];
        (instruments, exchanges)
    }

    #[test]
    fn resolves_and_sorts_events() {
        let (i, e) = venue();
        let sched = resolve_schedule(&i, &e, "ITMl_EQ").unwrap();
        let kinds: Vec<_> = sched.events().iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![EventKind::Open, EventKind::Close]);

        let noon = Utc.with_ymd_and_hms(2024, 1, 2, 12, 0, 0).unwrap();
        let state = sched.state_at(noon);
        assert!(state.is_open);
        assert_eq!(state.minutes_to_close, 270);
    }

    #[test]
    fn unknown_instrument_is_fatal() {
        let (i, e) = venue();
        assert!(matches!(
            resolve_schedule(&i, &e, "NOPE"),
            Err(StartupError::UnknownInstrument(s)) if s == "NOPE"
        ));
    }

    #[test]
    fn unknown_schedule_is_fatal() {
        let (mut i, e) = venue();
        i[1].working_schedule_id = Some(99);
        assert!(matches!(
            resolve_schedule(&i, &e, "ITMl_EQ"),
            Err(StartupError::UnknownSchedule { schedule_id: 99, .. })
        ));
    }
}
