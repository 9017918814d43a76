//! Trade lifecycle state machine.
//!
//! One call to [`Lifecycle::tick`] per control-loop iteration. The machine owns
//! the rolling history, the open trade and the current phase; it never talks to
//! the broker. Orders implied by a transition are executed by the caller, who
//! then commits them with [`Lifecycle::record_entry`] / [`Lifecycle::record_exit`].
//! Until committed, the machine keeps its previous phase, so a failed order
//! leaves the state exactly as it was.
//!
//! ```text
//!            history >= window              entry order filled
//!   Idle ───────────────────────▶ ArmedEntry ─────────────────▶ InTrade
//!    ▲                                                              │
//!    └──────────── exit order filled / exposure seen flat ◀─────────┘
//!
//!   any phase ── close cutoff while flat / shutdown ──▶ Stopping
//! ```

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Bar, BarHistory, ClockState, ExitReason, Trade, POSITION_EPSILON};
use crate::signals::{window_for, DiscountEntry, EntryCheck};
use crate::sizers::EntryPlan;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    /// Flat, history still below the averaging window.
    Idle,
    /// Flat, watching the entry filter.
    ArmedEntry,
    /// A trade is open.
    InTrade,
    /// Terminal: session over or shutting down.
    Stopping,
}

/// Tunables for the machine.
#[derive(Debug, Clone, PartialEq)]
pub struct LifecycleConfig {
    /// No new trades (and forced exit) at or below this many minutes to close.
    pub cutoff_minutes: u64,
    /// Consecutive stop breaches that confirm a soft stop.
    pub confirm_polls: u32,
    /// Slow-average length; the averaging window is `max(slow, 20)`.
    pub slow: usize,
    pub discount_pct: f64,
    pub poll_interval: Duration,
    /// Wait after a bar whose timestamp was already seen.
    pub stale_retry: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            cutoff_minutes: 10,
            confirm_polls: 3,
            slow: 18,
            discount_pct: 0.0025,
            poll_interval: Duration::from_secs(60),
            stale_retry: Duration::from_secs(5),
        }
    }
}

/// Inputs gathered before the bar is fetched.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub clock: ClockState,
    /// Seed-compensated exposure.
    pub exposure: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HoldReason {
    StaleBar,
    /// Exposure without a trade record; entry is skipped.
    Drift,
    InTrade,
    Warmup,
    NoSignal,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Action {
    Hold(HoldReason),
    /// Flat at the close cutoff: stop trading for the day.
    EndSession,
    /// Entry filter fired at `price`; size and buy.
    Enter { price: f64 },
    /// Sell `quantity` to close the open trade.
    Exit {
        reason: ExitReason,
        quantity: f64,
        price: f64,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub next: Phase,
    pub action: Action,
    pub sleep: Option<Duration>,
    /// Trade dropped this tick because exposure was observed flat.
    pub closed_externally: Option<Trade>,
}

#[derive(Debug, Clone)]
pub struct Lifecycle {
    config: LifecycleConfig,
    filter: DiscountEntry,
    history: BarHistory,
    last_bar_at: Option<DateTime<Utc>>,
    trade: Option<Trade>,
    phase: Phase,
}

impl Lifecycle {
    pub fn new(config: LifecycleConfig) -> Self {
        let filter = DiscountEntry::new(window_for(config.slow), config.discount_pct);
        Self {
            config,
            filter,
            history: BarHistory::new(),
            last_bar_at: None,
            trade: None,
            phase: Phase::Idle,
        }
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn trade(&self) -> Option<&Trade> {
        self.trade.as_ref()
    }

    pub fn history(&self) -> &BarHistory {
        &self.history
    }

    pub fn window(&self) -> usize {
        self.filter.window()
    }

    /// Latest close seen, if any.
    pub fn last_price(&self) -> Option<f64> {
        self.history.latest().map(|b| b.close)
    }

    /// Run one tick. `fetch_bar` is only called when the tick gets that far.
    pub fn tick<E>(
        &mut self,
        obs: Observation,
        fetch_bar: impl FnOnce() -> Result<Bar, E>,
    ) -> Result<Transition, E> {
        let cutoff = obs.clock.minutes_to_close <= self.config.cutoff_minutes;
        let flat = obs.exposure.abs() <= POSITION_EPSILON;

        let closed_externally = if self.trade.is_some() && flat {
            self.phase = Phase::Idle;
            self.trade.take()
        } else {
            None
        };

        if self.trade.is_none() && cutoff {
            self.phase = Phase::Stopping;
            return Ok(Transition {
                next: Phase::Stopping,
                action: Action::EndSession,
                sleep: None,
                closed_externally,
            });
        }

        let bar = fetch_bar()?;
        if self.last_bar_at == Some(bar.timestamp) {
            return Ok(self.hold(HoldReason::StaleBar, self.config.stale_retry, closed_externally));
        }
        self.last_bar_at = Some(bar.timestamp);
        let price = bar.close;
        self.history.push(bar);

        let poll = self.config.poll_interval;

        if self.trade.is_none() && !flat {
            self.phase = Phase::Idle;
            return Ok(self.hold(HoldReason::Drift, poll, closed_externally));
        }

        if let Some(trade) = self.trade.as_mut() {
            let exit = trade.evaluate_exit(price, cutoff, self.config.confirm_polls);
            let quantity = trade.quantity;
            return Ok(match exit {
                Some(reason) => Transition {
                    next: Phase::Idle,
                    action: Action::Exit {
                        reason,
                        quantity,
                        price,
                    },
                    sleep: Some(poll),
                    closed_externally,
                },
                None => self.hold(HoldReason::InTrade, poll, closed_externally),
            });
        }

        match self.filter.check(&self.history, price) {
            EntryCheck::Warmup { .. } => {
                self.phase = Phase::Idle;
                Ok(self.hold(HoldReason::Warmup, poll, closed_externally))
            }
            EntryCheck::Pass { .. } => {
                self.phase = Phase::ArmedEntry;
                Ok(self.hold(HoldReason::NoSignal, poll, closed_externally))
            }
            EntryCheck::Fire { .. } => {
                self.phase = Phase::ArmedEntry;
                Ok(Transition {
                    next: Phase::InTrade,
                    action: Action::Enter { price },
                    sleep: Some(poll),
                    closed_externally,
                })
            }
        }
    }

    /// Commit a filled entry.
    pub fn record_entry(&mut self, plan: &EntryPlan) -> &Trade {
        self.phase = Phase::InTrade;
        self.trade.insert(Trade::new(plan.quantity, plan.price, plan.stop, plan.target))
    }

    /// Commit a filled exit, returning the closed trade.
    pub fn record_exit(&mut self) -> Option<Trade> {
        self.phase = Phase::Idle;
        self.trade.take()
    }

    /// Enter the terminal phase.
    pub fn stop(&mut self) {
        self.phase = Phase::Stopping;
    }

    fn hold(
        &self,
        reason: HoldReason,
        sleep: Duration,
        closed_externally: Option<Trade>,
    ) -> Transition {
        Transition {
            next: self.phase,
            action: Action::Hold(reason),
            sleep: Some(sleep),
            closed_externally,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::convert::Infallible;

    fn at(i: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, 14, 30, 0).unwrap() + chrono::Duration::minutes(i)
    }

    fn open(minutes_to_close: u64) -> ClockState {
        ClockState {
            is_open: true,
            seconds_to_open: 0,
            minutes_to_close,
        }
    }

    fn obs(exposure: f64) -> Observation {
        Observation {
            clock: open(120),
            exposure,
        }
    }

    fn feed(lc: &mut Lifecycle, i: i64, price: f64, exposure: f64) -> Transition {
        lc.tick(obs(exposure), || Ok::<_, Infallible>(Bar::from_price(at(i), price)))
            .unwrap()
    }

    fn warmed(bars: usize) -> Lifecycle {
        let mut lc = Lifecycle::new(LifecycleConfig::default());
        for i in 0..bars {
            feed(&mut lc, i as i64, 100.0, 0.0);
        }
        lc
    }

    #[test]
    fn warmup_holds_in_idle() {
        let mut lc = Lifecycle::new(LifecycleConfig::default());
        let t = feed(&mut lc, 0, 50.0, 0.0);
        assert_eq!(t.action, Action::Hold(HoldReason::Warmup));
        assert_eq!(t.next, Phase::Idle);
        assert_eq!(t.sleep, Some(Duration::from_secs(60)));
    }

    #[test]
    fn arms_once_window_is_full() {
        let lc = warmed(20);
        assert_eq!(lc.phase(), Phase::ArmedEntry);
        assert_eq!(lc.window(), 20);
    }

    #[test]
    fn discount_fires_entry() {
        let mut lc = warmed(20);
        let t = feed(&mut lc, 20, 90.0, 0.0);
        assert_eq!(t.action, Action::Enter { price: 90.0 });
        assert_eq!(t.next, Phase::InTrade);
        // not committed yet
        assert_eq!(lc.phase(), Phase::ArmedEntry);
        assert!(lc.trade().is_none());
    }

    #[test]
    fn stale_bar_short_retry_without_history_growth() {
        let mut lc = warmed(20);
        let t = feed(&mut lc, 19, 50.0, 0.0);
        assert_eq!(t.action, Action::Hold(HoldReason::StaleBar));
        assert_eq!(t.sleep, Some(Duration::from_secs(5)));
        assert_eq!(lc.history().len(), 20);
    }

    #[test]
    fn drift_skips_entry() {
        let mut lc = warmed(20);
        let t = feed(&mut lc, 20, 1.0, 4.0);
        assert_eq!(t.action, Action::Hold(HoldReason::Drift));
        assert_eq!(lc.history().len(), 21);
    }

    #[test]
    fn cutoff_while_flat_ends_session_without_fetching() {
        let mut lc = warmed(20);
        let t = lc
            .tick(
                Observation {
                    clock: open(10),
                    exposure: 0.0,
                },
                || -> Result<Bar, &str> { Err("must not fetch") },
            )
            .unwrap();
        assert_eq!(t.action, Action::EndSession);
        assert_eq!(t.next, Phase::Stopping);
        assert_eq!(lc.phase(), Phase::Stopping);
    }

    #[test]
    fn closed_market_reads_as_cutoff() {
        let mut lc = warmed(0);
        let t = lc
            .tick(
                Observation {
                    clock: ClockState::default(),
                    exposure: 0.0,
                },
                || -> Result<Bar, &str> { Err("must not fetch") },
            )
            .unwrap();
        assert_eq!(t.action, Action::EndSession);
    }

    #[test]
    fn in_trade_exit_and_commit() {
        let mut lc = warmed(20);
        feed(&mut lc, 20, 90.0, 0.0);
        let plan = EntryPlan {
            quantity: 10.0,
            price: 100.0,
            risk_per_share: 0.8,
            stop: 95.0,
            target: 110.0,
        };
        lc.record_entry(&plan);
        assert_eq!(lc.phase(), Phase::InTrade);

        let t = feed(&mut lc, 21, 111.0, 10.0);
        assert_eq!(
            t.action,
            Action::Exit {
                reason: ExitReason::TakeProfit,
                quantity: 10.0,
                price: 111.0
            }
        );
        assert_eq!(lc.phase(), Phase::InTrade);
        let closed = lc.record_exit().unwrap();
        assert_eq!(closed.quantity, 10.0);
        assert_eq!(lc.phase(), Phase::Idle);
    }

    #[test]
    fn cutoff_in_trade_forces_session_close_exit() {
        let mut lc = warmed(20);
        lc.record_entry(&EntryPlan {
            quantity: 5.0,
            price: 100.0,
            risk_per_share: 0.8,
            stop: 95.0,
            target: 110.0,
        });
        let t = lc
            .tick(
                Observation {
                    clock: open(3),
                    exposure: 5.0,
                },
                || Ok::<_, Infallible>(Bar::from_price(at(30), 100.0)),
            )
            .unwrap();
        assert!(matches!(
            t.action,
            Action::Exit {
                reason: ExitReason::SessionClose,
                ..
            }
        ));
    }

    #[test]
    fn external_flatten_drops_trade() {
        let mut lc = warmed(20);
        lc.record_entry(&EntryPlan {
            quantity: 5.0,
            price: 100.0,
            risk_per_share: 0.8,
            stop: 95.0,
            target: 110.0,
        });
        let t = feed(&mut lc, 20, 100.0, 0.0);
        assert_eq!(t.closed_externally.map(|t| t.quantity), Some(5.0));
        assert!(lc.trade().is_none());
        assert_ne!(t.next, Phase::InTrade);
    }
}
