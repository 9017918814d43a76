//! Live control loop.
//!
//! The agent owns every collaborator and drives one [`Lifecycle`] tick per
//! poll: session clock, seed-compensated exposure, bar, decision, order.
//! Broker orders implied by a transition are placed here and committed back
//! to the machine only after they succeed.
//!
//! Whatever ends the loop, including a panic, [`Agent::run`] finishes with
//! [`Agent::shutdown_flatten`].

use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

use reverter_core::domain::{ExitReason, Side, POSITION_EPSILON};
use reverter_core::sizers::FixedRiskSizer;
use reverter_core::{Action, HoldReason, Lifecycle, LifecycleConfig, Observation, Transition};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::broker::{Broker, BrokerError, Transport};
use crate::feed::BarSource;
use crate::journal::{JournalError, Signal, TradeJournal, TradeRecord};
use crate::oracle::PositionOracle;
use crate::session::{SessionClock, StartupError};
use crate::time::{Pause, ShutdownSignal};

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("startup failed: {0}")]
    Startup(#[from] StartupError),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    Journal(#[from] JournalError),

    #[error("interrupted by shutdown request")]
    Interrupted,

    #[error("shutdown flatten failed (remaining exposure {}): {source}", fmt_remaining(.remaining))]
    FlattenFailed {
        remaining: Option<f64>,
        #[source]
        source: BrokerError,
    },
}

fn fmt_remaining(remaining: &Option<f64>) -> String {
    remaining.map_or_else(|| "unknown".to_string(), |q| q.to_string())
}

/// How a trading session ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Flat inside the close cutoff.
    MarketClosing,
    ShutdownRequested,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AgentSettings {
    pub symbol: String,
    pub warmup: Duration,
    /// Shortest wait between clock checks while closed.
    pub open_poll_floor: Duration,
    /// Rate-limit back-offs allowed per logical step.
    pub step_retries: u32,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            symbol: "ITMl_EQ".to_string(),
            warmup: Duration::from_secs(300),
            open_poll_floor: Duration::from_secs(15),
            step_retries: 5,
        }
    }
}

pub struct Agent<T: Transport, F: BarSource, J: TradeJournal> {
    broker: Broker<T>,
    session: SessionClock,
    oracle: PositionOracle,
    feed: F,
    journal: J,
    lifecycle: Lifecycle,
    sizer: FixedRiskSizer,
    settings: AgentSettings,
    shutdown: ShutdownSignal,
}

impl<T: Transport, F: BarSource, J: TradeJournal> Agent<T, F, J> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        broker: Broker<T>,
        session: SessionClock,
        oracle: PositionOracle,
        feed: F,
        journal: J,
        lifecycle: LifecycleConfig,
        sizer: FixedRiskSizer,
        settings: AgentSettings,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            broker,
            session,
            oracle,
            feed,
            journal,
            lifecycle: Lifecycle::new(lifecycle),
            sizer,
            settings,
            shutdown,
        }
    }

    pub fn broker(&self) -> &Broker<T> {
        &self.broker
    }

    pub fn oracle(&self) -> &PositionOracle {
        &self.oracle
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    pub fn journal(&self) -> &J {
        &self.journal
    }

    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    /// Wait for the open, trade until the close cutoff, then flatten.
    ///
    /// A flatten failure takes precedence over any loop error. A panic inside
    /// the loop is caught long enough to flatten, then resumed.
    pub fn run(&mut self) -> Result<SessionEnd, AgentError> {
        info!(
            symbol = %self.settings.symbol,
            feed = self.feed.name(),
            "agent starting"
        );
        let looped = panic::catch_unwind(AssertUnwindSafe(|| {
            self.wait_for_open().and_then(|()| self.trade_session())
        }));
        let outcome = match looped {
            Ok(Err(AgentError::Interrupted)) => Ok(SessionEnd::ShutdownRequested),
            Ok(other) => other,
            Err(payload) => {
                error!("trading loop panicked, flattening before unwinding");
                if let Err(e) = self.shutdown_flatten() {
                    error!(error = %e, "flatten after panic failed");
                }
                panic::resume_unwind(payload);
            }
        };
        if let Err(e) = &outcome {
            error!(error = %e, "trading loop failed, flattening");
        }
        self.shutdown_flatten()?;
        outcome
    }

    /// Idle until the session clock reports open, then idle the warmup.
    pub fn wait_for_open(&mut self) -> Result<(), AgentError> {
        loop {
            if self.session.is_exhausted() {
                if let Err(e) = self.session.refresh(&self.broker) {
                    warn!(error = %e, "schedule refresh failed, keeping cached events");
                }
            }
            let state = self.session.clock();
            if state.is_open {
                break;
            }
            let wait = Duration::from_secs(state.seconds_to_open).max(self.settings.open_poll_floor);
            info!(wait_secs = wait.as_secs(), "market closed, waiting for open");
            if !self.broker.pause().idle(wait) {
                return Err(AgentError::Interrupted);
            }
        }

        info!(warmup_secs = self.settings.warmup.as_secs(), "market open, warming up");
        if !self.broker.pause().idle(self.settings.warmup) {
            return Err(AgentError::Interrupted);
        }
        Ok(())
    }

    /// Tick until the close cutoff or a shutdown request.
    pub fn trade_session(&mut self) -> Result<SessionEnd, AgentError> {
        info!("entering trading loop");
        let poll = self.lifecycle.config().poll_interval;
        loop {
            if self.shutdown.is_requested() {
                return Ok(SessionEnd::ShutdownRequested);
            }

            let transition = match self.tick() {
                Ok(t) => t,
                Err(AgentError::Broker(BrokerError::MarketDataUnavailable { symbol })) => {
                    warn!(symbol = %symbol, "no market data this tick, retrying after one poll");
                    if !self.broker.pause().idle(poll) {
                        return Ok(SessionEnd::ShutdownRequested);
                    }
                    continue;
                }
                Err(AgentError::Interrupted) => return Ok(SessionEnd::ShutdownRequested),
                Err(e) => return Err(e),
            };

            if matches!(transition.action, Action::EndSession) {
                info!("market closing soon, stopping for the day");
                return Ok(SessionEnd::MarketClosing);
            }
            if let Some(sleep) = transition.sleep {
                if !self.broker.pause().idle(sleep) {
                    return Ok(SessionEnd::ShutdownRequested);
                }
            }
        }
    }

    /// One control-loop iteration, including any order it implies.
    ///
    /// The returned sleep is not taken here.
    pub fn tick(&mut self) -> Result<Transition, AgentError> {
        let Agent {
            broker,
            session,
            oracle,
            feed,
            journal,
            lifecycle,
            sizer,
            settings,
            ..
        } = self;
        let broker = &*broker;
        let symbol = settings.symbol.as_str();
        let pause = broker.pause();
        let retries = settings.step_retries;

        let clock = session.clock();
        let exposure = retry_interruptible(pause, retries, "position", || {
            oracle.position(broker, symbol)
        })?;

        let transition = lifecycle.tick(Observation { clock, exposure }, || {
            retry_interruptible(pause, retries, "bar", || {
                feed.latest_bar(broker, oracle, symbol)
            })
        })?;

        if let Some(trade) = &transition.closed_externally {
            info!(
                quantity = trade.quantity,
                entry = trade.entry_price,
                "trade closed outside the agent, back to idle"
            );
        }

        match transition.action {
            Action::Enter { price } => {
                let ts = lifecycle
                    .history()
                    .latest()
                    .map(|b| b.timestamp)
                    .unwrap_or_else(|| broker.clock().now());

                if let Err(rejection) = sizer.risk_per_share(price) {
                    info!(%rejection, "entry skipped");
                    return Ok(transition);
                }
                let equity = retry_interruptible(pause, retries, "equity", || broker.equity())?;
                let plan = match sizer.plan(price, equity) {
                    Ok(plan) => plan,
                    Err(rejection) => {
                        info!(%rejection, "entry skipped");
                        return Ok(transition);
                    }
                };

                let ack = retry_interruptible(pause, retries, "entry order", || {
                    broker.place_order(symbol, Side::Buy, plan.quantity)
                })?;
                oracle.invalidate();
                lifecycle.record_entry(&plan);
                info!(
                    quantity = plan.quantity,
                    price,
                    stop = plan.stop,
                    target = plan.target,
                    "entered long"
                );
                journal.record(&TradeRecord {
                    ts,
                    price,
                    signal: Signal::Buy,
                    qty: plan.quantity,
                    sl: Some(plan.stop),
                    tp: Some(plan.target),
                    note: format!("entry {}", ack.note()).trim_end().to_string(),
                })?;
            }
            Action::Exit {
                reason,
                quantity,
                price,
            } => {
                let ts = lifecycle
                    .history()
                    .latest()
                    .map(|b| b.timestamp)
                    .unwrap_or_else(|| broker.clock().now());
                let ack = retry_interruptible(pause, retries, "exit order", || {
                    broker.place_order(symbol, Side::Sell, quantity)
                })?;
                oracle.invalidate();
                let closed = lifecycle.record_exit();
                info!(%reason, quantity, price, "exited trade");
                journal.record(&TradeRecord {
                    ts,
                    price,
                    signal: Signal::Sell,
                    qty: -quantity,
                    sl: closed.as_ref().map(|t| t.stop_price),
                    tp: closed.as_ref().map(|t| t.target_price),
                    note: exit_note(ack.id_str(), reason),
                })?;
            }
            Action::Hold(HoldReason::Drift) => {
                warn!(exposure, "exposure without a trade record, skipping entry");
            }
            Action::Hold(reason) => {
                debug!(?reason, phase = ?lifecycle.phase(), "hold");
            }
            Action::EndSession => {}
        }

        Ok(transition)
    }

    /// Close any remaining exposure and release the seed.
    ///
    /// Waits here are not interruptible: a second Ctrl-C must not abandon a
    /// half-finished flatten.
    pub fn shutdown_flatten(&mut self) -> Result<(), AgentError> {
        let outcome = self.flatten_remaining();
        self.lifecycle.stop();
        if let Err(e) = self.oracle.drop_seed(&self.broker, &self.settings.symbol) {
            warn!(error = %e, "could not drop seed, a seed position may remain");
        }
        outcome
    }

    fn flatten_remaining(&mut self) -> Result<(), AgentError> {
        let Agent {
            broker,
            oracle,
            journal,
            lifecycle,
            settings,
            ..
        } = self;
        let broker = &*broker;
        let symbol = settings.symbol.as_str();
        let pause = broker.pause();
        let retries = settings.step_retries;

        oracle.invalidate();
        let remaining = match retry_blocking(pause, retries, "shutdown position", || {
            oracle.position(broker, symbol)
        }) {
            Ok(q) => q,
            Err(source) => return Err(flatten_failed(None, source)),
        };

        let side = match Side::closing(remaining) {
            Some(side) if remaining.abs() > POSITION_EPSILON => side,
            _ => {
                info!("flat on shutdown");
                return Ok(());
            }
        };
        let qty = remaining.abs();
        info!(%side, qty, "flattening position on shutdown");
        if let Err(source) = retry_blocking(pause, retries, "flatten order", || {
            broker.place_order(symbol, side, qty)
        }) {
            return Err(flatten_failed(Some(remaining), source));
        }
        oracle.invalidate();
        lifecycle.record_exit();

        journal.record(&TradeRecord {
            ts: broker.clock().now(),
            price: lifecycle.last_price().unwrap_or(0.0),
            signal: Signal::Flatten,
            qty: side.signed(qty),
            sl: None,
            tp: None,
            note: "shutdown".to_string(),
        })?;
        Ok(())
    }
}

fn flatten_failed(remaining: Option<f64>, source: BrokerError) -> AgentError {
    error!(
        remaining = %fmt_remaining(&remaining),
        error = %source,
        "MANUAL INTERVENTION REQUIRED: could not flatten position on shutdown"
    );
    AgentError::FlattenFailed { remaining, source }
}

fn exit_note(order_id: Option<String>, reason: ExitReason) -> String {
    order_id.unwrap_or_else(|| reason.as_str().to_string())
}

/// Re-run `op` while it is rate limited, idling the signalled duration.
///
/// Gives up with the last error after `retries` back-offs, and with
/// [`AgentError::Interrupted`] if an idle is cut short.
fn retry_interruptible<R>(
    pause: &dyn Pause,
    retries: u32,
    step: &str,
    mut op: impl FnMut() -> Result<R, BrokerError>,
) -> Result<R, AgentError> {
    let mut attempt = 0;
    loop {
        match op() {
            Err(BrokerError::RateLimited { retry_after }) if attempt < retries => {
                attempt += 1;
                warn!(
                    step,
                    attempt,
                    retry_after_secs = retry_after.as_secs_f64(),
                    "rate limited, backing off"
                );
                if !pause.idle(retry_after) {
                    return Err(AgentError::Interrupted);
                }
            }
            other => return other.map_err(AgentError::from),
        }
    }
}

/// Like [`retry_interruptible`] but the waits always run to completion.
fn retry_blocking<R>(
    pause: &dyn Pause,
    retries: u32,
    step: &str,
    mut op: impl FnMut() -> Result<R, BrokerError>,
) -> Result<R, BrokerError> {
    let mut attempt = 0;
    loop {
        match op() {
            Err(BrokerError::RateLimited { retry_after }) if attempt < retries => {
                attempt += 1;
                warn!(
                    step,
                    attempt,
                    retry_after_secs = retry_after.as_secs_f64(),
                    "rate limited during shutdown, backing off"
                );
                pause.pause(retry_after);
            }
            other => return other,
        }
    }
}
