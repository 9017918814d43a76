//! Shared fixtures: a scripted in-memory broker and a manual clock.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use reverter_core::domain::Bar;
use reverter_runner::broker::{ApiRequest, Method, RawResponse, TransportError};
use reverter_runner::{
    BarSource, Broker, BrokerError, Clock, Pause, PositionOracle, RetryPolicy, ShutdownSignal,
    Transport,
};
use serde_json::{json, Value};

pub const SYMBOL: &str = "ITMl_EQ";
pub const SCHEDULE_ID: i64 = 53;

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 2, 9, 0, 0).unwrap()
}

// ──────────────────────────────────────────────
// Manual clock
// ──────────────────────────────────────────────

#[derive(Debug)]
struct TimeState {
    now: DateTime<Utc>,
    pauses: Vec<Duration>,
    idles: Vec<Duration>,
}

/// Clock + Pause that only moves when something waits on it.
#[derive(Debug, Clone)]
pub struct ManualTime {
    state: Arc<Mutex<TimeState>>,
    shutdown: ShutdownSignal,
}

impl ManualTime {
    pub fn new(start: DateTime<Utc>, shutdown: ShutdownSignal) -> Self {
        Self {
            state: Arc::new(Mutex::new(TimeState {
                now: start,
                pauses: Vec::new(),
                idles: Vec::new(),
            })),
            shutdown,
        }
    }

    pub fn advance(&self, d: Duration) {
        let mut s = self.state.lock().unwrap();
        s.now = s.now + chrono::Duration::from_std(d).unwrap();
    }

    pub fn pauses(&self) -> Vec<Duration> {
        self.state.lock().unwrap().pauses.clone()
    }

    pub fn idles(&self) -> Vec<Duration> {
        self.state.lock().unwrap().idles.clone()
    }
}

impl Clock for ManualTime {
    fn now(&self) -> DateTime<Utc> {
        self.state.lock().unwrap().now
    }
}

impl Pause for ManualTime {
    fn pause(&self, d: Duration) {
        self.state.lock().unwrap().pauses.push(d);
        self.advance(d);
    }

    fn idle(&self, d: Duration) -> bool {
        if self.shutdown.is_requested() {
            return false;
        }
        self.state.lock().unwrap().idles.push(d);
        self.advance(d);
        true
    }
}

// ──────────────────────────────────────────────
// Scripted broker
// ──────────────────────────────────────────────

#[derive(Debug)]
pub struct FakeState {
    /// Raw quantity held, seed included.
    pub qty: f64,
    pub price: f64,
    pub cash_total: f64,
    pub instruments: Value,
    pub exchanges: Value,
    /// Signed quantities of every accepted market order.
    pub orders: Vec<f64>,
    pub requests: Vec<ApiRequest>,
    /// Returned verbatim, in order, before any normal handling.
    pub queued: VecDeque<RawResponse>,
    /// Position lookups that answer 404 regardless of holdings.
    pub hidden_lookups: usize,
    /// Orders are acknowledged but never change holdings.
    pub ignore_fills: bool,
    /// Market orders fail with this status.
    pub reject_orders: Option<u16>,
    /// Request shutdown once this many orders were accepted.
    pub shutdown_after_orders: Option<(usize, ShutdownSignal)>,
    /// The next request panics inside the transport (the lock is released first).
    pub panic_next: bool,
    next_order_id: u64,
}

#[derive(Debug, Clone)]
pub struct FakeBroker {
    state: Arc<Mutex<FakeState>>,
}

impl FakeBroker {
    /// Venue open from an hour before `now` until eight hours after it.
    pub fn new(now: DateTime<Utc>) -> Self {
        let open = now - chrono::Duration::hours(1);
        let close = now + chrono::Duration::hours(8);
        Self::with_events(vec![(open, "OPEN"), (close, "CLOSE")])
    }

    pub fn with_events(events: Vec<(DateTime<Utc>, &str)>) -> Self {
        let time_events: Vec<Value> = events
            .iter()
            .map(|(ts, kind)| json!({ "date": ts.to_rfc3339(), "type": kind }))
            .collect();
        let state = FakeState {
            qty: 0.0,
            price: 100.0,
            cash_total: 10_000.0,
            instruments: json!([
                { "ticker": "OTHER_EQ", "workingScheduleId": 1 },
                { "ticker": SYMBOL, "workingScheduleId": SCHEDULE_ID },
            ]),
            exchanges: json!([{
                "id": 7,
                "name": "LSE",
                "workingSchedules": [
                    { "id": 1, "timeEvents": [] },
                    { "id": SCHEDULE_ID, "timeEvents": time_events },
                ]
            }]),
            orders: Vec::new(),
            requests: Vec::new(),
            queued: VecDeque::new(),
            hidden_lookups: 0,
            ignore_fills: false,
            reject_orders: None,
            shutdown_after_orders: None,
            panic_next: false,
            next_order_id: 1000,
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut FakeState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    pub fn orders(&self) -> Vec<f64> {
        self.with(|s| s.orders.clone())
    }

    pub fn qty(&self) -> f64 {
        self.with(|s| s.qty)
    }

    pub fn position_lookups(&self) -> usize {
        self.with(|s| {
            s.requests
                .iter()
                .filter(|r| r.path == "/equity/portfolio/ticker")
                .count()
        })
    }

    pub fn queue(&self, resp: RawResponse) {
        self.with(|s| s.queued.push_back(resp));
    }
}

impl Transport for FakeBroker {
    fn send(&self, request: &ApiRequest) -> Result<RawResponse, TransportError> {
        let mut s = self.state.lock().unwrap();
        s.requests.push(request.clone());
        if s.panic_next {
            s.panic_next = false;
            drop(s);
            panic!("transport failure on {}", request.path);
        }
        if let Some(resp) = s.queued.pop_front() {
            return Ok(resp);
        }

        let ok = |v: Value| Ok(RawResponse::new(200, v.to_string()));
        match (request.method, request.path.as_str()) {
            (Method::Get, "/equity/metadata/instruments") => ok(s.instruments.clone()),
            (Method::Get, "/equity/metadata/exchanges") => ok(s.exchanges.clone()),
            (Method::Get, "/equity/account/cash") => ok(json!({ "free": s.cash_total, "total": s.cash_total })),
            (Method::Post, "/equity/portfolio/ticker") => {
                if s.hidden_lookups > 0 {
                    s.hidden_lookups -= 1;
                    return Ok(RawResponse::new(404, ""));
                }
                if s.qty.abs() < 1e-9 {
                    return Ok(RawResponse::new(404, ""));
                }
                ok(json!({ "ticker": SYMBOL, "quantity": s.qty, "currentPrice": s.price }))
            }
            (Method::Post, "/equity/orders/market") => {
                if let Some(status) = s.reject_orders {
                    return Ok(RawResponse::new(status, r#"{"code":"rejected"}"#));
                }
                let qty = request
                    .body
                    .as_ref()
                    .and_then(|b| b["quantity"].as_f64())
                    .unwrap_or(0.0);
                s.orders.push(qty);
                if !s.ignore_fills {
                    s.qty += qty;
                }
                s.next_order_id += 1;
                let id = s.next_order_id;
                if let Some((after, signal)) = &s.shutdown_after_orders {
                    if s.orders.len() >= *after {
                        signal.request();
                    }
                }
                ok(json!({ "id": id, "status": "NEW", "quantity": qty }))
            }
            (Method::Get, path) if path.starts_with("/equity/orders/") => {
                ok(json!({ "id": path.trim_start_matches("/equity/orders/"), "status": "FILLED" }))
            }
            _ => Ok(RawResponse::new(404, "")),
        }
    }
}

// ──────────────────────────────────────────────
// Wiring helpers
// ──────────────────────────────────────────────

/// Single-attempt policy so transient statuses surface immediately.
pub fn no_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 1,
        ..RetryPolicy::default()
    }
}

pub fn broker(fake: &FakeBroker, time: &ManualTime, policy: RetryPolicy) -> Broker<FakeBroker> {
    Broker::new(
        fake.clone(),
        policy,
        Arc::new(time.clone()),
        Arc::new(time.clone()),
    )
}

/// Bars from a fixed price list (last price repeats), stamped with the
/// broker clock. Still reads the seeded snapshot so seeding runs as live.
#[derive(Debug, Clone)]
pub struct ScriptedBars {
    prices: VecDeque<f64>,
    last: f64,
}

impl ScriptedBars {
    pub fn new(prices: impl IntoIterator<Item = f64>) -> Self {
        Self {
            prices: prices.into_iter().collect(),
            last: 100.0,
        }
    }
}

impl BarSource for ScriptedBars {
    fn latest_bar<T: Transport>(
        &mut self,
        broker: &Broker<T>,
        oracle: &mut PositionOracle,
        symbol: &str,
    ) -> Result<Bar, BrokerError> {
        oracle.latest_snapshot(broker, symbol)?;
        if let Some(p) = self.prices.pop_front() {
            self.last = p;
        }
        Ok(Bar::from_price(broker.clock().now(), self.last))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
