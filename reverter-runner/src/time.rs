//! Time sources and suspension points.
//!
//! Every wait in the runner goes through [`Pause`] and every "now" through
//! [`Clock`], so the control loop can be driven by a manual clock in tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

pub trait Pause: Send + Sync {
    /// Short bounded delay (retry backoff, settlement). Always runs to completion.
    fn pause(&self, duration: Duration);

    /// Long wait (poll interval, market-open wait, rate-limit back-off).
    ///
    /// Returns false if cut short by a shutdown request.
    fn idle(&self, duration: Duration) -> bool;
}

/// Process-wide shutdown flag, set from the signal handler.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal(Arc<AtomicBool>);

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Thread-sleep implementation whose idles wake up for shutdown.
#[derive(Debug, Clone)]
pub struct SystemPause {
    shutdown: ShutdownSignal,
    slice: Duration,
}

impl SystemPause {
    pub fn new(shutdown: ShutdownSignal) -> Self {
        Self {
            shutdown,
            slice: Duration::from_millis(250),
        }
    }
}

impl Pause for SystemPause {
    fn pause(&self, duration: Duration) {
        std::thread::sleep(duration);
    }

    fn idle(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.shutdown.is_requested() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep(self.slice.min(deadline - now));
        }
    }
}
