//! Position oracle with the seed workaround.
//!
//! The broker answers a position lookup for a flat instrument with 404, which
//! is indistinguishable from "no data". The oracle keeps a small resting seed
//! quantity in the account so a record always exists, and subtracts it before
//! reporting exposure.
//!
//! Seed flag and snapshot cache are owned here and nowhere else.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reverter_core::domain::PositionSnapshot;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::broker::{Broker, BrokerError, Transport};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeedConfig {
    pub quantity: f64,
    pub epsilon: f64,
    pub max_attempts: u32,
    pub initial_delay_secs: f64,
    pub backoff: f64,
    pub max_delay_secs: f64,
    /// Raw quantity must be this close to the seed for it to be sold off.
    pub drop_tolerance: f64,
    pub settle_secs: f64,
    /// Snapshots younger than this are reused by [`PositionOracle::position`].
    pub coalesce_secs: f64,
}

impl Default for SeedConfig {
    fn default() -> Self {
        Self {
            quantity: 1.5,
            epsilon: 1e-6,
            max_attempts: 12,
            initial_delay_secs: 1.0,
            backoff: 1.5,
            max_delay_secs: 5.0,
            drop_tolerance: 0.01,
            settle_secs: 1.05,
            coalesce_secs: 0.6,
        }
    }
}

impl SeedConfig {
    /// Exposure for a raw quantity, and whether the seed is active afterwards.
    ///
    /// Once active the seed stays active for any non-flat reading, so a
    /// genuine short smaller than the seed is read as seeded.
    pub fn compensate(&self, raw_qty: f64, seed_active: bool) -> (f64, bool) {
        if raw_qty.abs() < self.epsilon {
            return (0.0, false);
        }
        let long_seed = raw_qty >= self.quantity - self.epsilon;
        let short_seed = raw_qty <= -self.quantity - self.epsilon;
        if long_seed || short_seed || seed_active {
            (raw_qty - raw_qty.signum() * self.quantity, true)
        } else {
            (raw_qty, false)
        }
    }
}

/// Non-panicking seconds-to-duration; negative or non-finite becomes zero.
fn wait_secs(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(Duration::ZERO)
}

#[derive(Debug, Clone)]
struct CachedSnapshot {
    snapshot: Option<PositionSnapshot>,
    fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct PositionOracle {
    config: SeedConfig,
    seed_active: bool,
    cached: Option<CachedSnapshot>,
}

impl PositionOracle {
    pub fn new(config: SeedConfig) -> Self {
        Self {
            config,
            seed_active: false,
            cached: None,
        }
    }

    pub fn config(&self) -> &SeedConfig {
        &self.config
    }

    pub fn seed_active(&self) -> bool {
        self.seed_active
    }

    /// Forget the cached snapshot so the next read goes to the broker.
    pub fn invalidate(&mut self) {
        self.cached = None;
    }

    /// Uncompensated lookup; a 404 is `None`. Always refreshes the cache.
    pub fn raw_position<T: Transport>(
        &mut self,
        broker: &Broker<T>,
        symbol: &str,
    ) -> Result<Option<PositionSnapshot>, BrokerError> {
        let snapshot = broker.position(symbol)?;
        self.cached = Some(CachedSnapshot {
            snapshot: snapshot.clone(),
            fetched_at: broker.clock().now(),
        });
        Ok(snapshot)
    }

    /// Make sure a seed is resting and return the first snapshot that shows up.
    pub fn ensure_seed<T: Transport>(
        &mut self,
        broker: &Broker<T>,
        symbol: &str,
    ) -> Result<PositionSnapshot, BrokerError> {
        if !self.seed_active {
            info!(symbol, quantity = self.config.quantity, "placing seed order");
            broker.market_order(symbol, self.config.quantity)?;
        }
        self.seed_active = true;

        let mut delay = self.config.initial_delay_secs;
        for attempt in 1..=self.config.max_attempts {
            broker.pause().pause(wait_secs(delay));
            if let Some(snapshot) = self.raw_position(broker, symbol)? {
                debug!(symbol, attempt, quantity = snapshot.quantity, "seed visible");
                return Ok(snapshot);
            }
            delay = (delay * self.config.backoff).min(self.config.max_delay_secs);
        }

        self.seed_active = false;
        warn!(
            symbol,
            attempts = self.config.max_attempts,
            "seed never appeared; check seed quantity and instrument code"
        );
        Err(BrokerError::MarketDataUnavailable {
            symbol: symbol.to_string(),
        })
    }

    /// Fresh snapshot for pricing, seeding if the broker shows nothing.
    pub fn latest_snapshot<T: Transport>(
        &mut self,
        broker: &Broker<T>,
        symbol: &str,
    ) -> Result<PositionSnapshot, BrokerError> {
        let snapshot = match self.raw_position(broker, symbol)? {
            Some(s) => s,
            None => self.ensure_seed(broker, symbol)?,
        };
        if snapshot.quantity >= self.config.quantity - self.config.epsilon {
            self.seed_active = true;
        }
        Ok(snapshot)
    }

    /// Seed-compensated exposure.
    pub fn position<T: Transport>(
        &mut self,
        broker: &Broker<T>,
        symbol: &str,
    ) -> Result<f64, BrokerError> {
        let now = broker.clock().now();
        let window = chrono::Duration::from_std(wait_secs(self.config.coalesce_secs))
            .unwrap_or_else(|_| chrono::Duration::zero());
        let snapshot = match &self.cached {
            Some(c) if now - c.fetched_at < window => c.snapshot.clone(),
            _ => self.raw_position(broker, symbol)?,
        };

        let raw_qty = snapshot.map(|s| s.quantity).unwrap_or(0.0);
        let (exposure, active) = self.config.compensate(raw_qty, self.seed_active);
        self.seed_active = active;
        Ok(exposure)
    }

    /// Sell the seed back if it is the only thing resting.
    ///
    /// The flag and cache are cleared even when the lookup or order fails.
    pub fn drop_seed<T: Transport>(
        &mut self,
        broker: &Broker<T>,
        symbol: &str,
    ) -> Result<(), BrokerError> {
        if !self.seed_active {
            return Ok(());
        }
        let result = self.sell_seed(broker, symbol);
        self.seed_active = false;
        self.cached = None;
        result
    }

    fn sell_seed<T: Transport>(&mut self, broker: &Broker<T>, symbol: &str) -> Result<(), BrokerError> {
        let raw_qty = self
            .raw_position(broker, symbol)?
            .map(|s| s.quantity)
            .unwrap_or(0.0);
        if (raw_qty - self.config.quantity).abs() < self.config.drop_tolerance {
            info!(symbol, quantity = self.config.quantity, "dropping seed");
            broker.market_order(symbol, -self.config.quantity)?;
            broker
                .pause()
                .pause(wait_secs(self.config.settle_secs));
        } else {
            debug!(symbol, raw_qty, "seed not isolated; leaving it in place");
        }
        Ok(())
    }
}
