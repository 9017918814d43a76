//! Agent configuration: TOML file, environment overrides, validation.
//!
//! Every field has a default, so an empty file (or no file) yields the
//! reference deployment. The API key is only ever read from the environment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use reverter_core::sizers::FixedRiskSizer;
use reverter_core::LifecycleConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::agent::AgentSettings;
use crate::broker::RetryPolicy;
use crate::oracle::SeedConfig;

pub const ENV_BASE_URL: &str = "API_BASE_URL";
pub const ENV_API_KEY: &str = "DEMO_CREDS";
pub const ENV_SYMBOL: &str = "SYMBOL";

/// Longest configurable back-off or settle wait.
const MAX_WAIT_SECS: f64 = 3600.0;
const MAX_COALESCE_SECS: f64 = 60.0;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    pub broker: BrokerConfig,
    pub instrument: InstrumentConfig,
    pub session: SessionConfig,
    pub strategy: StrategyConfig,
    pub seed: SeedConfig,
    pub runtime: RuntimeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BrokerConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    /// Taken from the environment only.
    #[serde(skip)]
    pub api_key: Option<String>,
    pub retry: RetryPolicy,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            base_url: "https://demo.trading212.com/api/v0".to_string(),
            timeout_secs: 10,
            api_key: None,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct InstrumentConfig {
    pub symbol: String,
    pub timeframe: String,
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        Self {
            symbol: "ITMl_EQ".to_string(),
            timeframe: "1m".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    pub warmup_secs: u64,
    /// No new trades at or below this many minutes to close.
    pub cutoff_minutes: u64,
    /// Shortest wait between clock checks while the market is closed.
    pub open_poll_floor_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            warmup_secs: 300,
            cutoff_minutes: 10,
            open_poll_floor_secs: 15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StrategyConfig {
    pub risk_pct: f64,
    pub reward_multiple: f64,
    pub fast: usize,
    pub slow: usize,
    pub discount_pct: f64,
    pub loss_threshold_pct: f64,
    pub confirm_polls: u32,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            risk_pct: 0.005,
            reward_multiple: 2.0,
            fast: 6,
            slow: 18,
            discount_pct: 0.0025,
            loss_threshold_pct: 0.008,
            confirm_polls: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RuntimeConfig {
    pub poll_secs: u64,
    pub stale_retry_secs: u64,
    /// Rate-limit back-offs allowed per logical step.
    pub step_retries: u32,
    pub journal_path: PathBuf,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            poll_secs: 60,
            stale_retry_secs: 5,
            step_retries: 5,
            journal_path: PathBuf::from("trades_log.csv"),
        }
    }
}

impl AgentConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Apply `API_BASE_URL`, `DEMO_CREDS` and `SYMBOL`. Blank values are ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(url) = get(ENV_BASE_URL) {
            self.broker.base_url = url;
        }
        if let Some(key) = get(ENV_API_KEY) {
            self.broker.api_key = Some(key);
        }
        if let Some(symbol) = get(ENV_SYMBOL) {
            self.instrument.symbol = symbol;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.strategy;
        let checks = [
            (!self.broker.base_url.trim().is_empty(), "broker.base_url is empty"),
            (self.broker.timeout_secs > 0, "broker.timeout_secs must be > 0"),
            (self.broker.retry.max_attempts >= 1, "broker.retry.max_attempts must be >= 1"),
            (self.broker.retry.backoff_factor >= 0.0, "broker.retry.backoff_factor must be >= 0"),
            (
                (0.0..=MAX_WAIT_SECS).contains(&self.broker.retry.max_backoff_secs),
                "broker.retry.max_backoff_secs must be in [0, 3600]",
            ),
            (!self.instrument.symbol.trim().is_empty(), "instrument.symbol is empty"),
            (s.risk_pct > 0.0 && s.risk_pct < 1.0, "strategy.risk_pct must be in (0, 1)"),
            (s.reward_multiple > 0.0, "strategy.reward_multiple must be > 0"),
            (s.fast >= 1 && s.slow >= 1, "strategy.fast and strategy.slow must be >= 1"),
            (
                (0.0..1.0).contains(&s.discount_pct),
                "strategy.discount_pct must be in [0, 1)",
            ),
            (
                s.loss_threshold_pct > 0.0 && s.loss_threshold_pct < 1.0,
                "strategy.loss_threshold_pct must be in (0, 1)",
            ),
            (s.confirm_polls >= 1, "strategy.confirm_polls must be >= 1"),
            (self.seed.quantity > 0.0, "seed.quantity must be > 0"),
            (self.seed.max_attempts >= 1, "seed.max_attempts must be >= 1"),
            (
                self.seed.backoff >= 1.0 && self.seed.initial_delay_secs >= 0.0,
                "seed.backoff must be >= 1 and seed.initial_delay_secs >= 0",
            ),
            (
                (0.0..=MAX_WAIT_SECS).contains(&self.seed.initial_delay_secs)
                    && (0.0..=MAX_WAIT_SECS).contains(&self.seed.max_delay_secs),
                "seed delays must be in [0, 3600]",
            ),
            (
                (0.0..=MAX_WAIT_SECS).contains(&self.seed.settle_secs),
                "seed.settle_secs must be in [0, 3600]",
            ),
            (
                (0.0..=MAX_COALESCE_SECS).contains(&self.seed.coalesce_secs),
                "seed.coalesce_secs must be in [0, 60]",
            ),
            (
                self.seed.epsilon.is_finite() && self.seed.epsilon >= 0.0,
                "seed.epsilon must be >= 0",
            ),
            (
                self.seed.drop_tolerance.is_finite() && self.seed.drop_tolerance >= 0.0,
                "seed.drop_tolerance must be >= 0",
            ),
            (self.runtime.poll_secs > 0, "runtime.poll_secs must be > 0"),
            (
                !self.runtime.journal_path.as_os_str().is_empty(),
                "runtime.journal_path is empty",
            ),
        ];
        match checks.iter().find(|(ok, _)| !ok) {
            Some((_, msg)) => Err(ConfigError::Invalid((*msg).to_string())),
            None => Ok(()),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.broker.timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.broker.retry.clone()
    }

    pub fn seed(&self) -> SeedConfig {
        self.seed.clone()
    }

    pub fn sizer(&self) -> FixedRiskSizer {
        FixedRiskSizer::new(
            self.strategy.risk_pct,
            self.strategy.loss_threshold_pct,
            self.strategy.reward_multiple,
        )
    }

    pub fn lifecycle_config(&self) -> LifecycleConfig {
        LifecycleConfig {
            cutoff_minutes: self.session.cutoff_minutes,
            confirm_polls: self.strategy.confirm_polls,
            slow: self.strategy.slow,
            discount_pct: self.strategy.discount_pct,
            poll_interval: Duration::from_secs(self.runtime.poll_secs),
            stale_retry: Duration::from_secs(self.runtime.stale_retry_secs),
        }
    }

    pub fn agent_settings(&self) -> AgentSettings {
        AgentSettings {
            symbol: self.instrument.symbol.clone(),
            warmup: Duration::from_secs(self.session.warmup_secs),
            open_poll_floor: Duration::from_secs(self.session.open_poll_floor_secs),
            step_retries: self.runtime.step_retries,
        }
    }
}
