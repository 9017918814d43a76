//! Reverter Runner: everything that touches the outside world.
//!
//! - Broker access: transport, retry policy, API client, typed endpoints
//! - Session clock from the venue's working schedule
//! - Position oracle with the seed workaround
//! - Bar feed, trade journal, configuration
//! - The live agent loop and shutdown flatten

pub mod agent;
pub mod broker;
pub mod config;
pub mod feed;
pub mod journal;
pub mod oracle;
pub mod session;
pub mod time;

pub use agent::{Agent, AgentError, AgentSettings, SessionEnd};
pub use broker::{Broker, BrokerError, HttpTransport, RetryPolicy, Transport};
pub use config::{AgentConfig, ConfigError};
pub use feed::{BarSource, SnapshotBars};
pub use journal::{CsvJournal, Signal, TradeJournal, TradeRecord};
pub use oracle::{PositionOracle, SeedConfig};
pub use session::{SessionClock, StartupError};
pub use time::{Clock, Pause, ShutdownSignal, SystemClock, SystemPause};
