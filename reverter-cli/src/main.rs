//! Reverter CLI: run the agent and inspect what it would see.
//!
//! Commands:
//! - `run`: wait for the open, trade the session, flatten on close or Ctrl-C
//! - `clock`: print the session clock for the configured instrument
//! - `position`: print raw and seed-compensated position (places no orders)
//! - `check-config`: validate the config and print the effective TOML

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use reverter_core::domain::ClockState;
use reverter_runner::{
    Agent, AgentConfig, AgentError, Broker, CsvJournal, HttpTransport, PositionOracle,
    SessionClock, SessionEnd, ShutdownSignal, SnapshotBars, SystemClock, SystemPause,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "reverter",
    about = "Reverter: single-instrument mean-reversion trading agent"
)]
struct Cli {
    /// Path to a TOML config file. Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Trade one session, then flatten and exit.
    Run,
    /// Print whether the market is open and how long until open/close.
    Clock,
    /// Print the broker position with and without the seed.
    Position,
    /// Validate the configuration and print it.
    CheckConfig,
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run => run_agent(&config),
        Commands::Clock => run_clock(&config),
        Commands::Position => run_position(&config),
        Commands::CheckConfig => {
            let text = toml::to_string_pretty(&config).context("cannot render config")?;
            println!("{text}");
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<AgentConfig> {
    let mut config = match path {
        Some(path) => AgentConfig::load(path)?,
        None => AgentConfig::default(),
    };
    config.apply_env(|key| std::env::var(key).ok());
    config.validate()?;
    if config.broker.api_key.is_none() {
        warn!("no API key in the environment, requests will be unauthenticated");
    }
    Ok(config)
}

fn connect(config: &AgentConfig, shutdown: &ShutdownSignal) -> Result<Broker<HttpTransport>> {
    let transport = HttpTransport::new(
        &config.broker.base_url,
        config.broker.api_key.as_deref(),
        config.timeout(),
    )
    .context("cannot build HTTP client")?;
    info!(base_url = transport.base_url(), "broker configured");
    Ok(Broker::new(
        transport,
        config.retry_policy(),
        Arc::new(SystemClock),
        Arc::new(SystemPause::new(shutdown.clone())),
    ))
}

fn run_agent(config: &AgentConfig) -> Result<()> {
    let shutdown = ShutdownSignal::new();
    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || {
            if shutdown.is_requested() {
                eprintln!("shutdown already in progress, waiting for flatten");
            } else {
                eprintln!("shutdown requested, flattening");
                shutdown.request();
            }
        })
        .context("cannot install Ctrl-C handler")?;
    }

    let broker = connect(config, &shutdown)?;
    let symbol = config.instrument.symbol.as_str();
    let session = SessionClock::load(&broker, symbol)
        .with_context(|| format!("cannot load trading schedule for {symbol}"))?;

    let journal = CsvJournal::new(&config.runtime.journal_path);
    let mut agent = Agent::new(
        broker,
        session,
        PositionOracle::new(config.seed()),
        SnapshotBars,
        journal,
        config.lifecycle_config(),
        config.sizer(),
        config.agent_settings(),
        shutdown,
    );

    match agent.run() {
        Ok(SessionEnd::MarketClosing) => {
            info!("session over, flat");
            Ok(())
        }
        Ok(SessionEnd::ShutdownRequested) => {
            info!("stopped on request, flat");
            Ok(())
        }
        Err(e @ AgentError::FlattenFailed { .. }) => {
            error!(error = %e, "position may still be open");
            std::process::exit(2);
        }
        Err(e) => Err(e).context("agent stopped with an error"),
    }
}

fn run_clock(config: &AgentConfig) -> Result<()> {
    let broker = connect(config, &ShutdownSignal::new())?;
    let session = SessionClock::load(&broker, &config.instrument.symbol)?;
    print_clock(session.symbol(), &session.clock());
    Ok(())
}

fn print_clock(symbol: &str, state: &ClockState) {
    if state.is_open {
        println!("{symbol}: open, closes in {} min", state.minutes_to_close);
    } else {
        println!("{symbol}: closed, opens in {} s", state.seconds_to_open);
    }
}

fn run_position(config: &AgentConfig) -> Result<()> {
    let broker = connect(config, &ShutdownSignal::new())?;
    let symbol = config.instrument.symbol.as_str();
    let mut oracle = PositionOracle::new(config.seed());

    let raw = oracle.raw_position(&broker, symbol)?;
    let exposure = oracle.position(&broker, symbol)?;
    match raw {
        Some(snap) => println!(
            "{symbol}: raw {} @ {}, exposure {exposure} (seed {})",
            snap.quantity,
            snap.current_price,
            if oracle.seed_active() { "held" } else { "absent" }
        ),
        None => println!("{symbol}: no position"),
    }
    Ok(())
}
