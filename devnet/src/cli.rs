//! Parses the command line arguments and runs the selected scenario.
//!
//! Basic usage for running the alarm storm with file logging on:
//!
//! ```cargo run -- --scenario alarm-storm --devices 100 --log```

use crate::{
    simulation::{SimulationConfig, SimulationError},
    simulations::{alarm_storm, ping_pong},
};
use clap::{Parser, ValueEnum};
use std::{
    fs::{create_dir_all, OpenOptions},
    io,
    sync::Arc,
    time::Duration,
};
use thiserror::Error as ThisError;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Scenario {
    /// A pinger sweeps a wireless network of responders
    PingPong,
    /// Every sensor of a wired network raises an alarm at once
    AlarmStorm,
}

/// Stores the different command line arguments.
#[derive(Debug, Parser)]
#[command(version, about = "Runs a simulated device network")]
pub struct Args {
    /// The scenario to run
    #[arg(short, long, value_enum, default_value_t = Scenario::PingPong)]
    pub scenario: Scenario,
    /// Number of devices the scenario creates
    #[arg(short, long, default_value_t = 10)]
    pub devices: usize,
    /// Number of ticks the scenario injects traffic for
    #[arg(short, long, default_value_t = 5)]
    pub ticks: u64,
    /// Milliseconds between ticks
    #[arg(long, default_value_t = 50)]
    pub tick_ms: u64,
    /// Packets delivered per tick
    #[arg(short, long, default_value_t = devnet_core::DEFAULT_MAX_PACKETS_PER_TICK)]
    pub budget: usize,
    /// Seed for address generation
    #[arg(long)]
    pub seed: Option<u64>,
    /// Write JSON logs to ./logs instead of human readable logs to stderr
    #[arg(short, long)]
    pub log: bool,
}

impl Args {
    pub fn simulation_config(&self) -> SimulationConfig {
        SimulationConfig {
            devices: self.devices,
            ticks: self.ticks,
            tick: Duration::from_millis(self.tick_ms),
            budget: self.budget,
            seed: self.seed,
            ..Default::default()
        }
    }
}

#[derive(Debug, ThisError)]
pub enum CliError {
    #[error("Could not set up logging: {0}")]
    Logging(#[from] io::Error),
    #[error("A logger was already installed")]
    Subscriber(#[from] tracing::subscriber::SetGlobalDefaultError),
    #[error(transparent)]
    Simulation(#[from] SimulationError),
}

/// Parses the command line, installs logging and runs the chosen scenario.
pub async fn initialize_from_arguments() -> Result<(), CliError> {
    let args = Args::parse();
    if args.log {
        initialize_logging()?;
    } else {
        initialize_stderr_logging()?;
    }
    run(&args).await
}

/// Runs the scenario selected by `args`, printing a summary.
pub async fn run(args: &Args) -> Result<(), CliError> {
    let config = args.simulation_config();
    match args.scenario {
        Scenario::PingPong => {
            let stats = ping_pong(&config).await?;
            println!(
                "{} pings, {} responses in {} ticks (peak backlog {})",
                stats.pings, stats.responses, stats.run.ticks, stats.run.peak_backlog
            );
        }
        Scenario::AlarmStorm => {
            let stats = alarm_storm(&config).await?;
            println!(
                "{} alarms, {} monitored, {} relayed in {} ticks (peak backlog {})",
                stats.alarms, stats.monitored, stats.relayed, stats.run.ticks, stats.run.peak_backlog
            );
        }
    }
    Ok(())
}

/// Writes JSON events to a timestamped file in `./logs`. Only call this once.
fn initialize_logging() -> Result<(), CliError> {
    let main_path = "./logs";
    create_dir_all(main_path)?;
    let file_path = format!(
        "{}/debug-{}.log",
        main_path,
        chrono::offset::Local::now().format("%y-%m-%d_%H-%M-%S")
    );
    let file = OpenOptions::new()
        .append(true)
        .create(true)
        .open(file_path)?;
    let subscriber = FmtSubscriber::builder()
        .with_max_level(tracing::Level::DEBUG)
        .with_writer(Arc::new(file))
        .json()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

/// Human readable warnings and errors on stderr, overridable with `RUST_LOG`.
fn initialize_stderr_logging() -> Result<(), CliError> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}
