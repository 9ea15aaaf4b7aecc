//! The tick loop that drives a network.
//!
//! The library only delivers packets when asked to. [`Simulation`] plays the
//! part of the host: it wakes up once per tick, lets a script inject traffic,
//! then drains the network with its configured budget.

use devnet_core::{DrainReport, NetworkConfig, NetworkService, RegistryError, SendError};
use std::time::Duration;
use thiserror::Error as ThisError;
use tokio::{signal, time};

/// Settings shared by all prebuilt simulations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulationConfig {
    /// How many devices a simulation creates.
    pub devices: usize,
    /// How many ticks the script injects traffic for.
    pub ticks: u64,
    /// Hard upper bound on ticks, including those spent draining leftovers.
    pub max_ticks: u64,
    /// Wall time between ticks.
    pub tick: Duration,
    /// The drain budget per tick.
    pub budget: usize,
    /// Seeds address generation.
    pub seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            devices: 10,
            ticks: 5,
            max_ticks: 1_000,
            tick: Duration::from_millis(1),
            budget: devnet_core::DEFAULT_MAX_PACKETS_PER_TICK,
            seed: None,
        }
    }
}

impl SimulationConfig {
    pub fn network_config(&self) -> NetworkConfig {
        let config = NetworkConfig::new().max_packets_per_tick(self.budget);
        match self.seed {
            Some(seed) => config.rng_seed(seed),
            None => config,
        }
    }
}

#[derive(Debug, ThisError)]
pub enum SimulationError {
    #[error("Registration failed: {0}")]
    Registry(#[from] RegistryError),
    #[error("Send failed: {0}")]
    Send(#[from] SendError),
}

/// What a script wants after injecting a tick's traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Call the script again next tick.
    Continue,
    /// The script is done. The run ends once the queue is empty.
    Finished,
}

/// Totals over a whole run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunStats {
    pub ticks: u64,
    pub packets: usize,
    pub deliveries: usize,
    pub vetoed: usize,
    pub faults: usize,
    /// The largest number of packets left over at the end of a tick.
    pub peak_backlog: usize,
    /// Packets still queued when the run ended.
    pub remaining: usize,
    /// Whether the run was cut short by Ctrl-C.
    pub interrupted: bool,
}

impl RunStats {
    fn record(&mut self, report: &DrainReport) {
        self.ticks += 1;
        self.packets += report.packets;
        self.deliveries += report.deliveries;
        self.vetoed += report.vetoed;
        self.faults += report.faults;
        self.peak_backlog = self.peak_backlog.max(report.remaining);
        self.remaining = report.remaining;
    }
}

/// Drives a [`NetworkService`] on a fixed tick.
pub struct Simulation {
    service: NetworkService,
    tick: Duration,
    max_ticks: u64,
}

impl Simulation {
    pub fn new(service: NetworkService, config: &SimulationConfig) -> Self {
        Self {
            service,
            // tokio intervals reject a zero period
            tick: config.tick.max(Duration::from_micros(1)),
            max_ticks: config.max_ticks,
        }
    }

    pub fn service(&self) -> &NetworkService {
        &self.service
    }

    /// Runs until the script has finished and the queue is empty, the tick
    /// limit is hit, or the process receives Ctrl-C.
    ///
    /// The script is called at the start of every tick, before the drain,
    /// with the zero-based tick number.
    pub async fn run<F>(&self, mut script: F) -> Result<RunStats, SimulationError>
    where
        F: FnMut(u64, &NetworkService) -> Result<Step, SimulationError>,
    {
        let mut stats = RunStats::default();
        let mut finished = false;
        let mut interval = time::interval(self.tick);
        let shutdown = signal::ctrl_c();
        tokio::pin!(shutdown);

        while stats.ticks < self.max_ticks {
            tokio::select! {
                _ = interval.tick() => {}
                _ = &mut shutdown => {
                    tracing::warn!(ticks = stats.ticks, "Interrupted");
                    stats.interrupted = true;
                    break;
                }
            }

            if !finished {
                finished = script(stats.ticks, &self.service)? == Step::Finished;
            }
            let report = self.service.drain();
            stats.record(&report);

            if finished && report.remaining == 0 {
                break;
            }
        }

        if stats.remaining > 0 {
            tracing::warn!(
                remaining = stats.remaining,
                "Tick limit reached with packets still queued"
            );
        }
        tracing::info!(
            ticks = stats.ticks,
            packets = stats.packets,
            deliveries = stats.deliveries,
            faults = stats.faults,
            "Simulation finished"
        );
        Ok(stats)
    }
}
