use crate::{
    applications::{Capture, PingResponder, PING, PING_RESPONSE},
    simulation::{RunStats, Simulation, SimulationConfig, SimulationError, Step},
};
use devnet_core::{Frequency, NetworkId, NetworkService, Payload, Registration};
use std::sync::Arc;

/// The frequency handheld devices talk on.
pub const PDA_FREQUENCY: Frequency = 1459;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingPongStats {
    pub pings: usize,
    pub responses: usize,
    pub run: RunStats,
}

/// Runs a ping sweep over the wireless network.
///
/// One pinger broadcasts a ping every tick for `config.ticks` ticks. Every one
/// of `config.devices` responders answers each ping, so a full run collects
/// `ticks * devices` responses, spread over as many ticks as the drain budget
/// requires.
pub async fn ping_pong(config: &SimulationConfig) -> Result<PingPongStats, SimulationError> {
    let service = NetworkService::new(config.network_config());

    let responders: Vec<_> = (0..config.devices)
        .map(|i| Arc::new(PingResponder::new(format!("PDA #{i}"))))
        .collect();
    let mut connections = Vec::with_capacity(responders.len());
    for responder in &responders {
        let connection = service.register(
            Registration::shared(NetworkId::WIRELESS, responder.clone())
                .prefix("PDA-")
                .frequency(PDA_FREQUENCY),
        )?;
        connections.push(connection);
    }

    let capture = Capture::new_shared();
    let pinger = service.register(
        Registration::shared(NetworkId::WIRELESS, capture.clone())
            .address("PINGER")
            .frequency(PDA_FREQUENCY),
    )?;

    let pings = config.ticks;
    let simulation = Simulation::new(service, config);
    let run = simulation
        .run(|tick, _| {
            if tick >= pings {
                return Ok(Step::Finished);
            }
            pinger.broadcast(Payload::command(PING))?;
            Ok(if tick + 1 == pings {
                Step::Finished
            } else {
                Step::Continue
            })
        })
        .await?;

    Ok(PingPongStats {
        pings: pings as usize,
        responses: capture.count_command(PING_RESPONSE),
        run,
    })
}
