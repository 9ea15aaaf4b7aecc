use crate::{
    applications::{AlarmRelay, Capture, ALARM},
    simulation::{RunStats, Simulation, SimulationConfig, SimulationError, Step},
};
use devnet_core::{
    Context, Frequency, NetworkId, NetworkService, Packet, Payload, ReceiveError, Registration,
};
use std::sync::Arc;

/// The frequency sensors raise alarms on.
pub const ALARM_FREQUENCY: Frequency = 1437;
/// The frequency the relay repeats alarms on.
pub const CONSOLE_FREQUENCY: Frequency = 1438;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlarmStormStats {
    pub alarms: usize,
    /// Alarms heard by the receive-all monitor.
    pub monitored: usize,
    /// Alarms that reached the console through the relay.
    pub relayed: usize,
    pub run: RunStats,
}

fn ignore(_: &Packet, _: &Context) -> Result<(), ReceiveError> {
    Ok(())
}

/// Trips every sensor of a wired building network at once.
///
/// `config.devices` sensors each raise one alarm on the first tick. Sensors
/// only transmit, so they never hear each other. A receive-all monitor hears
/// every alarm directly and a relay repeats each one to a console on a second
/// frequency. The drain budget bounds how fast the storm clears.
pub async fn alarm_storm(config: &SimulationConfig) -> Result<AlarmStormStats, SimulationError> {
    let service = NetworkService::new(config.network_config());

    let mut sensors = Vec::with_capacity(config.devices);
    for _ in 0..config.devices {
        sensors.push(service.register(
            Registration::new(NetworkId::WIRED, ignore)
                .prefix("SENSOR-")
                .transmit_frequency(ALARM_FREQUENCY),
        )?);
    }

    let monitor = Capture::new_shared();
    let _monitor = service.register(
        Registration::shared(NetworkId::WIRED, monitor.clone())
            .address("MONITOR")
            .frequency(ALARM_FREQUENCY)
            .receive_all(true),
    )?;
    let relay = Arc::new(AlarmRelay::new(CONSOLE_FREQUENCY));
    let _relay = service.register(
        Registration::shared(NetworkId::WIRED, relay.clone())
            .address("RELAY")
            .frequency(ALARM_FREQUENCY),
    )?;
    let console = Capture::new_shared();
    let _console = service.register(
        Registration::shared(NetworkId::WIRED, console.clone())
            .address("CONSOLE")
            .frequency(CONSOLE_FREQUENCY),
    )?;

    let simulation = Simulation::new(service, config);
    let run = simulation
        .run(|_, _| {
            for (zone, sensor) in sensors.iter().enumerate() {
                sensor.broadcast(Payload::command(ALARM).with("zone", zone as u64))?;
            }
            Ok(Step::Finished)
        })
        .await?;

    Ok(AlarmStormStats {
        alarms: sensors.len(),
        monitored: monitor.count_command(ALARM),
        relayed: console.count_command(ALARM),
        run,
    })
}
