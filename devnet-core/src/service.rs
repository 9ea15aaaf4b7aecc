//! The facade devices use to join, talk on and reconfigure networks.

use crate::{
    connection::Connection,
    id::Frequency,
    logging::{packet_event, receive_fault_event},
    queue::DeliveryQueue,
    receiver::{Context, Receiver, ReceiveError, SharedFilter, SharedReceiver},
    registry::{DeviceRegistry, DeviceRequest, Recipient},
    Address, DeviceId, DeviceInfo, NetworkConfig, NetworkId, Packet, PacketFilter, Payload,
    RegistryError,
};
use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};
use thiserror::Error as ThisError;

#[derive(Debug, ThisError, Clone, PartialEq, Eq)]
pub enum SendError {
    #[error("Network {0} has no devices")]
    UnknownNetwork(NetworkId),
    #[error("The connection is closed")]
    Closed,
    #[error("No frequency to send on")]
    NoFrequency,
    #[error("Device {0} is not registered")]
    NotRegistered(DeviceId),
}

/// Everything needed to register a device.
pub struct Registration {
    network: NetworkId,
    request: DeviceRequest,
}

impl Registration {
    /// Registers `receiver` on `network` with a generated address, listening
    /// on no frequency.
    pub fn new(network: NetworkId, receiver: impl Receiver) -> Self {
        Self::shared(network, Arc::new(receiver))
    }

    /// Like [`new`](Self::new), for a receiver the caller keeps a handle to.
    pub fn shared(network: NetworkId, receiver: SharedReceiver) -> Self {
        Self {
            network,
            request: DeviceRequest {
                address: None,
                prefix: String::new(),
                frequency: None,
                transmit_frequency: None,
                receive_all: false,
                receiver,
            },
        }
    }

    /// Requests a specific address. Registration fails if it is taken.
    pub fn address(mut self, address: impl Into<Address>) -> Self {
        self.request.address = Some(address.into());
        self
    }

    /// The prefix for generated addresses.
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.request.prefix = prefix.into();
        self
    }

    /// The frequency to listen on. Also the transmit frequency unless one is
    /// set separately.
    pub fn frequency(mut self, frequency: Frequency) -> Self {
        self.request.frequency = Some(frequency);
        self
    }

    pub fn transmit_frequency(mut self, frequency: Frequency) -> Self {
        self.request.transmit_frequency = Some(frequency);
        self
    }

    pub fn receive_all(mut self, receive_all: bool) -> Self {
        self.request.receive_all = receive_all;
        self
    }
}

/// What one call to [`NetworkService::drain`] did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    /// Packets taken off the queue.
    pub packets: usize,
    /// Receivers that handled a packet without error.
    pub deliveries: usize,
    /// Deliveries cancelled by a filter.
    pub vetoed: usize,
    /// Receivers that returned an error or panicked.
    pub faults: usize,
    /// Packets left for later ticks.
    pub remaining: usize,
}

struct State {
    registry: DeviceRegistry,
    queue: DeliveryQueue,
    filters: Vec<SharedFilter>,
}

/// The packet network of one simulated world.
///
/// Cloning a `NetworkService` yields another handle to the same world. All
/// operations are immediate; packets are only delivered by
/// [`drain`](Self::drain), which the host calls once per tick.
#[derive(Clone)]
pub struct NetworkService {
    state: Arc<Mutex<State>>,
    config: Arc<NetworkConfig>,
}

impl NetworkService {
    pub fn new(config: NetworkConfig) -> Self {
        let state = State {
            registry: DeviceRegistry::new(config.allocator()),
            queue: DeliveryQueue::new(),
            filters: Vec::new(),
        };
        Self {
            state: Arc::new(Mutex::new(state)),
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a device and returns the handle it uses from now on.
    pub fn register(&self, registration: Registration) -> Result<Connection, RegistryError> {
        // a rejected request is dropped under the lock; this copy outlives it
        let receiver = registration.request.receiver.clone();
        let added = self
            .lock()
            .registry
            .add(registration.network, registration.request);
        drop(receiver);
        Ok(Connection::new(self.clone(), &added?))
    }

    /// Installs a hook consulted before every delivery.
    pub fn add_filter(&self, filter: impl PacketFilter) {
        self.lock().filters.push(Arc::new(filter));
    }

    /// Removes a device. Its receiver is released after the network is
    /// unlocked, so receivers may own connections.
    pub fn remove(&self, network: NetworkId, address: &str) -> Result<DeviceInfo, RegistryError> {
        let removed = self.lock().registry.remove(network, address)?;
        Ok(removed.info)
    }

    pub fn update_address(
        &self,
        network: NetworkId,
        old: &str,
        new: impl Into<Address>,
    ) -> Result<(), RegistryError> {
        self.lock().registry.update_address(network, old, new)
    }

    pub fn randomize_address(
        &self,
        network: NetworkId,
        old: &str,
        prefix: Option<&str>,
    ) -> Result<Address, RegistryError> {
        self.lock().registry.randomize_address(network, old, prefix)
    }

    pub fn update_receive_frequency(
        &self,
        network: NetworkId,
        address: &str,
        frequency: Option<Frequency>,
    ) -> Result<(), RegistryError> {
        self.lock()
            .registry
            .update_receive_frequency(network, address, frequency)
    }

    pub fn update_receive_all(
        &self,
        network: NetworkId,
        address: &str,
        receive_all: bool,
    ) -> Result<(), RegistryError> {
        self.lock()
            .registry
            .update_receive_all(network, address, receive_all)
    }

    pub fn set_transmit_frequency(
        &self,
        network: NetworkId,
        address: &str,
        frequency: Option<Frequency>,
    ) -> Result<(), RegistryError> {
        self.lock()
            .registry
            .set_transmit_frequency(network, address, frequency)
    }

    /// Removes every device of `network` and discards its queued packets.
    ///
    /// Returns the number of discarded packets, or `None` if the network did
    /// not exist.
    pub fn remove_network(&self, network: NetworkId) -> Option<usize> {
        let mut state = self.lock();
        let removed = state.registry.remove_network(network)?;
        let discarded = state.queue.discard(network);
        drop(state);
        drop(removed);
        Some(discarded)
    }

    pub fn is_address_present(&self, network: NetworkId, address: &str) -> bool {
        self.lock().registry.contains(network, address)
    }

    pub fn device(&self, network: NetworkId, address: &str) -> Option<DeviceInfo> {
        self.lock().registry.device(network, address)
    }

    pub fn device_by_id(&self, id: DeviceId) -> Option<DeviceInfo> {
        self.lock().registry.device_by_id(id)
    }

    pub fn listeners(&self, network: NetworkId, frequency: Frequency) -> Vec<Address> {
        self.lock()
            .registry
            .network(network)
            .map(|net| net.listeners(frequency))
            .unwrap_or_default()
    }

    pub fn receive_all_listeners(&self, network: NetworkId, frequency: Frequency) -> Vec<Address> {
        self.lock()
            .registry
            .network(network)
            .map(|net| net.receive_all_listeners(frequency))
            .unwrap_or_default()
    }

    /// The number of devices on `network`.
    pub fn network_size(&self, network: NetworkId) -> usize {
        self.lock()
            .registry
            .network(network)
            .map_or(0, |net| net.len())
    }

    /// The number of packets waiting to be drained.
    pub fn pending(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn pending_on(&self, network: NetworkId) -> usize {
        self.lock().queue.pending_on(network)
    }

    /// Queues a packet for delivery.
    ///
    /// Fails without queueing anything if no device has ever joined the
    /// packet's network.
    pub fn send(&self, packet: Packet) -> Result<(), SendError> {
        let mut state = self.lock();
        if !state.registry.contains_network(packet.network()) {
            tracing::warn!(
                network = %packet.network(),
                sender = %packet.sender(),
                "Dropping packet for unknown network"
            );
            return Err(SendError::UnknownNetwork(packet.network()));
        }
        state.queue.push(packet);
        Ok(())
    }

    /// Sends from a registered device's current address.
    ///
    /// Without an explicit `frequency` the device's transmit frequency is
    /// used. Without a `target` the packet is broadcast.
    pub(crate) fn transmit(
        &self,
        device: DeviceId,
        frequency: Option<Frequency>,
        target: Option<Address>,
        payload: Payload,
        metadata: Payload,
    ) -> Result<(), SendError> {
        let mut state = self.lock();
        let info = state
            .registry
            .device_by_id(device)
            .ok_or(SendError::NotRegistered(device))?;
        let frequency = frequency
            .or(info.transmit_frequency)
            .ok_or(SendError::NoFrequency)?;
        let packet = match target {
            Some(target) => Packet::unicast(info.network, frequency, info.address, target, payload),
            None => Packet::broadcast(info.network, frequency, info.address, payload),
        };
        state.queue.push(packet.with_metadata(metadata));
        Ok(())
    }

    /// Runs a registry operation against a device's current location.
    pub(crate) fn reconfigure<T>(
        &self,
        device: DeviceId,
        operation: impl FnOnce(&mut DeviceRegistry, NetworkId, &str) -> Result<T, RegistryError>,
    ) -> Result<T, RegistryError> {
        let mut state = self.lock();
        let info = state
            .registry
            .device_by_id(device)
            .ok_or(RegistryError::UnknownDevice(device))?;
        operation(&mut state.registry, info.network, info.address.as_str())
    }

    pub(crate) fn remove_device(&self, device: DeviceId) -> Result<DeviceInfo, RegistryError> {
        let removed = self.lock().registry.remove_device(device)?;
        Ok(removed.info)
    }

    /// Delivers up to the configured number of packets.
    pub fn drain(&self) -> DrainReport {
        self.drain_budget(self.config.max_packets_per_tick)
    }

    /// Delivers up to `budget` packets from the head of the queue.
    ///
    /// Recipients of each packet are captured before any receiver runs, so
    /// receivers may freely send, remove devices or reconfigure. Packets
    /// queued while draining are left for the next call.
    pub fn drain_budget(&self, budget: usize) -> DrainReport {
        let mut report = DrainReport::default();
        let mark = self.lock().queue.mark();

        while report.packets < budget {
            let (packet, recipients, filters) = {
                let mut state = self.lock();
                let Some(packet) = state.queue.pop_before(mark) else {
                    break;
                };
                let recipients = state.registry.resolve(&packet);
                (packet, recipients, state.filters.clone())
            };
            report.packets += 1;
            packet_event(&packet, recipients.len());

            for recipient in recipients {
                if !allowed(&filters, &packet, &recipient.info) {
                    tracing::debug!(recipient = %recipient.info.address, "Delivery vetoed");
                    report.vetoed += 1;
                    continue;
                }
                match self.deliver(&packet, recipient) {
                    Ok(()) => report.deliveries += 1,
                    Err(_) => report.faults += 1,
                }
            }
        }

        report.remaining = self.pending();
        report
    }

    fn deliver(&self, packet: &Packet, recipient: Recipient) -> Result<(), ReceiveError> {
        let address = recipient.info.address.clone();
        let context = Context::new(self.clone(), recipient.info);
        let receiver = recipient.receiver;
        let result = panic::catch_unwind(AssertUnwindSafe(|| receiver.receive(packet, &context)))
            .unwrap_or_else(|panic| Err(ReceiveError::Panicked(panic_message(panic))));
        if let Err(error) = &result {
            receive_fault_event(packet, &address, error);
        }
        result
    }
}

impl Default for NetworkService {
    fn default() -> Self {
        Self::new(NetworkConfig::default())
    }
}

/// Asks every filter about one delivery. A panicking filter vetoes it.
fn allowed(filters: &[SharedFilter], packet: &Packet, recipient: &DeviceInfo) -> bool {
    filters.iter().all(|filter| {
        panic::catch_unwind(AssertUnwindSafe(|| filter.allow(packet, recipient))).unwrap_or_else(
            |panic| {
                tracing::error!(
                    recipient = %recipient.address,
                    "Packet filter failed: {}",
                    panic_message(panic)
                );
                false
            },
        )
    })
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    match panic.downcast::<String>() {
        Ok(message) => *message,
        Err(panic) => panic
            .downcast_ref::<&str>()
            .map_or_else(|| "unknown panic".to_string(), |message| message.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use tracing_test::traced_test;

    const NET: NetworkId = NetworkId::new(1);

    /// Records every packet it receives.
    #[derive(Default)]
    struct Inbox(StdMutex<Vec<Packet>>);

    impl Inbox {
        fn packets(&self) -> Vec<Packet> {
            self.0.lock().unwrap().clone()
        }

        fn numbers(&self) -> Vec<u64> {
            self.packets()
                .iter()
                .map(|packet| packet.payload().get("n").unwrap().ok_uint().unwrap())
                .collect()
        }
    }

    impl Receiver for Inbox {
        fn receive(&self, packet: &Packet, _context: &Context) -> Result<(), ReceiveError> {
            self.0.lock().unwrap().push(packet.clone());
            Ok(())
        }
    }

    fn service() -> NetworkService {
        NetworkService::new(NetworkConfig::new().rng_seed(5))
    }

    const UPLINK: NetworkId = NetworkId::new(2);

    /// Repeats everything it hears onto the uplink network.
    struct Bridge(Connection);

    impl Receiver for Bridge {
        fn receive(&self, packet: &Packet, _context: &Context) -> Result<(), ReceiveError> {
            self.0.broadcast_on(0, packet.payload().clone())?;
            Ok(())
        }
    }

    /// A bridge device on `NET` whose receiver owns the only handle to
    /// "UP" on the uplink network.
    fn bridge(service: &NetworkService) -> Registration {
        let uplink = service
            .register(Registration::new(UPLINK, Inbox::default()).address("UP"))
            .unwrap();
        Registration::new(NET, Bridge(uplink)).address("BRIDGE").frequency(1)
    }

    fn numbered(n: u64) -> Payload {
        Payload::new().with("n", n)
    }

    #[test]
    fn send_to_unknown_network_fails() {
        let service = service();
        let packet = Packet::broadcast(NET, 0, "A", Payload::new());
        assert_eq!(service.send(packet), Err(SendError::UnknownNetwork(NET)));
        assert_eq!(service.pending(), 0);
    }

    #[test]
    fn network_outlives_its_devices() {
        let service = service();
        let a = service
            .register(Registration::new(NET, Inbox::default()).frequency(0))
            .unwrap();
        a.close();
        assert_eq!(service.network_size(NET), 0);
        assert!(service
            .send(Packet::broadcast(NET, 0, "A", Payload::new()))
            .is_ok());
    }

    #[test]
    fn budget_bounds_each_drain() {
        let service = service();
        let inbox = Arc::new(Inbox::default());
        let _a = service
            .register(Registration::new(NET, Inbox::default()).address("A").frequency(5))
            .unwrap();
        let _b = service
            .register(Registration::shared(NET, inbox.clone()).frequency(5))
            .unwrap();
        for n in 0..35 {
            service
                .send(Packet::broadcast(NET, 5, "A", numbered(n)))
                .unwrap();
        }

        let first = service.drain_budget(30);
        assert_eq!(first.packets, 30);
        assert_eq!(first.remaining, 5);
        assert_eq!(inbox.numbers(), (0..30).collect::<Vec<_>>());

        let second = service.drain_budget(30);
        assert_eq!(second.packets, 5);
        assert_eq!(second.remaining, 0);
        assert_eq!(inbox.numbers(), (0..35).collect::<Vec<_>>());

        assert_eq!(service.drain(), DrainReport::default());
    }

    #[test]
    #[traced_test]
    fn faulty_receivers_are_isolated() {
        let service = service();
        let inbox = Arc::new(Inbox::default());
        let _sender = service
            .register(Registration::new(NET, Inbox::default()).address("S").frequency(1))
            .unwrap();
        let _panics = service
            .register(
                Registration::new(NET, |_: &Packet, _: &Context| -> Result<(), ReceiveError> {
                    panic!("receiver exploded")
                })
                .address("P")
                .frequency(1),
            )
            .unwrap();
        let _fails = service
            .register(
                Registration::new(NET, |_: &Packet, _: &Context| -> Result<(), ReceiveError> {
                    Err(ReceiveError::Other("bad payload".into()))
                })
                .address("F")
                .frequency(1),
            )
            .unwrap();
        let _inbox = service
            .register(Registration::shared(NET, inbox.clone()).address("Z").frequency(1))
            .unwrap();

        service.send(Packet::broadcast(NET, 1, "S", numbered(1))).unwrap();
        service.send(Packet::broadcast(NET, 1, "S", numbered(2))).unwrap();
        let report = service.drain();

        assert_eq!(report.packets, 2);
        assert_eq!(report.faults, 4);
        assert_eq!(report.deliveries, 2);
        assert_eq!(inbox.numbers(), vec![1, 2]);
        assert!(logs_contain("receiver exploded"));
        assert!(logs_contain("bad payload"));
    }

    #[test]
    fn filters_veto_single_recipients() {
        let service = service();
        let near = Arc::new(Inbox::default());
        let far = Arc::new(Inbox::default());
        let _s = service
            .register(Registration::new(NET, Inbox::default()).address("S").frequency(1))
            .unwrap();
        let _near = service
            .register(Registration::shared(NET, near.clone()).address("NEAR").frequency(1))
            .unwrap();
        let _far = service
            .register(Registration::shared(NET, far.clone()).address("FAR").frequency(1))
            .unwrap();
        service.add_filter(|packet: &Packet, recipient: &DeviceInfo| {
            packet.sender() == "S" && recipient.address != "FAR"
        });

        service.send(Packet::broadcast(NET, 1, "S", numbered(0))).unwrap();
        let report = service.drain();
        assert_eq!(report.vetoed, 1);
        assert_eq!(near.packets().len(), 1);
        assert!(far.packets().is_empty());
    }

    #[test]
    fn replies_wait_for_the_next_tick() {
        let service = service();
        let inbox = Arc::new(Inbox::default());
        let _echo = service
            .register(
                Registration::new(NET, |packet: &Packet, context: &Context| -> Result<(), ReceiveError> {
                    context.reply(packet, packet.payload().clone())?;
                    Ok(())
                })
                .address("ECHO")
                .frequency(3),
            )
            .unwrap();
        let client = service
            .register(Registration::shared(NET, inbox.clone()).address("CLIENT").frequency(3))
            .unwrap();

        client.send("ECHO", numbered(9)).unwrap();
        let first = service.drain();
        assert_eq!(first.packets, 1);
        assert_eq!(first.remaining, 1);
        assert!(inbox.packets().is_empty());

        service.drain();
        let packets = inbox.packets();
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].sender(), "ECHO");
        assert_eq!(packets[0].target().unwrap(), "CLIENT");
        assert_eq!(packets[0].frequency(), 3);
    }

    #[test]
    fn removal_during_drain_affects_only_later_packets() {
        let service = service();
        let inbox = Arc::new(Inbox::default());
        let _s = service
            .register(Registration::new(NET, Inbox::default()).address("S").frequency(1))
            .unwrap();
        let _remover = service
            .register(
                Registration::new(NET, |_: &Packet, context: &Context| -> Result<(), ReceiveError> {
                    let _ = context.service().remove(NET, "VICTIM");
                    Ok(())
                })
                .address("A")
                .frequency(1),
            )
            .unwrap();
        let _victim = service
            .register(Registration::shared(NET, inbox.clone()).address("VICTIM").frequency(1))
            .unwrap();

        service.send(Packet::broadcast(NET, 1, "S", numbered(1))).unwrap();
        service.send(Packet::broadcast(NET, 1, "S", numbered(2))).unwrap();
        service.drain();
        assert_eq!(inbox.numbers(), vec![1]);
        assert!(!service.is_address_present(NET, "VICTIM"));
    }

    #[test]
    fn remove_network_discards_queue() {
        let service = service();
        let other = NetworkId::new(2);
        let inbox = Arc::new(Inbox::default());
        let _a = service
            .register(Registration::new(NET, Inbox::default()).address("A").frequency(1))
            .unwrap();
        let _b = service
            .register(Registration::shared(other, inbox.clone()).address("B").frequency(1))
            .unwrap();
        service.send(Packet::broadcast(NET, 1, "A", numbered(0))).unwrap();
        service.send(Packet::broadcast(other, 1, "X", numbered(1))).unwrap();

        assert_eq!(service.remove_network(NET), Some(1));
        assert_eq!(service.remove_network(NET), None);
        assert_eq!(service.pending(), 1);
        assert_eq!(
            service.send(Packet::broadcast(NET, 1, "A", Payload::new())),
            Err(SendError::UnknownNetwork(NET))
        );
        service.drain();
        assert_eq!(inbox.numbers(), vec![1]);
    }

    #[test]
    fn metadata_travels_with_the_packet() {
        let service = service();
        let inbox = Arc::new(Inbox::default());
        let sender = service
            .register(Registration::new(NET, Inbox::default()).frequency(2))
            .unwrap();
        let _r = service
            .register(Registration::shared(NET, inbox.clone()).frequency(2))
            .unwrap();
        sender
            .send_packet(None, None, Payload::command("hello"), Payload::new().with("hops", 1u32))
            .unwrap();
        service.drain();
        let packets = inbox.packets();
        assert_eq!(packets[0].metadata().get("hops").unwrap().ok_uint(), Ok(1));
        assert!(packets[0].is_broadcast());
    }

    #[test]
    #[ntest::timeout(3000)]
    fn removing_a_device_releases_handles_its_receiver_owns() {
        let service = service();
        let _bridge = service.register(bridge(&service)).unwrap();
        assert!(service.is_address_present(UPLINK, "UP"));

        let removed = service.remove(NET, "BRIDGE").unwrap();
        assert_eq!(removed.address, "BRIDGE");
        assert!(!service.is_address_present(UPLINK, "UP"));
    }

    #[test]
    #[ntest::timeout(3000)]
    fn closing_a_bridge_releases_its_uplink() {
        let service = service();
        let bridge = service.register(bridge(&service)).unwrap();
        bridge.close();
        assert!(!service.is_address_present(NET, "BRIDGE"));
        assert!(!service.is_address_present(UPLINK, "UP"));
    }

    #[test]
    #[ntest::timeout(3000)]
    fn removing_a_network_releases_handles_its_receivers_own() {
        let service = service();
        let _bridge = service.register(bridge(&service)).unwrap();
        assert_eq!(service.remove_network(NET), Some(0));
        assert!(!service.is_address_present(UPLINK, "UP"));
        assert_eq!(service.network_size(UPLINK), 0);
    }

    #[test]
    #[ntest::timeout(3000)]
    fn rejected_registration_releases_its_receiver() {
        let service = service();
        let _taken = service
            .register(Registration::new(NET, Inbox::default()).address("TAKEN"))
            .unwrap();
        let err = service
            .register(bridge(&service).address("TAKEN"))
            .unwrap_err();
        assert!(matches!(err, RegistryError::AddressTaken { .. }));
        assert!(!service.is_address_present(UPLINK, "UP"));
    }

    #[test]
    #[traced_test]
    fn panicking_filter_vetoes_without_losing_the_drain() {
        let service = service();
        let inbox = Arc::new(Inbox::default());
        let _s = service
            .register(Registration::new(NET, Inbox::default()).address("S").frequency(1))
            .unwrap();
        let _r = service
            .register(Registration::shared(NET, inbox.clone()).address("R").frequency(1))
            .unwrap();
        service.add_filter(|packet: &Packet, _: &DeviceInfo| {
            if packet.payload().get("n").and_then(|n| n.ok_uint()) == Ok(0) {
                panic!("filter exploded");
            }
            true
        });

        service.send(Packet::broadcast(NET, 1, "S", numbered(0))).unwrap();
        service.send(Packet::broadcast(NET, 1, "S", numbered(1))).unwrap();
        let report = service.drain();

        assert_eq!(report.packets, 2);
        assert_eq!(report.vetoed, 1);
        assert_eq!(report.deliveries, 1);
        assert_eq!(inbox.numbers(), vec![1]);
        assert!(logs_contain("filter exploded"));
    }
}
