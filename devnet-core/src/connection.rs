use crate::{
    id::Frequency, service::SendError, Address, DeviceId, DeviceInfo, NetworkId, NetworkService,
    Payload, RegistryError,
};
use std::sync::atomic::{AtomicBool, Ordering};

/// The handle a device holds after registering.
///
/// A connection is either open or closed. Closing removes the device from its
/// network; after that every send fails with [`SendError::Closed`] and every
/// reconfiguration with [`RegistryError::UnknownDevice`]. Dropping an open
/// connection closes it.
pub struct Connection {
    service: NetworkService,
    device: DeviceId,
    network: NetworkId,
    open: AtomicBool,
}

impl Connection {
    pub(crate) fn new(service: NetworkService, info: &DeviceInfo) -> Self {
        Self {
            service,
            device: info.id,
            network: info.network,
            open: AtomicBool::new(true),
        }
    }

    pub fn id(&self) -> DeviceId {
        self.device
    }

    pub fn network(&self) -> NetworkId {
        self.network
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// The device's current configuration, or `None` once it has left the
    /// network.
    pub fn info(&self) -> Option<DeviceInfo> {
        if !self.is_open() {
            return None;
        }
        self.service.device_by_id(self.device)
    }

    /// The device's current address. Follows address updates made through
    /// any handle.
    pub fn address(&self) -> Option<Address> {
        self.info().map(|info| info.address)
    }

    /// The frequency sends go out on by default.
    pub fn frequency(&self) -> Option<Frequency> {
        self.info().and_then(|info| info.transmit_frequency)
    }

    pub fn receive_all(&self) -> bool {
        self.info().is_some_and(|info| info.receive_all)
    }

    /// Sends `payload` to `target` on the transmit frequency.
    pub fn send(&self, target: impl Into<Address>, payload: Payload) -> Result<(), SendError> {
        self.send_packet(None, Some(target.into()), payload, Payload::new())
    }

    pub fn send_on(
        &self,
        frequency: Frequency,
        target: impl Into<Address>,
        payload: Payload,
    ) -> Result<(), SendError> {
        self.send_packet(Some(frequency), Some(target.into()), payload, Payload::new())
    }

    /// Sends `payload` to every listener on the transmit frequency.
    pub fn broadcast(&self, payload: Payload) -> Result<(), SendError> {
        self.send_packet(None, None, payload, Payload::new())
    }

    pub fn broadcast_on(&self, frequency: Frequency, payload: Payload) -> Result<(), SendError> {
        self.send_packet(Some(frequency), None, payload, Payload::new())
    }

    /// The general form of the send operations. A `None` target broadcasts,
    /// a `None` frequency uses the transmit frequency.
    pub fn send_packet(
        &self,
        frequency: Option<Frequency>,
        target: Option<Address>,
        payload: Payload,
        metadata: Payload,
    ) -> Result<(), SendError> {
        if !self.is_open() {
            return Err(SendError::Closed);
        }
        self.service
            .transmit(self.device, frequency, target, payload, metadata)
    }

    pub fn set_receive_all(&self, receive_all: bool) -> Result<(), RegistryError> {
        self.reconfigure(|registry, network, address| {
            registry.update_receive_all(network, address, receive_all)
        })
    }

    pub fn set_receive_frequency(&self, frequency: Option<Frequency>) -> Result<(), RegistryError> {
        self.reconfigure(|registry, network, address| {
            registry.update_receive_frequency(network, address, frequency)
        })
    }

    pub fn set_transmit_frequency(&self, frequency: Option<Frequency>) -> Result<(), RegistryError> {
        self.reconfigure(|registry, network, address| {
            registry.set_transmit_frequency(network, address, frequency)
        })
    }

    /// Moves the device to a custom address.
    pub fn set_address(&self, address: impl Into<Address>) -> Result<(), RegistryError> {
        let address = address.into();
        self.reconfigure(|registry, network, old| registry.update_address(network, old, address))
    }

    /// Moves the device to a new generated address.
    pub fn randomize_address(&self, prefix: Option<&str>) -> Result<Address, RegistryError> {
        self.reconfigure(|registry, network, old| registry.randomize_address(network, old, prefix))
    }

    /// Leaves the network. Closing an already closed connection does nothing.
    pub fn close(&self) {
        if !self.open.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Err(e) = self.service.remove_device(self.device) {
            // the network may have been torn down underneath us
            tracing::debug!("Closing connection {}: {}", self.device, e);
        }
    }

    fn reconfigure<T>(
        &self,
        operation: impl FnOnce(
            &mut crate::registry::DeviceRegistry,
            NetworkId,
            &str,
        ) -> Result<T, RegistryError>,
    ) -> Result<T, RegistryError> {
        if !self.is_open() {
            return Err(RegistryError::UnknownDevice(self.device));
        }
        self.service.reconfigure(self.device, operation)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("device", &self.device)
            .field("network", &self.network)
            .field("open", &self.is_open())
            .finish()
    }
}
