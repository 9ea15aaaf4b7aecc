//! Authoritative per-network device state.
//!
//! Each [`DeviceNet`] keeps three indices that must always agree:
//!
//! - every device, keyed by address
//! - devices listening on a frequency
//! - receive-all devices on a frequency
//!
//! A device is in the listening bucket for `f` exactly when its receive
//! frequency is `Some(f)`, and additionally in the receive-all bucket for `f`
//! when its receive-all flag is set. Every operation here either updates all
//! three indices or, on error, none of them.

use crate::{
    address::AddressAllocator,
    id::{DeviceId, Frequency},
    logging::device_event,
    receiver::SharedReceiver,
    Address, NetworkId, Packet,
};
use rustc_hash::FxHashMap;
use std::collections::BTreeSet;
use thiserror::Error as ThisError;

#[derive(Debug, ThisError, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Address {address} is already taken on network {network}")]
    AddressTaken { network: NetworkId, address: Address },
    #[error("No device with address {address} on network {network}")]
    NotFound { network: NetworkId, address: Address },
    #[error("Device {0} is not registered")]
    UnknownDevice(DeviceId),
    #[error("Could not find a free address on network {0}")]
    AddressSpaceExhausted(NetworkId),
}

/// A snapshot of one device's configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub id: DeviceId,
    pub network: NetworkId,
    pub address: Address,
    /// The frequency the device listens on. `None` means the device is in no
    /// frequency bucket and only receives packets addressed to it.
    pub frequency: Option<Frequency>,
    /// The frequency the device sends on when none is given explicitly.
    pub transmit_frequency: Option<Frequency>,
    pub receive_all: bool,
    /// Whether the address was chosen by the caller rather than generated.
    pub custom_address: bool,
}

/// What a device asks for when joining a network.
#[derive(Clone)]
pub struct DeviceRequest {
    pub address: Option<Address>,
    pub prefix: String,
    pub frequency: Option<Frequency>,
    pub transmit_frequency: Option<Frequency>,
    pub receive_all: bool,
    pub receiver: SharedReceiver,
}

struct DeviceRecord {
    id: DeviceId,
    address: Address,
    frequency: Option<Frequency>,
    transmit_frequency: Option<Frequency>,
    receive_all: bool,
    custom_address: bool,
    prefix: String,
    receiver: SharedReceiver,
}

impl DeviceRecord {
    fn info(&self, network: NetworkId) -> DeviceInfo {
        DeviceInfo {
            id: self.id,
            network,
            address: self.address.clone(),
            frequency: self.frequency,
            transmit_frequency: self.transmit_frequency,
            receive_all: self.receive_all,
            custom_address: self.custom_address,
        }
    }

    fn receives_all_on(&self, frequency: Frequency) -> bool {
        self.receive_all && self.frequency == Some(frequency)
    }
}

/// A device selected to receive a packet, captured before any receiver runs.
#[derive(Clone)]
pub struct Recipient {
    pub info: DeviceInfo,
    pub receiver: SharedReceiver,
}

/// A device taken out of the registry.
///
/// Holds the device's receiver, which may own handles into the same service.
/// Callers holding a lock around the registry must release it before
/// dropping this.
pub struct RemovedDevice {
    pub info: DeviceInfo,
    pub receiver: SharedReceiver,
}

impl std::fmt::Debug for RemovedDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemovedDevice").field("info", &self.info).finish()
    }
}

type Bucket = BTreeSet<Address>;

/// The devices of a single network.
pub struct DeviceNet {
    id: NetworkId,
    devices: FxHashMap<Address, DeviceRecord>,
    listening: FxHashMap<Frequency, Bucket>,
    receive_all: FxHashMap<Frequency, Bucket>,
}

impl DeviceNet {
    fn new(id: NetworkId) -> Self {
        Self {
            id,
            devices: FxHashMap::default(),
            listening: FxHashMap::default(),
            receive_all: FxHashMap::default(),
        }
    }

    pub fn id(&self) -> NetworkId {
        self.id
    }

    pub fn contains(&self, address: &str) -> bool {
        self.devices.contains_key(address)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn device(&self, address: &str) -> Option<DeviceInfo> {
        self.devices.get(address).map(|record| record.info(self.id))
    }

    pub fn devices(&self) -> impl Iterator<Item = DeviceInfo> + '_ {
        self.devices.values().map(|record| record.info(self.id))
    }

    /// Addresses listening on `frequency`, in address order.
    pub fn listeners(&self, frequency: Frequency) -> Vec<Address> {
        self.listening
            .get(&frequency)
            .map(|bucket| bucket.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Addresses receiving everything on `frequency`, in address order.
    pub fn receive_all_listeners(&self, frequency: Frequency) -> Vec<Address> {
        self.receive_all
            .get(&frequency)
            .map(|bucket| bucket.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// The number of non-empty frequency buckets across both indices.
    pub fn bucket_count(&self) -> usize {
        self.listening.len() + self.receive_all.len()
    }

    fn not_found(&self, address: &str) -> RegistryError {
        RegistryError::NotFound {
            network: self.id,
            address: address.into(),
        }
    }

    fn index(&mut self, address: &Address, frequency: Option<Frequency>, receive_all: bool) {
        let Some(frequency) = frequency else {
            return;
        };
        self.listening
            .entry(frequency)
            .or_default()
            .insert(address.clone());
        if receive_all {
            self.receive_all
                .entry(frequency)
                .or_default()
                .insert(address.clone());
        }
    }

    fn unindex(&mut self, address: &Address, frequency: Option<Frequency>) {
        let Some(frequency) = frequency else {
            return;
        };
        remove_from_bucket(&mut self.listening, frequency, address);
        remove_from_bucket(&mut self.receive_all, frequency, address);
    }

    fn insert(&mut self, record: DeviceRecord) {
        self.index(&record.address, record.frequency, record.receive_all);
        self.devices.insert(record.address.clone(), record);
    }

    fn remove(&mut self, address: &str) -> Option<DeviceRecord> {
        let record = self.devices.remove(address)?;
        self.unindex(&record.address, record.frequency);
        Some(record)
    }

    /// Moves a device to a free address. Callers check that `new` is free.
    fn relocate(&mut self, old: &str, new: Address, custom: bool) -> Option<DeviceId> {
        let mut record = self.remove(old)?;
        record.address = new;
        record.custom_address = custom;
        let id = record.id;
        self.insert(record);
        Some(id)
    }

    fn update_receive_frequency(
        &mut self,
        address: &str,
        frequency: Option<Frequency>,
    ) -> Result<(), RegistryError> {
        let record = self
            .devices
            .get_mut(address)
            .ok_or_else(|| RegistryError::NotFound {
                network: self.id,
                address: address.into(),
            })?;
        if record.frequency == frequency {
            return Ok(());
        }
        let old = std::mem::replace(&mut record.frequency, frequency);
        let receive_all = record.receive_all;
        let address = record.address.clone();
        self.unindex(&address, old);
        self.index(&address, frequency, receive_all);
        tracing::debug!(network = %self.id, %address, ?old, new = ?frequency, "Moved receive frequency");
        Ok(())
    }

    fn update_receive_all(&mut self, address: &str, receive_all: bool) -> Result<(), RegistryError> {
        let record = self
            .devices
            .get_mut(address)
            .ok_or_else(|| RegistryError::NotFound {
                network: self.id,
                address: address.into(),
            })?;
        if record.receive_all == receive_all {
            return Ok(());
        }
        record.receive_all = receive_all;
        let Some(frequency) = record.frequency else {
            return Ok(());
        };
        let address = record.address.clone();
        if receive_all {
            self.receive_all
                .entry(frequency)
                .or_default()
                .insert(address);
        } else {
            remove_from_bucket(&mut self.receive_all, frequency, &address);
        }
        Ok(())
    }

    fn resolve(&self, packet: &Packet) -> Vec<Recipient> {
        let frequency = packet.frequency();
        let sender = packet.sender();
        let recipient = |address: &Address| {
            self.devices.get(address).map(|record| Recipient {
                info: record.info(self.id),
                receiver: record.receiver.clone(),
            })
        };

        if packet.is_broadcast() {
            return self
                .listening
                .get(&frequency)
                .into_iter()
                .flatten()
                .filter(|address| *address != sender)
                .filter_map(recipient)
                .collect();
        }

        let mut recipients: Vec<Recipient> = self
            .receive_all
            .get(&frequency)
            .into_iter()
            .flatten()
            .filter(|address| *address != sender)
            .filter_map(recipient)
            .collect();

        if let Some(target) = packet.target().filter(|target| *target != sender) {
            if let Some(record) = self.devices.get(target) {
                let tuned = record.frequency.map_or(true, |f| f == frequency);
                // receive-all devices on this frequency were collected above
                if tuned && !record.receives_all_on(frequency) {
                    recipients.extend(recipient(target));
                }
            }
        }
        recipients
    }

    /// Panics if the secondary indices disagree with the device records.
    #[cfg(test)]
    pub(crate) fn assert_consistent(&self) {
        for (frequency, bucket) in &self.listening {
            assert!(!bucket.is_empty(), "empty listening bucket {frequency}");
            for address in bucket {
                let record = &self.devices[address];
                assert_eq!(record.frequency, Some(*frequency), "stale listener {address}");
            }
        }
        for (frequency, bucket) in &self.receive_all {
            assert!(!bucket.is_empty(), "empty receive-all bucket {frequency}");
            for address in bucket {
                assert!(self.devices[address].receives_all_on(*frequency));
            }
        }
        for (address, record) in &self.devices {
            assert_eq!(&record.address, address);
            if let Some(frequency) = record.frequency {
                assert!(self.listening[&frequency].contains(address));
                assert_eq!(
                    record.receive_all,
                    self.receive_all
                        .get(&frequency)
                        .is_some_and(|bucket| bucket.contains(address))
                );
            }
        }
    }
}

fn remove_from_bucket(index: &mut FxHashMap<Frequency, Bucket>, frequency: Frequency, address: &Address) {
    if let Some(bucket) = index.get_mut(&frequency) {
        bucket.remove(address);
        if bucket.is_empty() {
            index.remove(&frequency);
        }
    }
}

/// Every network in the world, plus the allocator for generated addresses.
pub struct DeviceRegistry {
    networks: FxHashMap<NetworkId, DeviceNet>,
    locations: FxHashMap<DeviceId, (NetworkId, Address)>,
    allocator: AddressAllocator,
    next_id: u64,
}

impl DeviceRegistry {
    pub fn new(allocator: AddressAllocator) -> Self {
        Self {
            networks: FxHashMap::default(),
            locations: FxHashMap::default(),
            allocator,
            next_id: 0,
        }
    }

    pub fn network(&self, network: NetworkId) -> Option<&DeviceNet> {
        self.networks.get(&network)
    }

    /// Whether a device has ever registered on `network` (and the network
    /// has not been torn down since).
    pub fn contains_network(&self, network: NetworkId) -> bool {
        self.networks.contains_key(&network)
    }

    pub fn contains(&self, network: NetworkId, address: &str) -> bool {
        self.network(network)
            .is_some_and(|net| net.contains(address))
    }

    pub fn device(&self, network: NetworkId, address: &str) -> Option<DeviceInfo> {
        self.network(network)?.device(address)
    }

    pub fn device_by_id(&self, id: DeviceId) -> Option<DeviceInfo> {
        let (network, address) = self.locations.get(&id)?;
        self.device(*network, address.as_str())
    }

    /// Adds a device, generating an address unless the request names one.
    ///
    /// The network is created if this is its first device.
    pub fn add(&mut self, network: NetworkId, request: DeviceRequest) -> Result<DeviceInfo, RegistryError> {
        let existing = self.networks.get(&network);
        let taken = |address: &str| existing.is_some_and(|net| net.contains(address));
        let (address, custom_address) = match request.address {
            Some(address) if taken(address.as_str()) => {
                return Err(RegistryError::AddressTaken { network, address });
            }
            Some(address) => (address, true),
            None => {
                let address = self
                    .allocator
                    .allocate(&request.prefix, taken)
                    .ok_or(RegistryError::AddressSpaceExhausted(network))?;
                (address, false)
            }
        };

        let id = DeviceId::new(self.next_id);
        self.next_id += 1;
        let record = DeviceRecord {
            id,
            address: address.clone(),
            frequency: request.frequency,
            transmit_frequency: request.transmit_frequency.or(request.frequency),
            receive_all: request.receive_all,
            custom_address,
            prefix: request.prefix,
            receiver: request.receiver,
        };
        let info = record.info(network);
        self.networks
            .entry(network)
            .or_insert_with(|| DeviceNet::new(network))
            .insert(record);
        self.locations.insert(id, (network, address.clone()));
        device_event("added", network, &address);
        Ok(info)
    }

    /// Removes a device from every index.
    pub fn remove(&mut self, network: NetworkId, address: &str) -> Result<RemovedDevice, RegistryError> {
        let net = self.net_mut(network, address)?;
        let record = net.remove(address).ok_or_else(|| net.not_found(address))?;
        self.locations.remove(&record.id);
        device_event("removed", network, &record.address);
        Ok(RemovedDevice {
            info: record.info(network),
            receiver: record.receiver,
        })
    }

    /// Removes the device registered as `id`, wherever it currently lives.
    pub fn remove_device(&mut self, id: DeviceId) -> Result<RemovedDevice, RegistryError> {
        let (network, address) = self
            .locations
            .get(&id)
            .cloned()
            .ok_or(RegistryError::UnknownDevice(id))?;
        self.remove(network, address.as_str())
    }

    /// Moves a device to a caller-chosen address, marking it custom.
    pub fn update_address(
        &mut self,
        network: NetworkId,
        old: &str,
        new: impl Into<Address>,
    ) -> Result<(), RegistryError> {
        let new = new.into();
        let net = self.net_mut(network, old)?;
        if !net.contains(old) {
            return Err(net.not_found(old));
        }
        if old == new.as_str() {
            if let Some(record) = net.devices.get_mut(old) {
                record.custom_address = true;
            }
            return Ok(());
        }
        if net.contains(new.as_str()) {
            return Err(RegistryError::AddressTaken {
                network,
                address: new,
            });
        }
        self.relocate(network, old, new, true)
    }

    /// Moves a device to a freshly generated address.
    ///
    /// Uses `prefix` when given, otherwise the prefix the device registered
    /// with.
    pub fn randomize_address(
        &mut self,
        network: NetworkId,
        old: &str,
        prefix: Option<&str>,
    ) -> Result<Address, RegistryError> {
        let net = self
            .networks
            .get(&network)
            .ok_or_else(|| RegistryError::NotFound {
                network,
                address: old.into(),
            })?;
        let record = net.devices.get(old).ok_or_else(|| net.not_found(old))?;
        let prefix = prefix.unwrap_or(&record.prefix);
        let new = self
            .allocator
            .allocate(prefix, |candidate| net.contains(candidate))
            .ok_or(RegistryError::AddressSpaceExhausted(network))?;
        self.relocate(network, old, new.clone(), false)?;
        Ok(new)
    }

    pub fn update_receive_frequency(
        &mut self,
        network: NetworkId,
        address: &str,
        frequency: Option<Frequency>,
    ) -> Result<(), RegistryError> {
        self.net_mut(network, address)?
            .update_receive_frequency(address, frequency)
    }

    pub fn update_receive_all(
        &mut self,
        network: NetworkId,
        address: &str,
        receive_all: bool,
    ) -> Result<(), RegistryError> {
        self.net_mut(network, address)?
            .update_receive_all(address, receive_all)
    }

    /// Changes the default sending frequency. No index depends on it.
    pub fn set_transmit_frequency(
        &mut self,
        network: NetworkId,
        address: &str,
        frequency: Option<Frequency>,
    ) -> Result<(), RegistryError> {
        let net = self.net_mut(network, address)?;
        match net.devices.get_mut(address) {
            Some(record) => {
                record.transmit_frequency = frequency;
                Ok(())
            }
            None => Err(net.not_found(address)),
        }
    }

    /// Takes a network and all of its devices out of the registry.
    ///
    /// The returned network still owns the device receivers; see
    /// [`RemovedDevice`] on when to drop it.
    pub fn remove_network(&mut self, network: NetworkId) -> Option<DeviceNet> {
        let net = self.networks.remove(&network)?;
        for record in net.devices.values() {
            self.locations.remove(&record.id);
        }
        tracing::info!(%network, devices = net.len(), "Removed network");
        Some(net)
    }

    /// Captures the devices that should receive `packet` right now.
    pub fn resolve(&self, packet: &Packet) -> Vec<Recipient> {
        self.network(packet.network())
            .map(|net| net.resolve(packet))
            .unwrap_or_default()
    }

    fn net_mut(&mut self, network: NetworkId, address: &str) -> Result<&mut DeviceNet, RegistryError> {
        self.networks
            .get_mut(&network)
            .ok_or_else(|| RegistryError::NotFound {
                network,
                address: address.into(),
            })
    }

    fn relocate(
        &mut self,
        network: NetworkId,
        old: &str,
        new: Address,
        custom: bool,
    ) -> Result<(), RegistryError> {
        let net = self.net_mut(network, old)?;
        let id = net
            .relocate(old, new.clone(), custom)
            .ok_or_else(|| net.not_found(old))?;
        device_event("moved", network, &new);
        self.locations.insert(id, (network, new));
        Ok(())
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new(AddressAllocator::new())
    }
}
