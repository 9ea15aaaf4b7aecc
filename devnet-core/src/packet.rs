use crate::{id::Frequency, Address, NetworkId, Payload};

/// One message travelling through a network.
///
/// A packet is created when a device sends or broadcasts and is never modified
/// after it has been queued. It is dropped after a single delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    network: NetworkId,
    frequency: Frequency,
    sender: Address,
    target: Option<Address>,
    payload: Payload,
    metadata: Payload,
}

impl Packet {
    /// Creates a packet addressed to a single device.
    pub fn unicast(
        network: NetworkId,
        frequency: Frequency,
        sender: impl Into<Address>,
        target: impl Into<Address>,
        payload: Payload,
    ) -> Self {
        Self {
            network,
            frequency,
            sender: sender.into(),
            target: Some(target.into()),
            payload,
            metadata: Payload::new(),
        }
    }

    /// Creates a packet for every listener on `frequency`.
    pub fn broadcast(
        network: NetworkId,
        frequency: Frequency,
        sender: impl Into<Address>,
        payload: Payload,
    ) -> Self {
        Self {
            network,
            frequency,
            sender: sender.into(),
            target: None,
            payload,
            metadata: Payload::new(),
        }
    }

    /// Attaches metadata to the packet.
    pub fn with_metadata(mut self, metadata: Payload) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn network(&self) -> NetworkId {
        self.network
    }

    pub fn frequency(&self) -> Frequency {
        self.frequency
    }

    /// The address the packet was sent from.
    pub fn sender(&self) -> &Address {
        &self.sender
    }

    /// The address the packet was sent to, or `None` for a broadcast.
    pub fn target(&self) -> Option<&Address> {
        self.target.as_ref()
    }

    pub fn is_broadcast(&self) -> bool {
        self.target.is_none()
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn metadata(&self) -> &Payload {
        &self.metadata
    }
}
