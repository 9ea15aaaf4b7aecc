//! The seams between the network and the devices using it.
//!
//! A [`Receiver`] is the message handler stored with every registered device.
//! A [`PacketFilter`] lets an outside system veto delivery to individual
//! recipients, for example a range check on a wireless medium.

use crate::{
    id::Frequency, payload::ValueError, service::SendError, Address, DeviceId, DeviceInfo,
    NetworkService, Packet, Payload,
};
use std::sync::Arc;
use thiserror::Error as ThisError;

/// Handles packets delivered to one device.
///
/// Receivers run while the network drains its queue. They may send packets,
/// remove devices or reconfigure the network; such changes only affect packets
/// drained afterwards.
pub trait Receiver: Send + Sync + 'static {
    fn receive(&self, packet: &Packet, context: &Context) -> Result<(), ReceiveError>;
}

impl<F> Receiver for F
where
    F: Fn(&Packet, &Context) -> Result<(), ReceiveError> + Send + Sync + 'static,
{
    fn receive(&self, packet: &Packet, context: &Context) -> Result<(), ReceiveError> {
        self(packet, context)
    }
}

pub type SharedReceiver = Arc<dyn Receiver>;

/// Decides, per recipient, whether a packet may reach it.
pub trait PacketFilter: Send + Sync + 'static {
    /// Returns false to cancel delivery of `packet` to `recipient` only.
    fn allow(&self, packet: &Packet, recipient: &DeviceInfo) -> bool;
}

impl<F> PacketFilter for F
where
    F: Fn(&Packet, &DeviceInfo) -> bool + Send + Sync + 'static,
{
    fn allow(&self, packet: &Packet, recipient: &DeviceInfo) -> bool {
        self(packet, recipient)
    }
}

pub type SharedFilter = Arc<dyn PacketFilter>;

#[derive(Debug, ThisError)]
pub enum ReceiveError {
    #[error("Unexpected payload: {0}")]
    Payload(#[from] ValueError),
    #[error("Failed to answer: {0}")]
    Send(#[from] SendError),
    #[error("Receiver panicked: {0}")]
    Panicked(String),
    #[error("{0}")]
    Other(String),
}

/// What a receiver knows about the delivery it is handling.
#[derive(Clone)]
pub struct Context {
    service: NetworkService,
    recipient: DeviceInfo,
}

impl Context {
    pub(crate) fn new(service: NetworkService, recipient: DeviceInfo) -> Self {
        Self { service, recipient }
    }

    /// The recipient as it was when the packet was resolved.
    pub fn recipient(&self) -> &DeviceInfo {
        &self.recipient
    }

    pub fn device_id(&self) -> DeviceId {
        self.recipient.id
    }

    /// The network the packet is being delivered on.
    pub fn service(&self) -> &NetworkService {
        &self.service
    }

    /// Sends `payload` back to the sender of `packet`, on the same frequency.
    pub fn reply(&self, packet: &Packet, payload: Payload) -> Result<(), SendError> {
        self.service.transmit(
            self.recipient.id,
            Some(packet.frequency()),
            Some(packet.sender().clone()),
            payload,
            Payload::new(),
        )
    }

    /// Sends from the recipient's own address on its transmit frequency.
    pub fn send(&self, target: impl Into<Address>, payload: Payload) -> Result<(), SendError> {
        self.service
            .transmit(self.recipient.id, None, Some(target.into()), payload, Payload::new())
    }

    /// Broadcasts from the recipient's own address on `frequency`, or on its
    /// transmit frequency when `None`.
    pub fn broadcast(&self, frequency: Option<Frequency>, payload: Payload) -> Result<(), SendError> {
        self.service
            .transmit(self.recipient.id, frequency, None, payload, Payload::new())
    }
}
