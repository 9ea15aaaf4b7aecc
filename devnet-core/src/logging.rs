//! Structured event helpers.
//!
//! Each function corresponds to a kind of event. Device and packet events use
//! fixed targets so a subscriber can route them apart from ordinary
//! diagnostics.

use crate::{Address, NetworkId, Packet};
use tracing::{event, Level};

/// Device lifecycle event: registration, removal and reconfiguration.
pub(crate) fn device_event(action: &'static str, network: NetworkId, address: &Address) {
    event!(
        target: "DEVICE",
        Level::INFO,
        action,
        network = network.into_inner(),
        address = %address,
    );
}

/// Packet event, logged once per drained packet.
pub(crate) fn packet_event(packet: &Packet, recipients: usize) {
    event!(
        target: "PACKET",
        Level::DEBUG,
        network = packet.network().into_inner(),
        frequency = packet.frequency(),
        sender = %packet.sender(),
        target_address = packet.target().map(Address::as_str).unwrap_or("*"),
        entries = packet.payload().len(),
        recipients,
    );
}

/// A receiver failed to handle a packet. The fault stays with the recipient.
pub(crate) fn receive_fault_event(packet: &Packet, recipient: &Address, error: &dyn std::fmt::Display) {
    tracing::error!(
        network = packet.network().into_inner(),
        sender = %packet.sender(),
        recipient = %recipient,
        "Receiver failed: {}",
        error
    );
}
