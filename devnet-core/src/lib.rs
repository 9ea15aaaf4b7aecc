//! A packet network for simulated devices.
//!
//! Devices join a numbered network, get an address and exchange [`Packet`]s
//! on radio-like frequencies. Sending only queues a packet; the host drains
//! the queue once per tick, delivering at most a fixed number of packets so a
//! burst of traffic spreads over several ticks instead of stalling one.
//!
//! # Organization
//! - [`Payload`] and [`Value`] carry the data of a packet
//! - [`DeviceRegistry`] keeps the devices of every network and the indices
//!   used to route packets
//! - [`DeliveryQueue`] holds packets between submission and delivery
//! - [`NetworkService`] ties them together and is what devices talk to
//! - [`Connection`] is the handle a registered device keeps
//!
//! # Delivery
//!
//! A broadcast reaches every device listening on the packet's frequency. A
//! unicast reaches its target, if the target listens on that frequency or on
//! none. Receive-all devices on the frequency hear both kinds. The sender
//! never receives its own packet, and no device receives a packet twice.
//!
//! Receivers run during [`NetworkService::drain`] and get a [`Context`] to
//! answer with. Anything they send is delivered on a later tick.

mod logging;

mod id;
pub use id::{DeviceId, Frequency, NetworkId};

pub mod address;
pub use address::{Address, AddressAllocator};

pub mod payload;
pub use payload::{Payload, Value};

pub mod packet;
pub use packet::Packet;

pub mod registry;
pub use registry::{DeviceInfo, DeviceRegistry, RegistryError};

pub mod queue;
pub use queue::DeliveryQueue;

pub mod receiver;
pub use receiver::{Context, PacketFilter, ReceiveError, Receiver};

pub mod service;
pub use service::{DrainReport, NetworkService, Registration, SendError};

mod connection;
pub use connection::Connection;

mod config;
pub use config::{NetworkConfig, DEFAULT_MAX_PACKETS_PER_TICK};
