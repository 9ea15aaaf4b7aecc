use std::fmt::Display;

/// A sub-channel within a network.
///
/// Wired devices conventionally transmit on frequency `0`.
pub type Frequency = u32;

/// Identifies a logical partition of addresses.
///
/// Networks are created implicitly the first time a device registers on them.
/// No packet ever crosses from one network to another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NetworkId(u32);

impl NetworkId {
    /// Devices that only talk to each other through explicit links.
    pub const PRIVATE: Self = Self(0);
    /// A cable bus.
    pub const WIRED: Self = Self(1);
    /// The global wireless medium.
    pub const WIRELESS: Self = Self(2);
    pub const APC: Self = Self(3);
    pub const ATMOS_DEVICES: Self = Self(4);
    /// Ids at or above this value are free for dynamically created networks.
    pub const RESERVED: Self = Self(100);

    /// Creates a network ID with the given number.
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Gets the underlying ID number.
    pub fn into_inner(self) -> u32 {
        self.0
    }
}

impl From<u32> for NetworkId {
    fn from(n: u32) -> Self {
        Self(n)
    }
}

impl From<NetworkId> for u32 {
    fn from(id: NetworkId) -> Self {
        id.0
    }
}

impl Display for NetworkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A stable identifier for one registration.
///
/// Unlike an [`Address`](crate::Address), a device ID never changes while the
/// device is registered, so it survives address updates and randomization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceId(u64);

impl DeviceId {
    pub(crate) const fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}
