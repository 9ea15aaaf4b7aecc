use crate::address::AddressAllocator;

/// The number of packets drained per tick unless configured otherwise.
pub const DEFAULT_MAX_PACKETS_PER_TICK: usize = 30;

/// Tunables for a [`NetworkService`](crate::NetworkService).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkConfig {
    /// The drain budget: how many queued packets one tick may deliver.
    pub max_packets_per_tick: usize,
    /// Seeds address generation. Unseeded services draw from the OS.
    pub rng_seed: Option<u64>,
    /// Gives up generating an address after this many collisions.
    pub allocator_attempts: Option<usize>,
    /// Mask applied to generated address suffixes.
    pub suffix_mask: u32,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            max_packets_per_tick: DEFAULT_MAX_PACKETS_PER_TICK,
            rng_seed: None,
            allocator_attempts: None,
            suffix_mask: u32::MAX,
        }
    }
}

impl NetworkConfig {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn max_packets_per_tick(mut self, budget: usize) -> Self {
        self.max_packets_per_tick = budget;
        self
    }

    pub fn rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    pub fn allocator_attempts(mut self, attempts: usize) -> Self {
        self.allocator_attempts = Some(attempts);
        self
    }

    pub fn suffix_mask(mut self, mask: u32) -> Self {
        self.suffix_mask = mask;
        self
    }

    pub(crate) fn allocator(&self) -> AddressAllocator {
        let allocator = match self.rng_seed {
            Some(seed) => AddressAllocator::seeded(seed),
            None => AddressAllocator::new(),
        };
        allocator
            .suffix_mask(self.suffix_mask)
            .max_attempts(self.allocator_attempts)
    }
}
