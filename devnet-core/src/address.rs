//! Device addresses and the allocator that generates them.

use rand::{rngs::SmallRng, Rng, SeedableRng};
use std::{borrow::Borrow, fmt::Display};

/// A string naming one device, unique among the devices currently registered
/// on the same network.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(String);

impl Address {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for Address {
    fn from(address: &str) -> Self {
        Self(address.to_string())
    }
}

impl From<String> for Address {
    fn from(address: String) -> Self {
        Self(address)
    }
}

impl Borrow<str> for Address {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for Address {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for Address {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for Address {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Generates random addresses of the form `prefix + hex suffix`.
///
/// The allocator only synthesizes candidates. Whether a candidate is free is
/// decided by the caller, which owns the set of taken addresses.
#[derive(Debug, Clone)]
pub struct AddressAllocator {
    rng: SmallRng,
    suffix_mask: u32,
    max_attempts: Option<usize>,
}

impl AddressAllocator {
    /// Creates an allocator seeded from the operating system.
    pub fn new() -> Self {
        Self::from_rng(SmallRng::from_entropy())
    }

    /// Creates an allocator that produces the same sequence for the same seed.
    pub fn seeded(seed: u64) -> Self {
        Self::from_rng(SmallRng::seed_from_u64(seed))
    }

    fn from_rng(rng: SmallRng) -> Self {
        Self {
            rng,
            suffix_mask: u32::MAX,
            max_attempts: None,
        }
    }

    /// Restricts generated suffixes to the bits in `mask`.
    ///
    /// Shrinking the suffix space makes collisions likely, which is only
    /// useful for exercising the retry loop.
    pub fn suffix_mask(mut self, mask: u32) -> Self {
        self.suffix_mask = mask;
        self
    }

    /// Gives up after `attempts` candidates have collided. Without a bound the
    /// allocator retries until it finds a free address.
    pub fn max_attempts(mut self, attempts: Option<usize>) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Generates an address for which `taken` returns false.
    ///
    /// Returns `None` only when a maximum number of attempts is configured and
    /// every attempt collided.
    pub fn allocate(&mut self, prefix: &str, taken: impl Fn(&str) -> bool) -> Option<Address> {
        let mut attempts = 0usize;
        loop {
            if self.max_attempts.is_some_and(|max| attempts >= max) {
                tracing::warn!(prefix, attempts, "Address allocation gave up");
                return None;
            }
            attempts += 1;
            let suffix: u32 = self.rng.gen::<u32>() & self.suffix_mask;
            let candidate = format!("{prefix}{suffix:08X}");
            if !taken(&candidate) {
                return Some(Address(candidate));
            }
            tracing::trace!(%candidate, "Generated address collided, retrying");
        }
    }
}

impl Default for AddressAllocator {
    fn default() -> Self {
        Self::new()
    }
}
