//! The key-value content carried by a [`Packet`](crate::Packet).
//!
//! This module primarily implements the [`Payload`] key-value store. The same
//! type is used for a packet's metadata.

use rustc_hash::FxHashMap;

mod value;
pub use value::{Value, ValueError, ValueKind};

/// The longest key or text value, in characters, a payload accepts.
pub const MAX_ENTRY_LEN: usize = 100;

/// The conventional key naming what a message asks of its recipient.
pub const COMMAND: &str = "command";
/// The conventional key for free-form message text.
pub const MESSAGE: &str = "message";

/// A key-value store holding the content of one message.
///
/// Entries whose key or text value is longer than the payload's limit are
/// silently dropped when inserted. The payload as a whole is always accepted,
/// so a sender may end up transmitting fewer entries than it wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    entries: FxHashMap<String, Value>,
    limit: usize,
}

impl Default for Payload {
    fn default() -> Self {
        Self::with_limit(MAX_ENTRY_LEN)
    }
}

impl Payload {
    /// Creates an empty payload using [`MAX_ENTRY_LEN`].
    pub fn new() -> Self {
        Default::default()
    }

    /// Creates an empty payload that drops entries longer than `limit`.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            entries: FxHashMap::default(),
            limit,
        }
    }

    /// Creates a payload holding a single `command` entry.
    pub fn command(command: &str) -> Self {
        Self::new().with(COMMAND, command)
    }

    /// A builder function that adds the given key-value pair to the payload.
    ///
    /// See [`insert`](Self::insert) for more details.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Adds the given key-value pair to the payload, replacing any previous
    /// value for the key.
    ///
    /// Returns false if the entry was dropped for exceeding the length limit.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> bool {
        let key = key.into();
        let value = value.into();
        if key.chars().count() > self.limit || value.measured_len() > self.limit {
            tracing::debug!(
                key = %truncated(&key),
                limit = self.limit,
                "Dropping oversized payload entry"
            );
            return false;
        }
        self.entries.insert(key, value);
        true
    }

    /// Gets the value for the given key.
    pub fn get(&self, key: &str) -> Result<&Value, ValueError> {
        self.entries.get(key).ok_or(ValueError::Missing)
    }

    /// Gets the text stored under `key`, if there is text there.
    pub fn text(&self, key: &str) -> Option<&str> {
        self.entries.get(key).and_then(Value::to_text)
    }

    /// The value of the conventional `command` entry.
    pub fn command_name(&self) -> Option<&str> {
        self.text(COMMAND)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The length limit applied to keys and text values.
    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(key, value)| (key.as_str(), value))
    }
}

impl<K, V> FromIterator<(K, V)> for Payload
where
    K: Into<String>,
    V: Into<Value>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut payload = Self::new();
        for (key, value) in iter {
            payload.insert(key, value);
        }
        payload
    }
}

/// Keeps log lines short when an oversized key is reported.
fn truncated(key: &str) -> String {
    key.chars().take(16).collect()
}
