//! Common types shared by storage backends.

use bytes::Bytes;

/// A key-value pair returned by prefix scans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    /// The entry key.
    pub key: Bytes,
    /// The stored value.
    pub value: Bytes,
}

impl KeyValue {
    /// Creates a new key-value pair.
    #[must_use]
    pub fn new(key: Bytes, value: Bytes) -> Self {
        Self { key, value }
    }

    /// Returns the key as UTF-8 text, replacing invalid sequences.
    #[must_use]
    pub fn key_lossy(&self) -> String {
        String::from_utf8_lossy(&self.key).into_owned()
    }
}
