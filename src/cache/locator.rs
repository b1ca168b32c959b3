//! Locator: the immutable key identifying a fetchable asset.
//!
//! A locator is the sole identity used for caching, deduplication and row
//! binding. It is cheap to clone (shared string) and compared by value.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

/// Opaque, immutable, comparable key for an asset (typically a URL).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Locator(Arc<str>);

impl Locator {
    /// Create a locator, trimming surrounding whitespace.
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(Arc::from(raw.as_ref().trim()))
    }

    /// The locator string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Stable, filesystem-safe key derived from the locator string.
    ///
    /// Hex-encoded SHA-256; identical across processes and platforms.
    pub fn storage_key(&self) -> String {
        format!("{:x}", Sha256::digest(self.0.as_bytes()))
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Locator({:?})", &*self.0)
    }
}

impl From<&str> for Locator {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<String> for Locator {
    fn from(raw: String) -> Self {
        Self::new(raw)
    }
}

impl AsRef<str> for Locator {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Serialize for Locator {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Locator {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::new(raw))
    }
}
