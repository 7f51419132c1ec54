//! Content addressing, locators, and the durable content registry

pub mod addressor;
pub mod locator;
pub mod registry;

use std::fmt;

pub use addressor::{ContentAddressor, ContentManifest, DEFAULT_CHUNK_SIZE};
pub use locator::Locator;
pub use registry::{ContentDescriptor, ContentRegistry, RegistryError};

/// SHA-1 hash identifying a unique content unit.
///
/// 20-byte digest derived from the content bytes and chunk layout alone.
/// The display name never participates, so identical bytes uploaded under
/// different names resolve to the same id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentId([u8; 20]);

impl ContentId {
    /// Creates ContentId from a 20-byte SHA-1 digest.
    pub fn new(hash: [u8; 20]) -> Self {
        Self(hash)
    }

    /// Returns reference to the underlying 20-byte digest.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Parses a 40-character hex string into a ContentId.
    ///
    /// # Errors
    ///
    /// - `ContentError::InvalidId` - Wrong length or non-hex characters
    pub fn from_hex(s: &str) -> Result<Self, ContentError> {
        if s.len() != 40 {
            return Err(ContentError::InvalidId {
                reason: format!("expected 40 hex characters, got {}", s.len()),
            });
        }

        let bytes = hex::decode(s).map_err(|e| ContentError::InvalidId {
            reason: format!("invalid hex: {e}"),
        })?;

        let mut hash = [0u8; 20];
        hash.copy_from_slice(&bytes);
        Ok(Self(hash))
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl std::str::FromStr for ContentId {
    type Err = ContentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl serde::Serialize for ContentId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for ContentId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Errors that can occur while addressing content or handling locators.
#[derive(Debug, thiserror::Error)]
pub enum ContentError {
    #[error("Cannot address empty content")]
    EmptyContent,

    #[error("Content truncated: expected {expected} bytes, read {actual}")]
    TruncatedContent { expected: u64, actual: u64 },

    #[error("Invalid content id: {reason}")]
    InvalidId { reason: String },

    #[error("Invalid locator: {reason}")]
    InvalidLocator { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
