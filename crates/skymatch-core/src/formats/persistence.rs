//! # Cache Payload Format
//!
//! Binary serialization for memoized values.
//!
//! Format: Header (5 bytes) + postcard-serialized value.
//! - 4 bytes: Magic ("SKMC")
//! - 1 byte: Version
//!
//! Size and header are validated before the payload is parsed. Any
//! failure here is reported as a `Serialization` error; the memoizer treats
//! it as a cache miss.

use crate::MatchError;
use crate::primitives::{CACHE_FORMAT_VERSION, CACHE_MAGIC, MAX_CACHE_PAYLOAD_SIZE};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Header length in bytes.
const HEADER_SIZE: usize = 5;

// =============================================================================
// HEADER
// =============================================================================

/// The header preceding every cached payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheHeader {
    pub magic: [u8; 4],
    pub version: u8,
}

impl CacheHeader {
    /// Header for the current format version.
    #[must_use]
    pub fn new() -> Self {
        Self {
            magic: *CACHE_MAGIC,
            version: CACHE_FORMAT_VERSION,
        }
    }

    pub fn validate(&self) -> Result<(), MatchError> {
        if &self.magic != CACHE_MAGIC {
            return Err(MatchError::Serialization(
                "Invalid magic bytes".to_string(),
            ));
        }
        if self.version != CACHE_FORMAT_VERSION {
            return Err(MatchError::Serialization(format!(
                "Unsupported version: {} (expected {})",
                self.version, CACHE_FORMAT_VERSION
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[0..4].copy_from_slice(&self.magic);
        bytes[4] = self.version;
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MatchError> {
        if bytes.len() < HEADER_SIZE {
            return Err(MatchError::Serialization("Header too short".to_string()));
        }
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes[0..4]);
        Ok(Self {
            magic,
            version: bytes[4],
        })
    }
}

impl Default for CacheHeader {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// ENCODE / DECODE
// =============================================================================

/// Serialize a value to bytes (header + payload).
pub fn encode_payload<T: Serialize>(value: &T) -> Result<Vec<u8>, MatchError> {
    let payload =
        postcard::to_stdvec(value).map_err(|e| MatchError::Serialization(e.to_string()))?;

    let mut result = Vec::with_capacity(HEADER_SIZE + payload.len());
    result.extend_from_slice(&CacheHeader::new().to_bytes());
    result.extend_from_slice(&payload);
    Ok(result)
}

/// Deserialize a value written by [`encode_payload`].
pub fn decode_payload<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, MatchError> {
    if bytes.len() > MAX_CACHE_PAYLOAD_SIZE {
        return Err(MatchError::Serialization(format!(
            "Payload size {} bytes exceeds maximum allowed {} bytes",
            bytes.len(),
            MAX_CACHE_PAYLOAD_SIZE
        )));
    }

    let header = CacheHeader::from_bytes(bytes)?;
    header.validate()?;

    postcard::from_bytes(&bytes[HEADER_SIZE..]).map_err(|e| {
        MatchError::Serialization(format!("Failed to deserialize cached value: {}", e))
    })
}

// =============================================================================
// TESTS
// =============================================================================
