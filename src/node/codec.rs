//! Value Codec
//!
//! Frames values written to nodes: one tag byte naming the compression
//! algorithm, followed by the payload. Values at or above the configured
//! threshold are LZ4-compressed when that actually saves space.
//!
//! # Example
//!
//! ```
//! use ringcache::config::CompressionSettings;
//! use ringcache::node::codec::ValueCodec;
//!
//! let codec = ValueCodec::new(CompressionSettings::default());
//!
//! let framed = codec.encode(b"Hello, this is a value!").unwrap();
//! let value = codec.decode(&framed).unwrap();
//! assert_eq!(value.as_ref(), b"Hello, this is a value!");
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::config::CompressionSettings;
use crate::error::{Error, Result};

// =============================================================================
// Compression Algorithm
// =============================================================================

/// Algorithms a framed value may carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompressionAlgorithm {
    /// Stored raw
    None,
    /// LZ4 block with prepended size
    Lz4,
}

impl CompressionAlgorithm {
    /// Frame tag byte
    pub fn tag(&self) -> u8 {
        match self {
            CompressionAlgorithm::None => 0,
            CompressionAlgorithm::Lz4 => 1,
        }
    }

    /// Algorithm for a frame tag byte
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(CompressionAlgorithm::None),
            1 => Some(CompressionAlgorithm::Lz4),
            _ => None,
        }
    }

    /// Get human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            CompressionAlgorithm::None => "none",
            CompressionAlgorithm::Lz4 => "lz4",
        }
    }
}

impl std::fmt::Display for CompressionAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

// =============================================================================
// Value Codec
// =============================================================================

/// Encodes values for the wire and decodes them back
#[derive(Debug, Clone, Default)]
pub struct ValueCodec {
    settings: CompressionSettings,
}

impl ValueCodec {
    /// Create a codec with the given compression settings
    pub fn new(settings: CompressionSettings) -> Self {
        Self { settings }
    }

    /// Algorithm `encode` would pick for a value of this size
    pub fn algorithm_for(&self, len: usize) -> CompressionAlgorithm {
        if self.settings.enabled && len >= self.settings.min_size_bytes {
            CompressionAlgorithm::Lz4
        } else {
            CompressionAlgorithm::None
        }
    }

    /// Frame a value, compressing when it is large enough to benefit
    pub fn encode(&self, value: &[u8]) -> Result<Bytes> {
        if self.algorithm_for(value.len()) == CompressionAlgorithm::Lz4 {
            let compressed = lz4::block::compress(
                value,
                Some(lz4::block::CompressionMode::HIGHCOMPRESSION(
                    self.settings.level,
                )),
                true,
            )
            .map_err(|e| Error::Serialization(format!("LZ4 compression failed: {}", e)))?;

            // Only use compressed if it's actually smaller
            if compressed.len() < value.len() {
                return Ok(Self::frame(CompressionAlgorithm::Lz4, &compressed));
            }
        }

        Ok(Self::frame(CompressionAlgorithm::None, value))
    }

    /// Unframe a value read from a node
    pub fn decode(&self, framed: &[u8]) -> Result<Bytes> {
        let (&tag, payload) = framed
            .split_first()
            .ok_or_else(|| Error::Serialization("empty value frame".into()))?;

        match CompressionAlgorithm::from_tag(tag) {
            Some(CompressionAlgorithm::None) => Ok(Bytes::copy_from_slice(payload)),
            Some(CompressionAlgorithm::Lz4) => lz4::block::decompress(payload, None)
                .map(Bytes::from)
                .map_err(|e| Error::DecompressionFailed {
                    algorithm: "LZ4".into(),
                    reason: e.to_string(),
                }),
            None => Err(Error::Serialization(format!(
                "unknown value frame tag {:#04x}",
                tag
            ))),
        }
    }

    fn frame(algorithm: CompressionAlgorithm, payload: &[u8]) -> Bytes {
        let mut buf = BytesMut::with_capacity(payload.len() + 1);
        buf.put_u8(algorithm.tag());
        buf.put_slice(payload);
        buf.freeze()
    }
}
