//! Key Hasher
//!
//! Maps cache keys and virtual-node identifiers onto the 128-bit ring.
//! SHA-256 truncated to its first 16 bytes: no seed, so positions are stable
//! across processes and restarts.

use sha2::{Digest, Sha256};

/// A point on the ring
pub type RingPosition = u128;

/// Deterministic ring hasher
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyHasher;

impl KeyHasher {
    /// Ring position for an identifier
    #[inline]
    pub fn ring_position_for(identifier: &str) -> RingPosition {
        Self::position_of_bytes(identifier.as_bytes())
    }

    /// Ring position for raw bytes
    pub fn position_of_bytes(bytes: &[u8]) -> RingPosition {
        let digest = Sha256::digest(bytes);
        let mut head = [0u8; 16];
        head.copy_from_slice(&digest[..16]);
        u128::from_be_bytes(head)
    }

    /// Identifier hashed for virtual node `index` of `node_id`
    #[inline]
    pub fn virtual_node_id(node_id: &str, index: usize) -> String {
        format!("{}:{}", node_id, index)
    }

    /// Hex form of a position, used to build compact cache keys
    pub fn digest_hex(bytes: &[u8]) -> String {
        hex::encode(Self::position_of_bytes(bytes).to_be_bytes())
    }
}
