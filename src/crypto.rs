//! Hashing primitives shared by the header codec and the merkle verifier

use crate::error::{ChainError, Result};
use sha2::{Digest, Sha256};

/// 32-byte digest in internal (wire) byte order.
pub type Sha256Hash = [u8; 32];

/// SHA-256 applied twice, the digest used for header hashes and merkle nodes.
pub fn double_sha256(data: &[u8]) -> Sha256Hash {
    let first = Sha256::digest(data);
    Sha256::digest(first).into()
}

/// Hash of the concatenation of two merkle nodes.
pub fn hash_pair(left: &Sha256Hash, right: &Sha256Hash) -> Sha256Hash {
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(left);
    buf[32..].copy_from_slice(right);
    double_sha256(&buf)
}

/// Byte-reversed hex, the form block explorers and RPCs display.
pub fn hash_to_reversed_hex(hash: &Sha256Hash) -> String {
    let mut reversed = *hash;
    reversed.reverse();
    hex::encode(reversed)
}

/// Parse a display-form (byte-reversed) hex string back into internal order.
pub fn hash_from_reversed_hex(hex_str: &str) -> Result<Sha256Hash> {
    let bytes = hex::decode(hex_str.trim())
        .map_err(|e| ChainError::InvalidHeader(format!("Invalid hash hex: {}", e)))?;
    let mut hash: Sha256Hash = bytes.try_into().map_err(|b: Vec<u8>| {
        ChainError::InvalidHeader(format!("Hash must be 32 bytes, got {}", b.len()))
    })?;
    hash.reverse();
    Ok(hash)
}
