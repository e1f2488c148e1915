//! Error types for the SPV header chain

use crate::crypto::{hash_to_reversed_hex, Sha256Hash};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    #[error("Invalid header: {0}")]
    InvalidHeader(String),
    #[error("Orphan block: parent {} is not known", hash_to_reversed_hex(.0))]
    OrphanBlock(Sha256Hash),
    #[error("Invalid merkle proof: {0}")]
    InvalidMerkleProof(String),
    #[error("Storage failure: {0}")]
    StorageFailure(String),
    #[error("Block not found: {0}")]
    BlockNotFound(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("IO error: {0}")]
    IoError(String),
}

impl ChainError {
    /// Whether the caller may retry the same operation later and expect it to
    /// succeed (parent arrived, store became available).
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ChainError::OrphanBlock(_) | ChainError::StorageFailure(_))
    }
}

impl From<std::io::Error> for ChainError {
    fn from(err: std::io::Error) -> Self {
        ChainError::IoError(err.to_string())
    }
}

impl From<rusqlite::Error> for ChainError {
    fn from(err: rusqlite::Error) -> Self {
        ChainError::StorageFailure(err.to_string())
    }
}

impl From<toml::de::Error> for ChainError {
    fn from(err: toml::de::Error) -> Self {
        ChainError::ConfigError(err.to_string())
    }
}

/// Convenience alias used across the crate
pub type Result<T> = std::result::Result<T, ChainError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_orphan_display_uses_reversed_hex() {
        let mut parent = [0u8; 32];
        parent[0] = 0xab;
        let err = ChainError::OrphanBlock(parent);
        assert!(err.to_string().ends_with("ab is not known"));
        assert!(err.is_recoverable());
    }

    fn open_missing(path: &str) -> Result<String> {
        Ok(std::fs::read_to_string(path)?)
    }

    #[test]
    fn test_result_alias_converts_io_errors() {
        let err = open_missing("/nonexistent/headers.toml").unwrap_err();
        assert!(matches!(err, ChainError::IoError(_)));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_invalid_header_is_not_recoverable() {
        assert!(!ChainError::InvalidHeader("short".to_string()).is_recoverable());
        assert!(!ChainError::InvalidMerkleProof("root".to_string()).is_recoverable());
    }
}
