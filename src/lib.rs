//! trinity-spv - A header-only chain store for SPV light wallets
//!
//! # Architecture
//!
//! The crate is organized into logical modules:
//!
//! ## Core Blockchain
//! - [`blockchain`] - Header codec, validation, block saver and reorgs
//! - [`merkle`] - Partial merkle tree (merkle-block) verification
//!
//! ## Cryptography
//! - [`crypto`] - Double SHA-256 and display-order hex helpers
//!
//! ## State Management
//! - [`persistence`] - Block repository (SQLite and in-memory)
//! - [`cache`] - LRU block cache
//!
//! ## Networking
//! - [`sync`] - Orphan buffering and header sync driver
//!
//! ## Configuration & Utilities
//! - [`config`] - Configuration management
//! - [`error`] - Error types

#![forbid(unsafe_code)]

// ============================================================================
// Core Blockchain
// ============================================================================
pub mod blockchain;
pub mod merkle;

// ============================================================================
// Cryptography
// ============================================================================
pub mod crypto;

// ============================================================================
// State Management
// ============================================================================
pub mod cache;
pub mod persistence;

// ============================================================================
// Networking
// ============================================================================
pub mod sync;

// ============================================================================
// Configuration & Utilities
// ============================================================================
pub mod config;
pub mod error;

#[cfg(test)]
pub(crate) mod test_utils;
