// Thin re-export module: implementation is in `blockchain/core.rs`, split into
// header validation, the chain facade, the block saver and reorg resolution.

pub mod core;
pub use core::*;
