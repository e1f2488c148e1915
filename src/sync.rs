//! Header synchronization driver
//!
//! Peers deliver header batches in whatever order the network hands them
//! over. A batch whose parent is not stored yet is held back in a bounded
//! orphan pool and retried once some later batch links its parent.

use crate::blockchain::{Block, Blockchain};
use crate::crypto::{hash_to_reversed_hex, Sha256Hash};
use crate::error::{ChainError, Result};
use crate::merkle::MerkleBlockMessage;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Sync statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    pub headers_linked: u64,
    pub batches_buffered: u64,
    pub batches_rejected: u64,
    pub proofs_applied: u64,
    pub proofs_rejected: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The batch, and any buffered batches it unblocked, are stored.
    Linked { blocks: Vec<Block>, tip_height: u32 },
    /// The batch waits for `missing_parent`.
    Buffered { missing_parent: Sha256Hash },
}

#[derive(Debug)]
struct OrphanBatch {
    missing_parent: Sha256Hash,
    headers: Vec<Vec<u8>>,
    received_at: Instant,
}

pub struct HeaderSynchronizer {
    chain: Arc<Blockchain>,
    orphans: Arc<RwLock<VecDeque<OrphanBatch>>>,
    stats: Arc<RwLock<SyncStats>>,
    max_orphan_batches: usize,
}

impl HeaderSynchronizer {
    pub fn new(chain: Arc<Blockchain>, max_orphan_batches: usize) -> Self {
        Self {
            chain,
            orphans: Arc::new(RwLock::new(VecDeque::new())),
            stats: Arc::new(RwLock::new(SyncStats::default())),
            max_orphan_batches: max_orphan_batches.max(1),
        }
    }

    pub fn chain(&self) -> &Arc<Blockchain> {
        &self.chain
    }

    /// Link a batch of raw headers, or buffer it if its parent is unknown.
    /// Invalid batches are counted and their error returned.
    pub async fn receive_headers(&self, headers: Vec<Vec<u8>>) -> Result<SyncOutcome> {
        let mut linked = match self.chain.link_headers(&headers) {
            Ok(blocks) => blocks,
            Err(ChainError::OrphanBlock(missing_parent)) => {
                self.buffer(missing_parent, headers).await;
                return Ok(SyncOutcome::Buffered { missing_parent });
            }
            Err(e) => {
                warn!("Rejected header batch of {}: {}", headers.len(), e);
                self.stats.write().await.batches_rejected += 1;
                return Err(e);
            }
        };
        self.stats.write().await.headers_linked += linked.len() as u64;

        if !linked.is_empty() {
            self.drain_orphans(&mut linked).await?;
        }

        Ok(SyncOutcome::Linked {
            blocks: linked,
            tip_height: self.chain.tip()?.height,
        })
    }

    /// Apply a merkle-block message to the stored block it describes.
    pub async fn receive_merkle_block(&self, message: &MerkleBlockMessage) -> Result<Block> {
        let hash = message.header.hash();
        let block = self
            .chain
            .block_by_hash(&hash)?
            .ok_or_else(|| ChainError::BlockNotFound(hash_to_reversed_hex(&hash)))?;

        match self.chain.update_block(&block, message) {
            Ok(updated) => {
                self.stats.write().await.proofs_applied += 1;
                Ok(updated)
            }
            Err(e) => {
                warn!("Rejected merkle block for {}: {}", block.hash_hex(), e);
                self.stats.write().await.proofs_rejected += 1;
                Err(e)
            }
        }
    }

    pub async fn pending_orphans(&self) -> usize {
        self.orphans.read().await.len()
    }

    pub async fn clear_orphans(&self) {
        self.orphans.write().await.clear();
    }

    pub async fn stats(&self) -> SyncStats {
        self.stats.read().await.clone()
    }

    /// Queue a batch until its parent arrives. A batch starting with the same
    /// header as one already queued is dropped.
    async fn buffer(&self, missing_parent: Sha256Hash, headers: Vec<Vec<u8>>) {
        let mut orphans = self.orphans.write().await;
        if orphans.iter().any(|queued| queued.headers.first() == headers.first()) {
            debug!(
                "Batch waiting for {} is already buffered",
                hash_to_reversed_hex(&missing_parent)
            );
            return;
        }
        if orphans.len() >= self.max_orphan_batches {
            if let Some(evicted) = orphans.pop_front() {
                warn!(
                    "Orphan pool full, dropping batch waiting {:?} for {}",
                    evicted.received_at.elapsed(),
                    hash_to_reversed_hex(&evicted.missing_parent)
                );
            }
        }
        debug!(
            "Buffered {} headers waiting for {}",
            headers.len(),
            hash_to_reversed_hex(&missing_parent)
        );
        orphans.push_back(OrphanBatch { missing_parent, headers, received_at: Instant::now() });
        drop(orphans);

        self.stats.write().await.batches_buffered += 1;
    }

    /// Link buffered batches whose parent is now stored, until none is left
    /// that can make progress.
    async fn drain_orphans(&self, linked: &mut Vec<Block>) -> Result<()> {
        loop {
            let ready = {
                let mut orphans = self.orphans.write().await;
                let mut found = None;
                for i in 0..orphans.len() {
                    if self.chain.block_by_hash(&orphans[i].missing_parent)?.is_some() {
                        found = orphans.remove(i);
                        break;
                    }
                }
                found
            };
            let Some(batch) = ready else {
                return Ok(());
            };

            match self.chain.link_headers(&batch.headers) {
                Ok(blocks) => {
                    info!(
                        "Linked {} buffered headers after {}",
                        blocks.len(),
                        hash_to_reversed_hex(&batch.missing_parent)
                    );
                    self.stats.write().await.headers_linked += blocks.len() as u64;
                    linked.extend(blocks);
                }
                Err(ChainError::OrphanBlock(parent)) => self.buffer(parent, batch.headers).await,
                Err(e) => {
                    warn!("Dropped buffered batch: {}", e);
                    self.stats.write().await.batches_rejected += 1;
                }
            }
        }
    }
}
