//! Atomic writes against the block repository.

use crate::crypto::{hash_to_reversed_hex, Sha256Hash};
use crate::error::{ChainError, Result};
use crate::persistence::{ChainUpdate, Persistence};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

use super::chain::{Block, BlockHeader};
use super::reorg::{ReorgPlan, ReorgResolver};

/// Result of storing one header batch.
#[derive(Debug, Clone)]
pub struct SaveOutcome {
    /// One block per input header, in input order, reflecting committed state.
    pub blocks: Vec<Block>,
    pub reorg: Option<ReorgPlan>,
    /// Every stored block whose row changed.
    pub touched: Vec<Sha256Hash>,
}

/// Result of applying one proof.
#[derive(Debug, Clone)]
pub struct UpdateOutcome {
    pub block: Block,
    /// Other blocks that gave up transactions to `block`.
    pub touched: Vec<Sha256Hash>,
}

pub struct BlockSaver<'a> {
    store: &'a dyn Persistence,
    resolver: &'a ReorgResolver,
}

impl<'a> BlockSaver<'a> {
    pub fn new(store: &'a dyn Persistence, resolver: &'a ReorgResolver) -> Self {
        Self { store, resolver }
    }

    /// Build one block per header, each extending the one before, starting
    /// from `previous`, and commit them together with any reorg they trigger.
    pub fn create_blocks(&self, headers: &[BlockHeader], previous: &Block) -> Result<SaveOutcome> {
        let tip = self
            .store
            .tip()?
            .ok_or_else(|| ChainError::StorageFailure("Chain has no tip".to_string()))?;

        let mut blocks = Vec::with_capacity(headers.len());
        let mut fresh: Vec<Block> = Vec::new();
        let mut parent = previous.clone();

        for (i, header) in headers.iter().enumerate() {
            if header.previous_block_hash != parent.hash() {
                return Err(ChainError::InvalidHeader(format!(
                    "header {} of batch does not extend {}",
                    i,
                    parent.hash_hex()
                )));
            }

            let block = match self.store.block_by_hash(&header.hash())? {
                Some(existing) => existing,
                None => {
                    let block = Block::new(*header, Some(&parent))?;
                    debug!("New block {} at height {}", block.hash_hex(), block.height);
                    fresh.push(block.clone());
                    block
                }
            };
            parent = block.clone();
            blocks.push(block);
        }

        if fresh.is_empty() {
            debug!("All {} headers already stored", headers.len());
            return Ok(SaveOutcome { blocks, reorg: None, touched: Vec::new() });
        }

        let candidate = parent;
        let plan = if self.resolver.should_switch(&tip, &candidate) {
            let pending: HashMap<Sha256Hash, &Block> = fresh.iter().map(|b| (b.hash(), b)).collect();
            Some(self.resolver.plan(&tip, &candidate, |hash| match pending.get(hash) {
                Some(block) => Ok(Some((*block).clone())),
                None => self.store.block_by_hash(hash),
            })?)
        } else {
            None
        };

        let connected: HashSet<Sha256Hash> = plan
            .as_ref()
            .map(|p| p.connect.iter().copied().collect())
            .unwrap_or_default();
        let fresh_hashes: HashSet<Sha256Hash> = fresh.iter().map(|b| b.hash()).collect();

        for block in fresh.iter_mut() {
            block.main_chain = connected.contains(&block.hash());
        }
        let update = match &plan {
            Some(plan) => ChainUpdate {
                inserted: fresh,
                disconnected: plan.disconnect.clone(),
                connected: plan.connect.iter().filter(|h| !fresh_hashes.contains(*h)).copied().collect(),
            },
            None => ChainUpdate { inserted: fresh, ..Default::default() },
        };

        self.store.commit(&update).map_err(|e| {
            warn!("Header batch rolled back: {}", e);
            e
        })?;

        for block in blocks.iter_mut() {
            if connected.contains(&block.hash()) {
                block.main_chain = true;
            }
        }

        let mut touched: Vec<Sha256Hash> = update.inserted.iter().map(|b| b.hash()).collect();
        touched.extend(update.disconnected.iter().copied());
        touched.extend(update.connected.iter().copied());

        match &plan {
            Some(plan) if plan.is_reorg() => info!(
                "Reorganized at {}: detached {} blocks, attached {}, new tip {} at height {}",
                hash_to_reversed_hex(&plan.fork_point),
                plan.disconnect.len(),
                plan.connect.len(),
                candidate.hash_hex(),
                candidate.height
            ),
            Some(_) => info!(
                "Linked {} headers, tip {} at height {}",
                update.inserted.len(),
                candidate.hash_hex(),
                candidate.height
            ),
            None => info!(
                "Stored {} headers on a side branch ending at {} (height {})",
                update.inserted.len(),
                candidate.hash_hex(),
                candidate.height
            ),
        }

        Ok(SaveOutcome { blocks, reorg: plan, touched })
    }

    /// Attach already-proven transaction hashes to `block`, in proof order,
    /// and mark it synced. Re-applying the set a synced block already holds
    /// changes nothing. A side-chain block never takes transactions from the
    /// main chain; it stays unsynced instead.
    pub fn update_block(&self, block: &Block, proven: &[Sha256Hash]) -> Result<UpdateOutcome> {
        let stored = self
            .store
            .block_by_hash(&block.hash())?
            .ok_or_else(|| ChainError::BlockNotFound(block.hash_hex()))?;

        let mut seen = HashSet::with_capacity(proven.len());
        let ordered: Vec<Sha256Hash> = proven.iter().copied().filter(|h| seen.insert(*h)).collect();

        if stored.synced && stored.transaction_hashes() == ordered {
            debug!("Block {} already holds this proof", stored.hash_hex());
            return Ok(UpdateOutcome { block: stored, touched: Vec::new() });
        }

        let touched = self.store.attach_transactions(&stored.hash(), &ordered)?;
        for owner in &touched {
            warn!(
                "Block {} gave up transactions to {}",
                hash_to_reversed_hex(owner),
                stored.hash_hex()
            );
        }

        let updated = self
            .store
            .block_by_hash(&stored.hash())?
            .ok_or_else(|| ChainError::BlockNotFound(stored.hash_hex()))?;
        if updated.synced {
            info!(
                "Block {} synced with {} transactions",
                updated.hash_hex(),
                updated.transactions.len()
            );
        } else {
            warn!(
                "Block {} left unsynced: some transactions belong to the main chain",
                updated.hash_hex()
            );
        }

        Ok(UpdateOutcome { block: updated, touched })
    }
}
