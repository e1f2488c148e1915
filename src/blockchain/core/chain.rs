use crate::cache::BlockCache;
use crate::crypto::{double_sha256, hash_to_reversed_hex, Sha256Hash};
use crate::error::{ChainError, Result};
use crate::merkle::MerkleBlockMessage;
use crate::persistence::{InMemoryPersistence, Persistence};
use parking_lot::RwLock;
use primitive_types::U256;
use tracing::{debug, info};

use super::reorg::ReorgResolver;
use super::saver::BlockSaver;
use super::validation::{block_work, validate_header, ChainParams};

/// Size of a serialized block header.
pub const HEADER_SIZE: usize = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub version: i32,
    pub previous_block_hash: Sha256Hash,
    pub merkle_root: Sha256Hash,
    pub timestamp: u32,
    pub bits: u32,
    pub nonce: u32,
}

impl BlockHeader {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != HEADER_SIZE {
            return Err(ChainError::InvalidHeader(format!(
                "Header must be {} bytes, got {}",
                HEADER_SIZE,
                bytes.len()
            )));
        }

        let word = |offset: usize| [bytes[offset], bytes[offset + 1], bytes[offset + 2], bytes[offset + 3]];
        let mut previous_block_hash = [0u8; 32];
        previous_block_hash.copy_from_slice(&bytes[4..36]);
        let mut merkle_root = [0u8; 32];
        merkle_root.copy_from_slice(&bytes[36..68]);

        Ok(BlockHeader {
            version: i32::from_le_bytes(word(0)),
            previous_block_hash,
            merkle_root,
            timestamp: u32::from_le_bytes(word(68)),
            bits: u32::from_le_bytes(word(72)),
            nonce: u32::from_le_bytes(word(76)),
        })
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0..4].copy_from_slice(&self.version.to_le_bytes());
        out[4..36].copy_from_slice(&self.previous_block_hash);
        out[36..68].copy_from_slice(&self.merkle_root);
        out[68..72].copy_from_slice(&self.timestamp.to_le_bytes());
        out[72..76].copy_from_slice(&self.bits.to_le_bytes());
        out[76..80].copy_from_slice(&self.nonce.to_le_bytes());
        out
    }

    pub fn hash(&self) -> Sha256Hash {
        double_sha256(&self.to_bytes())
    }

    pub fn hash_hex(&self) -> String {
        hash_to_reversed_hex(&self.hash())
    }
}

/// A transaction proven to belong to a block. Only its hash is known; the
/// position records where it sat among the proof's matched leaves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub hash: Sha256Hash,
    /// `None` once a reorg detached the owning block.
    pub block_hash: Option<Sha256Hash>,
    pub position: u32,
}

impl Transaction {
    pub fn new(hash: Sha256Hash, block_hash: Option<Sha256Hash>, position: u32) -> Self {
        Self { hash, block_hash, position }
    }

    pub fn reversed_hex(&self) -> String {
        hash_to_reversed_hex(&self.hash)
    }

    pub fn is_orphaned(&self) -> bool {
        self.block_hash.is_none()
    }
}

/// A header linked into the local chain. The parent is referenced only by
/// `header.previous_block_hash` and resolved through the repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    pub height: u32,
    /// Cumulative work from the checkpoint up to and including this block.
    pub chain_work: U256,
    pub transactions: Vec<Transaction>,
    pub synced: bool,
    pub main_chain: bool,
    hash: Sha256Hash,
}

impl Block {
    /// Build the block for `header`. With a parent the block sits one above it
    /// and accumulates its work; without one it is a genesis block at height 0.
    pub fn new(header: BlockHeader, parent: Option<&Block>) -> Result<Self> {
        let work = block_work(header.bits)?;
        let (height, chain_work) = match parent {
            Some(parent) => {
                let height = parent.height.checked_add(1).ok_or_else(|| {
                    ChainError::InvalidHeader(format!("Block {} has no height above {}", parent.hash_hex(), parent.height))
                })?;
                (height, parent.chain_work.saturating_add(work))
            }
            None => (0, work),
        };
        Ok(Self::restore(header, height, chain_work, false, false, Vec::new()))
    }

    /// The trusted block the local chain is anchored at.
    pub fn checkpoint(header: BlockHeader, height: u32) -> Result<Self> {
        let work = block_work(header.bits)?;
        Ok(Self::restore(header, height, work, false, true, Vec::new()))
    }

    /// Reassemble a block from stored columns.
    pub(crate) fn restore(
        header: BlockHeader,
        height: u32,
        chain_work: U256,
        synced: bool,
        main_chain: bool,
        transactions: Vec<Transaction>,
    ) -> Self {
        Block {
            hash: header.hash(),
            header,
            height,
            chain_work,
            transactions,
            synced,
            main_chain,
        }
    }

    pub fn hash(&self) -> Sha256Hash {
        self.hash
    }

    pub fn hash_hex(&self) -> String {
        hash_to_reversed_hex(&self.hash)
    }

    pub fn previous_hash(&self) -> Sha256Hash {
        self.header.previous_block_hash
    }

    pub fn transaction_hashes(&self) -> Vec<Sha256Hash> {
        self.transactions.iter().map(|tx| tx.hash).collect()
    }
}

/// One locally verified header chain.
///
/// Mutations (header batches, transaction attachment, reorg rewiring) hold the
/// write side of `lock`, so at most one is in flight. Lookups share the read
/// side and only ever see committed state.
pub struct Blockchain {
    persistence: Box<dyn Persistence>,
    params: ChainParams,
    resolver: ReorgResolver,
    cache: BlockCache,
    lock: RwLock<()>,
}

impl Blockchain {
    /// Create a `Blockchain` using an in-memory persistence backend.
    pub fn new(params: ChainParams) -> Result<Self> {
        Self::open(Box::new(InMemoryPersistence::new()), params)
    }

    /// Open a chain on `persistence`, seeding the checkpoint into an empty store.
    pub fn open(persistence: Box<dyn Persistence>, params: ChainParams) -> Result<Self> {
        if persistence.tip()?.is_none() {
            let checkpoint = Block::checkpoint(params.checkpoint, params.checkpoint_height)?;
            info!(
                "Seeding checkpoint {} at height {}",
                checkpoint.hash_hex(),
                checkpoint.height
            );
            persistence.commit(&crate::persistence::ChainUpdate {
                inserted: vec![checkpoint],
                ..Default::default()
            })?;
        }

        Ok(Blockchain {
            resolver: ReorgResolver::new(params.tie_break),
            cache: BlockCache::new(params.block_cache_capacity),
            persistence,
            params,
            lock: RwLock::new(()),
        })
    }

    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    pub fn tip(&self) -> Result<Block> {
        let _guard = self.lock.read();
        self.persistence
            .tip()?
            .ok_or_else(|| ChainError::StorageFailure("Chain has no tip".to_string()))
    }

    /// Main-chain block at `height`.
    pub fn block_at_height(&self, height: u32) -> Result<Option<Block>> {
        let _guard = self.lock.read();
        self.persistence.block_at_height(height)
    }

    /// Any stored block, main chain or side branch.
    pub fn block_by_hash(&self, hash: &Sha256Hash) -> Result<Option<Block>> {
        let _guard = self.lock.read();
        if let Some(block) = self.cache.get(hash) {
            return Ok(Some(block));
        }
        let block = self.persistence.block_by_hash(hash)?;
        if let Some(block) = &block {
            self.cache.put(*hash, block.clone());
        }
        Ok(block)
    }

    pub fn transaction(&self, hash: &Sha256Hash) -> Result<Option<Transaction>> {
        let _guard = self.lock.read();
        self.persistence.transaction(hash)
    }

    pub fn block_count(&self) -> Result<usize> {
        let _guard = self.lock.read();
        self.persistence.block_count()
    }

    /// Link `raw_headers` as a chain extending `previous_block` and store them
    /// as one atomic unit. Every header is decoded and checked before anything
    /// is written, so one bad header rejects the whole batch.
    pub fn create_blocks<H: AsRef<[u8]>>(
        &self,
        raw_headers: &[H],
        previous_block: &Block,
    ) -> Result<Vec<Block>> {
        let headers = self.decode_batch(raw_headers)?;
        if headers.is_empty() {
            return Ok(Vec::new());
        }

        let _guard = self.lock.write();
        let previous = self
            .persistence
            .block_by_hash(&previous_block.hash())?
            .ok_or(ChainError::OrphanBlock(previous_block.hash()))?;

        let saver = BlockSaver::new(self.persistence.as_ref(), &self.resolver);
        let outcome = saver.create_blocks(&headers, &previous)?;
        for hash in &outcome.touched {
            self.cache.invalidate(hash);
        }
        Ok(outcome.blocks)
    }

    /// Like [`Blockchain::create_blocks`], but the parent is found by looking
    /// up the first header's previous hash.
    pub fn link_headers<H: AsRef<[u8]>>(&self, raw_headers: &[H]) -> Result<Vec<Block>> {
        let first = match raw_headers.first() {
            Some(raw) => validate_header(raw.as_ref(), &self.params)?,
            None => return Ok(Vec::new()),
        };
        let parent = self
            .block_by_hash(&first.previous_block_hash)?
            .ok_or(ChainError::OrphanBlock(first.previous_block_hash))?;
        self.create_blocks(raw_headers, &parent)
    }

    /// Verify `message` against `block` and attach the proven transactions.
    /// A failed proof leaves stored state untouched.
    pub fn update_block(&self, block: &Block, message: &MerkleBlockMessage) -> Result<Block> {
        let proven = message.verify_against(block)?;
        debug!(
            "Merkle proof for {} proves {} of {} transactions",
            block.hash_hex(),
            proven.len(),
            message.total_transactions
        );

        let _guard = self.lock.write();
        let saver = BlockSaver::new(self.persistence.as_ref(), &self.resolver);
        let outcome = saver.update_block(block, &proven)?;
        self.cache.invalidate(&block.hash());
        for hash in &outcome.touched {
            self.cache.invalidate(hash);
        }
        Ok(outcome.block)
    }

    fn decode_batch<H: AsRef<[u8]>>(&self, raw_headers: &[H]) -> Result<Vec<BlockHeader>> {
        raw_headers
            .iter()
            .enumerate()
            .map(|(i, raw)| {
                validate_header(raw.as_ref(), &self.params).map_err(|e| match e {
                    ChainError::InvalidHeader(msg) => {
                        ChainError::InvalidHeader(format!("header {} of batch: {}", i, msg))
                    }
                    other => other,
                })
            })
            .collect()
    }
}
