//! Database persistence layer for the header chain

use crate::blockchain::{Block, BlockHeader, Transaction};
use crate::crypto::{hash_to_reversed_hex, Sha256Hash};
use crate::error::{ChainError, Result};
use primitive_types::U256;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

/// One atomic change to the block graph: new blocks plus the main-chain
/// rewiring a reorg needs.
#[derive(Debug, Clone, Default)]
pub struct ChainUpdate {
    pub inserted: Vec<Block>,
    /// Leave the main chain; their transactions lose the block association.
    pub disconnected: Vec<Sha256Hash>,
    /// Already-stored blocks that rejoin the main chain.
    pub connected: Vec<Sha256Hash>,
}

/// Abstraction for persistence backends. Both writes are all-or-nothing: on
/// error nothing of the call is visible.
pub trait Persistence: Send + Sync {
    fn block_by_hash(&self, hash: &Sha256Hash) -> Result<Option<Block>>;
    /// Main-chain block at `height`.
    fn block_at_height(&self, height: u32) -> Result<Option<Block>>;
    fn tip(&self) -> Result<Option<Block>>;
    fn block_count(&self) -> Result<usize>;
    fn transaction(&self, hash: &Sha256Hash) -> Result<Option<Transaction>>;
    fn commit(&self, update: &ChainUpdate) -> Result<()>;
    /// Replace the transactions of `block_hash` with `hashes` (in order).
    ///
    /// A transaction already owned by a main-chain block stays there when
    /// `block_hash` is off the main chain; the block is then left unsynced.
    /// Any other owner gives the transaction up and is flagged unsynced.
    /// Returns the other blocks whose attachments changed.
    fn attach_transactions(&self, block_hash: &Sha256Hash, hashes: &[Sha256Hash]) -> Result<Vec<Sha256Hash>>;
}

const BLOCK_COLUMNS: &str = "header, height, chain_work, synced, main_chain";

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| ChainError::StorageFailure(format!("Failed to open database: {}", e)))?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS blocks (
                hash BLOB PRIMARY KEY,
                previous_hash BLOB NOT NULL,
                height INTEGER NOT NULL,
                header BLOB NOT NULL,
                chain_work BLOB NOT NULL,
                synced INTEGER NOT NULL DEFAULT 0,
                main_chain INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS blocks_previous_hash ON blocks (previous_hash);
            CREATE INDEX IF NOT EXISTS blocks_height ON blocks (height);
            CREATE TABLE IF NOT EXISTS transactions (
                hash BLOB PRIMARY KEY,
                block_hash BLOB REFERENCES blocks (hash),
                position INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS transactions_block_hash ON transactions (block_hash);",
        )
        .map_err(|e| ChainError::StorageFailure(format!("Failed to create schema: {}", e)))?;

        Ok(Database { conn: Mutex::new(conn) })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| ChainError::StorageFailure("Mutex poisoned".to_string()))
    }

    fn query_block(conn: &Connection, clause: &str, param: &dyn rusqlite::ToSql) -> Result<Option<Block>> {
        let sql = format!("SELECT {} FROM blocks WHERE {}", BLOCK_COLUMNS, clause);
        let row = conn
            .query_row(&sql, [param], read_block_row)
            .optional()
            .map_err(|e| ChainError::StorageFailure(format!("Failed to query block: {}", e)))?;

        match row {
            Some((header, height, chain_work, synced, main_chain)) => {
                let header = BlockHeader::from_bytes(&header)
                    .map_err(|e| ChainError::StorageFailure(format!("Corrupt stored header: {}", e)))?;
                let hash = header.hash();
                let transactions = Self::block_transactions(conn, &hash)?;
                Ok(Some(Block::restore(
                    header,
                    height,
                    U256::from_big_endian(&chain_work),
                    synced,
                    main_chain,
                    transactions,
                )))
            }
            None => Ok(None),
        }
    }

    fn block_transactions(conn: &Connection, block_hash: &Sha256Hash) -> Result<Vec<Transaction>> {
        let mut stmt = conn
            .prepare("SELECT hash, position FROM transactions WHERE block_hash = ?1 ORDER BY position ASC")
            .map_err(|e| ChainError::StorageFailure(format!("Failed to prepare query: {}", e)))?;

        let rows = stmt
            .query_map(params![block_hash.to_vec()], |row| {
                let hash: Vec<u8> = row.get(0)?;
                let position: u32 = row.get(1)?;
                Ok((hash, position))
            })
            .map_err(|e| ChainError::StorageFailure(format!("Failed to query transactions: {}", e)))?;

        let mut transactions = Vec::new();
        for row in rows {
            let (hash, position) = row?;
            transactions.push(Transaction::new(to_hash(&hash)?, Some(*block_hash), position));
        }
        Ok(transactions)
    }
}

type BlockRow = (Vec<u8>, u32, Vec<u8>, bool, bool);

fn read_block_row(row: &Row<'_>) -> rusqlite::Result<BlockRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn to_hash(bytes: &[u8]) -> Result<Sha256Hash> {
    bytes
        .try_into()
        .map_err(|_| ChainError::StorageFailure(format!("Stored hash has {} bytes", bytes.len())))
}

fn work_bytes(work: &U256) -> Vec<u8> {
    let mut out = [0u8; 32];
    work.to_big_endian(&mut out);
    out.to_vec()
}

impl Persistence for Database {
    fn block_by_hash(&self, hash: &Sha256Hash) -> Result<Option<Block>> {
        let conn = self.lock()?;
        Self::query_block(&conn, "hash = ?1", &hash.to_vec())
    }

    fn block_at_height(&self, height: u32) -> Result<Option<Block>> {
        let conn = self.lock()?;
        Self::query_block(&conn, "height = ?1 AND main_chain = 1", &height)
    }

    fn tip(&self) -> Result<Option<Block>> {
        let conn = self.lock()?;
        Self::query_block(&conn, "main_chain = ?1 ORDER BY height DESC LIMIT 1", &true)
    }

    fn block_count(&self) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM blocks", [], |row| row.get(0))
            .map_err(|e| ChainError::StorageFailure(format!("Failed to count blocks: {}", e)))?;
        Ok(count as usize)
    }

    fn transaction(&self, hash: &Sha256Hash) -> Result<Option<Transaction>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT block_hash, position FROM transactions WHERE hash = ?1",
                params![hash.to_vec()],
                |row| {
                    let block_hash: Option<Vec<u8>> = row.get(0)?;
                    let position: u32 = row.get(1)?;
                    Ok((block_hash, position))
                },
            )
            .optional()?;

        match row {
            Some((block_hash, position)) => {
                let block_hash = block_hash.as_deref().map(to_hash).transpose()?;
                Ok(Some(Transaction::new(*hash, block_hash, position)))
            }
            None => Ok(None),
        }
    }

    fn commit(&self, update: &ChainUpdate) -> Result<()> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction().map_err(|e| {
            ChainError::StorageFailure(format!("Failed to start transaction: {}", e))
        })?;

        for block in &update.inserted {
            tx.execute(
                "INSERT INTO blocks (hash, previous_hash, height, header, chain_work, synced, main_chain)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    block.hash().to_vec(),
                    block.previous_hash().to_vec(),
                    block.height,
                    block.header.to_bytes().to_vec(),
                    work_bytes(&block.chain_work),
                    block.synced,
                    block.main_chain,
                ],
            )
            .map_err(|e| {
                ChainError::StorageFailure(format!("Failed to insert block {}: {}", block.hash_hex(), e))
            })?;
        }

        for hash in &update.disconnected {
            let changed = tx.execute(
                "UPDATE blocks SET main_chain = 0, synced = 0 WHERE hash = ?1",
                params![hash.to_vec()],
            )?;
            if changed != 1 {
                return Err(ChainError::StorageFailure(format!(
                    "Cannot detach unknown block {}",
                    hash_to_reversed_hex(hash)
                )));
            }
            tx.execute(
                "UPDATE transactions SET block_hash = NULL WHERE block_hash = ?1",
                params![hash.to_vec()],
            )?;
        }

        for hash in &update.connected {
            let changed = tx.execute(
                "UPDATE blocks SET main_chain = 1 WHERE hash = ?1",
                params![hash.to_vec()],
            )?;
            if changed != 1 {
                return Err(ChainError::StorageFailure(format!(
                    "Cannot attach unknown block {}",
                    hash_to_reversed_hex(hash)
                )));
            }
        }

        // Commit all changes atomically
        tx.commit().map_err(|e| {
            ChainError::StorageFailure(format!("Failed to commit transaction: {}", e))
        })?;

        Ok(())
    }

    fn attach_transactions(&self, block_hash: &Sha256Hash, hashes: &[Sha256Hash]) -> Result<Vec<Sha256Hash>> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction().map_err(|e| {
            ChainError::StorageFailure(format!("Failed to start transaction: {}", e))
        })?;

        let target_main: bool = tx
            .query_row(
                "SELECT main_chain FROM blocks WHERE hash = ?1",
                params![block_hash.to_vec()],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| ChainError::BlockNotFound(hash_to_reversed_hex(block_hash)))?;

        tx.execute(
            "UPDATE transactions SET block_hash = NULL WHERE block_hash = ?1",
            params![block_hash.to_vec()],
        )?;

        let mut held_back = false;
        let mut previous_owners = Vec::new();
        for (position, hash) in hashes.iter().enumerate() {
            let owner: Option<(Option<Vec<u8>>, Option<bool>)> = tx
                .query_row(
                    "SELECT t.block_hash, b.main_chain FROM transactions t
                     LEFT JOIN blocks b ON b.hash = t.block_hash WHERE t.hash = ?1",
                    params![hash.to_vec()],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            if let Some((Some(owner), owner_main)) = owner {
                if owner_main.unwrap_or(false) && !target_main {
                    held_back = true;
                    continue;
                }
                let owner = to_hash(&owner)?;
                tx.execute("UPDATE blocks SET synced = 0 WHERE hash = ?1", params![owner.to_vec()])?;
                if !previous_owners.contains(&owner) {
                    previous_owners.push(owner);
                }
            }

            tx.execute(
                "INSERT OR REPLACE INTO transactions (hash, block_hash, position) VALUES (?1, ?2, ?3)",
                params![hash.to_vec(), block_hash.to_vec(), position as u32],
            )
            .map_err(|e| ChainError::StorageFailure(format!("Failed to save transaction: {}", e)))?;
        }

        tx.execute(
            "UPDATE blocks SET synced = ?2 WHERE hash = ?1",
            params![block_hash.to_vec(), !held_back],
        )?;

        tx.commit().map_err(|e| {
            ChainError::StorageFailure(format!("Failed to commit transaction: {}", e))
        })?;

        Ok(previous_owners)
    }
}

#[derive(Default)]
struct MemoryState {
    /// Blocks are kept without transactions; those live in `transactions`.
    blocks: HashMap<Sha256Hash, Block>,
    transactions: HashMap<Sha256Hash, Transaction>,
    /// Main-chain block per height.
    heights: BTreeMap<u32, Sha256Hash>,
    /// Transactions attached to each block, in proof order.
    attached: HashMap<Sha256Hash, Vec<Sha256Hash>>,
}

impl MemoryState {
    fn assemble(&self, block: &Block) -> Block {
        let mut block = block.clone();
        block.transactions = self
            .attached
            .get(&block.hash())
            .map(|hashes| hashes.iter().filter_map(|h| self.transactions.get(h).cloned()).collect())
            .unwrap_or_default();
        block
    }

    fn main_chain_block(&self, hash: Option<&Sha256Hash>) -> Option<Block> {
        hash.and_then(|h| self.blocks.get(h)).map(|b| self.assemble(b))
    }

    fn unassociate(&mut self, block_hash: &Sha256Hash) {
        for hash in self.attached.remove(block_hash).unwrap_or_default() {
            if let Some(tx) = self.transactions.get_mut(&hash) {
                tx.block_hash = None;
            }
        }
    }
}

/// Simple in-memory persistence implementation useful for tests and ephemeral runs.
/// Writes check every precondition before touching state.
#[derive(Clone, Default)]
pub struct InMemoryPersistence {
    state: Arc<Mutex<MemoryState>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| ChainError::StorageFailure("Mutex poisoned".to_string()))
    }
}

impl Persistence for InMemoryPersistence {
    fn block_by_hash(&self, hash: &Sha256Hash) -> Result<Option<Block>> {
        let state = self.lock()?;
        Ok(state.blocks.get(hash).map(|b| state.assemble(b)))
    }

    fn block_at_height(&self, height: u32) -> Result<Option<Block>> {
        let state = self.lock()?;
        Ok(state.main_chain_block(state.heights.get(&height)))
    }

    fn tip(&self) -> Result<Option<Block>> {
        let state = self.lock()?;
        Ok(state.main_chain_block(state.heights.values().next_back()))
    }

    fn block_count(&self) -> Result<usize> {
        Ok(self.lock()?.blocks.len())
    }

    fn transaction(&self, hash: &Sha256Hash) -> Result<Option<Transaction>> {
        Ok(self.lock()?.transactions.get(hash).cloned())
    }

    fn commit(&self, update: &ChainUpdate) -> Result<()> {
        let mut guard = self.lock()?;
        let state = &mut *guard;

        let mut fresh = HashSet::with_capacity(update.inserted.len());
        for block in &update.inserted {
            if state.blocks.contains_key(&block.hash()) || !fresh.insert(block.hash()) {
                return Err(ChainError::StorageFailure(format!(
                    "Block {} already stored",
                    block.hash_hex()
                )));
            }
        }
        let known = |hash: &Sha256Hash| state.blocks.contains_key(hash) || fresh.contains(hash);
        if let Some(hash) = update.disconnected.iter().find(|h| !known(h)) {
            return Err(ChainError::StorageFailure(format!(
                "Cannot detach unknown block {}",
                hash_to_reversed_hex(hash)
            )));
        }
        if let Some(hash) = update.connected.iter().find(|h| !known(h)) {
            return Err(ChainError::StorageFailure(format!(
                "Cannot attach unknown block {}",
                hash_to_reversed_hex(hash)
            )));
        }

        for block in &update.inserted {
            let mut row = block.clone();
            row.transactions.clear();
            if row.main_chain {
                state.heights.insert(row.height, row.hash());
            }
            state.blocks.insert(row.hash(), row);
        }

        for hash in &update.disconnected {
            if let Some(block) = state.blocks.get_mut(hash) {
                block.main_chain = false;
                block.synced = false;
                if state.heights.get(&block.height) == Some(hash) {
                    state.heights.remove(&block.height);
                }
            }
            state.unassociate(hash);
        }

        for hash in &update.connected {
            if let Some(block) = state.blocks.get_mut(hash) {
                block.main_chain = true;
                state.heights.insert(block.height, *hash);
            }
        }

        Ok(())
    }

    fn attach_transactions(&self, block_hash: &Sha256Hash, hashes: &[Sha256Hash]) -> Result<Vec<Sha256Hash>> {
        let mut guard = self.lock()?;
        let state = &mut *guard;

        let target_main = state
            .blocks
            .get(block_hash)
            .map(|b| b.main_chain)
            .ok_or_else(|| ChainError::BlockNotFound(hash_to_reversed_hex(block_hash)))?;
        state.unassociate(block_hash);

        let mut held_back = false;
        let mut previous_owners = Vec::new();
        let mut attached = Vec::with_capacity(hashes.len());
        for (position, hash) in hashes.iter().enumerate() {
            if let Some(owner) = state.transactions.get(hash).and_then(|tx| tx.block_hash) {
                let owner_main = state.blocks.get(&owner).is_some_and(|b| b.main_chain);
                if owner_main && !target_main {
                    held_back = true;
                    continue;
                }
                if let Some(list) = state.attached.get_mut(&owner) {
                    list.retain(|h| h != hash);
                }
                if let Some(block) = state.blocks.get_mut(&owner) {
                    block.synced = false;
                }
                if !previous_owners.contains(&owner) {
                    previous_owners.push(owner);
                }
            }
            state
                .transactions
                .insert(*hash, Transaction::new(*hash, Some(*block_hash), position as u32));
            attached.push(*hash);
        }

        state.attached.insert(*block_hash, attached);
        if let Some(block) = state.blocks.get_mut(block_hash) {
            block.synced = !held_back;
        }
        Ok(previous_owners)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::core::validation::Network;
    use crate::test_utils::mine_chain;

    fn sample_blocks(count: usize) -> Vec<Block> {
        let checkpoint = Block::checkpoint(Network::Regtest.genesis_header(), 0).unwrap();
        let mut blocks = vec![checkpoint.clone()];
        let mut parent = checkpoint;
        for header in mine_chain(&parent.hash(), count, 0) {
            let mut block = Block::new(header, Some(&parent)).unwrap();
            block.main_chain = true;
            parent = block.clone();
            blocks.push(block);
        }
        blocks
    }

    fn backends() -> Vec<Box<dyn Persistence>> {
        vec![
            Box::new(Database::open(":memory:").unwrap()),
            Box::new(InMemoryPersistence::new()),
        ]
    }

    #[test]
    fn test_database_open() {
        let db = Database::open(":memory:").unwrap();
        assert!(db.conn.lock().unwrap().is_autocommit());
        assert_eq!(db.block_count().unwrap(), 0);
        assert!(db.tip().unwrap().is_none());
    }

    #[test]
    fn test_commit_and_lookup() {
        for store in backends() {
            let blocks = sample_blocks(2);
            store.commit(&ChainUpdate { inserted: blocks.clone(), ..Default::default() }).unwrap();

            assert_eq!(store.block_count().unwrap(), 3);
            assert_eq!(store.tip().unwrap().unwrap(), blocks[2]);
            assert_eq!(store.block_at_height(1).unwrap().unwrap(), blocks[1]);
            assert_eq!(store.block_by_hash(&blocks[0].hash()).unwrap().unwrap(), blocks[0]);
            assert!(store.block_at_height(3).unwrap().is_none());
        }
    }

    #[test]
    fn test_failed_commit_leaves_nothing_behind() {
        for store in backends() {
            let blocks = sample_blocks(2);
            store.commit(&ChainUpdate { inserted: vec![blocks[0].clone()], ..Default::default() }).unwrap();

            // second copy of the checkpoint violates the primary key
            let err = store
                .commit(&ChainUpdate { inserted: vec![blocks[1].clone(), blocks[0].clone()], ..Default::default() })
                .unwrap_err();
            assert!(matches!(err, ChainError::StorageFailure(_)));
            assert_eq!(store.block_count().unwrap(), 1);
            assert!(store.block_by_hash(&blocks[1].hash()).unwrap().is_none());
        }
    }

    #[test]
    fn test_attach_keeps_order_and_detach_unassociates() {
        for store in backends() {
            let blocks = sample_blocks(1);
            store.commit(&ChainUpdate { inserted: blocks.clone(), ..Default::default() }).unwrap();
            let block_hash = blocks[1].hash();
            let hashes = [[3u8; 32], [1u8; 32], [2u8; 32]];

            store.attach_transactions(&block_hash, &hashes).unwrap();
            let synced = store.block_by_hash(&block_hash).unwrap().unwrap();
            assert!(synced.synced);
            assert_eq!(synced.transaction_hashes(), hashes.to_vec());

            store
                .commit(&ChainUpdate { disconnected: vec![block_hash], ..Default::default() })
                .unwrap();
            let detached = store.block_by_hash(&block_hash).unwrap().unwrap();
            assert!(!detached.main_chain);
            assert!(!detached.synced);
            assert!(detached.transactions.is_empty());

            let orphaned = store.transaction(&[1u8; 32]).unwrap().unwrap();
            assert!(orphaned.is_orphaned());
            assert_eq!(orphaned.position, 1);
            assert_eq!(store.tip().unwrap().unwrap().hash(), blocks[0].hash());
        }
    }

    #[test]
    fn test_rewiring_unknown_block_rolls_back() {
        for store in backends() {
            let blocks = sample_blocks(1);
            let err = store
                .commit(&ChainUpdate {
                    inserted: blocks.clone(),
                    connected: vec![[0xee; 32]],
                    ..Default::default()
                })
                .unwrap_err();
            assert!(matches!(err, ChainError::StorageFailure(_)));
            assert_eq!(store.block_count().unwrap(), 0);
        }
    }

    #[test]
    fn test_attach_to_unknown_block() {
        for store in backends() {
            let err = store.attach_transactions(&[5u8; 32], &[[1u8; 32]]).unwrap_err();
            assert!(matches!(err, ChainError::BlockNotFound(_)));
            assert!(store.transaction(&[1u8; 32]).unwrap().is_none());
        }
    }

    /// Checkpoint, one main-chain block and a side-chain sibling at height 1.
    fn fork_at_one(store: &dyn Persistence) -> (Sha256Hash, Sha256Hash) {
        let blocks = sample_blocks(1);
        let side = Block::new(mine_chain(&blocks[0].hash(), 1, 7)[0], Some(&blocks[0])).unwrap();
        let mut inserted = blocks.clone();
        inserted.push(side.clone());
        store.commit(&ChainUpdate { inserted, ..Default::default() }).unwrap();
        (blocks[1].hash(), side.hash())
    }

    #[test]
    fn test_side_block_cannot_take_main_chain_transactions() {
        for store in backends() {
            let (main, side) = fork_at_one(store.as_ref());
            store.attach_transactions(&main, &[[1u8; 32], [2u8; 32]]).unwrap();

            let changed = store.attach_transactions(&side, &[[1u8; 32], [3u8; 32]]).unwrap();
            assert!(changed.is_empty());

            let main_block = store.block_by_hash(&main).unwrap().unwrap();
            assert!(main_block.synced);
            assert_eq!(main_block.transaction_hashes(), vec![[1u8; 32], [2u8; 32]]);
            let side_block = store.block_by_hash(&side).unwrap().unwrap();
            assert!(!side_block.synced);
            assert_eq!(side_block.transaction_hashes(), vec![[3u8; 32]]);
            assert_eq!(store.transaction(&[1u8; 32]).unwrap().unwrap().block_hash, Some(main));
        }
    }

    #[test]
    fn test_main_chain_block_takes_side_chain_transactions() {
        for store in backends() {
            let (main, side) = fork_at_one(store.as_ref());
            store.attach_transactions(&side, &[[4u8; 32], [5u8; 32]]).unwrap();
            assert!(store.block_by_hash(&side).unwrap().unwrap().synced);

            let changed = store.attach_transactions(&main, &[[5u8; 32]]).unwrap();
            assert_eq!(changed, vec![side]);

            let side_block = store.block_by_hash(&side).unwrap().unwrap();
            assert!(!side_block.synced);
            assert_eq!(side_block.transaction_hashes(), vec![[4u8; 32]]);
            let main_block = store.block_by_hash(&main).unwrap().unwrap();
            assert!(main_block.synced);
            assert_eq!(main_block.transaction_hashes(), vec![[5u8; 32]]);
        }
    }

    #[test]
    fn test_height_index_follows_rewiring() {
        for store in backends() {
            let (main, side) = fork_at_one(store.as_ref());
            assert_eq!(store.block_at_height(1).unwrap().unwrap().hash(), main);

            store
                .commit(&ChainUpdate { disconnected: vec![main], connected: vec![side], ..Default::default() })
                .unwrap();
            assert_eq!(store.block_at_height(1).unwrap().unwrap().hash(), side);
            assert_eq!(store.tip().unwrap().unwrap().hash(), side);

            store
                .commit(&ChainUpdate { disconnected: vec![side], connected: vec![main], ..Default::default() })
                .unwrap();
            assert_eq!(store.block_at_height(1).unwrap().unwrap().hash(), main);
            assert!(!store.block_by_hash(&side).unwrap().unwrap().main_chain);
        }
    }

    #[test]
    fn test_database_survives_reopen() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("headers.db");
        let path = path.to_str().unwrap();
        let blocks = sample_blocks(3);

        {
            let db = Database::open(path).unwrap();
            db.commit(&ChainUpdate { inserted: blocks.clone(), ..Default::default() }).unwrap();
            db.attach_transactions(&blocks[2].hash(), &[[9u8; 32]]).unwrap();
        }

        let db = Database::open(path).unwrap();
        assert_eq!(db.block_count().unwrap(), 4);
        assert_eq!(db.tip().unwrap().unwrap().hash(), blocks[3].hash());
        let reloaded = db.block_at_height(2).unwrap().unwrap();
        assert_eq!(reloaded.chain_work, blocks[2].chain_work);
        assert_eq!(reloaded.transaction_hashes(), vec![[9u8; 32]]);
    }
}
