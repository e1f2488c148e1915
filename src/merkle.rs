//! Partial merkle tree verification for merkle-block messages.
//!
//! A merkle-block message carries a header, the number of transactions in the
//! full block, a list of hashes and a packed list of flag bits. Walking the
//! tree depth-first, each flag says whether the node is an ancestor of a
//! matched transaction (descend) or not (take the next hash as is). At leaf
//! level a set flag marks the transaction as matched.

use crate::blockchain::{Block, BlockHeader, HEADER_SIZE};
use crate::crypto::{hash_pair, hash_to_reversed_hex, Sha256Hash};
use crate::error::{ChainError, Result};
use rayon::prelude::*;

/// Largest transaction count a block can hold (max block weight over the
/// weight of the smallest transaction).
pub const MAX_TRANSACTIONS_PER_BLOCK: u32 = 4_000_000 / 240;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleBlockMessage {
    pub header: BlockHeader,
    pub total_transactions: u32,
    pub hashes: Vec<Sha256Hash>,
    /// Flag bits, packed least significant bit first.
    pub flags: Vec<u8>,
}

impl MerkleBlockMessage {
    pub fn new(header: BlockHeader, total_transactions: u32, hashes: Vec<Sha256Hash>, flags: Vec<u8>) -> Self {
        Self { header, total_transactions, hashes, flags }
    }

    /// Build the message proving `matches` out of the full `txids` list.
    pub fn build(header: BlockHeader, txids: &[Sha256Hash], matches: &[bool]) -> Self {
        let tree = PartialMerkleTree::build(txids, matches);
        Self {
            header,
            total_transactions: tree.total_transactions,
            flags: tree.flag_bytes(),
            hashes: tree.hashes,
        }
    }

    /// Decode the `merkleblock` payload.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(bytes);
        let header = BlockHeader::from_bytes(reader.take(HEADER_SIZE)?)
            .map_err(|e| ChainError::InvalidMerkleProof(e.to_string()))?;
        let total_transactions = reader.u32_le()?;

        let hash_count = reader.compact_size()?;
        if hash_count > MAX_TRANSACTIONS_PER_BLOCK as u64 {
            return Err(ChainError::InvalidMerkleProof(format!("Too many hashes: {}", hash_count)));
        }
        let mut hashes = Vec::with_capacity(hash_count as usize);
        for _ in 0..hash_count {
            let mut hash = [0u8; 32];
            hash.copy_from_slice(reader.take(32)?);
            hashes.push(hash);
        }

        let flag_count = reader.compact_size()?;
        let flags = reader.take(flag_count as usize)?.to_vec();
        if !reader.is_empty() {
            return Err(ChainError::InvalidMerkleProof("Trailing bytes after flags".to_string()));
        }

        Ok(Self { header, total_transactions, hashes, flags })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_SIZE + 4 + 9 + self.hashes.len() * 32 + 9 + self.flags.len());
        out.extend_from_slice(&self.header.to_bytes());
        out.extend_from_slice(&self.total_transactions.to_le_bytes());
        write_compact_size(&mut out, self.hashes.len() as u64);
        for hash in &self.hashes {
            out.extend_from_slice(hash);
        }
        write_compact_size(&mut out, self.flags.len() as u64);
        out.extend_from_slice(&self.flags);
        out
    }

    /// Rebuild the tree and check it against `merkle_root`. Returns the
    /// matched transaction hashes in tree order.
    pub fn verify(&self, merkle_root: &Sha256Hash) -> Result<Vec<Sha256Hash>> {
        let tree = PartialMerkleTree::new(self.total_transactions, self.hashes.clone(), &self.flags);
        let (root, matches) = tree.extract_matches()?;
        if &root != merkle_root {
            return Err(ChainError::InvalidMerkleProof(format!(
                "Recomputed root {} does not match {}",
                hash_to_reversed_hex(&root),
                hash_to_reversed_hex(merkle_root)
            )));
        }
        Ok(matches.into_iter().map(|(_, hash)| hash).collect())
    }

    /// [`MerkleBlockMessage::verify`] against the block the message claims to
    /// describe.
    pub fn verify_against(&self, block: &Block) -> Result<Vec<Sha256Hash>> {
        if self.header.hash() != block.hash() {
            return Err(ChainError::InvalidMerkleProof(format!(
                "Message is for block {}, not {}",
                self.header.hash_hex(),
                block.hash_hex()
            )));
        }
        self.verify(&block.header.merkle_root)
    }
}

/// Verify independent messages in parallel, each against its own root.
pub fn verify_batch(items: &[(MerkleBlockMessage, Sha256Hash)]) -> Vec<Result<Vec<Sha256Hash>>> {
    items
        .par_iter()
        .map(|(message, root)| message.verify(root))
        .collect()
}

/// Root of the full tree over `txids`. An odd node at any level is paired
/// with itself.
pub fn merkle_root(txids: &[Sha256Hash]) -> Sha256Hash {
    if txids.is_empty() {
        return [0u8; 32];
    }
    let total = txids.len() as u32;
    node_hash(tree_height(total), 0, txids)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialMerkleTree {
    pub total_transactions: u32,
    pub hashes: Vec<Sha256Hash>,
    pub bits: Vec<bool>,
}

impl PartialMerkleTree {
    pub fn new(total_transactions: u32, hashes: Vec<Sha256Hash>, flags: &[u8]) -> Self {
        let bits = (0..flags.len() * 8)
            .map(|i| flags[i / 8] & (1 << (i % 8)) != 0)
            .collect();
        Self { total_transactions, hashes, bits }
    }

    pub fn build(txids: &[Sha256Hash], matches: &[bool]) -> Self {
        let mut tree = Self {
            total_transactions: txids.len() as u32,
            hashes: Vec::new(),
            bits: Vec::new(),
        };
        if !txids.is_empty() {
            tree.build_node(tree_height(tree.total_transactions), 0, txids, matches);
        }
        tree
    }

    fn build_node(&mut self, height: u32, pos: u32, txids: &[Sha256Hash], matches: &[bool]) {
        let start = (pos as usize) << height;
        let end = (((pos as usize) + 1) << height).min(txids.len());
        let parent_of_match = matches.iter().skip(start).take(end - start).any(|m| *m);

        self.bits.push(parent_of_match);
        if height == 0 || !parent_of_match {
            self.hashes.push(node_hash(height, pos, txids));
        } else {
            self.build_node(height - 1, pos * 2, txids, matches);
            if pos * 2 + 1 < tree_width(self.total_transactions, height - 1) {
                self.build_node(height - 1, pos * 2 + 1, txids, matches);
            }
        }
    }

    pub fn flag_bytes(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.bits.len().div_ceil(8)];
        for (i, bit) in self.bits.iter().enumerate() {
            if *bit {
                out[i / 8] |= 1 << (i % 8);
            }
        }
        out
    }

    /// Recompute the root and collect `(index, hash)` of matched leaves.
    pub fn extract_matches(&self) -> Result<(Sha256Hash, Vec<(u32, Sha256Hash)>)> {
        let total = self.total_transactions;
        if total == 0 {
            return Err(ChainError::InvalidMerkleProof("Block has no transactions".to_string()));
        }
        if total > MAX_TRANSACTIONS_PER_BLOCK {
            return Err(ChainError::InvalidMerkleProof(format!(
                "{} transactions exceed the block limit",
                total
            )));
        }
        if self.hashes.len() > total as usize {
            return Err(ChainError::InvalidMerkleProof(format!(
                "{} hashes for {} transactions",
                self.hashes.len(),
                total
            )));
        }
        if self.bits.len() < self.hashes.len() {
            return Err(ChainError::InvalidMerkleProof(format!(
                "{} flag bits cannot cover {} hashes",
                self.bits.len(),
                self.hashes.len()
            )));
        }

        let mut walk = Traversal { tree: self, bits_used: 0, hashes_used: 0, matches: Vec::new() };
        let root = walk.visit(tree_height(total), 0)?;

        if walk.bits_used.div_ceil(8) != self.bits.len().div_ceil(8) {
            return Err(ChainError::InvalidMerkleProof("Unused flag bytes".to_string()));
        }
        if walk.hashes_used != self.hashes.len() {
            return Err(ChainError::InvalidMerkleProof(format!(
                "Only {} of {} hashes used",
                walk.hashes_used,
                self.hashes.len()
            )));
        }
        Ok((root, walk.matches))
    }
}

struct Traversal<'t> {
    tree: &'t PartialMerkleTree,
    bits_used: usize,
    hashes_used: usize,
    matches: Vec<(u32, Sha256Hash)>,
}

impl Traversal<'_> {
    fn visit(&mut self, height: u32, pos: u32) -> Result<Sha256Hash> {
        let descend = *self
            .tree
            .bits
            .get(self.bits_used)
            .ok_or_else(|| ChainError::InvalidMerkleProof("Ran out of flag bits".to_string()))?;
        self.bits_used += 1;

        if height == 0 || !descend {
            let hash = *self
                .tree
                .hashes
                .get(self.hashes_used)
                .ok_or_else(|| ChainError::InvalidMerkleProof("Ran out of hashes".to_string()))?;
            self.hashes_used += 1;
            if height == 0 && descend {
                self.matches.push((pos, hash));
            }
            return Ok(hash);
        }

        let left = self.visit(height - 1, pos * 2)?;
        let right = if pos * 2 + 1 < tree_width(self.tree.total_transactions, height - 1) {
            let right = self.visit(height - 1, pos * 2 + 1)?;
            // CVE-2012-2459: a real right sibling equal to the left one would
            // let two different transaction lists share a root
            if right == left {
                return Err(ChainError::InvalidMerkleProof("Duplicate sibling hashes".to_string()));
            }
            right
        } else {
            left
        };
        Ok(hash_pair(&left, &right))
    }
}

fn tree_width(total: u32, height: u32) -> u32 {
    ((total as u64 + (1u64 << height) - 1) >> height) as u32
}

fn tree_height(total: u32) -> u32 {
    let mut height = 0;
    while tree_width(total, height) > 1 {
        height += 1;
    }
    height
}

fn node_hash(height: u32, pos: u32, txids: &[Sha256Hash]) -> Sha256Hash {
    if height == 0 {
        return txids[pos as usize];
    }
    let left = node_hash(height - 1, pos * 2, txids);
    let right = if pos * 2 + 1 < tree_width(txids.len() as u32, height - 1) {
        node_hash(height - 1, pos * 2 + 1, txids)
    } else {
        left
    };
    hash_pair(&left, &right)
}

struct Reader<'a> {
    bytes: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.bytes.len() < n {
            return Err(ChainError::InvalidMerkleProof(format!(
                "Message truncated: wanted {} bytes, {} left",
                n,
                self.bytes.len()
            )));
        }
        let (head, rest) = self.bytes.split_at(n);
        self.bytes = rest;
        Ok(head)
    }

    fn u32_le(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn compact_size(&mut self) -> Result<u64> {
        let prefix = self.take(1)?[0];
        let value = match prefix {
            0xfd => u16::from_le_bytes([self.take(1)?[0], self.take(1)?[0]]) as u64,
            0xfe => self.u32_le()? as u64,
            0xff => {
                let b = self.take(8)?;
                u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
            }
            n => n as u64,
        };
        Ok(value)
    }

    fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

fn write_compact_size(out: &mut Vec<u8>, n: u64) {
    match n {
        0..=0xfc => out.push(n as u8),
        0xfd..=0xffff => {
            out.push(0xfd);
            out.extend_from_slice(&(n as u16).to_le_bytes());
        }
        0x1_0000..=0xffff_ffff => {
            out.push(0xfe);
            out.extend_from_slice(&(n as u32).to_le_bytes());
        }
        _ => {
            out.push(0xff);
            out.extend_from_slice(&n.to_le_bytes());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{double_sha256, hash_from_reversed_hex};

    fn block_one_header() -> BlockHeader {
        BlockHeader::from_bytes(&hex::decode(
            "00000020928c6b3eea1bd343124896bce86aab4be7f06c107a3eb5cd7b830000000000009a0b88413a2946fb49e00432a96b4d21c36b492456c6b1bd4c8e31a23bb7ea8b011ac459928d001b7f384577",
        ).unwrap())
        .unwrap()
    }

    fn block_one_txids() -> Vec<Sha256Hash> {
        vec![
            hash_from_reversed_hex("f0db27cd89551bd197bf551bf697d6eab8fea1fae982fe4b0055fdd58b1f7ee0").unwrap(),
            hash_from_reversed_hex("86fef17ab1b91ffd8e9e9b14823539e4a22116a078cda1de6e31ddbcbd070993").unwrap(),
        ]
    }

    fn txids(n: u8) -> Vec<Sha256Hash> {
        (0..n).map(|i| double_sha256(&[i])).collect()
    }

    #[test]
    fn test_both_leaves_matched() {
        let header = block_one_header();
        let message = MerkleBlockMessage::new(header, 2, block_one_txids(), vec![0b0000_0111]);

        let proven = message.verify(&header.merkle_root).unwrap();
        assert_eq!(proven, block_one_txids());
    }

    #[test]
    fn test_root_only_descent_proves_nothing() {
        // flag bits 1,0,0: descend from the root, take both leaves unmatched
        let header = block_one_header();
        let message = MerkleBlockMessage::new(header, 2, block_one_txids(), vec![0b0000_0001]);

        assert!(message.verify(&header.merkle_root).unwrap().is_empty());
    }

    #[test]
    fn test_single_right_leaf() {
        let header = block_one_header();
        let message = MerkleBlockMessage::new(header, 2, block_one_txids(), vec![0b0000_0101]);

        assert_eq!(message.verify(&header.merkle_root).unwrap(), vec![block_one_txids()[1]]);
    }

    #[test]
    fn test_root_mismatch() {
        let header = block_one_header();
        let mut hashes = block_one_txids();
        hashes.swap(0, 1);
        let message = MerkleBlockMessage::new(header, 2, hashes, vec![0b0000_0111]);

        let err = message.verify(&header.merkle_root).unwrap_err();
        assert!(matches!(err, ChainError::InvalidMerkleProof(ref m) if m.starts_with("Recomputed root")));
    }

    #[test]
    fn test_inconsistent_counts() {
        let header = block_one_header();
        let root = header.merkle_root;

        // total says one transaction but two hashes supplied
        let message = MerkleBlockMessage::new(header, 1, block_one_txids(), vec![1, 0, 0]);
        assert!(message.verify(&root).is_err());

        // zero transactions
        let message = MerkleBlockMessage::new(header, 0, vec![], vec![]);
        assert!(message.verify(&root).is_err());

        // no flags at all
        let message = MerkleBlockMessage::new(header, 2, block_one_txids(), vec![]);
        assert!(message.verify(&root).is_err());

        // extra flag byte past the padding
        let message = MerkleBlockMessage::new(header, 2, block_one_txids(), vec![0b0000_0111, 0]);
        assert!(message.verify(&root).is_err());

        // leftover hash
        let mut hashes = block_one_txids();
        hashes.push([0u8; 32]);
        let message = MerkleBlockMessage::new(header, 3, hashes, vec![0b0000_0111]);
        assert!(message.verify(&root).is_err());
    }

    #[test]
    fn test_duplicate_siblings_rejected() {
        let a = block_one_txids()[0];
        let tree = PartialMerkleTree::new(2, vec![a, a], &[0b0000_0111]);
        let err = tree.extract_matches().unwrap_err();
        assert_eq!(err, ChainError::InvalidMerkleProof("Duplicate sibling hashes".to_string()));
    }

    #[test]
    fn test_single_transaction_block() {
        let coinbase = txids(1)[0];
        assert_eq!(merkle_root(&[coinbase]), coinbase);

        let tree = PartialMerkleTree::new(1, vec![coinbase], &[1]);
        let (root, matches) = tree.extract_matches().unwrap();
        assert_eq!(root, coinbase);
        assert_eq!(matches, vec![(0, coinbase)]);
    }

    #[test]
    fn test_build_then_extract_odd_tree() {
        let ids = txids(7);
        let matches = [false, true, false, false, true, false, true];
        let tree = PartialMerkleTree::build(&ids, &matches);

        let (root, found) = tree.extract_matches().unwrap();
        assert_eq!(root, merkle_root(&ids));
        assert_eq!(found, vec![(1, ids[1]), (4, ids[4]), (6, ids[6])]);
        // far fewer hashes than the full list
        assert!(tree.hashes.len() < ids.len());
    }

    #[test]
    fn test_merkle_root_matches_known_block() {
        assert_eq!(merkle_root(&block_one_txids()), block_one_header().merkle_root);
    }

    #[test]
    fn test_verify_against_wrong_block() {
        let header = block_one_header();
        let message = MerkleBlockMessage::new(header, 2, block_one_txids(), vec![0b0000_0111]);
        let other = Block::checkpoint(crate::blockchain::Network::Testnet.genesis_header(), 0).unwrap();

        assert!(matches!(message.verify_against(&other), Err(ChainError::InvalidMerkleProof(_))));
    }

    #[test]
    fn test_wire_roundtrip_and_truncation() {
        let header = block_one_header();
        let message = MerkleBlockMessage::new(header, 2, block_one_txids(), vec![0b0000_0111]);
        let bytes = message.to_bytes();
        assert_eq!(bytes.len(), 80 + 4 + 1 + 64 + 1 + 1);
        assert_eq!(MerkleBlockMessage::from_bytes(&bytes).unwrap(), message);

        assert!(MerkleBlockMessage::from_bytes(&bytes[..bytes.len() - 1]).is_err());
        let mut trailing = bytes.clone();
        trailing.push(0);
        assert!(MerkleBlockMessage::from_bytes(&trailing).is_err());
    }

    #[test]
    fn test_verify_batch_keeps_order() {
        let header = block_one_header();
        let good = MerkleBlockMessage::new(header, 2, block_one_txids(), vec![0b0000_0111]);
        let bad = MerkleBlockMessage::new(header, 2, block_one_txids(), vec![0b0000_0111]);

        let results = verify_batch(&[(good, header.merkle_root), (bad, [0u8; 32])]);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].as_ref().unwrap().len(), 2);
        assert!(results[1].is_err());
    }
}
