//! Helpers for building regtest chains in unit tests.

use crate::blockchain::core::chain::{BlockHeader, Blockchain};
use crate::blockchain::core::validation::{check_proof_of_work, ChainParams, Network};
use crate::crypto::Sha256Hash;

const REGTEST_BITS: u32 = 0x207f_ffff;

/// Regtest chain anchored at the regtest genesis header, placed at
/// `checkpoint_height`.
pub(crate) fn regtest_chain(checkpoint_height: u32) -> Blockchain {
    let params = ChainParams::new(Network::Regtest)
        .with_checkpoint(Network::Regtest.genesis_header(), checkpoint_height);
    Blockchain::new(params).expect("regtest chain")
}

/// Search nonces until the header meets the regtest target.
pub(crate) fn mine_header(previous: &Sha256Hash, merkle_root: Sha256Hash, timestamp: u32) -> BlockHeader {
    let mut header = BlockHeader {
        version: 0x2000_0000,
        previous_block_hash: *previous,
        merkle_root,
        timestamp,
        bits: REGTEST_BITS,
        nonce: 0,
    };
    while check_proof_of_work(&header.hash(), header.bits, Network::Regtest).is_err() {
        header.nonce += 1;
    }
    header
}

/// `count` headers each extending the previous one. `branch` keeps headers of
/// competing branches distinct.
pub(crate) fn mine_chain(previous: &Sha256Hash, count: usize, branch: u32) -> Vec<BlockHeader> {
    let mut headers = Vec::with_capacity(count);
    let mut parent = *previous;
    for i in 0..count {
        let header = mine_header(&parent, [0u8; 32], 1_600_000_000 + branch * 10_000 + i as u32);
        parent = header.hash();
        headers.push(header);
    }
    headers
}

pub(crate) fn raw(headers: &[BlockHeader]) -> Vec<Vec<u8>> {
    headers.iter().map(|h| h.to_bytes().to_vec()).collect()
}
