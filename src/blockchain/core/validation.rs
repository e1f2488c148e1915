//! Header validation: compact targets, proof-of-work and chain work.

use crate::blockchain::core::chain::BlockHeader;
use crate::blockchain::core::reorg::TieBreak;
use crate::crypto::Sha256Hash;
use crate::error::{ChainError, Result};
use primitive_types::U256;

/// Merkle root shared by the mainnet, testnet and regtest genesis blocks.
const GENESIS_MERKLE_ROOT: Sha256Hash = [
    0x3b, 0xa3, 0xed, 0xfd, 0x7a, 0x7b, 0x12, 0xb2, 0x7a, 0xc7, 0x2c, 0x3e, 0x67, 0x76, 0x8f, 0x61,
    0x7f, 0xc8, 0x1b, 0xc3, 0x88, 0x8a, 0x51, 0x32, 0x3a, 0x9f, 0xb8, 0xaa, 0x4b, 0x1e, 0x5e, 0x4a,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Testnet,
    Regtest,
}

impl Network {
    /// Easiest target a header on this network may claim, in compact form.
    pub fn pow_limit_bits(&self) -> u32 {
        match self {
            Network::Mainnet | Network::Testnet => 0x1d00_ffff,
            Network::Regtest => 0x207f_ffff,
        }
    }

    pub fn genesis_header(&self) -> BlockHeader {
        let (timestamp, nonce) = match self {
            Network::Mainnet => (1_231_006_505, 2_083_236_893),
            Network::Testnet => (1_296_688_602, 414_098_458),
            Network::Regtest => (1_296_688_602, 2),
        };
        BlockHeader {
            version: 1,
            previous_block_hash: [0u8; 32],
            merkle_root: GENESIS_MERKLE_ROOT,
            timestamp,
            bits: self.pow_limit_bits(),
            nonce,
        }
    }
}

/// Runtime parameters of one chain instance.
#[derive(Debug, Clone)]
pub struct ChainParams {
    pub network: Network,
    pub checkpoint: BlockHeader,
    pub checkpoint_height: u32,
    pub check_proof_of_work: bool,
    pub tie_break: TieBreak,
    pub block_cache_capacity: usize,
}

impl ChainParams {
    /// Parameters anchored at the network's genesis block.
    pub fn new(network: Network) -> Self {
        Self {
            network,
            checkpoint: network.genesis_header(),
            checkpoint_height: 0,
            check_proof_of_work: true,
            tie_break: TieBreak::default(),
            block_cache_capacity: crate::cache::BlockCache::DEFAULT_CAPACITY,
        }
    }

    pub fn with_checkpoint(mut self, header: BlockHeader, height: u32) -> Self {
        self.checkpoint = header;
        self.checkpoint_height = height;
        self
    }

    pub fn with_tie_break(mut self, tie_break: TieBreak) -> Self {
        self.tie_break = tie_break;
        self
    }
}

/// Expand compact `bits` into a 256-bit target.
///
/// Rejects the encodings a valid header can never carry: a set sign bit, a
/// zero mantissa, or an exponent that pushes the mantissa past 256 bits.
pub fn compact_to_target(bits: u32) -> Result<U256> {
    let exponent = bits >> 24;
    let mantissa = bits & 0x007f_ffff;

    if mantissa == 0 {
        return Err(ChainError::InvalidHeader(format!("Zero target in bits {:#010x}", bits)));
    }
    if bits & 0x0080_0000 != 0 {
        return Err(ChainError::InvalidHeader(format!("Negative target in bits {:#010x}", bits)));
    }
    if exponent > 34 || (mantissa > 0xff && exponent > 33) || (mantissa > 0xffff && exponent > 32) {
        return Err(ChainError::InvalidHeader(format!("Target overflow in bits {:#010x}", bits)));
    }

    let target = if exponent <= 3 {
        U256::from(mantissa >> (8 * (3 - exponent)))
    } else {
        U256::from(mantissa) << (8 * (exponent - 3))
    };

    if target.is_zero() {
        return Err(ChainError::InvalidHeader(format!("Zero target in bits {:#010x}", bits)));
    }
    Ok(target)
}

/// Expected number of hashes needed to meet `bits`: 2^256 / (target + 1).
pub fn block_work(bits: u32) -> Result<U256> {
    let target = compact_to_target(bits)?;
    // 2^256 does not fit, so use (2^256 - target - 1) / (target + 1) + 1
    Ok((!target / (target + U256::one())) + U256::one())
}

/// Check that `hash` meets the target encoded in `bits` and that the target
/// itself is no easier than the network allows.
pub fn check_proof_of_work(hash: &Sha256Hash, bits: u32, network: Network) -> Result<()> {
    let target = compact_to_target(bits)?;
    let limit = compact_to_target(network.pow_limit_bits())?;
    if target > limit {
        return Err(ChainError::InvalidHeader(format!(
            "Target {:#010x} is easier than the {:?} limit",
            bits, network
        )));
    }

    let value = U256::from_little_endian(hash);
    if value > target {
        return Err(ChainError::InvalidHeader(format!(
            "Hash {} does not meet target {:#010x}",
            crate::crypto::hash_to_reversed_hex(hash),
            bits
        )));
    }
    Ok(())
}

/// Decode raw header bytes and run the proof-of-work check when enabled.
pub fn validate_header(raw: &[u8], params: &ChainParams) -> Result<BlockHeader> {
    let header = BlockHeader::from_bytes(raw)?;
    if params.check_proof_of_work {
        check_proof_of_work(&header.hash(), header.bits, params.network)?;
    }
    Ok(header)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hash_to_reversed_hex;

    #[test]
    fn test_genesis_hashes() {
        assert_eq!(
            Network::Mainnet.genesis_header().hash_hex(),
            "000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f"
        );
        assert_eq!(
            Network::Testnet.genesis_header().hash_hex(),
            "000000000933ea01ad0ee984209779baaec3ced90fa3f408719526f8d77f4943"
        );
        assert_eq!(
            Network::Regtest.genesis_header().hash_hex(),
            "0f9188f13cb7b2c71f2a335e3a4fc328bf5beb436012afca590b1a11466e2206"
        );
    }

    #[test]
    fn test_genesis_meets_its_own_target() {
        for network in [Network::Mainnet, Network::Testnet, Network::Regtest] {
            let header = network.genesis_header();
            assert!(check_proof_of_work(&header.hash(), header.bits, network).is_ok());
        }
    }

    #[test]
    fn test_compact_to_target() {
        let target = compact_to_target(0x1d00_ffff).unwrap();
        assert_eq!(target, U256::from(0xffffu64) << 208u32);

        assert_eq!(compact_to_target(0x0312_3456).unwrap(), U256::from(0x12_3456u64));
        assert_eq!(compact_to_target(0x0212_3456).unwrap(), U256::from(0x1234u64));
    }

    #[test]
    fn test_compact_rejects_bad_encodings() {
        assert!(compact_to_target(0x1d00_0000).is_err());
        assert!(compact_to_target(0x1d80_ffff).is_err());
        assert!(compact_to_target(0xff00_ffff).is_err());
        // mantissa shifted out entirely
        assert!(compact_to_target(0x0100_00ff).is_err());
    }

    #[test]
    fn test_block_work() {
        // difficulty-1 target yields 2^32 + 2^16 + 1 expected hashes
        assert_eq!(block_work(0x1d00_ffff).unwrap(), U256::from(0x1_0001_0001u64));
        assert_eq!(block_work(0x207f_ffff).unwrap(), U256::from(2u64));
    }

    #[test]
    fn test_check_proof_of_work_rejects_easy_target_on_mainnet() {
        let header = Network::Regtest.genesis_header();
        let err = check_proof_of_work(&header.hash(), header.bits, Network::Mainnet).unwrap_err();
        assert!(matches!(err, ChainError::InvalidHeader(_)));
    }

    #[test]
    fn test_check_proof_of_work_rejects_high_hash() {
        let mut header = Network::Mainnet.genesis_header();
        header.nonce += 1;
        let err = check_proof_of_work(&header.hash(), header.bits, Network::Mainnet).unwrap_err();
        assert!(err.to_string().contains(&hash_to_reversed_hex(&header.hash())));
    }

    #[test]
    fn test_validate_header_short_input() {
        let params = ChainParams::new(Network::Mainnet);
        assert!(matches!(validate_header(&[0u8; 79], &params), Err(ChainError::InvalidHeader(_))));
    }
}
