//! Chain reorganization: choosing between competing branches and computing
//! the rewiring needed to switch.

use crate::crypto::{hash_to_reversed_hex, Sha256Hash};
use crate::error::{ChainError, Result};
use std::cmp::Ordering;

use super::chain::Block;

/// What to do when a challenger branch has exactly as much work as the
/// active one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// Keep the branch that was seen first.
    #[default]
    FirstSeen,
    /// Switch to the branch that arrived last.
    Challenger,
}

/// Rewiring that turns the active chain into the challenger's.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReorgPlan {
    /// Last block shared by both branches.
    pub fork_point: Sha256Hash,
    /// Active blocks above the fork point, tip first.
    pub disconnect: Vec<Sha256Hash>,
    /// Challenger blocks above the fork point, fork point first.
    pub connect: Vec<Sha256Hash>,
}

impl ReorgPlan {
    /// False when the challenger simply extends the active tip.
    pub fn is_reorg(&self) -> bool {
        !self.disconnect.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct ReorgResolver {
    tie_break: TieBreak,
}

impl ReorgResolver {
    pub fn new(tie_break: TieBreak) -> Self {
        Self { tie_break }
    }

    pub fn tie_break(&self) -> TieBreak {
        self.tie_break
    }

    /// Both branches share every block up to their fork point, so comparing
    /// total chain work is the same as comparing work from the fork point on.
    pub fn should_switch(&self, tip: &Block, candidate: &Block) -> bool {
        if candidate.hash() == tip.hash() || candidate.main_chain {
            return false;
        }
        match candidate.chain_work.cmp(&tip.chain_work) {
            Ordering::Greater => true,
            Ordering::Less => false,
            Ordering::Equal => self.tie_break == TieBreak::Challenger,
        }
    }

    /// Walk both branches back to their common ancestor.
    ///
    /// `lookup` resolves a hash to a block, and must see blocks that are about
    /// to be inserted as well as stored ones.
    pub fn plan<F>(&self, tip: &Block, candidate: &Block, mut lookup: F) -> Result<ReorgPlan>
    where
        F: FnMut(&Sha256Hash) -> Result<Option<Block>>,
    {
        let mut active = tip.clone();
        let mut challenger = candidate.clone();
        let mut disconnect = Vec::new();
        let mut connect = Vec::new();

        while active.height > challenger.height {
            disconnect.push(active.hash());
            active = parent_of(&active, &mut lookup)?;
        }
        while challenger.height > active.height {
            connect.push(challenger.hash());
            challenger = parent_of(&challenger, &mut lookup)?;
        }
        while active.hash() != challenger.hash() {
            disconnect.push(active.hash());
            connect.push(challenger.hash());
            active = parent_of(&active, &mut lookup)?;
            challenger = parent_of(&challenger, &mut lookup)?;
        }

        connect.reverse();
        Ok(ReorgPlan {
            fork_point: active.hash(),
            disconnect,
            connect,
        })
    }
}

fn parent_of<F>(block: &Block, lookup: &mut F) -> Result<Block>
where
    F: FnMut(&Sha256Hash) -> Result<Option<Block>>,
{
    lookup(&block.previous_hash())?.ok_or_else(|| {
        ChainError::StorageFailure(format!(
            "Ancestry of {} is broken at height {}: parent {} missing",
            block.hash_hex(),
            block.height,
            hash_to_reversed_hex(&block.previous_hash())
        ))
    })
}
