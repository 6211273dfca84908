//! Assembly of a complete [`RewardsFile`] from per-node amounts.

use std::collections::BTreeMap;

use alloy::primitives::{Address, U256};

use crate::file::{NodeRewardsInfo, RewardsFile, TotalRewards, REWARDS_FILE_VERSION};
use crate::merkle::{node_leaf, RewardsMerkleTree};

/// Interval metadata carried verbatim into the built file.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IntervalHeader {
    /// Interval index.
    pub index: u64,
    /// Network name.
    pub network: String,
    /// Unix start time.
    pub start_time: u64,
    /// Unix end time.
    pub end_time: u64,
    /// Consensus-layer snapshot slot.
    pub consensus_end_block: u64,
    /// Execution-layer snapshot block.
    pub execution_end_block: u64,
    /// Number of intervals covered.
    pub intervals_passed: u64,
}

/// Accumulates rewards per node and produces a file with a root and a proof
/// for every node.
///
/// Nodes whose accumulated amounts are all zero are left out of the tree.
#[derive(Clone, Debug)]
pub struct RewardsFileBuilder {
    header: IntervalHeader,
    nodes: BTreeMap<Address, NodeRewardsInfo>,
}

impl RewardsFileBuilder {
    /// Starts an empty file for the given interval.
    pub fn new(header: IntervalHeader) -> Self {
        Self {
            header,
            nodes: BTreeMap::new(),
        }
    }

    /// Adds amounts to `node`. Calling this repeatedly for the same node
    /// accumulates.
    pub fn add(
        &mut self,
        node: Address,
        collateral_rpl: U256,
        oracle_rpl: U256,
        smoothing_pool_eth: U256,
    ) -> &mut Self {
        let entry = self.nodes.entry(node).or_default();
        entry.collateral_rpl += collateral_rpl;
        entry.oracle_rpl += oracle_rpl;
        entry.smoothing_pool_eth += smoothing_pool_eth;
        self
    }

    /// Builds the file, filling in the Merkle root, every node's proof and
    /// the interval totals.
    pub fn build(self) -> RewardsFile {
        let mut nodes: BTreeMap<_, _> = self
            .nodes
            .into_iter()
            .filter(|(_, info)| !info.is_empty())
            .collect();

        let leaves: Vec<_> = nodes
            .iter()
            .map(|(address, info)| (*address, node_leaf(*address, info)))
            .collect();
        let tree = RewardsMerkleTree::from_leaves(leaves.iter().map(|(_, leaf)| *leaf));

        let mut totals = TotalRewards::default();
        for (address, leaf) in leaves {
            if let Some(info) = nodes.get_mut(&address) {
                info.merkle_proof = tree.proof(leaf).unwrap_or_default();
                totals.total_collateral_rpl += info.collateral_rpl;
                totals.total_oracle_rpl += info.oracle_rpl;
                totals.total_smoothing_pool_eth += info.smoothing_pool_eth;
            }
        }

        let IntervalHeader {
            index,
            network,
            start_time,
            end_time,
            consensus_end_block,
            execution_end_block,
            intervals_passed,
        } = self.header;

        RewardsFile {
            rewards_file_version: REWARDS_FILE_VERSION,
            index,
            network,
            start_time,
            end_time,
            consensus_end_block,
            execution_end_block,
            intervals_passed,
            merkle_root: tree.root(),
            total_rewards: totals,
            node_rewards: nodes,
        }
    }
}

/// Splits `pool` between participants in proportion to their weights.
///
/// Integer division rounds every share down, so the shares may sum to
/// slightly less than `pool`. Returns all zeros when the weights sum to zero.
pub fn apportion(pool: U256, weights: &BTreeMap<Address, U256>) -> BTreeMap<Address, U256> {
    let total: U256 = weights.values().fold(U256::ZERO, |acc, w| acc.saturating_add(*w));
    weights
        .iter()
        .map(|(address, weight)| {
            let share = if total.is_zero() {
                U256::ZERO
            } else {
                pool.saturating_mul(*weight) / total
            };
            (*address, share)
        })
        .collect()
}
