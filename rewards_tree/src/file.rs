//! The in-memory schema of a rewards file.

use std::collections::BTreeMap;

use alloy::primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};

use crate::merkle::{node_leaf, RewardsMerkleTree};
use crate::RewardsTreeError;

/// Current version of the rewards file layout.
pub const REWARDS_FILE_VERSION: u64 = 1;

/// Rewards owed to one node for one interval, together with the proof needed
/// to claim them.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRewardsInfo {
    /// Network the rewards are claimable on, `0` for the main chain.
    #[serde(default)]
    pub reward_network: u64,
    /// RPL earned for providing collateral.
    #[serde(with = "crate::quoted")]
    pub collateral_rpl: U256,
    /// RPL earned for oracle duties.
    #[serde(with = "crate::quoted")]
    pub oracle_rpl: U256,
    /// ETH earned from the smoothing pool.
    #[serde(with = "crate::quoted")]
    pub smoothing_pool_eth: U256,
    /// Sibling hashes from the node's leaf up to the root.
    #[serde(default)]
    pub merkle_proof: Vec<B256>,
}

impl NodeRewardsInfo {
    /// Total RPL owed to the node, which is what the leaf commits to.
    pub fn total_rpl(&self) -> U256 {
        self.collateral_rpl + self.oracle_rpl
    }

    /// Whether the entry carries any value at all.
    pub fn is_empty(&self) -> bool {
        self.collateral_rpl.is_zero() && self.oracle_rpl.is_zero() && self.smoothing_pool_eth.is_zero()
    }
}

/// Interval-wide totals.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TotalRewards {
    /// Sum of all collateral RPL.
    #[serde(with = "crate::quoted")]
    pub total_collateral_rpl: U256,
    /// Sum of all oracle RPL.
    #[serde(with = "crate::quoted")]
    pub total_oracle_rpl: U256,
    /// Sum of all smoothing pool ETH paid to nodes.
    #[serde(with = "crate::quoted")]
    pub total_smoothing_pool_eth: U256,
}

/// The full off-chain artifact for one reward interval.
///
/// Node entries are kept in a [`BTreeMap`] so serialization is canonical.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardsFile {
    /// Layout version.
    pub rewards_file_version: u64,
    /// Interval index.
    pub index: u64,
    /// Name of the network the interval belongs to.
    pub network: String,
    /// Unix time the interval started at.
    pub start_time: u64,
    /// Unix time the interval ended at.
    pub end_time: u64,
    /// Consensus-layer slot the interval was snapshotted at.
    pub consensus_end_block: u64,
    /// Execution-layer block paired with `consensus_end_block`.
    pub execution_end_block: u64,
    /// Number of intervals this file covers.
    pub intervals_passed: u64,
    /// Root of the Merkle tree over all node leaves.
    pub merkle_root: B256,
    /// Interval-wide totals.
    pub total_rewards: TotalRewards,
    /// Per-node rewards and proofs.
    pub node_rewards: BTreeMap<Address, NodeRewardsInfo>,
}

impl RewardsFile {
    /// Rebuilds the Merkle tree from the file's leaves and returns its root.
    /// The proofs stored in the file are ignored.
    pub fn compute_root(&self) -> B256 {
        RewardsMerkleTree::from_leaves(
            self.node_rewards
                .iter()
                .map(|(address, info)| node_leaf(*address, info)),
        )
        .root()
    }

    /// Recomputes the root and checks it against `expected`, typically the
    /// root recorded on-chain for this interval. The root stored in the file
    /// itself is checked as well.
    pub fn verify_root(&self, expected: B256) -> Result<(), RewardsTreeError> {
        let computed = self.compute_root();
        if computed != expected {
            return Err(RewardsTreeError::RootMismatch { expected, computed });
        }
        if self.merkle_root != expected {
            return Err(RewardsTreeError::RootMismatch {
                expected,
                computed: self.merkle_root,
            });
        }
        Ok(())
    }

    /// Checks the proof stored for `node` against the file's root.
    pub fn verify_node_proof(&self, node: Address) -> Result<bool, RewardsTreeError> {
        let info = self
            .node_rewards
            .get(&node)
            .ok_or(RewardsTreeError::MissingNode(node))?;
        Ok(crate::merkle::verify_proof(
            node_leaf(node, info),
            &info.merkle_proof,
            self.merkle_root,
        ))
    }
}
