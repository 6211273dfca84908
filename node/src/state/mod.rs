//! A consistent view of the pool at one execution block / consensus slot
//! pair.

mod builder;
mod settings;

use alloy::primitives::{Address, U256};
use hashbrown::{HashMap, HashSet};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use self::builder::StateSnapshotBuilder;
pub use self::settings::{NetworkDetails, NetworkSetting};
use crate::beacon::{Eth2Config, ValidatorPubkey, ValidatorStatus};

#[derive(Debug, Error)]
pub enum SnapshotError {
    /// The consensus layer has no block at the requested slot.
    #[error("slot {slot} did not have a beacon block")]
    SlotNotFound { slot: u64 },

    /// The beacon node failed to answer for `slot`.
    #[error("error reading the consensus layer at slot {slot}")]
    Beacon {
        slot: u64,
        #[source]
        source: anyhow::Error,
    },

    /// A read of the fan-out failed. The snapshot is abandoned.
    #[error("error reading {what} at block {block}")]
    Read {
        what: String,
        block: u64,
        #[source]
        source: anyhow::Error,
    },

    /// The reads succeeded but do not describe a coherent state.
    #[error("inconsistent state at block {block}: {reason}")]
    Inconsistent { block: u64, reason: String },
}

/// Lifecycle of a minipool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MinipoolStatus {
    /// Created but not yet deposited.
    PendingCreation,
    Prelaunch,
    Staking,
    Withdrawable,
    Dissolved,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDetails {
    pub address: Address,
    pub exists: bool,
    /// Unix time.
    #[serde(with = "crate::quoted::u64")]
    pub registration_time: u64,
    #[serde(with = "crate::quoted::u256")]
    pub rpl_stake: U256,
    #[serde(default)]
    pub smoothing_pool_registered: bool,
    #[serde(default, with = "crate::quoted::u64")]
    pub minipool_count: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MinipoolDetails {
    pub address: Address,
    pub exists: bool,
    pub node_address: Address,
    pub status: MinipoolStatus,
    /// All zero while the validator key is unknown.
    pub pubkey: ValidatorPubkey,
    /// Bonded ETH.
    #[serde(with = "crate::quoted::u256")]
    pub node_deposit_balance: U256,
    /// Borrowed ETH.
    #[serde(with = "crate::quoted::u256")]
    pub user_deposit_balance: U256,
    #[serde(with = "crate::quoted::u256")]
    pub node_fee: U256,
    /// Unix time of the last bond reduction, zero if never reduced.
    #[serde(default, with = "crate::quoted::u64")]
    pub last_bond_reduction_time: u64,
    #[serde(default, with = "crate::quoted::u256")]
    pub last_bond_reduction_prev_value: U256,
    /// Zero for minipools reduced before the previous fee was tracked.
    #[serde(default, with = "crate::quoted::u256")]
    pub last_bond_reduction_prev_node_fee: U256,
    /// Node share of the combined execution and beacon balance, filled in by
    /// the last snapshot phase.
    #[serde(default, with = "crate::quoted::u256")]
    pub node_share_of_balance: U256,
    #[serde(default, with = "crate::quoted::u256")]
    pub user_share_of_balance: U256,
}

impl MinipoolDetails {
    pub fn has_pubkey(&self) -> bool {
        self.pubkey != ValidatorPubkey::ZERO
    }

    /// Bond and node fee in effect at `block_time`.
    ///
    /// A block before the last reduction sees the previous bond. Minipools
    /// reduced before the previous fee was recorded keep their current fee.
    pub fn bond_and_fee_at(&self, block_time: u64) -> (U256, U256) {
        if self.last_bond_reduction_time == 0 || block_time >= self.last_bond_reduction_time {
            return (self.node_deposit_balance, self.node_fee);
        }
        if self.last_bond_reduction_prev_node_fee.is_zero() {
            (self.last_bond_reduction_prev_value, self.node_fee)
        } else {
            (
                self.last_bond_reduction_prev_value,
                self.last_bond_reduction_prev_node_fee,
            )
        }
    }
}

/// Immutable view of the pool at `(el_block, slot)`.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub el_block: u64,
    pub slot: u64,
    pub beacon_config: Eth2Config,
    pub is_atlas_deployed: bool,
    pub network: NetworkDetails,
    pub nodes: Vec<NodeDetails>,
    pub minipools: Vec<MinipoolDetails>,
    pub validators: HashMap<ValidatorPubkey, ValidatorStatus>,
    #[serde(skip)]
    nodes_by_address: HashMap<Address, usize>,
    #[serde(skip)]
    minipools_by_address: HashMap<Address, usize>,
    #[serde(skip)]
    minipools_by_node: HashMap<Address, Vec<usize>>,
}

/// Everything read for a snapshot, before indexing and validation.
#[derive(Clone, Debug)]
pub struct SnapshotParts {
    pub el_block: u64,
    pub slot: u64,
    pub beacon_config: Eth2Config,
    pub is_atlas_deployed: bool,
    pub network: NetworkDetails,
    pub nodes: Vec<NodeDetails>,
    pub minipools: Vec<MinipoolDetails>,
    pub validators: HashMap<ValidatorPubkey, ValidatorStatus>,
}

impl Snapshot {
    /// Indexes the parts and checks that they reference each other
    /// consistently: node and minipool addresses are unique, every minipool
    /// belongs to a known node and no two minipools share a validator key.
    pub fn from_parts(parts: SnapshotParts) -> Result<Self, SnapshotError> {
        let SnapshotParts {
            el_block,
            slot,
            beacon_config,
            is_atlas_deployed,
            network,
            nodes,
            minipools,
            validators,
        } = parts;
        let inconsistent = |reason: String| SnapshotError::Inconsistent {
            block: el_block,
            reason,
        };

        let mut nodes_by_address = HashMap::with_capacity(nodes.len());
        for (i, node) in nodes.iter().enumerate() {
            if nodes_by_address.insert(node.address, i).is_some() {
                return Err(inconsistent(format!("node {} is listed twice", node.address)));
            }
        }

        let mut minipools_by_address = HashMap::with_capacity(minipools.len());
        let mut minipools_by_node: HashMap<Address, Vec<usize>> = HashMap::new();
        let mut pubkeys = HashSet::with_capacity(minipools.len());
        for (i, mp) in minipools.iter().enumerate() {
            if minipools_by_address.insert(mp.address, i).is_some() {
                return Err(inconsistent(format!("minipool {} is listed twice", mp.address)));
            }
            if !nodes_by_address.contains_key(&mp.node_address) {
                return Err(inconsistent(format!(
                    "minipool {} belongs to unknown node {}",
                    mp.address, mp.node_address
                )));
            }
            if mp.has_pubkey() && !pubkeys.insert(mp.pubkey) {
                return Err(inconsistent(format!(
                    "validator {} is claimed by more than one minipool",
                    mp.pubkey
                )));
            }
            minipools_by_node.entry(mp.node_address).or_default().push(i);
        }

        Ok(Self {
            el_block,
            slot,
            beacon_config,
            is_atlas_deployed,
            network,
            nodes,
            minipools,
            validators,
            nodes_by_address,
            minipools_by_address,
            minipools_by_node,
        })
    }

    pub fn node(&self, address: &Address) -> Option<&NodeDetails> {
        self.nodes_by_address.get(address).map(|&i| &self.nodes[i])
    }

    pub fn minipool(&self, address: &Address) -> Option<&MinipoolDetails> {
        self.minipools_by_address
            .get(address)
            .map(|&i| &self.minipools[i])
    }

    /// Minipools owned by `node`, in snapshot order.
    pub fn minipools_of<'a>(
        &'a self,
        node: &Address,
    ) -> impl Iterator<Item = &'a MinipoolDetails> + 'a {
        self.minipools_by_node
            .get(node)
            .into_iter()
            .flatten()
            .map(|&i| &self.minipools[i])
    }

    pub fn validator(&self, pubkey: &ValidatorPubkey) -> Option<&ValidatorStatus> {
        self.validators.get(pubkey)
    }

    /// Unix time of the snapshot slot.
    pub fn slot_time(&self) -> u64 {
        self.beacon_config.slot_time(self.slot)
    }

    /// Epoch of the snapshot slot, the last epoch an interval ending here
    /// covers.
    pub fn epoch(&self) -> u64 {
        self.beacon_config.epoch_of(self.slot)
    }
}
