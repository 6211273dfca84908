//! Rewards artifacts: the on-chain record of each interval, the published
//! file that goes with it, and the local copy a node claims from.

mod download;
mod events;
mod interval;

use std::path::PathBuf;

use alloy::primitives::{B256, U256};
use rewards_tree::builder::apportion;
use rewards_tree::cid::cid_for_file;
use rewards_tree::{codec, Cid, IntervalHeader, RewardsFile, RewardsFileBuilder, RewardsTreeError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub use self::download::{
    download_rewards_file, rewards_file_name, ArtifactSource, ArtifactStore, DownloadOutcome,
    FailureKind, HttpArtifactSource, Mirror, MirrorFailure,
};
pub use self::events::{resolve_rewards_event, PrehistoricEvent, PREHISTORY};
pub use self::interval::{interval_info, IntervalInfo, TreeFileStatus};
use crate::config::Network;
use crate::effective_stake::EffectiveStakes;
use crate::state::Snapshot;

/// `RewardsSnapshotSubmitted` as emitted by the rewards pool contract.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardsEvent {
    #[serde(with = "crate::quoted::u64")]
    pub index: u64,
    /// Unix time.
    #[serde(with = "crate::quoted::u64")]
    pub start_time: u64,
    #[serde(with = "crate::quoted::u64")]
    pub end_time: u64,
    /// Consensus-layer slot the interval was snapshotted at.
    #[serde(with = "crate::quoted::u64")]
    pub consensus_block: u64,
    #[serde(with = "crate::quoted::u64")]
    pub execution_block: u64,
    pub merkle_root: B256,
    pub merkle_tree_cid: String,
    #[serde(default = "one", with = "crate::quoted::u64")]
    pub intervals_passed: u64,
}

const fn one() -> u64 {
    1
}

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error(transparent)]
    Tree(#[from] RewardsTreeError),

    #[error("error accessing {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("rewards event for interval {interval} not found")]
    EventNotFound { interval: u64 },

    #[error("error looking up the rewards event for interval {interval}")]
    Read {
        interval: u64,
        #[source]
        source: anyhow::Error,
    },
}

/// A rewards file in its published form.
#[derive(Clone, Debug)]
pub struct PackagedArtifact {
    pub compressed: Vec<u8>,
    /// Name of the compressed file inside the directory `cid` points at.
    pub file_name: String,
    pub cid: Cid,
}

/// Serializes, compresses and content-addresses `file` for `network`.
/// Identical files always yield identical bytes and identifiers.
pub fn package(file: &RewardsFile, network: Network) -> Result<PackagedArtifact, ArtifactError> {
    let compressed = codec::encode(file)?;
    let file_name = format!(
        "{}{}",
        rewards_file_name(network, file.index),
        codec::COMPRESSED_EXTENSION
    );
    let cid = cid_for_file(&compressed, &file_name);
    debug!(interval = file.index, bytes = compressed.len(), %file_name, %cid, "packaged rewards file");
    Ok(PackagedArtifact {
        compressed,
        file_name,
        cid,
    })
}

/// Builds the collateral part of a rewards file: the pending RPL rewards
/// owed to node operators, split pro-rata over effective stake.
pub fn build_collateral_rewards(
    snapshot: &Snapshot,
    stakes: &EffectiveStakes,
    header: IntervalHeader,
) -> RewardsFile {
    let network = &snapshot.network;
    let pool = network
        .pending_rpl_rewards
        .saturating_mul(network.node_operator_rewards_percent)
        / U256::from(rp_common::ETHER);

    let mut builder = RewardsFileBuilder::new(header);
    for (node, amount) in apportion(pool, &stakes.weights()) {
        builder.add(node, amount, U256::ZERO, U256::ZERO);
    }
    builder.build()
}
