//! Types and utilities for the per-interval rewards artifact of a staking
//! pool.
//!
//! Every completed reward interval produces one [`RewardsFile`][file::RewardsFile]:
//! the amounts owed to each node together with a Merkle proof that lets the
//! node claim them on-chain. The only thing anchored on-chain is the Merkle
//! root and the content identifier of the compressed file, so this crate
//! provides everything needed to go from one to the other:
//!
//! - [`merkle`] builds the tree over node reward leaves, produces proofs and
//!   recomputes roots from untrusted files.
//! - [`codec`] serializes canonically and compresses with a deterministic,
//!   maximum ratio zstd configuration.
//! - [`cid`] chunks compressed bytes into a Merkle DAG and returns its root
//!   identifier.
//! - [`builder`] assembles a complete file from per-node amounts.

#![deny(rustdoc::broken_intra_doc_links)]
#![deny(missing_debug_implementations)]
#![deny(missing_docs)]

pub mod builder;
pub mod cid;
pub mod codec;
pub mod file;
pub mod merkle;

mod quoted;

use alloy::primitives::{Address, B256};
use thiserror::Error;

/// Errors that can arise while building, encoding or verifying a rewards
/// artifact.
#[derive(Debug, Error)]
pub enum RewardsTreeError {
    /// The root recomputed from the file leaves does not match the expected
    /// one. The file must not be trusted.
    #[error("merkle root mismatch: expected {expected}, computed {computed}")]
    RootMismatch {
        /// Root the file was expected to commit to.
        expected: B256,
        /// Root recomputed from the leaves.
        computed: B256,
    },

    /// A proof was requested for a node that has no entry in the file.
    #[error("node {0} has no entry in the rewards file")]
    MissingNode(Address),

    /// Compression or decompression failed.
    #[error("codec error: {0}")]
    Codec(#[from] std::io::Error),

    /// The bytes are not a valid rewards file.
    #[error("malformed rewards file: {0}")]
    Malformed(#[from] serde_path_to_error::Error<serde_json::Error>),

    /// Serializing a rewards file failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A content identifier string could not be parsed.
    #[error("invalid content identifier '{0}'")]
    InvalidCid(String),
}

pub use builder::{IntervalHeader, RewardsFileBuilder};
pub use cid::Cid;
pub use file::{NodeRewardsInfo, RewardsFile, TotalRewards};
pub use merkle::RewardsMerkleTree;
