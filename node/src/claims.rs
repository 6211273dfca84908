//! Which reward intervals a node has already claimed.
//!
//! The rewards contracts keep one packed 256-bit word per node and bucket of
//! 256 intervals in the protocol's key/value storage. Bit `i % 256` of bucket
//! `i / 256` is set once interval `i` has been claimed.

use alloy::primitives::{keccak256, Address, B256, U256};
use anyhow::Context as _;
use serde::Serialize;

use crate::facade::{ChainFacade, ReadCall};

const CLAIMED_KEY_PREFIX: &[u8] = b"rewards.interval.claimed";

const BUCKET_BITS: u64 = 256;

/// Claimed and unclaimed intervals of one node, both ascending.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ClaimStatus {
    pub claimed: Vec<u64>,
    pub unclaimed: Vec<u64>,
}

/// Storage key of `node`'s claim bitmap for `bucket`.
pub fn claim_bitmap_key(node: Address, bucket: u64) -> B256 {
    let mut preimage = Vec::with_capacity(CLAIMED_KEY_PREFIX.len() + 20 + 32);
    preimage.extend_from_slice(CLAIMED_KEY_PREFIX);
    preimage.extend_from_slice(node.as_slice());
    preimage.extend_from_slice(&U256::from(bucket).to_be_bytes::<32>());
    keccak256(preimage)
}

/// Number of bitmap words covering intervals `0..=current_index`.
pub fn bucket_count(current_index: u64) -> u64 {
    current_index / BUCKET_BITS + 1
}

/// Splits `0..current_index` into claimed and unclaimed intervals given the
/// bitmap of every bucket, in bucket order. Missing buckets read as empty.
pub fn decode_claim_bitmaps(bitmaps: &[U256], current_index: u64) -> ClaimStatus {
    let mut status = ClaimStatus::default();
    for index in 0..current_index {
        let bitmap = bitmaps
            .get((index / BUCKET_BITS) as usize)
            .copied()
            .unwrap_or_default();
        if bitmap.bit((index % BUCKET_BITS) as usize) {
            status.claimed.push(index);
        } else {
            status.unclaimed.push(index);
        }
    }
    status
}

/// `ClaimStatusTracker`: reads `node`'s bitmaps at `block` (latest when
/// `None`) and partitions the completed intervals.
pub async fn claim_status<F: ChainFacade>(
    facade: &F,
    node: Address,
    current_index: u64,
    block: Option<u64>,
) -> anyhow::Result<ClaimStatus> {
    let calls: Vec<ReadCall> = (0..bucket_count(current_index))
        .map(|bucket| ReadCall::StorageUint(claim_bitmap_key(node, bucket)))
        .collect();
    let bitmaps = facade
        .batch_read(&calls, block)
        .await
        .with_context(|| format!("error reading claimed intervals of node {node}"))?;
    Ok(decode_claim_bitmaps(&bitmaps, current_index))
}
