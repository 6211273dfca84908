//! Mapping wall-clock times to execution blocks and reward intervals to
//! consensus slots.

use thiserror::Error;
use tracing::{debug, trace};

use crate::beacon::BeaconClient;
use crate::provider::{BlockHeader, HeaderProvider};
use crate::rewards::RewardsEvent;

#[derive(Debug, Error)]
pub enum LocatorError {
    #[error("no execution block at or before unix time {target}")]
    NotFound { target: u64 },

    #[error("scanned up to the chain head (slot {slot}) without finding a beacon block")]
    HeadReached { slot: u64 },

    #[error(
        "couldn't retrieve the beacon block of the previous interval (slot {slot}); the beacon \
         node was likely checkpoint synced and has not backfilled that far yet"
    )]
    PreviousIntervalUnavailable { slot: u64 },

    #[error("error reading the chain")]
    Chain(#[from] anyhow::Error),
}

/// Latest execution block created at or before unix time `target`, never the
/// head itself.
///
/// Bisects between `deploy_block` and the head, starting at the midpoint. A
/// target older than `deploy_block` is searched for between genesis and
/// `deploy_block` instead, so the number of header reads stays logarithmic in
/// the chain length.
pub async fn block_for_time<P: HeaderProvider>(
    provider: &P,
    deploy_block: u64,
    target: u64,
) -> Result<BlockHeader, LocatorError> {
    let head = provider.latest_header().await?.number;
    let Some(ceiling) = head.checked_sub(1) else {
        return Err(LocatorError::NotFound { target });
    };

    // `before` is at or before `target`; `after` is the first block known to
    // be after it, or the head.
    let floor = provider.header_by_number(deploy_block.min(ceiling)).await?;
    let (mut before, mut after) = if floor.timestamp <= target {
        (floor, head)
    } else if floor.number == 0 {
        return Err(LocatorError::NotFound { target });
    } else {
        debug!(target, deploy_block, "target predates the deploy block");
        let genesis = provider.header_by_number(0).await?;
        if genesis.timestamp > target {
            return Err(LocatorError::NotFound { target });
        }
        (genesis, floor.number)
    };

    while after - before.number > 1 {
        let pivot = before.number + (after - before.number) / 2;
        let candidate = provider.header_by_number(pivot).await?;
        trace!(block = candidate.number, timestamp = candidate.timestamp, target, "block search candidate");
        if candidate.timestamp <= target {
            before = candidate;
        } else {
            after = pivot;
        }
    }

    debug!(target, block = before.number, timestamp = before.timestamp, "located block for time");
    Ok(before)
}

/// First slot at or after `start` that has a beacon block, scanning no
/// further than the epoch of the current head.
pub async fn first_slot_with_block<B: BeaconClient>(beacon: &B, start: u64) -> Result<u64, LocatorError> {
    let head = beacon.beacon_head().await?;
    let config = beacon.eth2_config().await?;

    let mut slot = start;
    while config.epoch_of(slot) <= head.epoch {
        if beacon.beacon_block(slot).await?.is_some() {
            return Ok(slot);
        }
        trace!(slot, "slot has no beacon block");
        slot += 1;
    }
    Err(LocatorError::HeadReached { slot })
}

/// First slot of the interval following `previous`: the first slot with a
/// block, starting at the epoch after the previous interval's snapshot slot.
pub async fn start_slot_for_interval<B: BeaconClient>(
    beacon: &B,
    previous: &RewardsEvent,
) -> Result<u64, LocatorError> {
    let previous_slot = previous.consensus_block;
    if beacon.beacon_block(previous_slot).await?.is_none() {
        return Err(LocatorError::PreviousIntervalUnavailable {
            slot: previous_slot,
        });
    }

    let config = beacon.eth2_config().await?;
    let start = config.first_slot_of(config.epoch_of(previous_slot) + 1);
    first_slot_with_block(beacon, start).await
}
