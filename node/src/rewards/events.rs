use alloy::primitives::{Address, B256};
use tracing::debug;

use super::{ArtifactError, RewardsEvent};
use crate::config::Network;
use crate::facade::{ChainFacade, ReadCall};

/// Contract name of the rewards pool in the protocol's storage registry.
const REWARDS_POOL_CONTRACT: &str = "rocketRewardsPool";

/// An interval whose event predates the current event format and cannot be
/// found by scanning the rewards pools.
#[derive(Clone, Copy, Debug)]
pub struct PrehistoricEvent {
    pub network: Network,
    pub index: u64,
    pub start_time: u64,
    pub end_time: u64,
    pub consensus_block: u64,
    pub execution_block: u64,
    pub merkle_root: B256,
    pub merkle_tree_cid: &'static str,
}

impl PrehistoricEvent {
    fn to_event(self) -> RewardsEvent {
        RewardsEvent {
            index: self.index,
            start_time: self.start_time,
            end_time: self.end_time,
            consensus_block: self.consensus_block,
            execution_block: self.execution_block,
            merkle_root: self.merkle_root,
            merkle_tree_cid: self.merkle_tree_cid.to_string(),
            intervals_passed: 1,
        }
    }
}

/// Events served without touching the chain, indexed by network and
/// interval.
///
/// Holds the first Prater intervals (0 through 5), which were submitted
/// before the `RewardsSnapshotSubmitted` event carried the fields decoded
/// into [`RewardsEvent`]. Mainnet and Holesky never needed entries. Prater
/// has since been retired and its early intervals can no longer be claimed,
/// so the table is empty; a network relaunched with pre-event intervals adds
/// them here.
pub static PREHISTORY: &[PrehistoricEvent] = &[];

fn prehistoric(table: &[PrehistoricEvent], network: Network, interval: u64) -> Option<RewardsEvent> {
    table
        .iter()
        .find(|e| e.network == network && e.index == interval)
        .map(|e| e.to_event())
}

/// Finds the `RewardsEvent` of `interval`. Known prehistoric intervals come
/// from [`PREHISTORY`]; everything else is looked up in the current rewards
/// pool and then in each of `previous_pools`, in order. The first pool that
/// emitted the event wins.
pub async fn resolve_rewards_event<F: ChainFacade>(
    facade: &F,
    network: Network,
    previous_pools: &[Address],
    interval: u64,
    block: Option<u64>,
) -> Result<RewardsEvent, ArtifactError> {
    resolve_with(PREHISTORY, facade, network, previous_pools, interval, block).await
}

async fn resolve_with<F: ChainFacade>(
    table: &[PrehistoricEvent],
    facade: &F,
    network: Network,
    previous_pools: &[Address],
    interval: u64,
    block: Option<u64>,
) -> Result<RewardsEvent, ArtifactError> {
    if let Some(event) = prehistoric(table, network, interval) {
        debug!(%network, interval, "using prehistoric rewards event");
        return Ok(event);
    }

    let read_err = |source| ArtifactError::Read { interval, source };
    let current = facade
        .batch_read(
            &[ReadCall::ContractAddress(REWARDS_POOL_CONTRACT.into())],
            block,
        )
        .await
        .map_err(read_err)?
        .first()
        .map(|word| Address::from_word(B256::from(word.to_be_bytes::<32>())))
        .ok_or_else(|| read_err(anyhow::anyhow!("no address returned for {REWARDS_POOL_CONTRACT}")))?;

    let pools = std::iter::once(current)
        .chain(previous_pools.iter().copied())
        .filter(|pool| !pool.is_zero());
    for pool in pools {
        if let Some(event) = facade.rewards_event(pool, interval).await.map_err(read_err)? {
            debug!(%pool, interval, "found rewards event");
            return Ok(event);
        }
    }
    Err(ArtifactError::EventNotFound { interval })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeFacade;

    fn event(index: u64, root: u8) -> RewardsEvent {
        RewardsEvent {
            index,
            start_time: 100,
            end_time: 200,
            consensus_block: 10,
            execution_block: 20,
            merkle_root: B256::repeat_byte(root),
            merkle_tree_cid: format!("bafy{index}"),
            intervals_passed: 1,
        }
    }

    const CURRENT: Address = Address::with_last_byte(0xc0);
    const OLD: Address = Address::with_last_byte(0x01);
    const OLDER: Address = Address::with_last_byte(0x02);

    fn facade() -> FakeFacade {
        let mut facade = FakeFacade::default();
        facade.contracts.insert(REWARDS_POOL_CONTRACT.into(), CURRENT);
        facade
    }

    #[tokio::test]
    async fn current_pool_first() {
        let mut facade = facade();
        facade.rewards_events.insert((CURRENT, 9), event(9, 1));
        facade.rewards_events.insert((OLD, 9), event(9, 2));
        let found = resolve_rewards_event(&facade, Network::Mainnet, &[OLD], 9, None)
            .await
            .unwrap();
        assert_eq!(found.merkle_root, B256::repeat_byte(1));
    }

    #[tokio::test]
    async fn falls_back_to_previous_pools_in_order() {
        let mut facade = facade();
        facade.rewards_events.insert((OLDER, 2), event(2, 3));
        let found = resolve_rewards_event(&facade, Network::Mainnet, &[OLD, OLDER], 2, None)
            .await
            .unwrap();
        assert_eq!(found.merkle_root, B256::repeat_byte(3));
    }

    #[tokio::test]
    async fn missing_everywhere_is_not_found() {
        let facade = facade();
        let err = resolve_rewards_event(&facade, Network::Mainnet, &[OLD], 5, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ArtifactError::EventNotFound { interval: 5 }));
    }

    #[tokio::test]
    async fn empty_pool_lookup_is_a_read_error() {
        let mut facade = facade();
        facade.empty_reads = true;
        facade.rewards_events.insert((OLD, 4), event(4, 1));
        let err = resolve_rewards_event(&facade, Network::Mainnet, &[OLD], 4, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ArtifactError::Read { interval: 4, .. }), "{err:?}");
    }

    #[tokio::test]
    async fn prehistory_skips_the_chain() {
        let table = [PrehistoricEvent {
            network: Network::Prater,
            index: 0,
            start_time: 1,
            end_time: 2,
            consensus_block: 3,
            execution_block: 4,
            merkle_root: B256::repeat_byte(9),
            merkle_tree_cid: "bafyprehistoric",
        }];
        // No rewards pool registered: any chain access would fail.
        let facade = FakeFacade::default();
        let found = resolve_with(&table, &facade, Network::Prater, &[], 0, None)
            .await
            .unwrap();
        assert_eq!(found.merkle_tree_cid, "bafyprehistoric");
        assert!(facade.read_calls().is_empty());

        // Same index on another network goes to the chain.
        assert!(resolve_with(&table, &facade, Network::Mainnet, &[], 0, None)
            .await
            .is_err());
    }
}
