use std::path::PathBuf;

use alloy::primitives::Address;
use rewards_tree::NodeRewardsInfo;
use serde::Serialize;

use super::{resolve_rewards_event, ArtifactError, ArtifactStore};
use crate::facade::ChainFacade;

/// State of the local copy of an interval's rewards file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum TreeFileStatus {
    Missing,
    /// The file is unreadable or does not match the on-chain root.
    Invalid { reason: String },
    /// The file matches; `node` holds the node's amounts and proof if it
    /// earned anything.
    Valid { node: Option<NodeRewardsInfo> },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntervalInfo {
    pub index: u64,
    pub cid: String,
    pub start_time: u64,
    pub end_time: u64,
    pub tree_file_path: PathBuf,
    pub status: TreeFileStatus,
}

/// Everything `node` needs to know about `interval` before claiming it.
pub async fn interval_info<F: ChainFacade>(
    facade: &F,
    store: &ArtifactStore,
    previous_pools: &[Address],
    node: Address,
    interval: u64,
) -> Result<IntervalInfo, ArtifactError> {
    let event =
        resolve_rewards_event(facade, store.network(), previous_pools, interval, None).await?;

    let status = match store.load(interval).await {
        Ok(None) => TreeFileStatus::Missing,
        Ok(Some(file)) => match file.verify_root(event.merkle_root) {
            Ok(()) => TreeFileStatus::Valid {
                node: file.node_rewards.get(&node).cloned(),
            },
            Err(e) => TreeFileStatus::Invalid {
                reason: e.to_string(),
            },
        },
        Err(ArtifactError::Tree(e)) => TreeFileStatus::Invalid {
            reason: e.to_string(),
        },
        Err(e) => return Err(e),
    };

    Ok(IntervalInfo {
        index: interval,
        cid: event.merkle_tree_cid,
        start_time: event.start_time,
        end_time: event.end_time,
        tree_file_path: store.path(interval),
        status,
    })
}

#[cfg(test)]
mod tests {
    use alloy::primitives::{B256, U256};
    use rewards_tree::{IntervalHeader, RewardsFileBuilder};

    use super::*;
    use crate::config::Network;
    use crate::rewards::RewardsEvent;
    use crate::testing::FakeFacade;

    const POOL: Address = Address::with_last_byte(0xaa);
    const NODE: Address = Address::with_last_byte(1);

    fn setup(root: B256) -> FakeFacade {
        let mut facade = FakeFacade::default();
        facade.contracts.insert("rocketRewardsPool".into(), POOL);
        facade.rewards_events.insert(
            (POOL, 2),
            RewardsEvent {
                index: 2,
                start_time: 1_000,
                end_time: 2_000,
                consensus_block: 64,
                execution_block: 50,
                merkle_root: root,
                merkle_tree_cid: "bafyinterval2".into(),
                intervals_passed: 1,
            },
        );
        facade
    }

    fn rewards() -> rewards_tree::RewardsFile {
        let mut builder = RewardsFileBuilder::new(IntervalHeader {
            index: 2,
            network: "mainnet".into(),
            ..Default::default()
        });
        builder.add(NODE, U256::from(5), U256::ZERO, U256::from(7));
        builder.add(Address::with_last_byte(2), U256::from(9), U256::ZERO, U256::ZERO);
        builder.build()
    }

    #[tokio::test]
    async fn distinguishes_missing_invalid_and_valid() {
        let file = rewards();
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path(), Network::Mainnet);

        let facade = setup(file.merkle_root);
        let info = interval_info(&facade, &store, &[], NODE, 2).await.unwrap();
        assert_eq!(info.status, TreeFileStatus::Missing);
        assert_eq!(info.cid, "bafyinterval2");
        assert_eq!(info.tree_file_path, store.path(2));

        store.save(2, &file).await.unwrap();
        let info = interval_info(&facade, &store, &[], NODE, 2).await.unwrap();
        let TreeFileStatus::Valid { node: Some(rewards) } = info.status else {
            panic!("expected a valid file with the node in it");
        };
        assert_eq!(rewards.collateral_rpl, U256::from(5));
        assert_eq!(rewards.smoothing_pool_eth, U256::from(7));
        assert!(!rewards.merkle_proof.is_empty());

        let absent = interval_info(&facade, &store, &[], Address::with_last_byte(3), 2)
            .await
            .unwrap();
        assert_eq!(absent.status, TreeFileStatus::Valid { node: None });

        let other_root = setup(B256::repeat_byte(1));
        let info = interval_info(&other_root, &store, &[], NODE, 2).await.unwrap();
        assert!(matches!(info.status, TreeFileStatus::Invalid { .. }));
    }

    #[tokio::test]
    async fn garbage_on_disk_is_invalid() {
        let file = rewards();
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path(), Network::Mainnet);
        std::fs::write(store.path(2), b"garbage").unwrap();

        let info = interval_info(&setup(file.merkle_root), &store, &[], NODE, 2)
            .await
            .unwrap();
        assert!(matches!(info.status, TreeFileStatus::Invalid { .. }));
    }

    #[tokio::test]
    async fn unknown_interval_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path(), Network::Mainnet);
        let err = interval_info(&setup(B256::ZERO), &store, &[], NODE, 3)
            .await
            .unwrap_err();
        assert!(matches!(err, ArtifactError::EventNotFound { interval: 3 }));
    }
}
