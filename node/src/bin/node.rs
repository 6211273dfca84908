use std::sync::Arc;

use alloy::primitives::{Address, U256};
use anyhow::{Context as _, Result};
use clap::Parser;
use cli::Command;
use rewards_tree::IntervalHeader;
use rp_node::beacon::{BeaconClient, HttpBeaconClient};
use rp_node::bond_reduction::BondReductionScheduler;
use rp_node::claims::claim_status;
use rp_node::config::{GasSettings, Network};
use rp_node::effective_stake::calculate_effective_stakes;
use rp_node::env::load_dotenv;
use rp_node::facade::{ChainFacade, ReadCall, RpcChainFacade};
use rp_node::locator::{block_for_time, start_slot_for_interval};
use rp_node::provider::{CachedProvider, HeaderProvider};
use rp_node::retry::execution_provider;
use rp_node::rewards::{
    download_rewards_file, interval_info, package, resolve_rewards_event, ArtifactStore,
    HttpArtifactSource, Mirror,
};
use rp_node::state::{NetworkSetting, Snapshot, StateSnapshotBuilder};
use serde::Serialize;
use serde_json::json;
use tracing::info;

use self::node::*;
mod node {
    pub mod cli;
}

fn print<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn snapshot_at<F, B>(facade: &F, beacon: &B, concurrency: usize, slot: Option<u64>) -> Result<Snapshot>
where
    F: ChainFacade + Sync,
    B: BeaconClient + Sync,
{
    let slot = match slot {
        Some(slot) => slot,
        None => beacon.beacon_head().await?.slot,
    };
    Ok(StateSnapshotBuilder::new(facade, beacon, concurrency)
        .build(slot)
        .await?)
}

async fn current_reward_index<F: ChainFacade>(facade: &F) -> Result<u64> {
    let values = facade
        .batch_read(&[ReadCall::Setting(NetworkSetting::RewardIndex)], None)
        .await?;
    let index = values.first().copied().unwrap_or(U256::ZERO);
    u64::try_from(index).context("reward index does not fit in 64 bits")
}

fn interval_header(snapshot: &Snapshot, network: Network) -> IntervalHeader {
    IntervalHeader {
        index: snapshot.network.reward_index,
        network: network.to_string(),
        start_time: snapshot.network.interval_start,
        end_time: snapshot.slot_time(),
        consensus_end_block: snapshot.slot,
        execution_end_block: snapshot.el_block,
        intervals_passed: 1,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    load_dotenv();
    rp_node::tracing::init();

    let args = cli::Cli::parse();
    let chain = &args.chain;

    let provider = Arc::new(CachedProvider::new(
        execution_provider(chain.rpc_url.clone(), chain.backoff()),
        chain.concurrency,
    ));
    let facade = RpcChainFacade::new(provider.clone());
    let beacon = HttpBeaconClient::new(chain.beacon_url.clone(), chain.concurrency);
    let previous_pools: &[Address] = &args.rewards.previous_rewards_pools;

    match args.command {
        Command::State { slot } => {
            let snapshot = snapshot_at(&facade, &beacon, chain.concurrency, slot).await?;
            print(&snapshot)?;
        }
        Command::EffectiveStake { slot } => {
            let snapshot = snapshot_at(&facade, &beacon, chain.concurrency, slot).await?;
            let stakes = calculate_effective_stakes(&snapshot, args.rewards.scale_by_participation)?;
            print(&stakes)?;
        }
        Command::ClaimStatus { node } => {
            let current = current_reward_index(&facade).await?;
            print(&claim_status(&facade, node, current, None).await?)?;
        }
        Command::Interval { node, interval } => {
            let store = ArtifactStore::new(args.rewards.data_dir()?, chain.network);
            let info = interval_info(&facade, &store, previous_pools, node, interval).await?;
            print(&info)?;
        }
        Command::Download { interval } => {
            let event =
                resolve_rewards_event(&facade, chain.network, previous_pools, interval, None).await?;
            let store = ArtifactStore::new(args.rewards.data_dir()?, chain.network);
            info!(interval, cid = %event.merkle_tree_cid, "downloading rewards file");
            let outcome = download_rewards_file(
                &HttpArtifactSource::default(),
                &store,
                &Mirror::from_config(&args.rewards),
                &event,
            )
            .await?;
            print(&outcome)?;
        }
        Command::ReduceBonds { node, slot } => {
            let snapshot = snapshot_at(&facade, &beacon, chain.concurrency, slot).await?;
            let now = provider.header_by_number(snapshot.el_block).await?.timestamp;
            let gas = GasSettings::from(args.gas.clone());
            let outcomes = BondReductionScheduler::new(&facade, &gas)
                .run(&snapshot, node, now)
                .await;
            print(&outcomes)?;
        }
        Command::BlockForTime { time } => {
            let header = block_for_time(&*provider, chain.deploy_block, time).await?;
            print(&header)?;
        }
        Command::StartSlot { interval } => {
            let previous =
                resolve_rewards_event(&facade, chain.network, previous_pools, interval - 1, None)
                    .await?;
            let slot = start_slot_for_interval(&beacon, &previous).await?;
            print(&json!({ "interval": interval, "startSlot": slot }))?;
        }
        Command::PreviewRewards { slot } => {
            let snapshot = snapshot_at(&facade, &beacon, chain.concurrency, slot).await?;
            let stakes = calculate_effective_stakes(&snapshot, args.rewards.scale_by_participation)?;
            let file = rp_node::rewards::build_collateral_rewards(
                &snapshot,
                &stakes,
                interval_header(&snapshot, chain.network),
            );
            let artifact = package(&file, chain.network)?;
            print(&json!({
                "interval": file.index,
                "merkleRoot": file.merkle_root,
                "cid": artifact.cid.to_string(),
                "fileName": artifact.file_name,
                "compressedBytes": artifact.compressed.len(),
                "totalRewards": file.total_rewards,
                "nodes": file.node_rewards.len(),
            }))?;
        }
    }

    Ok(())
}
