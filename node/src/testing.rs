//! In-memory stand-ins for the chain, the beacon node and execution headers.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use alloy::primitives::{keccak256, Address, B256, U256};
use anyhow::Context as _;
use hashbrown::{HashMap, HashSet};
use rp_common::eth_to_wei;

use crate::beacon::{BeaconBlock, BeaconClient, BeaconHead, Eth2Config, ValidatorPubkey, ValidatorStatus};
use crate::facade::{ChainFacade, GasInfo, MinipoolShares, ReadCall, TxOpts};
use crate::provider::{BlockHeader, HeaderProvider};
use crate::rewards::RewardsEvent;
use crate::state::{
    MinipoolDetails, MinipoolStatus, NetworkDetails, NetworkSetting, NodeDetails, SnapshotParts,
};

pub(crate) const CONFIG: Eth2Config = Eth2Config {
    genesis_time: 1_600_000_000,
    seconds_per_slot: 12,
    slots_per_epoch: 32,
};

pub(crate) fn node(address: Address, rpl_stake: U256) -> NodeDetails {
    NodeDetails {
        address,
        exists: true,
        registration_time: 0,
        rpl_stake,
        smoothing_pool_registered: false,
        minipool_count: 0,
    }
}

/// A 16 ETH bonded, 16 ETH borrowed minipool whose address and pubkey are
/// derived from `id`, which must be non-zero.
pub(crate) fn minipool(id: u8, node_address: Address, status: MinipoolStatus) -> MinipoolDetails {
    MinipoolDetails {
        address: Address::with_last_byte(id),
        exists: true,
        node_address,
        status,
        pubkey: ValidatorPubkey::repeat_byte(id),
        node_deposit_balance: eth_to_wei(16),
        user_deposit_balance: eth_to_wei(16),
        node_fee: U256::from(100_000_000_000_000_000u64),
        last_bond_reduction_time: 0,
        last_bond_reduction_prev_value: U256::ZERO,
        last_bond_reduction_prev_node_fee: U256::ZERO,
        node_share_of_balance: U256::ZERO,
        user_share_of_balance: U256::ZERO,
    }
}

/// An active 32 ETH validator.
pub(crate) fn validator(pubkey: ValidatorPubkey, activation_epoch: u64, exit_epoch: u64) -> ValidatorStatus {
    ValidatorStatus {
        pubkey,
        index: u64::from(pubkey[0]),
        balance: 32_000_000_000,
        activation_epoch,
        exit_epoch,
        slashed: false,
        status: "active_ongoing".into(),
    }
}

pub(crate) fn parts() -> SnapshotParts {
    SnapshotParts {
        el_block: 1,
        slot: 1,
        beacon_config: CONFIG,
        is_atlas_deployed: true,
        network: NetworkDetails::default(),
        nodes: vec![],
        minipools: vec![],
        validators: HashMap::new(),
    }
}

/// A [`ChainFacade`] over plain collections. Reads are recorded so tests can
/// check what was asked for and at which block.
pub(crate) struct FakeFacade {
    pub atlas: bool,
    pub settings: HashMap<NetworkSetting, U256>,
    pub nodes: Vec<NodeDetails>,
    pub minipools: Vec<MinipoolDetails>,
    pub storage: HashMap<B256, U256>,
    pub contracts: HashMap<String, Address>,
    pub reduce_bond_times: HashMap<Address, u64>,
    pub reduce_bond_cancelled: HashSet<Address>,
    pub rewards_events: HashMap<(Address, u64), RewardsEvent>,
    pub gas: GasInfo,
    pub suggested_max_fee: U256,
    pub failing_setting: Option<NetworkSetting>,
    pub failing_estimates: HashSet<Address>,
    pub failing_submissions: HashSet<Address>,
    /// Batch reads answer with no words at all.
    pub empty_reads: bool,
    reads: Mutex<Vec<(ReadCall, Option<u64>)>>,
    detail_blocks: Mutex<Vec<u64>>,
    submissions: Mutex<Vec<(Address, TxOpts)>>,
}

impl Default for FakeFacade {
    fn default() -> Self {
        use NetworkSetting as S;

        let mut settings: HashMap<NetworkSetting, U256> = NetworkSetting::BASE
            .iter()
            .chain(NetworkSetting::ATLAS)
            .map(|s| (*s, U256::from(1)))
            .collect();
        settings.insert(S::RplPrice, U256::from(10_000_000_000_000_000u64));
        settings.insert(S::MinCollateralFraction, U256::from(100_000_000_000_000_000u64));
        settings.insert(S::MaxCollateralFraction, U256::from(1_500_000_000_000_000_000u64));
        settings.insert(S::RewardIndex, U256::from(3));
        settings.insert(S::IntervalDuration, U256::from(2_419_200));
        settings.insert(S::BondReductionWindowStart, U256::from(43_200));
        settings.insert(S::BondReductionWindowLength, U256::from(43_200));

        Self {
            atlas: true,
            settings,
            nodes: vec![],
            minipools: vec![],
            storage: HashMap::new(),
            contracts: HashMap::new(),
            reduce_bond_times: HashMap::new(),
            reduce_bond_cancelled: HashSet::new(),
            rewards_events: HashMap::new(),
            gas: GasInfo {
                estimated_gas_limit: 100_000,
                safe_gas_limit: 150_000,
            },
            suggested_max_fee: rp_common::gwei_to_wei(30),
            failing_setting: None,
            failing_estimates: HashSet::new(),
            failing_submissions: HashSet::new(),
            empty_reads: false,
            reads: Mutex::default(),
            detail_blocks: Mutex::default(),
            submissions: Mutex::default(),
        }
    }
}

impl FakeFacade {
    /// Block of every read so far, `None` for unpinned batch reads.
    pub fn pinned_blocks(&self) -> Vec<Option<u64>> {
        let reads = self.reads.lock().unwrap();
        let details = self.detail_blocks.lock().unwrap();
        reads
            .iter()
            .map(|(_, block)| *block)
            .chain(details.iter().map(|block| Some(*block)))
            .collect()
    }

    pub fn read_calls(&self) -> Vec<ReadCall> {
        self.reads.lock().unwrap().iter().map(|(call, _)| call.clone()).collect()
    }

    pub fn submissions(&self) -> Vec<(Address, TxOpts)> {
        self.submissions.lock().unwrap().clone()
    }

    fn read_one(&self, call: &ReadCall) -> anyhow::Result<U256> {
        Ok(match call {
            ReadCall::Setting(setting) => {
                anyhow::ensure!(self.failing_setting != Some(*setting), "read of {setting:?} reverted");
                self.settings.get(setting).copied().unwrap_or_default()
            }
            ReadCall::StorageUint(key) => self.storage.get(key).copied().unwrap_or_default(),
            ReadCall::ContractAddress(name) => {
                let address = self.contracts.get(name).context("unknown contract")?;
                U256::from_be_slice(address.as_slice())
            }
            ReadCall::NodeCount => U256::from(self.nodes.len()),
            ReadCall::MinipoolCount => U256::from(self.minipools.len()),
            ReadCall::ReduceBondTime(mp) => {
                U256::from(self.reduce_bond_times.get(mp).copied().unwrap_or_default())
            }
            ReadCall::ReduceBondCancelled(mp) => {
                U256::from(u8::from(self.reduce_bond_cancelled.contains(mp)))
            }
        })
    }
}

fn page<T: Clone>(items: &[T], offset: u64, limit: u64) -> Vec<T> {
    items
        .iter()
        .skip(offset as usize)
        .take(limit as usize)
        .cloned()
        .collect()
}

impl ChainFacade for FakeFacade {
    async fn batch_read(&self, calls: &[ReadCall], block: Option<u64>) -> anyhow::Result<Vec<U256>> {
        self.reads
            .lock()
            .unwrap()
            .extend(calls.iter().map(|call| (call.clone(), block)));
        // Let other reads interleave.
        tokio::task::yield_now().await;
        if self.empty_reads {
            return Ok(vec![]);
        }
        calls.iter().map(|call| self.read_one(call)).collect()
    }

    async fn is_atlas_deployed(&self, block: u64) -> anyhow::Result<bool> {
        self.detail_blocks.lock().unwrap().push(block);
        Ok(self.atlas)
    }

    async fn node_details(&self, offset: u64, limit: u64, block: u64) -> anyhow::Result<Vec<NodeDetails>> {
        self.detail_blocks.lock().unwrap().push(block);
        Ok(page(&self.nodes, offset, limit))
    }

    async fn minipool_details(
        &self,
        offset: u64,
        limit: u64,
        block: u64,
    ) -> anyhow::Result<Vec<MinipoolDetails>> {
        self.detail_blocks.lock().unwrap().push(block);
        Ok(page(&self.minipools, offset, limit))
    }

    async fn minipool_shares(
        &self,
        minipools: &[(Address, U256)],
        block: u64,
    ) -> anyhow::Result<Vec<MinipoolShares>> {
        self.detail_blocks.lock().unwrap().push(block);
        minipools
            .iter()
            .map(|(address, balance)| {
                let mp = self
                    .minipools
                    .iter()
                    .find(|mp| mp.address == *address)
                    .context("unknown minipool")?;
                let deposits = mp.node_deposit_balance + mp.user_deposit_balance;
                if deposits.is_zero() {
                    return Ok(MinipoolShares::default());
                }
                let node_share = *balance * mp.node_deposit_balance / deposits;
                Ok(MinipoolShares {
                    node_share,
                    user_share: *balance - node_share,
                })
            })
            .collect()
    }

    async fn rewards_event(&self, pool: Address, interval: u64) -> anyhow::Result<Option<RewardsEvent>> {
        Ok(self.rewards_events.get(&(pool, interval)).cloned())
    }

    async fn estimate_reduce_bond_gas(&self, minipool: Address) -> anyhow::Result<GasInfo> {
        anyhow::ensure!(!self.failing_estimates.contains(&minipool), "execution reverted");
        Ok(self.gas)
    }

    async fn submit_reduce_bond(&self, minipool: Address, opts: TxOpts) -> anyhow::Result<B256> {
        anyhow::ensure!(!self.failing_submissions.contains(&minipool), "nonce too low");
        self.submissions.lock().unwrap().push((minipool, opts));
        Ok(keccak256(minipool))
    }

    async fn suggested_max_fee(&self) -> anyhow::Result<U256> {
        Ok(self.suggested_max_fee)
    }
}

/// A [`BeaconClient`] over a fixed set of slots. Counts block lookups.
pub(crate) struct FakeBeacon {
    pub blocks: BTreeMap<u64, u64>,
    pub validators: HashMap<ValidatorPubkey, ValidatorStatus>,
    pub head: BeaconHead,
    pub config: Eth2Config,
    reads: AtomicUsize,
}

impl FakeBeacon {
    /// Beacon chain with blocks at the given `(slot, execution block)` pairs,
    /// its head at the highest slot.
    pub fn with_blocks(blocks: impl IntoIterator<Item = (u64, u64)>) -> Self {
        let blocks: BTreeMap<u64, u64> = blocks.into_iter().collect();
        let head_slot = blocks.keys().next_back().copied().unwrap_or_default();
        Self {
            blocks,
            validators: HashMap::new(),
            head: BeaconHead {
                slot: head_slot,
                epoch: CONFIG.epoch_of(head_slot),
                finalized_epoch: CONFIG.epoch_of(head_slot).saturating_sub(2),
            },
            config: CONFIG,
            reads: AtomicUsize::new(0),
        }
    }

    pub fn add_validator(&mut self, status: ValidatorStatus) {
        self.validators.insert(status.pubkey, status);
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

impl BeaconClient for FakeBeacon {
    async fn beacon_block(&self, slot: u64) -> anyhow::Result<Option<BeaconBlock>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.blocks.get(&slot).map(|el| BeaconBlock {
            slot,
            execution_block_number: *el,
        }))
    }

    async fn validator_statuses(
        &self,
        pubkeys: &[ValidatorPubkey],
        _slot: u64,
    ) -> anyhow::Result<HashMap<ValidatorPubkey, ValidatorStatus>> {
        Ok(pubkeys
            .iter()
            .filter_map(|pk| self.validators.get(pk).map(|v| (*pk, v.clone())))
            .collect())
    }

    async fn beacon_head(&self) -> anyhow::Result<BeaconHead> {
        Ok(self.head)
    }

    async fn eth2_config(&self) -> anyhow::Result<Eth2Config> {
        Ok(self.config)
    }
}

/// Execution chain whose block `n` has timestamp `timestamps[n]`. The last
/// block is the head.
pub(crate) struct FakeHeaders {
    pub timestamps: Vec<u64>,
    reads: AtomicUsize,
}

impl FakeHeaders {
    pub fn new(timestamps: Vec<u64>) -> Self {
        Self {
            timestamps,
            reads: AtomicUsize::new(0),
        }
    }

    /// Blocks `0..=head`, twelve seconds apart from `genesis`.
    pub fn regular(head: u64, genesis: u64) -> Self {
        Self::new((0..=head).map(|n| genesis + 12 * n).collect())
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    fn header(&self, number: u64) -> anyhow::Result<BlockHeader> {
        let timestamp = *self
            .timestamps
            .get(number as usize)
            .with_context(|| format!("block {number} does not exist"))?;
        Ok(BlockHeader {
            number,
            timestamp,
            hash: keccak256(number.to_be_bytes()),
        })
    }
}

impl HeaderProvider for FakeHeaders {
    async fn header_by_number(&self, number: u64) -> anyhow::Result<BlockHeader> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.header(number)
    }

    async fn latest_header(&self) -> anyhow::Result<BlockHeader> {
        let head = self.timestamps.len().checked_sub(1).context("empty chain")?;
        self.header(head as u64)
    }
}
