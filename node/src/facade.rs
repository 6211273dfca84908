//! The contract binding layer, seen as an opaque read/write capability.
//!
//! [`ChainFacade`] is everything the engine needs from the protocol
//! contracts: block-pinned reads, gas estimation and transaction
//! submission. ABI encoding, key management and signing all live behind it.
//! [`RpcChainFacade`] reaches a binding sidecar through `rp_*` JSON-RPC
//! methods on the execution client endpoint.

use std::future::Future;
use std::sync::Arc;

use alloy::primitives::{Address, B256, U256};
use alloy::providers::Provider;
use alloy::rpc::types::BlockNumberOrTag;
use alloy::transports::Transport;
use anyhow::Context as _;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::provider::CachedProvider;
use crate::rewards::RewardsEvent;
use crate::state::{MinipoolDetails, NetworkSetting, NodeDetails};

/// One read of a [`ChainFacade::batch_read`]. Every call yields a single
/// 256-bit word.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "arg", rename_all = "camelCase")]
pub enum ReadCall {
    Setting(NetworkSetting),
    /// Raw `uint` slot of the protocol's key/value storage contract.
    StorageUint(B256),
    /// Address of a named protocol contract.
    ContractAddress(String),
    NodeCount,
    MinipoolCount,
    /// Unix time the minipool's bond reduction was requested, zero if never.
    ReduceBondTime(Address),
    /// `1` if the pending bond reduction was cancelled.
    ReduceBondCancelled(Address),
}

/// Balance split of a minipool given its current beacon balance.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MinipoolShares {
    #[serde(with = "crate::quoted::u256")]
    pub node_share: U256,
    #[serde(with = "crate::quoted::u256")]
    pub user_share: U256,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GasInfo {
    pub estimated_gas_limit: u64,
    /// Estimate plus a safety margin.
    pub safe_gas_limit: u64,
}

/// Fee and gas parameters of a transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TxOpts {
    pub gas_fee_cap: U256,
    pub gas_tip_cap: U256,
    pub gas_limit: u64,
}

/// `block` is the execution block reads are pinned to; `None` reads at the
/// latest block.
pub trait ChainFacade {
    /// `BatchRead(calls)`: results are returned in call order.
    fn batch_read(
        &self,
        calls: &[ReadCall],
        block: Option<u64>,
    ) -> impl Future<Output = anyhow::Result<Vec<U256>>> + Send;

    fn is_atlas_deployed(&self, block: u64) -> impl Future<Output = anyhow::Result<bool>> + Send;

    /// Nodes `offset..offset + limit` in registration order.
    fn node_details(
        &self,
        offset: u64,
        limit: u64,
        block: u64,
    ) -> impl Future<Output = anyhow::Result<Vec<NodeDetails>>> + Send;

    /// Minipools `offset..offset + limit` in creation order.
    fn minipool_details(
        &self,
        offset: u64,
        limit: u64,
        block: u64,
    ) -> impl Future<Output = anyhow::Result<Vec<MinipoolDetails>>> + Send;

    /// Balance splits for `(minipool, beacon balance in wei)` pairs, in order.
    fn minipool_shares(
        &self,
        minipools: &[(Address, U256)],
        block: u64,
    ) -> impl Future<Output = anyhow::Result<Vec<MinipoolShares>>> + Send;

    /// The `RewardsSnapshotSubmitted` event of `interval` emitted by the
    /// rewards pool at `pool`, if any.
    fn rewards_event(
        &self,
        pool: Address,
        interval: u64,
    ) -> impl Future<Output = anyhow::Result<Option<RewardsEvent>>> + Send;

    /// `EstimateGas` for a bond reduction of `minipool`.
    fn estimate_reduce_bond_gas(
        &self,
        minipool: Address,
    ) -> impl Future<Output = anyhow::Result<GasInfo>> + Send;

    /// `SubmitTransaction` for a bond reduction of `minipool`.
    fn submit_reduce_bond(
        &self,
        minipool: Address,
        opts: TxOpts,
    ) -> impl Future<Output = anyhow::Result<B256>> + Send;

    /// Max fee per gas the execution client currently suggests.
    fn suggested_max_fee(&self) -> impl Future<Output = anyhow::Result<U256>> + Send;
}

pub struct RpcChainFacade<ProviderT, TransportT> {
    provider: Arc<CachedProvider<ProviderT, TransportT>>,
}

impl<ProviderT, TransportT> RpcChainFacade<ProviderT, TransportT>
where
    ProviderT: Provider<TransportT>,
    TransportT: Transport + Clone,
{
    pub fn new(provider: Arc<CachedProvider<ProviderT, TransportT>>) -> Self {
        Self { provider }
    }

    async fn call<P, R>(&self, method: &'static str, params: P) -> anyhow::Result<R>
    where
        P: Serialize + Clone + std::fmt::Debug + Send + Sync + Unpin,
        R: DeserializeOwned + std::fmt::Debug + Send + Sync + Unpin + 'static,
    {
        trace!(method, ?params, "facade call");
        Ok(self
            .provider
            .get_provider()
            .await?
            .raw_request::<_, R>(method.into(), params)
            .await?)
    }
}

fn block_tag(block: Option<u64>) -> BlockNumberOrTag {
    block.map_or(BlockNumberOrTag::Latest, BlockNumberOrTag::Number)
}

impl<ProviderT, TransportT> ChainFacade for RpcChainFacade<ProviderT, TransportT>
where
    ProviderT: Provider<TransportT>,
    TransportT: Transport + Clone,
{
    async fn batch_read(&self, calls: &[ReadCall], block: Option<u64>) -> anyhow::Result<Vec<U256>> {
        let results: Vec<U256> = self
            .call("rp_batchRead", (calls.to_vec(), block_tag(block)))
            .await?;
        anyhow::ensure!(
            results.len() == calls.len(),
            "rp_batchRead returned {} results for {} calls",
            results.len(),
            calls.len()
        );
        Ok(results)
    }

    async fn is_atlas_deployed(&self, block: u64) -> anyhow::Result<bool> {
        self.call("rp_isAtlasDeployed", (block_tag(Some(block)),))
            .await
    }

    async fn node_details(&self, offset: u64, limit: u64, block: u64) -> anyhow::Result<Vec<NodeDetails>> {
        self.call("rp_nodeDetails", (offset, limit, block_tag(Some(block))))
            .await
    }

    async fn minipool_details(
        &self,
        offset: u64,
        limit: u64,
        block: u64,
    ) -> anyhow::Result<Vec<MinipoolDetails>> {
        self.call("rp_minipoolDetails", (offset, limit, block_tag(Some(block))))
            .await
    }

    async fn minipool_shares(
        &self,
        minipools: &[(Address, U256)],
        block: u64,
    ) -> anyhow::Result<Vec<MinipoolShares>> {
        let shares: Vec<MinipoolShares> = self
            .call("rp_minipoolShares", (minipools.to_vec(), block_tag(Some(block))))
            .await?;
        anyhow::ensure!(
            shares.len() == minipools.len(),
            "rp_minipoolShares returned {} results for {} minipools",
            shares.len(),
            minipools.len()
        );
        Ok(shares)
    }

    async fn rewards_event(&self, pool: Address, interval: u64) -> anyhow::Result<Option<RewardsEvent>> {
        self.call("rp_getRewardsEvent", (pool, interval))
            .await
            .with_context(|| format!("error scanning rewards pool {pool} for interval {interval}"))
    }

    async fn estimate_reduce_bond_gas(&self, minipool: Address) -> anyhow::Result<GasInfo> {
        self.call("rp_estimateReduceBondAmountGas", (minipool,))
            .await
    }

    async fn submit_reduce_bond(&self, minipool: Address, opts: TxOpts) -> anyhow::Result<B256> {
        self.call("rp_reduceBondAmount", (minipool, opts)).await
    }

    async fn suggested_max_fee(&self) -> anyhow::Result<U256> {
        let estimate = self
            .provider
            .get_provider()
            .await?
            .estimate_eip1559_fees(None)
            .await
            .context("error estimating EIP-1559 fees")?;
        Ok(U256::from(estimate.max_fee_per_gas))
    }
}
