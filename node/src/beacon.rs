//! Consensus-layer access through the standard beacon node REST API.

use std::future::Future;

use alloy::primitives::FixedBytes;
use alloy::transports::http::reqwest::{self, StatusCode};
use anyhow::Context as _;
use futures::{StreamExt as _, TryStreamExt as _};
use hashbrown::HashMap;
use itertools::Itertools as _;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::debug;
use url::Url;

/// BLS public key of a validator.
pub type ValidatorPubkey = FixedBytes<48>;

/// Maximum number of validator ids per status request; beacon nodes reject
/// overly long query strings.
const VALIDATOR_BATCH_SIZE: usize = 100;

/// A consensus block and the execution block it carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct BeaconBlock {
    pub slot: u64,
    /// Zero for blocks without an execution payload.
    pub execution_block_number: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct BeaconHead {
    pub slot: u64,
    pub epoch: u64,
    pub finalized_epoch: u64,
}

/// Chain timing parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Eth2Config {
    pub genesis_time: u64,
    pub seconds_per_slot: u64,
    pub slots_per_epoch: u64,
}

impl Eth2Config {
    /// Unix time at which `slot` starts.
    pub fn slot_time(&self, slot: u64) -> u64 {
        self.genesis_time
            .saturating_add(slot.saturating_mul(self.seconds_per_slot))
    }

    pub fn epoch_of(&self, slot: u64) -> u64 {
        slot / self.slots_per_epoch.max(1)
    }

    pub fn first_slot_of(&self, epoch: u64) -> u64 {
        epoch.saturating_mul(self.slots_per_epoch)
    }
}

/// Consensus-layer record of one validator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ValidatorStatus {
    pub pubkey: ValidatorPubkey,
    pub index: u64,
    /// Balance in gwei.
    pub balance: u64,
    pub activation_epoch: u64,
    /// [`rp_common::FAR_FUTURE_EPOCH`] while the validator has not exited.
    pub exit_epoch: u64,
    pub slashed: bool,
    pub status: String,
}

pub trait BeaconClient {
    /// `GetConsensusBlock(slot)`. `None` when the slot has no block.
    fn beacon_block(
        &self,
        slot: u64,
    ) -> impl Future<Output = anyhow::Result<Option<BeaconBlock>>> + Send;

    /// `GetValidatorStatuses(pubkeys, slot)`. Keys unknown to the beacon
    /// node are absent from the result.
    fn validator_statuses(
        &self,
        pubkeys: &[ValidatorPubkey],
        slot: u64,
    ) -> impl Future<Output = anyhow::Result<HashMap<ValidatorPubkey, ValidatorStatus>>> + Send;

    fn beacon_head(&self) -> impl Future<Output = anyhow::Result<BeaconHead>> + Send;

    fn eth2_config(&self) -> impl Future<Output = anyhow::Result<Eth2Config>> + Send;
}

pub struct HttpBeaconClient {
    client: reqwest::Client,
    base: Url,
    concurrency: usize,
    config: OnceCell<Eth2Config>,
}

impl HttpBeaconClient {
    pub fn new(base: Url, concurrency: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            base,
            concurrency: concurrency.max(1),
            config: OnceCell::new(),
        }
    }

    /// GETs `path` and parses the `data` field of the response. A 404 maps
    /// to `None`.
    async fn get<T: DeserializeOwned>(&self, path: &str) -> anyhow::Result<Option<T>> {
        let url = self
            .base
            .join(path)
            .with_context(|| format!("invalid beacon path {path}"))?;
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("error requesting {url}"))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            anyhow::bail!("{url} responded with status {}", response.status());
        }

        let bytes = response
            .bytes()
            .await
            .with_context(|| format!("error reading response from {url}"))?;
        let des = &mut serde_json::Deserializer::from_slice(&bytes);
        let envelope: Envelope<T> = serde_path_to_error::deserialize(des)
            .with_context(|| format!("unexpected response shape from {url}"))?;
        Ok(Some(envelope.data))
    }

    async fn get_required<T: DeserializeOwned>(&self, path: &str) -> anyhow::Result<T> {
        self.get(path)
            .await?
            .with_context(|| format!("beacon node has no resource at {path}"))
    }
}

impl BeaconClient for HttpBeaconClient {
    async fn beacon_block(&self, slot: u64) -> anyhow::Result<Option<BeaconBlock>> {
        let block: Option<wire::SignedBlock> =
            self.get(&format!("eth/v2/beacon/blocks/{slot}")).await?;
        Ok(block.map(|signed| BeaconBlock {
            slot: signed.message.slot,
            execution_block_number: signed
                .message
                .body
                .execution_payload
                .map_or(0, |payload| payload.block_number),
        }))
    }

    async fn validator_statuses(
        &self,
        pubkeys: &[ValidatorPubkey],
        slot: u64,
    ) -> anyhow::Result<HashMap<ValidatorPubkey, ValidatorStatus>> {
        let batches: Vec<String> = pubkeys
            .chunks(VALIDATOR_BATCH_SIZE)
            .map(|chunk| chunk.iter().map(|pubkey| pubkey.to_string()).join(","))
            .collect();
        debug!(slot, pubkeys = pubkeys.len(), batches = batches.len(), "fetching validator statuses");

        let responses: Vec<Vec<wire::Validator>> = futures::stream::iter(batches)
            .map(|ids| async move {
                // A missing state means the beacon node pruned it or has not
                // reached it, not that the validators are unknown.
                self.get_required(&format!("eth/v1/beacon/states/{slot}/validators?id={ids}"))
                    .await
            })
            .buffered(self.concurrency)
            .try_collect()
            .await
            .with_context(|| format!("error getting validator statuses at slot {slot}"))?;

        Ok(responses
            .into_iter()
            .flatten()
            .map(|v| {
                let status = ValidatorStatus {
                    pubkey: v.validator.pubkey,
                    index: v.index,
                    balance: v.balance,
                    activation_epoch: v.validator.activation_epoch,
                    exit_epoch: v.validator.exit_epoch,
                    slashed: v.validator.slashed,
                    status: v.status,
                };
                (status.pubkey, status)
            })
            .collect())
    }

    async fn beacon_head(&self) -> anyhow::Result<BeaconHead> {
        let config = self.eth2_config().await?;
        let header: wire::HeaderEnvelope = self.get_required("eth/v1/beacon/headers/head").await?;
        let finality: wire::Finality = self
            .get_required("eth/v1/beacon/states/head/finality_checkpoints")
            .await?;
        let slot = header.header.message.slot;
        Ok(BeaconHead {
            slot,
            epoch: config.epoch_of(slot),
            finalized_epoch: finality.finalized.epoch,
        })
    }

    async fn eth2_config(&self) -> anyhow::Result<Eth2Config> {
        self.config
            .get_or_try_init(|| async {
                let spec: wire::Spec = self.get_required("eth/v1/config/spec").await?;
                let genesis: wire::Genesis = self.get_required("eth/v1/beacon/genesis").await?;
                Ok::<_, anyhow::Error>(Eth2Config {
                    genesis_time: genesis.genesis_time,
                    seconds_per_slot: spec.seconds_per_slot,
                    slots_per_epoch: spec.slots_per_epoch,
                })
            })
            .await
            .copied()
    }
}

#[derive(Deserialize)]
struct Envelope<T> {
    data: T,
}

/// Response shapes of the beacon API. Integers are quoted.
mod wire {
    use serde::Deserialize;

    use super::ValidatorPubkey;

    #[derive(Deserialize)]
    pub struct SignedBlock {
        pub message: BlockMessage,
    }

    #[derive(Deserialize)]
    pub struct BlockMessage {
        #[serde(with = "crate::quoted::u64")]
        pub slot: u64,
        pub body: BlockBody,
    }

    #[derive(Deserialize)]
    pub struct BlockBody {
        #[serde(default)]
        pub execution_payload: Option<ExecutionPayload>,
    }

    #[derive(Deserialize)]
    pub struct ExecutionPayload {
        #[serde(with = "crate::quoted::u64")]
        pub block_number: u64,
    }

    #[derive(Deserialize)]
    pub struct Validator {
        #[serde(with = "crate::quoted::u64")]
        pub index: u64,
        #[serde(with = "crate::quoted::u64")]
        pub balance: u64,
        pub status: String,
        pub validator: ValidatorRecord,
    }

    #[derive(Deserialize)]
    pub struct ValidatorRecord {
        pub pubkey: ValidatorPubkey,
        pub slashed: bool,
        #[serde(with = "crate::quoted::u64")]
        pub activation_epoch: u64,
        #[serde(with = "crate::quoted::u64")]
        pub exit_epoch: u64,
    }

    #[derive(Deserialize)]
    pub struct HeaderEnvelope {
        pub header: SignedHeader,
    }

    #[derive(Deserialize)]
    pub struct SignedHeader {
        pub message: HeaderMessage,
    }

    #[derive(Deserialize)]
    pub struct HeaderMessage {
        #[serde(with = "crate::quoted::u64")]
        pub slot: u64,
    }

    #[derive(Deserialize)]
    pub struct Finality {
        pub finalized: Checkpoint,
    }

    #[derive(Deserialize)]
    pub struct Checkpoint {
        #[serde(with = "crate::quoted::u64")]
        pub epoch: u64,
    }

    #[derive(Deserialize)]
    #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
    pub struct Spec {
        #[serde(with = "crate::quoted::u64")]
        pub seconds_per_slot: u64,
        #[serde(with = "crate::quoted::u64")]
        pub slots_per_epoch: u64,
    }

    #[derive(Deserialize)]
    pub struct Genesis {
        #[serde(with = "crate::quoted::u64")]
        pub genesis_time: u64,
    }
}
