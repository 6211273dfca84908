use std::fmt;
use std::time::Instant;

use alloy::primitives::{Address, U256};
use anyhow::Context as _;
use itertools::Itertools as _;
use rp_common::gwei_to_wei;
use tracing::{debug, info};

use super::{
    MinipoolDetails, NetworkDetails, NetworkSetting, NodeDetails, Snapshot, SnapshotError,
    SnapshotParts,
};
use crate::beacon::BeaconClient;
use crate::facade::{ChainFacade, ReadCall};
use crate::pool::run_bounded;

/// Number of node or minipool records fetched per read.
pub const DETAILS_PAGE_SIZE: u64 = 200;

/// One independent read of the fan-out phase.
#[derive(Clone, Copy, Debug)]
enum Part {
    Setting(NetworkSetting),
    Nodes { offset: u64, limit: u64 },
    Minipools { offset: u64, limit: u64 },
}

impl fmt::Display for Part {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Part::Setting(setting) => write!(f, "network setting {setting:?}"),
            Part::Nodes { offset, limit } => write!(f, "nodes {offset}..{}", offset + limit),
            Part::Minipools { offset, limit } => {
                write!(f, "minipools {offset}..{}", offset + limit)
            }
        }
    }
}

enum PartOutput {
    Setting(NetworkSetting, U256),
    Nodes(Vec<NodeDetails>),
    Minipools(Vec<MinipoolDetails>),
}

fn pages(count: u64, page_size: u64) -> impl Iterator<Item = (u64, u64)> {
    (0..count)
        .step_by(page_size.max(1) as usize)
        .map(move |offset| (offset, page_size.min(count - offset)))
}

/// Builds [`Snapshot`]s by pinning every read to the execution block paired
/// with a consensus slot.
pub struct StateSnapshotBuilder<'a, F, B> {
    facade: &'a F,
    beacon: &'a B,
    concurrency: usize,
    page_size: u64,
}

impl<'a, F, B> StateSnapshotBuilder<'a, F, B>
where
    F: ChainFacade + Sync,
    B: BeaconClient + Sync,
{
    pub fn new(facade: &'a F, beacon: &'a B, concurrency: usize) -> Self {
        Self {
            facade,
            beacon,
            concurrency: concurrency.max(1),
            page_size: DETAILS_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: u64) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Builds the snapshot for `slot`. Any failed read aborts the build.
    pub async fn build(&self, slot: u64) -> Result<Snapshot, SnapshotError> {
        let beacon_err = |source| SnapshotError::Beacon { slot, source };

        let beacon_block = self
            .beacon
            .beacon_block(slot)
            .await
            .map_err(beacon_err)?
            .ok_or(SnapshotError::SlotNotFound { slot })?;
        let beacon_config = self.beacon.eth2_config().await.map_err(beacon_err)?;
        let block = beacon_block.execution_block_number;
        let read_err = |what: &str| {
            let what = what.to_string();
            move |source| SnapshotError::Read {
                what,
                block,
                source,
            }
        };

        let is_atlas_deployed = self
            .facade
            .is_atlas_deployed(block)
            .await
            .map_err(read_err("protocol version"))?;

        info!(el_block = block, slot, is_atlas_deployed, "building network state");
        let start = Instant::now();

        let counts = self
            .facade
            .batch_read(&[ReadCall::NodeCount, ReadCall::MinipoolCount], Some(block))
            .await
            .map_err(read_err("node and minipool counts"))?;
        let (node_count, minipool_count) = match counts[..] {
            [nodes, minipools] => (to_u64(nodes, block)?, to_u64(minipools, block)?),
            _ => {
                return Err(SnapshotError::Inconsistent {
                    block,
                    reason: format!("expected 2 counts, got {}", counts.len()),
                })
            }
        };

        let parts: Vec<Part> = NetworkSetting::to_read(is_atlas_deployed)
            .map(Part::Setting)
            .chain(
                pages(node_count, self.page_size)
                    .map(|(offset, limit)| Part::Nodes { offset, limit }),
            )
            .chain(
                pages(minipool_count, self.page_size)
                    .map(|(offset, limit)| Part::Minipools { offset, limit }),
            )
            .collect();
        debug!(parts = parts.len(), node_count, minipool_count, "fanning out state reads");

        let outputs = run_bounded(
            parts.into_iter().map(|part| self.read_part(part, block)),
            self.concurrency,
        )
        .await?;

        let mut settings = Vec::new();
        let mut nodes = Vec::with_capacity(node_count as usize);
        let mut minipools = Vec::with_capacity(minipool_count as usize);
        for output in outputs {
            match output {
                PartOutput::Setting(setting, value) => settings.push((setting, value)),
                PartOutput::Nodes(page) => nodes.extend(page),
                PartOutput::Minipools(page) => minipools.extend(page),
            }
        }
        let network = NetworkDetails::from_values(settings, is_atlas_deployed, block)?;
        info!("1/5 - Retrieved network details ({:?} so far)", start.elapsed());

        check_len("node", nodes.len(), node_count, block)?;
        info!("2/5 - Retrieved node details ({:?} so far)", start.elapsed());
        check_len("minipool", minipools.len(), minipool_count, block)?;
        info!("3/5 - Retrieved minipool details ({:?} so far)", start.elapsed());

        let pubkeys = minipools
            .iter()
            .filter(|mp| mp.has_pubkey())
            .map(|mp| mp.pubkey)
            .collect_vec();
        let validators = self
            .beacon
            .validator_statuses(&pubkeys, slot)
            .await
            .map_err(beacon_err)?;
        info!(
            known = validators.len(),
            requested = pubkeys.len(),
            "4/5 - Retrieved validator details ({:?} so far)",
            start.elapsed()
        );

        let balances = minipools
            .iter()
            .map(|mp| {
                let balance = validators
                    .get(&mp.pubkey)
                    .map_or(U256::ZERO, |v| gwei_to_wei(v.balance));
                (mp.address, balance)
            })
            .collect_vec();
        let shares = run_bounded(
            balances
                .chunks(self.page_size as usize)
                .map(|chunk| self.read_shares(chunk, block)),
            self.concurrency,
        )
        .await?;
        for (mp, share) in minipools.iter_mut().zip(shares.into_iter().flatten()) {
            mp.node_share_of_balance = share.node_share;
            mp.user_share_of_balance = share.user_share;
        }
        info!(
            "5/5 - Calculated complete node and user balance shares (total time: {:?})",
            start.elapsed()
        );

        Snapshot::from_parts(SnapshotParts {
            el_block: block,
            slot,
            beacon_config,
            is_atlas_deployed,
            network,
            nodes,
            minipools,
            validators,
        })
    }

    async fn read_part(&self, part: Part, block: u64) -> Result<PartOutput, SnapshotError> {
        let read = async {
            Ok::<_, anyhow::Error>(match part {
                Part::Setting(setting) => {
                    let values = self
                        .facade
                        .batch_read(&[ReadCall::Setting(setting)], Some(block))
                        .await?;
                    let value = values.first().copied().context("empty read result")?;
                    PartOutput::Setting(setting, value)
                }
                Part::Nodes { offset, limit } => {
                    PartOutput::Nodes(self.facade.node_details(offset, limit, block).await?)
                }
                Part::Minipools { offset, limit } => PartOutput::Minipools(
                    self.facade.minipool_details(offset, limit, block).await?,
                ),
            })
        };
        read.await.map_err(|source| SnapshotError::Read {
            what: part.to_string(),
            block,
            source,
        })
    }

    async fn read_shares(
        &self,
        chunk: &[(Address, U256)],
        block: u64,
    ) -> Result<Vec<crate::facade::MinipoolShares>, SnapshotError> {
        let shares = self
            .facade
            .minipool_shares(chunk, block)
            .await
            .map_err(|source| SnapshotError::Read {
                what: format!("balance shares of {} minipools", chunk.len()),
                block,
                source,
            })?;
        check_len("minipool share", shares.len(), chunk.len() as u64, block)?;
        Ok(shares)
    }
}

fn to_u64(value: U256, block: u64) -> Result<u64, SnapshotError> {
    u64::try_from(value).map_err(|_| SnapshotError::Inconsistent {
        block,
        reason: format!("count {value} does not fit in 64 bits"),
    })
}

fn check_len(what: &str, got: usize, expected: u64, block: u64) -> Result<(), SnapshotError> {
    if got as u64 != expected {
        return Err(SnapshotError::Inconsistent {
            block,
            reason: format!("expected {expected} {what} records, got {got}"),
        });
    }
    Ok(())
}
