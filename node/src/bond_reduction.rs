//! Automatic bond reductions for the minipools of one node.
//!
//! After a bond reduction is requested the minipool must wait
//! `windowStart` seconds and then has `windowLength` seconds to execute it.
//! Executions wait for cheap gas until half the window is left, after which
//! they are forced at the current price.

use alloy::primitives::{Address, B256, U256};
use rp_common::reducible_bond;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::GasSettings;
use crate::facade::{ChainFacade, ReadCall, TxOpts};
use crate::state::{MinipoolDetails, MinipoolStatus, Snapshot};

#[derive(Debug, Error)]
pub enum BondReductionError {
    #[error("error reading the bond reduction state of minipool {minipool}")]
    Read {
        minipool: Address,
        #[source]
        source: anyhow::Error,
    },

    #[error("could not estimate the gas required to reduce the bond of minipool {minipool}")]
    Estimate {
        minipool: Address,
        #[source]
        source: anyhow::Error,
    },

    #[error("error getting the max fee")]
    MaxFee(#[source] anyhow::Error),

    #[error("error submitting the bond reduction of minipool {minipool}")]
    Submit {
        minipool: Address,
        #[source]
        source: anyhow::Error,
    },
}

/// On-chain timing of one minipool's bond reduction request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BondReductionWindow {
    /// Unix time the reduction was requested, zero if never.
    pub reduce_bond_time: u64,
    pub cancelled: bool,
    /// Seconds to wait after the request.
    pub window_start: u64,
    /// Seconds the reduction may be executed in after the wait.
    pub window_length: u64,
}

impl BondReductionWindow {
    fn end(&self) -> u64 {
        self.window_start.saturating_add(self.window_length)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum BondReductionState {
    NotEligible,
    WaitingForWindow { remaining: u64 },
    ReadyToReduce { elapsed: u64 },
    Reduced { tx: B256 },
    Cancelled,
}

/// Where `mp` stands at unix time `now`.
pub fn classify(mp: &MinipoolDetails, window: &BondReductionWindow, now: u64) -> BondReductionState {
    if window.reduce_bond_time == 0 {
        return BondReductionState::NotEligible;
    }
    if window.cancelled {
        return BondReductionState::Cancelled;
    }
    let elapsed = now.saturating_sub(window.reduce_bond_time);
    if mp.node_deposit_balance != reducible_bond()
        || mp.status != MinipoolStatus::Staking
        || elapsed >= window.end()
    {
        return BondReductionState::NotEligible;
    }
    if elapsed > window.window_start {
        BondReductionState::ReadyToReduce { elapsed }
    } else {
        BondReductionState::WaitingForWindow {
            remaining: window.window_start - elapsed,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GasDecision {
    Submit,
    /// Gas is too expensive but less than half the window is left.
    Force,
    Defer { until_forced: u64 },
}

/// Whether a ready reduction goes out now given the current `max_fee`.
/// Only a fee strictly below `threshold` counts as cheap.
pub fn decide(elapsed: u64, window: &BondReductionWindow, max_fee: U256, threshold: U256) -> GasDecision {
    if max_fee < threshold {
        return GasDecision::Submit;
    }
    let remaining = window.end().saturating_sub(elapsed);
    let buffer = window.window_length / 2;
    if remaining < buffer {
        GasDecision::Force
    } else {
        GasDecision::Defer {
            until_forced: remaining - buffer,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum BondReductionOutcome {
    Submitted { tx: B256, forced: bool },
    Deferred { reason: String, until_forced: u64 },
    NotYetEligible { remaining: u64 },
    Failed { reason: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MinipoolOutcome {
    pub minipool: Address,
    #[serde(flatten)]
    pub outcome: BondReductionOutcome,
}

pub struct BondReductionScheduler<'a, F> {
    facade: &'a F,
    gas: &'a GasSettings,
}

impl<'a, F: ChainFacade> BondReductionScheduler<'a, F> {
    pub fn new(facade: &'a F, gas: &'a GasSettings) -> Self {
        Self { facade, gas }
    }

    /// Runs one pass over `node`'s minipools in `snapshot`, one minipool at a
    /// time. `now` is the unix time of the snapshot's execution block.
    ///
    /// Minipools with no pending reduction are left out of the result. A
    /// failure only affects the minipool it happened on.
    pub async fn run(&self, snapshot: &Snapshot, node: Address, now: u64) -> Vec<MinipoolOutcome> {
        if !snapshot.is_atlas_deployed {
            debug!("bond reductions are not available before Atlas");
            return vec![];
        }
        info!(%node, "checking for minipool bonds to reduce");

        let mut max_fee = None;
        let mut outcomes = vec![];
        for mp in snapshot.minipools_of(&node) {
            let outcome = match self.process(snapshot, mp, now, &mut max_fee).await {
                Ok(Some(outcome)) => outcome,
                Ok(None) => continue,
                Err(e) => {
                    let e = anyhow::Error::new(e);
                    warn!(minipool = %mp.address, "{e:#}");
                    BondReductionOutcome::Failed {
                        reason: format!("{e:#}"),
                    }
                }
            };
            outcomes.push(MinipoolOutcome {
                minipool: mp.address,
                outcome,
            });
        }
        outcomes
    }

    async fn process(
        &self,
        snapshot: &Snapshot,
        mp: &MinipoolDetails,
        now: u64,
        max_fee: &mut Option<U256>,
    ) -> Result<Option<BondReductionOutcome>, BondReductionError> {
        let minipool = mp.address;
        let window = self.window(snapshot, minipool).await?;

        let elapsed = match classify(mp, &window, now) {
            BondReductionState::ReadyToReduce { elapsed } => elapsed,
            BondReductionState::WaitingForWindow { remaining } => {
                info!(%minipool, remaining, "minipool has {remaining}s left until it can have its bond reduced");
                return Ok(Some(BondReductionOutcome::NotYetEligible { remaining }));
            }
            state => {
                debug!(%minipool, ?state, "no bond reduction pending");
                return Ok(None);
            }
        };

        info!(%minipool, "reducing bond");
        let gas_info = self
            .facade
            .estimate_reduce_bond_gas(minipool)
            .await
            .map_err(|source| BondReductionError::Estimate { minipool, source })?;
        let gas_limit = self.gas.gas_limit.unwrap_or(gas_info.safe_gas_limit);
        let fee = match (*max_fee).or(self.gas.max_fee) {
            Some(fee) => fee,
            None => self
                .facade
                .suggested_max_fee()
                .await
                .map_err(BondReductionError::MaxFee)?,
        };
        *max_fee = Some(fee);
        info!(
            %minipool,
            estimated_gas = gas_info.estimated_gas_limit,
            gas_limit,
            max_fee_gwei = rp_common::wei_to_gwei(fee),
            "gas for bond reduction"
        );

        let forced = match decide(elapsed, &window, fee, self.gas.threshold) {
            GasDecision::Submit => false,
            GasDecision::Force => {
                warn!(
                    %minipool,
                    "minipool has exceeded half of the window, forcing the bond reduction at the current gas price"
                );
                true
            }
            GasDecision::Defer { until_forced } => {
                info!(%minipool, until_forced, "time until bond reduction will be forced: {until_forced}s");
                return Ok(Some(BondReductionOutcome::Deferred {
                    reason: format!(
                        "max fee of {} gwei is not below the threshold of {} gwei",
                        rp_common::wei_to_gwei(fee),
                        rp_common::wei_to_gwei(self.gas.threshold)
                    ),
                    until_forced,
                }));
            }
        };

        let opts = TxOpts {
            gas_fee_cap: fee,
            gas_tip_cap: self.gas.priority_fee,
            gas_limit,
        };
        let tx = self
            .facade
            .submit_reduce_bond(minipool, opts)
            .await
            .map_err(|source| BondReductionError::Submit { minipool, source })?;
        info!(%minipool, %tx, forced, "submitted bond reduction");
        Ok(Some(BondReductionOutcome::Submitted { tx, forced }))
    }

    async fn window(&self, snapshot: &Snapshot, minipool: Address) -> Result<BondReductionWindow, BondReductionError> {
        let read_err = |source| BondReductionError::Read { minipool, source };
        let values = self
            .facade
            .batch_read(
                &[
                    ReadCall::ReduceBondTime(minipool),
                    ReadCall::ReduceBondCancelled(minipool),
                ],
                Some(snapshot.el_block),
            )
            .await
            .map_err(read_err)?;
        let [time, cancelled] = values[..] else {
            return Err(read_err(anyhow::anyhow!(
                "expected 2 values, got {}",
                values.len()
            )));
        };
        let reduce_bond_time = u64::try_from(time)
            .map_err(|_| read_err(anyhow::anyhow!("reduce bond time {time} out of range")))?;
        Ok(BondReductionWindow {
            reduce_bond_time,
            cancelled: !cancelled.is_zero(),
            window_start: snapshot.network.bond_reduction_window_start,
            window_length: snapshot.network.bond_reduction_window_length,
        })
    }
}
