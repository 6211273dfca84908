//! Reward-eligible RPL collateral per node.

use std::collections::BTreeMap;

use alloy::primitives::{Address, U256};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::state::{MinipoolStatus, NodeDetails, Snapshot};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EffectiveStakeError {
    #[error("RPL price is zero at block {block}")]
    ZeroRplPrice { block: u64 },

    #[error("reward interval duration is zero at block {block}")]
    ZeroIntervalDuration { block: u64 },
}

/// Collateral bounds and the resulting effective stake of one node. All
/// amounts are in wei.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeCollateral {
    pub eligible_borrowed_eth: U256,
    pub eligible_bonded_eth: U256,
    pub min_collateral: U256,
    pub max_collateral: U256,
    pub rpl_stake: U256,
    pub effective_stake: U256,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectiveStakes {
    pub nodes: BTreeMap<Address, NodeCollateral>,
    pub total: U256,
}

impl EffectiveStakes {
    /// Effective stake of every node, for apportioning rewards.
    pub fn weights(&self) -> BTreeMap<Address, U256> {
        self.nodes
            .iter()
            .map(|(address, c)| (*address, c.effective_stake))
            .collect()
    }
}

/// Computes the effective stake of every node in `snapshot`.
///
/// A minipool counts toward its node's eligible ETH only while it is staking,
/// has a validator known to the beacon node, activated at or before the
/// snapshot epoch and has not exited by then. With `scale_by_participation`
/// nodes registered during the current interval are weighted by the share of
/// the interval they were registered for.
pub fn calculate_effective_stakes(
    snapshot: &Snapshot,
    scale_by_participation: bool,
) -> Result<EffectiveStakes, EffectiveStakeError> {
    let block = snapshot.el_block;
    let network = &snapshot.network;
    if network.rpl_price.is_zero() {
        return Err(EffectiveStakeError::ZeroRplPrice { block });
    }
    if scale_by_participation && network.interval_duration == 0 {
        return Err(EffectiveStakeError::ZeroIntervalDuration { block });
    }

    let mut stakes = EffectiveStakes::default();
    for node in &snapshot.nodes {
        let mut collateral = node_collateral(snapshot, node);
        if scale_by_participation {
            collateral.effective_stake = scale(
                collateral.effective_stake,
                snapshot.slot_time().saturating_sub(node.registration_time),
                network.interval_duration,
            );
        }
        stakes.total += collateral.effective_stake;
        stakes.nodes.insert(node.address, collateral);
    }
    Ok(stakes)
}

fn node_collateral(snapshot: &Snapshot, node: &NodeDetails) -> NodeCollateral {
    let epoch = snapshot.epoch();
    let mut borrowed = U256::ZERO;
    let mut bonded = U256::ZERO;

    for mp in snapshot.minipools_of(&node.address) {
        if !mp.exists || mp.status != MinipoolStatus::Staking {
            continue;
        }
        let Some(validator) = snapshot.validator(&mp.pubkey) else {
            debug!(minipool = %mp.address, pubkey = %mp.pubkey, "validator not on the beacon chain yet, ignoring it");
            continue;
        };
        if validator.activation_epoch > epoch {
            debug!(
                minipool = %mp.address,
                activation_epoch = validator.activation_epoch,
                epoch,
                "validator activates after the interval epoch, not eligible"
            );
            continue;
        }
        if validator.exit_epoch <= epoch {
            debug!(
                minipool = %mp.address,
                exit_epoch = validator.exit_epoch,
                epoch,
                "validator exited by the interval epoch, not eligible"
            );
            continue;
        }
        borrowed += mp.user_deposit_balance;
        bonded += mp.node_deposit_balance;
    }

    // Fractions and price share the same 10^18 scale, which cancels out.
    let network = &snapshot.network;
    let min_collateral = borrowed.saturating_mul(network.min_collateral_fraction) / network.rpl_price;
    let max_collateral = bonded.saturating_mul(network.max_collateral_fraction) / network.rpl_price;

    let effective_stake = if node.rpl_stake < min_collateral {
        U256::ZERO
    } else {
        node.rpl_stake.min(max_collateral)
    };

    NodeCollateral {
        eligible_borrowed_eth: borrowed,
        eligible_bonded_eth: bonded,
        min_collateral,
        max_collateral,
        rpl_stake: node.rpl_stake,
        effective_stake,
    }
}

/// Scales `stake` by `eligible / duration`, never above full weight.
fn scale(stake: U256, eligible_seconds: u64, duration: u64) -> U256 {
    if eligible_seconds >= duration {
        return stake;
    }
    stake.saturating_mul(U256::from(eligible_seconds)) / U256::from(duration)
}

#[cfg(test)]
mod tests {
    use rp_common::{eth_to_wei, FAR_FUTURE_EPOCH};

    use super::*;
    use crate::state::{MinipoolDetails, SnapshotParts};
    use crate::testing::{minipool, node, parts, validator};

    const NODE: Address = Address::with_last_byte(1);

    /// A snapshot at epoch 100 with one node, RPL at 0.01 ETH, 10% min and
    /// 150% max collateral.
    fn snapshot_with(rpl_stake: U256, minipools: Vec<MinipoolDetails>, epochs: &[(u64, u64)]) -> Snapshot {
        let mut p: SnapshotParts = parts();
        p.slot = 100 * 32;
        p.network.rpl_price = U256::from(10_000_000_000_000_000u64);
        p.network.min_collateral_fraction = U256::from(100_000_000_000_000_000u64);
        p.network.max_collateral_fraction = U256::from(1_500_000_000_000_000_000u64);
        p.network.interval_duration = 1_000;
        p.nodes = vec![node(NODE, rpl_stake)];
        for (mp, (activation, exit)) in minipools.iter().zip(epochs) {
            p.validators.insert(mp.pubkey, validator(mp.pubkey, *activation, *exit));
        }
        p.minipools = minipools;
        Snapshot::from_parts(p).unwrap()
    }

    fn staking(id: u8) -> MinipoolDetails {
        minipool(id, NODE, MinipoolStatus::Staking)
    }

    #[test]
    fn stake_between_bounds_is_kept() {
        // 16 borrowed -> min 160 RPL; 16 bonded -> max 2400 RPL.
        let snapshot = snapshot_with(eth_to_wei(1_000), vec![staking(2)], &[(0, FAR_FUTURE_EPOCH)]);
        let stakes = calculate_effective_stakes(&snapshot, false).unwrap();
        let c = stakes.nodes[&NODE];
        assert_eq!(c.min_collateral, eth_to_wei(160));
        assert_eq!(c.max_collateral, eth_to_wei(2_400));
        assert_eq!(c.effective_stake, eth_to_wei(1_000));
        assert_eq!(stakes.total, eth_to_wei(1_000));
    }

    #[test]
    fn stake_is_clamped() {
        let under = snapshot_with(eth_to_wei(100), vec![staking(2)], &[(0, FAR_FUTURE_EPOCH)]);
        assert!(calculate_effective_stakes(&under, false).unwrap().total.is_zero());

        let over = snapshot_with(eth_to_wei(5_000), vec![staking(2)], &[(0, FAR_FUTURE_EPOCH)]);
        assert_eq!(calculate_effective_stakes(&over, false).unwrap().total, eth_to_wei(2_400));
    }

    #[test]
    fn clamped_stake_is_zero_or_within_bounds() {
        for rpl in [0u64, 1, 159, 160, 161, 1_000, 2_399, 2_400, 2_401, 10_000] {
            let snapshot = snapshot_with(eth_to_wei(rpl), vec![staking(2)], &[(0, FAR_FUTURE_EPOCH)]);
            let c = calculate_effective_stakes(&snapshot, false).unwrap().nodes[&NODE];
            assert!(
                c.effective_stake.is_zero()
                    || (c.min_collateral <= c.effective_stake && c.effective_stake <= c.max_collateral),
                "rpl = {rpl}"
            );
        }
    }

    #[test]
    fn non_staking_minipools_contribute_nothing() {
        for status in [
            MinipoolStatus::PendingCreation,
            MinipoolStatus::Prelaunch,
            MinipoolStatus::Withdrawable,
            MinipoolStatus::Dissolved,
        ] {
            let snapshot = snapshot_with(
                eth_to_wei(1_000),
                vec![minipool(2, NODE, status)],
                &[(0, FAR_FUTURE_EPOCH)],
            );
            let c = calculate_effective_stakes(&snapshot, false).unwrap().nodes[&NODE];
            assert!(c.eligible_bonded_eth.is_zero() && c.eligible_borrowed_eth.is_zero());
            // No bonded ETH means a max collateral of zero.
            assert!(c.effective_stake.is_zero());
        }
    }

    #[test]
    fn ineligible_validators_are_skipped() {
        let snapshot = snapshot_with(
            eth_to_wei(1_000),
            vec![staking(2), staking(3), staking(4), staking(5)],
            &[
                (0, FAR_FUTURE_EPOCH), // eligible
                (101, FAR_FUTURE_EPOCH), // activates too late
                (0, 100),                // exited at the epoch
                (100, 101),              // boundary values, eligible
            ],
        );
        let c = calculate_effective_stakes(&snapshot, false).unwrap().nodes[&NODE];
        assert_eq!(c.eligible_bonded_eth, eth_to_wei(32));
    }

    #[test]
    fn minipool_unknown_to_beacon_is_skipped() {
        // Validator statuses only for the first minipool.
        let snapshot = snapshot_with(
            eth_to_wei(1_000),
            vec![staking(2), staking(3)],
            &[(0, FAR_FUTURE_EPOCH)],
        );
        let c = calculate_effective_stakes(&snapshot, false).unwrap().nodes[&NODE];
        assert_eq!(c.eligible_bonded_eth, eth_to_wei(16));
    }

    #[test]
    fn participation_scaling() {
        let mut snapshot = snapshot_with(eth_to_wei(1_000), vec![staking(2)], &[(0, FAR_FUTURE_EPOCH)]);
        let slot_time = snapshot.slot_time();

        // Registered for a quarter of the interval.
        snapshot.nodes[0].registration_time = slot_time - 250;
        let stakes = calculate_effective_stakes(&snapshot, true).unwrap();
        assert_eq!(stakes.total, eth_to_wei(250));

        // Registered long ago: full weight.
        snapshot.nodes[0].registration_time = 0;
        assert_eq!(calculate_effective_stakes(&snapshot, true).unwrap().total, eth_to_wei(1_000));

        // Registered after the slot: nothing.
        snapshot.nodes[0].registration_time = slot_time + 10;
        assert!(calculate_effective_stakes(&snapshot, true).unwrap().total.is_zero());
    }

    #[test]
    fn zero_price_is_malformed_state() {
        let mut snapshot = snapshot_with(eth_to_wei(1), vec![], &[]);
        snapshot.network.rpl_price = U256::ZERO;
        assert_eq!(
            calculate_effective_stakes(&snapshot, false),
            Err(EffectiveStakeError::ZeroRplPrice { block: snapshot.el_block })
        );
    }
}
