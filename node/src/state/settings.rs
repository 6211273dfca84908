//! Protocol-wide parameters and how they are assembled from individual reads.

use alloy::primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};

use super::SnapshotError;

/// One protocol-wide value readable through the facade. Every setting is a
/// single 256-bit word; addresses are right-aligned, flags are `0` or `1`,
/// durations are seconds and fractions are scaled by 10^18.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NetworkSetting {
    RplPrice,
    MinCollateralFraction,
    MaxCollateralFraction,
    RewardIndex,
    IntervalDuration,
    IntervalStart,
    NodeOperatorRewardsPercent,
    TrustedNodeOperatorRewardsPercent,
    ProtocolDaoRewardsPercent,
    PendingRplRewards,
    ScrubPeriod,
    SmoothingPoolAddress,
    SmoothingPoolBalance,
    DepositPoolBalance,
    DepositPoolExcess,
    QueueCapacity,
    RplInflationIntervalRate,
    RplTotalSupply,
    PricesBlock,
    LatestReportablePricesBlock,
    EthUtilizationRate,
    StakingEthBalance,
    RethExchangeRate,
    TotalEthBalance,
    RethContractBalance,
    TotalRethSupply,
    TotalRplStake,
    NodeFee,
    BalancesBlock,
    LatestReportableBalancesBlock,
    SubmitBalancesEnabled,
    SubmitPricesEnabled,
    MinipoolLaunchTimeout,
    // Only present once Atlas is deployed.
    PromotionScrubPeriod,
    BondReductionWindowStart,
    BondReductionWindowLength,
    DepositPoolUserBalance,
}

impl NetworkSetting {
    /// Settings readable on every protocol version.
    pub const BASE: &'static [NetworkSetting] = &[
        Self::RplPrice,
        Self::MinCollateralFraction,
        Self::MaxCollateralFraction,
        Self::RewardIndex,
        Self::IntervalDuration,
        Self::IntervalStart,
        Self::NodeOperatorRewardsPercent,
        Self::TrustedNodeOperatorRewardsPercent,
        Self::ProtocolDaoRewardsPercent,
        Self::PendingRplRewards,
        Self::ScrubPeriod,
        Self::SmoothingPoolAddress,
        Self::SmoothingPoolBalance,
        Self::DepositPoolBalance,
        Self::DepositPoolExcess,
        Self::QueueCapacity,
        Self::RplInflationIntervalRate,
        Self::RplTotalSupply,
        Self::PricesBlock,
        Self::LatestReportablePricesBlock,
        Self::EthUtilizationRate,
        Self::StakingEthBalance,
        Self::RethExchangeRate,
        Self::TotalEthBalance,
        Self::RethContractBalance,
        Self::TotalRethSupply,
        Self::TotalRplStake,
        Self::NodeFee,
        Self::BalancesBlock,
        Self::LatestReportableBalancesBlock,
        Self::SubmitBalancesEnabled,
        Self::SubmitPricesEnabled,
        Self::MinipoolLaunchTimeout,
    ];

    /// Settings introduced by the Atlas upgrade.
    pub const ATLAS: &'static [NetworkSetting] = &[
        Self::PromotionScrubPeriod,
        Self::BondReductionWindowStart,
        Self::BondReductionWindowLength,
        Self::DepositPoolUserBalance,
    ];

    /// The settings to read for a protocol version.
    pub fn to_read(is_atlas_deployed: bool) -> impl Iterator<Item = NetworkSetting> {
        let atlas: &[NetworkSetting] = if is_atlas_deployed { Self::ATLAS } else { &[] };
        Self::BASE.iter().chain(atlas).copied()
    }
}

/// Singleton protocol-wide parameters of a snapshot.
///
/// Atlas-only fields stay zero when the snapshot predates Atlas.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkDetails {
    pub rpl_price: U256,
    pub min_collateral_fraction: U256,
    pub max_collateral_fraction: U256,
    pub reward_index: u64,
    /// Seconds.
    pub interval_duration: u64,
    /// Unix time.
    pub interval_start: u64,
    pub node_operator_rewards_percent: U256,
    pub trusted_node_operator_rewards_percent: U256,
    pub protocol_dao_rewards_percent: U256,
    pub pending_rpl_rewards: U256,
    /// Seconds.
    pub scrub_period: u64,
    pub smoothing_pool_address: Address,
    pub smoothing_pool_balance: U256,
    pub deposit_pool_balance: U256,
    pub deposit_pool_excess: U256,
    pub queue_capacity: U256,
    pub rpl_inflation_interval_rate: U256,
    pub rpl_total_supply: U256,
    pub prices_block: u64,
    pub latest_reportable_prices_block: u64,
    pub eth_utilization_rate: U256,
    pub staking_eth_balance: U256,
    pub reth_exchange_rate: U256,
    pub total_eth_balance: U256,
    pub reth_contract_balance: U256,
    pub total_reth_supply: U256,
    pub total_rpl_stake: U256,
    pub node_fee: U256,
    pub balances_block: u64,
    pub latest_reportable_balances_block: u64,
    pub submit_balances_enabled: bool,
    pub submit_prices_enabled: bool,
    /// Seconds.
    pub minipool_launch_timeout: u64,
    /// Seconds.
    pub promotion_scrub_period: u64,
    /// Seconds.
    pub bond_reduction_window_start: u64,
    /// Seconds.
    pub bond_reduction_window_length: u64,
    pub deposit_pool_user_balance: U256,
}

impl NetworkDetails {
    /// Assembles the details from `(setting, value)` pairs read at `block`.
    /// Every setting of the requested version must be present.
    pub fn from_values(
        values: impl IntoIterator<Item = (NetworkSetting, U256)>,
        is_atlas_deployed: bool,
        block: u64,
    ) -> Result<Self, SnapshotError> {
        let mut details = Self::default();
        let mut seen = hashbrown::HashSet::new();
        for (setting, value) in values {
            details.apply(setting, value, block)?;
            seen.insert(setting);
        }

        if let Some(missing) = NetworkSetting::to_read(is_atlas_deployed).find(|s| !seen.contains(s)) {
            return Err(SnapshotError::Inconsistent {
                block,
                reason: format!("network setting {missing:?} was not read"),
            });
        }
        Ok(details)
    }

    fn apply(&mut self, setting: NetworkSetting, value: U256, block: u64) -> Result<(), SnapshotError> {
        use NetworkSetting as S;

        let as_u64 = || {
            u64::try_from(value).map_err(|_| SnapshotError::Inconsistent {
                block,
                reason: format!("network setting {setting:?} does not fit in 64 bits: {value}"),
            })
        };
        let as_bool = || !value.is_zero();

        match setting {
            S::RplPrice => self.rpl_price = value,
            S::MinCollateralFraction => self.min_collateral_fraction = value,
            S::MaxCollateralFraction => self.max_collateral_fraction = value,
            S::RewardIndex => self.reward_index = as_u64()?,
            S::IntervalDuration => self.interval_duration = as_u64()?,
            S::IntervalStart => self.interval_start = as_u64()?,
            S::NodeOperatorRewardsPercent => self.node_operator_rewards_percent = value,
            S::TrustedNodeOperatorRewardsPercent => {
                self.trusted_node_operator_rewards_percent = value
            }
            S::ProtocolDaoRewardsPercent => self.protocol_dao_rewards_percent = value,
            S::PendingRplRewards => self.pending_rpl_rewards = value,
            S::ScrubPeriod => self.scrub_period = as_u64()?,
            S::SmoothingPoolAddress => {
                self.smoothing_pool_address = Address::from_word(B256::from(value.to_be_bytes::<32>()))
            }
            S::SmoothingPoolBalance => self.smoothing_pool_balance = value,
            S::DepositPoolBalance => self.deposit_pool_balance = value,
            S::DepositPoolExcess => self.deposit_pool_excess = value,
            S::QueueCapacity => self.queue_capacity = value,
            S::RplInflationIntervalRate => self.rpl_inflation_interval_rate = value,
            S::RplTotalSupply => self.rpl_total_supply = value,
            S::PricesBlock => self.prices_block = as_u64()?,
            S::LatestReportablePricesBlock => self.latest_reportable_prices_block = as_u64()?,
            S::EthUtilizationRate => self.eth_utilization_rate = value,
            S::StakingEthBalance => self.staking_eth_balance = value,
            S::RethExchangeRate => self.reth_exchange_rate = value,
            S::TotalEthBalance => self.total_eth_balance = value,
            S::RethContractBalance => self.reth_contract_balance = value,
            S::TotalRethSupply => self.total_reth_supply = value,
            S::TotalRplStake => self.total_rpl_stake = value,
            S::NodeFee => self.node_fee = value,
            S::BalancesBlock => self.balances_block = as_u64()?,
            S::LatestReportableBalancesBlock => {
                self.latest_reportable_balances_block = as_u64()?
            }
            S::SubmitBalancesEnabled => self.submit_balances_enabled = as_bool(),
            S::SubmitPricesEnabled => self.submit_prices_enabled = as_bool(),
            S::MinipoolLaunchTimeout => self.minipool_launch_timeout = as_u64()?,
            S::PromotionScrubPeriod => self.promotion_scrub_period = as_u64()?,
            S::BondReductionWindowStart => self.bond_reduction_window_start = as_u64()?,
            S::BondReductionWindowLength => self.bond_reduction_window_length = as_u64()?,
            S::DepositPoolUserBalance => self.deposit_pool_user_balance = value,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use alloy::primitives::address;

    use super::*;

    fn all_ones(is_atlas: bool) -> Vec<(NetworkSetting, U256)> {
        NetworkSetting::to_read(is_atlas)
            .map(|s| (s, U256::from(1)))
            .collect()
    }

    #[test]
    fn atlas_settings_are_gated() {
        assert_eq!(NetworkSetting::to_read(false).count(), NetworkSetting::BASE.len());
        assert_eq!(
            NetworkSetting::to_read(true).count(),
            NetworkSetting::BASE.len() + NetworkSetting::ATLAS.len()
        );
        assert!(NetworkSetting::to_read(false).all(|s| !NetworkSetting::ATLAS.contains(&s)));
    }

    #[test]
    fn pre_atlas_details_leave_atlas_fields_zero() {
        let details = NetworkDetails::from_values(all_ones(false), false, 10).unwrap();
        assert_eq!(details.reward_index, 1);
        assert!(details.submit_prices_enabled);
        assert_eq!(details.bond_reduction_window_start, 0);
        assert!(details.deposit_pool_user_balance.is_zero());
    }

    #[test]
    fn missing_setting_is_inconsistent() {
        let mut values = all_ones(true);
        values.retain(|(s, _)| *s != NetworkSetting::BondReductionWindowLength);
        let err = NetworkDetails::from_values(values, true, 10).unwrap_err();
        assert!(matches!(err, SnapshotError::Inconsistent { block: 10, .. }));
    }

    #[test]
    fn oversized_block_number_is_rejected() {
        let mut values = all_ones(false);
        values.push((NetworkSetting::PricesBlock, U256::MAX));
        assert!(NetworkDetails::from_values(values, false, 1).is_err());
    }

    #[test]
    fn address_settings_are_right_aligned() {
        let pool = address!("d4e96ef8eee8678dbff4d535e033ed1a4f7605b7");
        let mut values = all_ones(false);
        values.push((
            NetworkSetting::SmoothingPoolAddress,
            U256::from_be_slice(pool.as_slice()),
        ));
        let details = NetworkDetails::from_values(values, false, 1).unwrap();
        assert_eq!(details.smoothing_pool_address, pool);
    }
}
