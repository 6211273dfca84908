use alloy::primitives::U256;

/// Sentinel used by the consensus layer for epochs that have not been
/// scheduled yet, e.g. the exit epoch of a validator that is still active.
pub const FAR_FUTURE_EPOCH: u64 = u64::MAX;

/// Number of wei in one gwei.
pub const GWEI: u64 = 1_000_000_000;

/// Number of wei in one ether, also the fixed point scale of on-chain ratios.
pub const ETHER: u64 = 1_000_000_000_000_000_000;

/// Bond size, in whole ETH, that a minipool must hold before its bond may be
/// reduced.
pub const REDUCIBLE_BOND_ETH: u64 = 16;

/// Converts an amount in `ETH` to `wei` units.
pub fn eth_to_wei(eth: u64) -> U256 {
    // 1 ether = 10^18 wei.
    U256::from(eth) * U256::from(ETHER)
}

/// Converts an amount in `gwei` to `wei` units.
/// Consensus-layer balances are reported in gwei.
pub fn gwei_to_wei(gwei: u64) -> U256 {
    U256::from(gwei) * U256::from(GWEI)
}

/// Converts a fractional `gwei` amount, as found in user gas settings, to
/// `wei`. Negative and non-finite inputs map to zero.
pub fn gwei_f64_to_wei(gwei: f64) -> U256 {
    if !gwei.is_finite() || gwei <= 0.0 {
        return U256::ZERO;
    }
    // Keep three decimals of precision which is more than any fee UI exposes.
    let milli_gwei = (gwei * 1000.0).round() as u128;
    U256::from(milli_gwei) * U256::from(GWEI / 1000)
}

/// Whole gwei contained in a `wei` amount, rounded down.
pub fn wei_to_gwei(wei: U256) -> u64 {
    u64::try_from(wei / U256::from(GWEI)).unwrap_or(u64::MAX)
}

/// The bond of a minipool that is eligible for reduction, in wei.
pub fn reducible_bond() -> U256 {
    eth_to_wei(REDUCIBLE_BOND_ETH)
}

#[test]
fn test_eth_conversion() {
    assert_eq!(eth_to_wei(1), gwei_to_wei(1_000_000_000));
}

#[test]
fn test_fractional_gwei() {
    assert_eq!(gwei_f64_to_wei(1.5), U256::from(1_500_000_000u64));
    assert_eq!(gwei_f64_to_wei(-3.0), U256::ZERO);
    assert_eq!(wei_to_gwei(gwei_f64_to_wei(42.0)), 42);
}
