use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use alloy::primitives::{Address, U256};
use clap::{Args, ValueEnum, ValueHint};
use directories::ProjectDirs;
use rp_common::gwei_f64_to_wei;
use serde::Serialize;
use tracing::warn;
use url::Url;

use crate::retry::Backoff;

const CHAIN_HELP_HEADING: &str = "Chain options";
const REWARDS_HELP_HEADING: &str = "Rewards options";
const GAS_HELP_HEADING: &str = "Gas options";

const DATA_DIR_NAME: &str = "rp-node";

/// Priority fee used when none is configured, in gwei.
pub const DEFAULT_PRIORITY_FEE_GWEI: f64 = 2.0;

/// IPFS gateway serving compressed files by content identifier.
pub const DEFAULT_PRIMARY_MIRROR: &str = "https://{cid}.ipfs.dweb.link/{filename}";
/// Second IPFS gateway.
pub const DEFAULT_SECONDARY_MIRROR: &str = "https://ipfs.io/ipfs/{cid}/{filename}";
/// Per-network repository of uncompressed files.
pub const DEFAULT_FALLBACK_MIRROR: &str =
    "https://github.com/rocket-pool/rewards-trees/raw/main/{network}/{filename}";

/// The network the node is attached to.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Prater,
    Holesky,
    Devnet,
}

impl Network {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Prater => "prater",
            Network::Holesky => "holesky",
            Network::Devnet => "devnet",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where to reach the two chains and how hard to hit them.
#[derive(Args, Clone, Debug)]
pub struct ChainConfig {
    /// Execution client JSON-RPC endpoint, also serving the contract facade.
    #[arg(short = 'u', long, env = "RP_NODE_RPC_URL", help_heading = CHAIN_HELP_HEADING, value_hint = ValueHint::Url)]
    pub rpc_url: Url,
    /// Beacon node REST endpoint.
    #[arg(short = 'b', long, env = "RP_NODE_BEACON_URL", help_heading = CHAIN_HELP_HEADING, value_hint = ValueHint::Url)]
    pub beacon_url: Url,
    /// Network the node runs on.
    #[arg(short = 'n', long, env = "RP_NODE_NETWORK", help_heading = CHAIN_HELP_HEADING, value_enum, default_value = "mainnet")]
    pub network: Network,
    /// Block the protocol contracts were deployed at. Lower bound for block
    /// searches.
    #[arg(long, env = "RP_NODE_DEPLOY_BLOCK", help_heading = CHAIN_HELP_HEADING, default_value_t = 0)]
    pub deploy_block: u64,
    /// Maximum number of reads in flight while building a snapshot. Must be
    /// greater than zero.
    #[arg(short = 'c', long, env = "RP_NODE_CONCURRENCY", help_heading = CHAIN_HELP_HEADING, default_value_t = 6)]
    pub concurrency: usize,
    /// Initial backoff in milliseconds between retries of failed RPC
    /// requests. Doubles on every retry.
    #[arg(long, env = "RP_NODE_BACKOFF", help_heading = CHAIN_HELP_HEADING, default_value_t = 500)]
    pub backoff: u64,
    /// Maximum number of retries of a failed RPC request.
    #[arg(long, env = "RP_NODE_MAX_RETRIES", help_heading = CHAIN_HELP_HEADING, default_value_t = 3)]
    pub max_retries: u32,
}

impl ChainConfig {
    pub fn backoff(&self) -> Backoff {
        Backoff {
            initial: Duration::from_millis(self.backoff),
            max_retries: self.max_retries,
        }
    }
}

/// Where rewards artifacts live, locally and remotely.
#[derive(Args, Clone, Debug)]
pub struct RewardsConfig {
    /// Directory for rewards files. Defaults to the platform data directory.
    #[arg(short = 'd', long, env = "RP_NODE_DATA_DIR", help_heading = REWARDS_HELP_HEADING, value_hint = ValueHint::DirPath)]
    pub data_dir: Option<PathBuf>,
    /// Addresses of retired rewards pool contracts whose events should also
    /// be searched, comma separated.
    #[arg(long, env = "RP_NODE_PREVIOUS_REWARDS_POOLS", help_heading = REWARDS_HELP_HEADING, value_delimiter = ',')]
    pub previous_rewards_pools: Vec<Address>,
    /// First mirror, serving compressed files. Supports `{cid}`,
    /// `{filename}` and `{network}` placeholders.
    #[arg(long, env = "RP_NODE_PRIMARY_MIRROR", help_heading = REWARDS_HELP_HEADING, default_value = DEFAULT_PRIMARY_MIRROR)]
    pub primary_mirror: String,
    /// Second mirror, serving compressed files.
    #[arg(long, env = "RP_NODE_SECONDARY_MIRROR", help_heading = REWARDS_HELP_HEADING, default_value = DEFAULT_SECONDARY_MIRROR)]
    pub secondary_mirror: String,
    /// Last resort mirror, serving uncompressed files.
    #[arg(long, env = "RP_NODE_FALLBACK_MIRROR", help_heading = REWARDS_HELP_HEADING, default_value = DEFAULT_FALLBACK_MIRROR)]
    pub fallback_mirror: String,
    /// Scale effective stake by the share of the interval each node was
    /// registered for.
    #[arg(long, env = "RP_NODE_SCALE_BY_PARTICIPATION", help_heading = REWARDS_HELP_HEADING, default_value_t = false)]
    pub scale_by_participation: bool,
}

impl RewardsConfig {
    /// The configured data directory, or the platform default.
    pub fn data_dir(&self) -> anyhow::Result<PathBuf> {
        if let Some(dir) = &self.data_dir {
            return Ok(dir.clone());
        }
        match ProjectDirs::from("", "", DATA_DIR_NAME) {
            Some(dirs) => Ok(dirs.data_dir().join("rewards-trees")),
            None => Ok(std::env::current_dir()?.join("rewards-trees")),
        }
    }
}

/// Fee settings for automatic transactions.
#[derive(Args, Clone, Debug, Default)]
pub struct GasConfig {
    /// Automatic transactions wait until the max fee is below this value, in
    /// gwei. With zero no fee is ever low enough, so only forced submissions
    /// go out.
    #[arg(long, env = "RP_NODE_GAS_THRESHOLD", help_heading = GAS_HELP_HEADING, default_value_t = 150.0)]
    pub gas_threshold: f64,
    /// Max fee in gwei. Zero means ask the execution client.
    #[arg(long, env = "RP_NODE_MAX_FEE", help_heading = GAS_HELP_HEADING, default_value_t = 0.0)]
    pub max_fee: f64,
    /// Priority fee in gwei.
    #[arg(long, env = "RP_NODE_PRIORITY_FEE", help_heading = GAS_HELP_HEADING, default_value_t = 0.0)]
    pub priority_fee: f64,
    /// Gas limit override. Zero means use the estimate's safe limit.
    #[arg(long, env = "RP_NODE_GAS_LIMIT", help_heading = GAS_HELP_HEADING, default_value_t = 0)]
    pub gas_limit: u64,
}

/// Resolved fee settings in wei.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GasSettings {
    pub threshold: U256,
    pub max_fee: Option<U256>,
    pub priority_fee: U256,
    pub gas_limit: Option<u64>,
}

impl From<GasConfig> for GasSettings {
    fn from(cfg: GasConfig) -> Self {
        let priority_fee = if cfg.priority_fee > 0.0 {
            cfg.priority_fee
        } else {
            warn!("priority fee was missing or 0, using a default of {DEFAULT_PRIORITY_FEE_GWEI} gwei");
            DEFAULT_PRIORITY_FEE_GWEI
        };
        Self {
            threshold: gwei_f64_to_wei(cfg.gas_threshold),
            max_fee: Some(gwei_f64_to_wei(cfg.max_fee)).filter(|fee| !fee.is_zero()),
            priority_fee: gwei_f64_to_wei(priority_fee),
            gas_limit: Some(cfg.gas_limit).filter(|limit| *limit != 0),
        }
    }
}

#[cfg(test)]
mod tests {
    use rp_common::gwei_to_wei;

    use super::*;

    #[test]
    fn unset_fees_fall_back() {
        let settings = GasSettings::from(GasConfig::default());
        assert_eq!(settings.priority_fee, gwei_to_wei(2));
        assert_eq!(settings.max_fee, None);
        assert_eq!(settings.gas_limit, None);
        assert!(settings.threshold.is_zero());
    }

    #[test]
    fn explicit_fees_are_kept() {
        let settings = GasSettings::from(GasConfig {
            gas_threshold: 20.0,
            max_fee: 35.5,
            priority_fee: 1.0,
            gas_limit: 400_000,
        });
        assert_eq!(settings.threshold, gwei_to_wei(20));
        assert_eq!(settings.max_fee, Some(U256::from(35_500_000_000u64)));
        assert_eq!(settings.priority_fee, gwei_to_wei(1));
        assert_eq!(settings.gas_limit, Some(400_000));
    }

    #[test]
    fn explicit_data_dir_wins() {
        let cfg = RewardsConfig {
            data_dir: Some(PathBuf::from("/tmp/trees")),
            previous_rewards_pools: vec![],
            primary_mirror: DEFAULT_PRIMARY_MIRROR.into(),
            secondary_mirror: DEFAULT_SECONDARY_MIRROR.into(),
            fallback_mirror: DEFAULT_FALLBACK_MIRROR.into(),
            scale_by_participation: false,
        };
        assert_eq!(cfg.data_dir().unwrap(), PathBuf::from("/tmp/trees"));
    }
}
