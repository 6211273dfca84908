use alloy::primitives::Address;
use clap::{Parser, Subcommand};
use rp_node::config::{ChainConfig, GasConfig, RewardsConfig};

/// Staking pool node decision engine. Every command prints its result as
/// JSON on stdout.
#[derive(Parser)]
#[command(version = rp_node::version(), propagate_version = true)]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: Command,

    #[clap(flatten)]
    pub(crate) chain: ChainConfig,

    #[clap(flatten)]
    pub(crate) rewards: RewardsConfig,

    #[clap(flatten)]
    pub(crate) gas: GasConfig,
}

#[derive(Subcommand)]
pub(crate) enum Command {
    /// Builds the network state at a consensus slot.
    State {
        /// Consensus slot to snapshot. Defaults to the beacon head.
        #[arg(short, long, env = "RP_NODE_SLOT")]
        slot: Option<u64>,
    },
    /// Computes the effective RPL stake of every node.
    EffectiveStake {
        #[arg(short, long, env = "RP_NODE_SLOT")]
        slot: Option<u64>,
    },
    /// Lists the intervals a node has and has not claimed.
    ClaimStatus {
        /// The node address.
        #[arg(long, env = "RP_NODE_ADDRESS")]
        node: Address,
    },
    /// Shows an interval's rewards file status and the node's share of it.
    Interval {
        #[arg(long, env = "RP_NODE_ADDRESS")]
        node: Address,
        #[arg(short, long)]
        interval: u64,
    },
    /// Downloads and verifies the rewards file of an interval.
    Download {
        #[arg(short, long)]
        interval: u64,
    },
    /// Runs one bond reduction pass over a node's minipools.
    ReduceBonds {
        #[arg(long, env = "RP_NODE_ADDRESS")]
        node: Address,
        #[arg(short, long, env = "RP_NODE_SLOT")]
        slot: Option<u64>,
    },
    /// Finds the latest execution block at or before a unix time.
    BlockForTime {
        #[arg(short, long)]
        time: u64,
    },
    /// Finds the first consensus slot of an interval.
    StartSlot {
        /// Interval index, at least 1.
        #[arg(short, long, value_parser = clap::value_parser!(u64).range(1..))]
        interval: u64,
    },
    /// Builds the collateral rewards of the running interval and prints the
    /// resulting root and content identifier.
    PreviewRewards {
        #[arg(short, long, env = "RP_NODE_SLOT")]
        slot: Option<u64>,
    },
}
