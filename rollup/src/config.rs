use clap::Args;
use ethereum_types::Address;
use serde::{Deserialize, Serialize};

use crate::state_machine::StateMachineConfig;

const HELP_HEADING: &str = "Rollup options";

/// Everything needed to stand up a state machine and an aggregator.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct RollupConfig {
    /// Height of the account state tree; the rollup holds `2^tree_height`
    /// accounts.
    pub tree_height: usize,
    /// Swap fee in basis points.
    pub fee_basis_points: u64,
    /// Transitions per block before the aggregator hands a block off.
    pub block_size: usize,
    /// The account holding the swap pool's reserves.
    pub uniswap_address: Address,
    /// The account allowed to sign on behalf of others, e.g. faucet payouts.
    /// Left at the zero address, as in [`RollupConfig::default`], nobody may.
    pub aggregator_address: Address,
}

impl Default for RollupConfig {
    fn default() -> Self {
        Self {
            tree_height: 32,
            fee_basis_points: 30,
            block_size: 100,
            uniswap_address: Address::zero(),
            aggregator_address: Address::zero(),
        }
    }
}

impl RollupConfig {
    pub const fn state_machine(&self) -> StateMachineConfig {
        StateMachineConfig {
            fee_basis_points: self.fee_basis_points,
            tree_height: self.tree_height,
            uniswap_address: self.uniswap_address,
            aggregator_address: self.aggregator_address,
        }
    }
}

#[derive(Args, Clone, Debug, Eq, PartialEq)]
pub struct CliRollupConfig {
    /// Height of the account state tree.
    #[arg(long, env = "ROLLUP_TREE_HEIGHT", help_heading = HELP_HEADING, default_value_t = 32)]
    tree_height: usize,
    /// Swap fee in basis points.
    #[arg(long, env = "ROLLUP_FEE_BASIS_POINTS", help_heading = HELP_HEADING, default_value_t = 30)]
    fee_basis_points: u64,
    /// Number of transitions per block.
    #[arg(long, env = "ROLLUP_BLOCK_SIZE", help_heading = HELP_HEADING, default_value_t = 100)]
    block_size: usize,
    /// Address of the swap pool account.
    #[arg(long, env = "ROLLUP_UNISWAP_ADDRESS", help_heading = HELP_HEADING)]
    uniswap_address: Address,
    /// Address of the aggregator account.
    #[arg(long, env = "ROLLUP_AGGREGATOR_ADDRESS", help_heading = HELP_HEADING)]
    aggregator_address: Address,
}

impl From<CliRollupConfig> for RollupConfig {
    fn from(cli: CliRollupConfig) -> Self {
        Self {
            tree_height: cli.tree_height,
            fee_basis_points: cli.fee_basis_points,
            block_size: cli.block_size,
            uniswap_address: cli.uniswap_address,
            aggregator_address: cli.aggregator_address,
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[derive(Parser)]
    struct Cli {
        #[command(flatten)]
        rollup: CliRollupConfig,
    }

    #[test]
    fn cli_overrides_defaults() {
        let cli = Cli::parse_from([
            "rollup",
            "--tree-height",
            "20",
            "--uniswap-address",
            "0x1111111111111111111111111111111111111111",
            "--aggregator-address",
            "0x2222222222222222222222222222222222222222",
        ]);
        let config = RollupConfig::from(cli.rollup);

        assert_eq!(config.tree_height, 20);
        assert_eq!(config.fee_basis_points, 30);
        assert_eq!(config.block_size, 100);
        assert_eq!(config.uniswap_address, Address::repeat_byte(0x11));
        assert_eq!(config.state_machine().aggregator_address, Address::repeat_byte(0x22));
    }

    #[test]
    fn cli_defaults_match_the_default_config() {
        let zero = "0x0000000000000000000000000000000000000000";
        let cli = Cli::parse_from([
            "rollup",
            "--uniswap-address",
            zero,
            "--aggregator-address",
            zero,
        ]);
        assert_eq!(RollupConfig::from(cli.rollup), RollupConfig::default());
    }

    #[test]
    fn json_round_trip() {
        let config = RollupConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(serde_json::from_str::<RollupConfig>(&json).unwrap(), config);
    }
}
