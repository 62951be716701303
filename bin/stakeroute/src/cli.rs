use std::path::PathBuf;

use clap::{Parser, Subcommand};
use stakeroute_deploy::CONFIG_FILENAME;
use tracing::level_filters::LevelFilter;

/// The network used when none is given.
const DEFAULT_NETWORK: &str = "localhost";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, strum::Display, strum::EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

#[derive(Parser)]
#[command(name = "stakeroute")]
#[command(
    author,
    version,
    about = "Resolve and deploy the stakeroute contracts, one step at a time"
)]
pub struct Cli {
    /// The verbosity level.
    #[arg(short, long, env = "STAKEROUTE_VERBOSITY", default_value_t = LevelFilter::INFO)]
    pub verbosity: LevelFilter,

    /// Path to the configuration file, or to a directory containing Stakeroute.toml.
    ///
    /// Values can be overridden with STAKEROUTE_ environment variables, nested keys being
    /// separated by `__` (e.g. STAKEROUTE_NETWORKS__GOERLI__RPC_URL).
    #[arg(short, long, alias = "conf", env = "STAKEROUTE_CONFIG", default_value = CONFIG_FILENAME)]
    pub config: PathBuf,

    /// The network to operate on, as named in the configuration.
    #[arg(short, long, env = "STAKEROUTE_NETWORK", default_value = DEFAULT_NETWORK)]
    pub network: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Deploy every contract of the manifest that does not resolve yet.
    Deploy {
        /// Only run the steps carrying one of these tags, plus the steps they depend on.
        #[arg(short, long, value_delimiter = ',', env = "STAKEROUTE_TAGS")]
        tags: Vec<String>,

        /// Ignore recorded addresses and deploy every contract again.
        #[arg(long, env = "STAKEROUTE_FORCE_REDEPLOY", default_value_t = false)]
        force_redeploy: bool,

        /// Trust recorded addresses without checking that they hold code.
        #[arg(long, default_value_t = false)]
        no_verify: bool,
    },

    /// Show where the manifest's contracts resolve, without sending transactions.
    Resolve {
        /// Symbols to resolve. Defaults to every contract of the manifest.
        symbols: Vec<String>,

        #[arg(short, long, default_value_t = OutputFormat::Table)]
        format: OutputFormat,

        /// Write the resolved addresses as an address book to this file.
        #[arg(long)]
        export: Option<PathBuf>,
    },

    /// Print the seed address book of the network.
    Addresses {
        #[arg(short, long, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },

    /// Write a starter configuration file.
    Init {
        /// Overwrite an existing configuration file.
        #[arg(long, default_value_t = false)]
        force: bool,
    },
}
