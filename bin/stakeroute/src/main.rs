//! stakeroute is a CLI tool to deploy the stakeroute contracts, resuming where the last run
//! stopped.

mod cli;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use comfy_table::{Table, presets::UTF8_FULL};
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Serialize;
use stakeroute_deploy::{AddressStore, CONFIG_FILENAME, Config, Sequence};

use cli::{Cli, Command, OutputFormat};

/// One line of the `resolve` output.
#[derive(Debug, Serialize)]
struct ResolvedRow {
    symbol: String,
    name: String,
    address: Option<String>,
    source: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize the logger.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .init();

    match cli.command {
        Command::Init { force } => init(&cli.config, force),
        Command::Deploy {
            tags,
            force_redeploy,
            no_verify,
        } => {
            let config = load_config(&cli.config)?;
            deploy(&config, &cli.network, &tags, force_redeploy, no_verify).await
        }
        Command::Resolve {
            symbols,
            format,
            export,
        } => {
            let config = load_config(&cli.config)?;
            resolve(&config, &cli.network, &symbols, format, export.as_deref()).await
        }
        Command::Addresses { format } => {
            let config = load_config(&cli.config)?;
            addresses(&config, &cli.network, format)
        }
    }
}

/// Path of the configuration file designated by `path`.
fn config_file(path: &Path) -> PathBuf {
    if path.is_dir() {
        path.join(CONFIG_FILENAME)
    } else {
        path.to_path_buf()
    }
}

/// Load the configuration file merged with `STAKEROUTE_` environment overrides.
///
/// Relative paths are resolved against the directory of the configuration file.
fn load_config(path: &Path) -> Result<Config> {
    let file = config_file(path);
    if !file.exists() {
        anyhow::bail!(
            "Configuration file not found: {} (run `stakeroute init` to create one)",
            file.display()
        );
    }

    let mut config: Config = Figment::new()
        .merge(Toml::file(&file))
        .merge(Env::prefixed("STAKEROUTE_").split("__"))
        .extract()
        .context(format!("Failed to load configuration from {}", file.display()))?;

    if let Some(base) = file.parent() {
        config.rebase(base);
    }

    tracing::debug!(path = %file.display(), "Configuration loaded");
    Ok(config)
}

fn init(path: &Path, force: bool) -> Result<()> {
    let file = config_file(path);
    if file.exists() && !force {
        anyhow::bail!(
            "{} already exists, pass --force to overwrite it",
            file.display()
        );
    }

    Config::template()?.save_to_file(&file)
}

async fn deploy(
    config: &Config,
    network: &str,
    tags: &[String],
    force_redeploy: bool,
    no_verify: bool,
) -> Result<()> {
    let mut settings = config.network(network)?.clone();
    settings.force_redeploy |= force_redeploy;
    if no_verify {
        settings.verify_code = false;
    }

    let manifest = config.manifest()?;
    let chain = settings.client()?;

    tracing::info!(
        network,
        rpc_url = %settings.rpc_url,
        manifest = %config.paths.manifest.display(),
        "Deploying..."
    );

    let mut sequence = Sequence::new(
        &chain,
        config.artifacts(),
        config.state(network),
        settings.options(),
    )
    .await?;
    let report = sequence.run(&manifest, tags).await?;

    println!("{}", report.to_table());

    Ok(())
}

async fn resolve(
    config: &Config,
    network: &str,
    symbols: &[String],
    format: OutputFormat,
    export: Option<&Path>,
) -> Result<()> {
    let manifest = config.manifest()?;
    let state = config.state(network);
    let resolver = state.resolver();

    for symbol in symbols {
        if manifest.contract(symbol).is_none() {
            anyhow::bail!("Unknown contract {symbol}");
        }
    }

    let mut rows = Vec::new();
    let mut resolved_store = AddressStore::new(network);

    for contract in manifest.contracts() {
        if !symbols.is_empty() && !symbols.contains(&contract.symbol) {
            continue;
        }

        let resolved = resolver.resolve(contract).await;
        if let Some(resolved) = &resolved {
            resolved_store.set(&contract.symbol, resolved.address);
        }

        rows.push(ResolvedRow {
            symbol: contract.symbol.clone(),
            name: contract.name.clone(),
            address: resolved.as_ref().map(|r| r.address.to_string()),
            source: resolved.map(|r| r.source.to_string()),
        });
    }

    match format {
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_header(vec!["Symbol", "Contract", "Address", "Source"]);
            for row in &rows {
                table.add_row(vec![
                    row.symbol.clone(),
                    row.name.clone(),
                    row.address.clone().unwrap_or_else(|| "-".to_string()),
                    row.source.clone().unwrap_or_else(|| "unresolved".to_string()),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&rows).context("Failed to serialize addresses")?
            );
        }
    }

    if let Some(path) = export {
        resolved_store.save_to_file(path)?;
        tracing::info!(
            path = %path.display(),
            count = resolved_store.len(),
            "Address book exported"
        );
    }

    Ok(())
}

fn addresses(config: &Config, network: &str, format: OutputFormat) -> Result<()> {
    let store = AddressStore::load(network, &config.paths.addresses);

    match format {
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_header(vec!["Symbol", "Address"]);
            for (symbol, address) in store.iter() {
                table.add_row(vec![symbol.to_string(), address.to_string()]);
            }
            println!("{table}");
        }
        OutputFormat::Json => {
            let entries: std::collections::BTreeMap<&str, String> = store
                .iter()
                .map(|(symbol, address)| (symbol, address.to_string()))
                .collect();
            println!(
                "{}",
                serde_json::to_string_pretty(&entries).context("Failed to serialize addresses")?
            );
        }
    }

    Ok(())
}
