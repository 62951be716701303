//! Workspace configuration.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    time::Duration,
};

use alloy_core::primitives::{Address, B256};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
    AddressStore, ArtifactStore, DeployOptions, DeploymentRecords, DeploymentState, Manifest,
    PackageRecords, RpcChain,
};

/// The default name for the stakeroute configuration file.
pub const CONFIG_FILENAME: &str = "Stakeroute.toml";

/// RPC endpoint of a local development node.
pub const LOCAL_RPC_URL: &str = "http://127.0.0.1:8545";

fn default_true() -> bool {
    true
}

/// Directories and files the pipeline reads and writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Paths {
    /// Root of the per-network deployment records.
    pub deployments: PathBuf,
    /// Directory of the `<network>.json` seed address books.
    pub addresses: PathBuf,
    /// Compiled contract artifacts.
    pub artifacts: PathBuf,
    /// Deployment manifest.
    pub manifest: PathBuf,
}

impl Default for Paths {
    fn default() -> Self {
        Self {
            deployments: PathBuf::from("deployments"),
            addresses: PathBuf::from("addresses"),
            artifacts: PathBuf::from("artifacts"),
            manifest: PathBuf::from("deploy.toml"),
        }
    }
}

impl Paths {
    fn iter_mut(&mut self) -> impl Iterator<Item = &mut PathBuf> {
        [
            &mut self.deployments,
            &mut self.addresses,
            &mut self.artifacts,
            &mut self.manifest,
        ]
        .into_iter()
    }
}

fn rebase_path(path: &mut PathBuf, base: &Path) {
    if path.is_relative() {
        *path = base.join(&*path);
    }
}

/// Settings of one network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub rpc_url: Url,
    /// Expected chain id. Checked against the node when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<u64>,
    /// Account to deploy from. Defaults to the node's first account.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployer: Option<Address>,
    /// Redeploy every deployable contract once per run, ignoring persisted addresses.
    #[serde(default)]
    pub force_redeploy: bool,
    #[serde(default = "default_true")]
    pub verify_code: bool,
    #[serde(default = "default_true")]
    pub deterministic: bool,
    #[serde(default)]
    pub salt: B256,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmation_timeout_secs: Option<u64>,
}

impl NetworkConfig {
    pub fn new(rpc_url: Url) -> Self {
        let defaults = DeployOptions::default();
        Self {
            rpc_url,
            chain_id: defaults.chain_id,
            deployer: defaults.deployer,
            force_redeploy: defaults.force_redeploy,
            verify_code: defaults.verify_code,
            deterministic: defaults.deterministic,
            salt: defaults.salt,
            confirmation_timeout_secs: None,
        }
    }

    pub fn options(&self) -> DeployOptions {
        DeployOptions {
            deployer: self.deployer,
            chain_id: self.chain_id,
            force_redeploy: self.force_redeploy,
            verify_code: self.verify_code,
            deterministic: self.deterministic,
            salt: self.salt,
        }
    }

    /// JSON-RPC client for this network.
    pub fn client(&self) -> Result<RpcChain> {
        Ok(RpcChain::new(self.rpc_url.clone())?
            .with_confirmation_timeout(self.confirmation_timeout_secs.map(Duration::from_secs)))
    }
}

/// Main configuration, serialized to/from `Stakeroute.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub paths: Paths,
    #[serde(default)]
    pub networks: BTreeMap<String, NetworkConfig>,
    /// Third-party packages: package name -> root of its deployment records.
    #[serde(default)]
    pub packages: BTreeMap<String, PathBuf>,
}

impl Config {
    /// Starting point for a new workspace: the local development networks.
    pub fn template() -> Result<Self> {
        let local = Url::parse(LOCAL_RPC_URL).context("Invalid local RPC URL")?;

        let hardhat = NetworkConfig {
            chain_id: Some(31337),
            force_redeploy: true,
            ..NetworkConfig::new(local.clone())
        };
        let localhost = NetworkConfig {
            chain_id: Some(31337),
            ..NetworkConfig::new(local)
        };

        Ok(Self {
            paths: Paths::default(),
            networks: BTreeMap::from([
                ("hardhat".to_string(), hardhat),
                ("localhost".to_string(), localhost),
            ]),
            packages: BTreeMap::new(),
        })
    }

    /// Save the configuration to a TOML file.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;
        std::fs::write(path, content)
            .context(format!("Failed to write config to {}", path.display()))?;
        tracing::info!(path = %path.display(), "Configuration saved");
        Ok(())
    }

    /// Load the configuration from a TOML file, or from `Stakeroute.toml` inside a directory.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            anyhow::bail!("Configuration file or directory not found: {}", path.display());
        }

        let config_path = if path.is_dir() {
            path.join(CONFIG_FILENAME)
        } else {
            path.to_path_buf()
        };

        let content = std::fs::read_to_string(&config_path)
            .context(format!("Failed to read config from {}", config_path.display()))?;
        let config: Self =
            toml::from_str(&content).context("Failed to parse config file as TOML")?;
        tracing::debug!(path = %config_path.display(), "Configuration loaded");
        Ok(config)
    }

    /// Resolve every relative path of the configuration, package roots included, against
    /// `base`, normally the directory holding the configuration file.
    pub fn rebase(&mut self, base: &Path) {
        for path in self.paths.iter_mut().chain(self.packages.values_mut()) {
            rebase_path(path, base);
        }
    }

    /// Settings of `network`.
    pub fn network(&self, network: &str) -> Result<&NetworkConfig> {
        self.networks.get(network).with_context(|| {
            format!(
                "Unknown network {network}, configured networks: {}",
                self.networks.keys().cloned().collect::<Vec<_>>().join(", ")
            )
        })
    }

    /// Address sources of `network`, with the seed address book loaded.
    pub fn state(&self, network: &str) -> DeploymentState {
        DeploymentState::new(
            AddressStore::load(network, &self.paths.addresses),
            DeploymentRecords::new(&self.paths.deployments, network),
            PackageRecords::new(network, self.packages.clone()),
        )
    }

    pub fn artifacts(&self) -> ArtifactStore {
        ArtifactStore::new(&self.paths.artifacts)
    }

    pub fn manifest(&self) -> Result<Manifest> {
        Manifest::load_from_file(&self.paths.manifest)
    }
}
