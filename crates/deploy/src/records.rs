//! On-disk deployment records.
//!
//! Every deployed contract gets a record file at
//! `{root}/{network}/{ContractName}.json` with the shape `{ "address": "0x..." }`.
//! Third-party packages ship records in the same layout under their own root,
//! so [`DeploymentRecords`] is used for both.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use alloy_core::primitives::Address;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// File written next to the records, holding the chain id of the network.
pub const CHAIN_ID_FILENAME: &str = ".chainId";

/// A persisted deployment of one contract on one network.
///
/// Unknown fields (ABI, receipt, ...) written by other tools are ignored on read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub address: Address,
}

impl DeploymentRecord {
    pub fn new(address: Address) -> Self {
        Self { address }
    }

    /// Save this record to a file as formatted JSON.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let json =
            serde_json::to_string_pretty(self).context("Failed to serialize deployment record")?;

        std::fs::write(path, json).context(format!(
            "Failed to write deployment record to {}",
            path.display()
        ))?;

        Ok(())
    }

    /// Load a record from a file.
    ///
    /// Returns an error if the file doesn't exist, is malformed, or cannot be read.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).context(format!(
            "Failed to read deployment record from {}",
            path.display()
        ))?;

        serde_json::from_str(&content).context("Failed to parse deployment record JSON")
    }
}

/// Deployment records of a single network, rooted at a deployments directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentRecords {
    root: PathBuf,
    network: String,
}

impl DeploymentRecords {
    pub fn new(root: impl Into<PathBuf>, network: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            network: network.into(),
        }
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    /// Directory holding this network's records.
    pub fn network_dir(&self) -> PathBuf {
        self.root.join(&self.network)
    }

    /// Path of the record file for `name`.
    pub fn path_for(&self, name: &str) -> PathBuf {
        self.network_dir().join(format!("{name}.json"))
    }

    /// Look up the recorded address for `name`.
    ///
    /// Missing, unreadable and malformed records are all reported as `None`.
    pub fn load(&self, name: &str) -> Option<Address> {
        let path = self.path_for(name);

        match DeploymentRecord::load_from_file(&path) {
            Ok(record) => Some(record.address),
            Err(err) => {
                tracing::trace!(
                    network = %self.network,
                    contract = name,
                    path = %path.display(),
                    err = format!("{err:#}"),
                    "No usable deployment record"
                );
                None
            }
        }
    }

    /// Persist the address of `name`, creating the network directory if needed.
    pub fn write(&self, name: &str, address: Address) -> Result<PathBuf> {
        let dir = self.network_dir();
        std::fs::create_dir_all(&dir)
            .context(format!("Failed to create deployments directory {}", dir.display()))?;

        let path = self.path_for(name);
        DeploymentRecord::new(address).save_to_file(&path)?;

        tracing::debug!(
            network = %self.network,
            contract = name,
            %address,
            path = %path.display(),
            "Deployment record written"
        );

        Ok(path)
    }

    /// Write the `.chainId` marker for this network if it does not exist yet.
    pub fn ensure_chain_id(&self, chain_id: u64) -> Result<()> {
        let dir = self.network_dir();
        let path = dir.join(CHAIN_ID_FILENAME);

        if path.exists() {
            return Ok(());
        }

        std::fs::create_dir_all(&dir)
            .context(format!("Failed to create deployments directory {}", dir.display()))?;
        std::fs::write(&path, chain_id.to_string())
            .context(format!("Failed to write chain id to {}", path.display()))?;

        Ok(())
    }

    /// Read the `.chainId` marker, if present and well formed.
    pub fn chain_id(&self) -> Option<u64> {
        std::fs::read_to_string(self.network_dir().join(CHAIN_ID_FILENAME))
            .ok()
            .and_then(|content| content.trim().parse().ok())
    }
}

/// Read-only deployment records shipped by third-party packages, keyed by package name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageRecords {
    packages: BTreeMap<String, DeploymentRecords>,
}

impl PackageRecords {
    /// Build from `package name -> deployments root` pairs for `network`.
    pub fn new<I, S, P>(network: &str, roots: I) -> Self
    where
        I: IntoIterator<Item = (S, P)>,
        S: Into<String>,
        P: Into<PathBuf>,
    {
        Self {
            packages: roots
                .into_iter()
                .map(|(name, root)| (name.into(), DeploymentRecords::new(root, network)))
                .collect(),
        }
    }

    /// Look up `contract` in the records of `package`.
    ///
    /// An unknown package is a miss.
    pub fn load(&self, package: &str, contract: &str) -> Option<Address> {
        match self.packages.get(package) {
            Some(records) => records.load(contract),
            None => {
                tracing::trace!(package, contract, "No deployments root configured for package");
                None
            }
        }
    }
}
