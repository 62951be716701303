//! Per-network address book.
//!
//! The [`AddressStore`] maps logical contract symbols (e.g. `uniswapV3Factory`) to
//! on-chain addresses for a single network. It is seeded from a static JSON file
//! and augmented in place as contracts are resolved or deployed.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use alloy_core::primitives::Address;
use anyhow::{Context, Result};

/// The mutable address book for the active network.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressStore {
    network: String,
    addresses: BTreeMap<String, Address>,
}

impl AddressStore {
    /// Create an empty store for `network`.
    pub fn new(network: impl Into<String>) -> Self {
        Self {
            network: network.into(),
            addresses: BTreeMap::new(),
        }
    }

    /// Create a store pre-populated with the given entries.
    pub fn from_entries<I, S>(network: impl Into<String>, entries: I) -> Self
    where
        I: IntoIterator<Item = (S, Address)>,
        S: Into<String>,
    {
        Self {
            network: network.into(),
            addresses: entries
                .into_iter()
                .map(|(symbol, address)| (symbol.into(), address))
                .collect(),
        }
    }

    /// Path of the seed file for `network` inside `seed_dir`.
    pub fn seed_path(seed_dir: &Path, network: &str) -> PathBuf {
        seed_dir.join(format!("{network}.json"))
    }

    /// Load the seed address book for `network`.
    ///
    /// A missing seed file is normal (new network) and yields an empty store. A malformed
    /// file is logged and also yields an empty store. Entries whose value is not a valid
    /// address are skipped.
    pub fn load(network: &str, seed_dir: &Path) -> Self {
        let path = Self::seed_path(seed_dir, network);

        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) => {
                tracing::debug!(network, path = %path.display(), %err, "No seed address book");
                return Self::new(network);
            }
        };

        let raw: BTreeMap<String, String> = match serde_json::from_str(&content) {
            Ok(raw) => raw,
            Err(err) => {
                tracing::warn!(network, path = %path.display(), %err, "Ignoring malformed seed address book");
                return Self::new(network);
            }
        };

        let mut store = Self::new(network);
        for (symbol, value) in raw {
            match value.parse::<Address>() {
                Ok(address) => {
                    store.addresses.insert(symbol, address);
                }
                Err(err) => {
                    tracing::warn!(network, symbol, value, %err, "Skipping invalid seed address");
                }
            }
        }

        tracing::debug!(
            network,
            path = %path.display(),
            entries = store.len(),
            "Seed address book loaded"
        );

        store
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    /// Look up a symbol.
    pub fn get(&self, symbol: &str) -> Option<Address> {
        self.addresses.get(symbol).copied()
    }

    /// Insert or overwrite a symbol.
    pub fn set(&mut self, symbol: impl Into<String>, address: Address) {
        self.addresses.insert(symbol.into(), address);
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    /// Iterate over `(symbol, address)` pairs in symbol order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Address)> {
        self.addresses
            .iter()
            .map(|(symbol, address)| (symbol.as_str(), *address))
    }

    /// Export the store in the seed file format.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .context(format!("Failed to create directory {}", parent.display()))?;
        }

        let json = serde_json::to_string_pretty(&self.addresses)
            .context("Failed to serialize address book")?;

        std::fs::write(path, json)
            .context(format!("Failed to write address book to {}", path.display()))?;

        tracing::info!(network = %self.network, path = %path.display(), "Address book saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_core::primitives::address;
    use tempdir::TempDir;

    #[test]
    fn test_load_missing_seed_is_empty() {
        let temp_dir = TempDir::new("stakeroute-test").expect("Failed to create temp dir");

        let store = AddressStore::load("sepolia", temp_dir.path());

        assert_eq!(store.network(), "sepolia");
        assert!(store.is_empty());
    }

    #[test]
    fn test_load_seed() {
        let temp_dir = TempDir::new("stakeroute-test").expect("Failed to create temp dir");
        std::fs::write(
            temp_dir.path().join("goerli.json"),
            r#"{ "wrappedNative": "0xB4FBF271143F4FBf7B91A5ded31805e42b2208d6" }"#,
        )
        .expect("Failed to write seed");

        let store = AddressStore::load("goerli", temp_dir.path());

        assert_eq!(
            store.get("wrappedNative"),
            Some(address!("B4FBF271143F4FBf7B91A5ded31805e42b2208d6"))
        );
        assert_eq!(store.get("uniswapV3Factory"), None);
    }

    #[test]
    fn test_load_malformed_seed_is_empty() {
        let temp_dir = TempDir::new("stakeroute-test").expect("Failed to create temp dir");
        std::fs::write(temp_dir.path().join("goerli.json"), "{ not json")
            .expect("Failed to write seed");

        let store = AddressStore::load("goerli", temp_dir.path());
        assert!(store.is_empty());
    }

    #[test]
    fn test_load_skips_invalid_entries() {
        let temp_dir = TempDir::new("stakeroute-test").expect("Failed to create temp dir");
        std::fs::write(
            temp_dir.path().join("goerli.json"),
            r#"{
                "wrappedNative": "0xB4FBF271143F4FBf7B91A5ded31805e42b2208d6",
                "crvToken": "",
                "daiToken": "0x1234"
            }"#,
        )
        .expect("Failed to write seed");

        let store = AddressStore::load("goerli", temp_dir.path());

        assert_eq!(store.len(), 1);
        assert!(store.get("crvToken").is_none());
        assert!(store.get("daiToken").is_none());
    }

    #[test]
    fn test_set_overwrites() {
        let mut store = AddressStore::new("hardhat");
        let first = address!("00000000000000000000000000000000000000aa");
        let second = address!("00000000000000000000000000000000000000bb");

        store.set("lpSft", first);
        assert_eq!(store.get("lpSft"), Some(first));

        store.set("lpSft", second);
        assert_eq!(store.get("lpSft"), Some(second));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_save_and_reload() {
        let temp_dir = TempDir::new("stakeroute-test").expect("Failed to create temp dir");
        let store = AddressStore::from_entries(
            "localhost",
            [
                ("baseToken", address!("00000000000000000000000000000000000000c1")),
                ("assetToken", address!("00000000000000000000000000000000000000c2")),
            ],
        );

        store
            .save_to_file(&AddressStore::seed_path(temp_dir.path(), "localhost"))
            .expect("Failed to save address book");

        let reloaded = AddressStore::load("localhost", temp_dir.path());
        assert_eq!(store, reloaded);
    }
}
