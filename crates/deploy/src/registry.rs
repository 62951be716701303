//! Live deployment registries.
//!
//! A registry answers "has this contract been deployed in the current session?". It is
//! the last source consulted by the [`Resolver`](crate::Resolver).

use std::{collections::BTreeMap, future::Future};

use alloy_core::primitives::Address;

/// A source of deployments known at runtime, keyed by deployment name.
pub trait Registry: Send + Sync {
    /// Look up the deployment named `name`.
    fn lookup(&self, name: &str) -> impl Future<Output = Option<Address>> + Send;
}

/// In-process registry of every contract deployed or reused during the current run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionRegistry {
    deployments: BTreeMap<String, Address>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember `name` at `address` for the rest of the run.
    pub fn record(&mut self, name: impl Into<String>, address: Address) {
        self.deployments.insert(name.into(), address);
    }

    pub fn get(&self, name: &str) -> Option<Address> {
        self.deployments.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.deployments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deployments.is_empty()
    }
}

impl Registry for SessionRegistry {
    async fn lookup(&self, name: &str) -> Option<Address> {
        self.get(name)
    }
}
