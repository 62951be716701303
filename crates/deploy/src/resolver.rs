//! Address resolution.
//!
//! The [`Resolver`] answers "does this contract already exist on the network, and where?"
//! by walking its sources in a fixed order of precedence:
//!
//! 1. the address store (explicit configuration),
//! 2. this repository's deployment record,
//! 3. the third-party package's deployment record,
//! 4. the live registry.
//!
//! The first source with an answer wins, unless the caller rejects it and moves on to the
//! next [candidate](Resolver::candidates). Sources never fail: an unreadable or malformed
//! source is simply a source without an answer.

use std::collections::HashSet;

use alloy_core::primitives::Address;

use crate::{AddressStore, ContractSpec, DeploymentRecords, PackageRecords, Registry};

/// Where a resolved address came from.
#[derive(Debug, Clone, PartialEq, Eq, strum::Display)]
pub enum Source {
    #[strum(to_string = "address book")]
    AddressBook,
    #[strum(to_string = "deployment record")]
    DeploymentRecord,
    #[strum(to_string = "package {0}")]
    Package(String),
    #[strum(to_string = "session")]
    Registry,
}

impl Source {
    /// Whether the address was read from persisted state rather than produced in this run.
    pub fn is_persisted(&self) -> bool {
        !matches!(self, Self::Registry)
    }
}

/// A successfully resolved address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub address: Address,
    pub source: Source,
}

/// Which sources the resolver may consult.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResolvePolicy {
    /// Walk every source.
    #[default]
    Full,
    /// Only trust what was deployed or resolved during the current run.
    SessionOnly,
}

/// Resolves contract addresses against the configured sources.
#[derive(Debug)]
pub struct Resolver<'a, R> {
    store: &'a AddressStore,
    records: &'a DeploymentRecords,
    packages: &'a PackageRecords,
    registry: &'a R,
}

impl<'a, R: Registry> Resolver<'a, R> {
    pub fn new(
        store: &'a AddressStore,
        records: &'a DeploymentRecords,
        packages: &'a PackageRecords,
        registry: &'a R,
    ) -> Self {
        Self {
            store,
            records,
            packages,
            registry,
        }
    }

    /// Resolve `contract`, returning `None` when it has to be deployed.
    pub async fn resolve(&self, contract: &ContractSpec) -> Option<Resolved> {
        self.resolve_with(contract, ResolvePolicy::Full).await
    }

    /// Resolve `contract` under `policy`.
    pub async fn resolve_with(
        &self,
        contract: &ContractSpec,
        policy: ResolvePolicy,
    ) -> Option<Resolved> {
        self.candidates(contract, policy).await.into_iter().next()
    }

    /// Every answer for `contract` under `policy`, in order of precedence.
    ///
    /// An address offered by several sources is listed once, under the first of them.
    pub async fn candidates(
        &self,
        contract: &ContractSpec,
        policy: ResolvePolicy,
    ) -> Vec<Resolved> {
        let mut candidates = Vec::new();

        if policy == ResolvePolicy::Full {
            if let Some(address) = self.store.get(&contract.symbol) {
                candidates.push(Resolved {
                    address,
                    source: Source::AddressBook,
                });
            }

            if let Some(address) = self.records.load(&contract.name) {
                candidates.push(Resolved {
                    address,
                    source: Source::DeploymentRecord,
                });
            }

            if let Some(package) = &contract.package {
                if let Some(address) = self.packages.load(&package.name, &package.contract) {
                    candidates.push(Resolved {
                        address,
                        source: Source::Package(package.name.clone()),
                    });
                }
            }
        }

        if let Some(address) = self.registry.lookup(&contract.name).await {
            candidates.push(Resolved {
                address,
                source: Source::Registry,
            });
        }

        let mut seen = HashSet::new();
        candidates.retain(|candidate| seen.insert(candidate.address));
        candidates
    }
}
