//! Everything known about a network's deployments during a run.

use alloy_core::primitives::Address;
use anyhow::Result;

use crate::{
    AddressStore, ContractSpec, DeploymentRecords, PackageRecords, Resolver, SessionRegistry,
};

/// Address sources of one network plus what the current run has learned.
#[derive(Debug, Clone)]
pub struct DeploymentState {
    pub store: AddressStore,
    pub records: DeploymentRecords,
    pub packages: PackageRecords,
    pub session: SessionRegistry,
}

impl DeploymentState {
    pub fn new(store: AddressStore, records: DeploymentRecords, packages: PackageRecords) -> Self {
        Self {
            store,
            records,
            packages,
            session: SessionRegistry::new(),
        }
    }

    pub fn network(&self) -> &str {
        self.records.network()
    }

    pub fn resolver(&self) -> Resolver<'_, SessionRegistry> {
        Resolver::new(&self.store, &self.records, &self.packages, &self.session)
    }

    /// Remember a resolved address for the rest of the run.
    pub fn remember(&mut self, contract: &ContractSpec, address: Address) {
        self.store.set(&contract.symbol, address);
        self.session.record(&contract.name, address);
    }

    /// Persist a freshly deployed contract and remember it.
    pub fn commit(&mut self, contract: &ContractSpec, address: Address) -> Result<()> {
        self.records.write(&contract.name, address)?;
        self.remember(contract, address);
        Ok(())
    }
}
