//! Contract creation.
//!
//! Contracts are created through the deterministic deployment proxy whenever possible,
//! which makes their address a pure function of salt and init code: running the same
//! deployment twice converges on the same contract without a second transaction.
//! Contracts with linked libraries embed addresses in their code and fall back to a plain
//! `CREATE` from the deployer account.

use alloy_core::primitives::{Address, B256, Bytes, address};
use anyhow::{Context, Result};

use crate::{ChainClient, TransactionRequest};

/// Address of the deterministic deployment proxy, identical on every EVM chain it was
/// published to.
pub const DETERMINISTIC_DEPLOYMENT_PROXY: Address =
    address!("4e59b44847b379578588920cA78FbF26c0B4956C");

/// How a contract was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum DeployMethod {
    #[strum(to_string = "create2")]
    Create2,
    #[strum(to_string = "create")]
    Create,
}

/// A confirmed contract creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deployment {
    pub address: Address,
    /// `None` when the contract already existed at its deterministic address.
    pub transaction_hash: Option<B256>,
    pub method: DeployMethod,
}

/// Sends contract creation transactions from the deployer account.
#[derive(Debug)]
pub struct Executor<'a, C> {
    chain: &'a C,
    deployer: Address,
    salt: B256,
}

impl<'a, C: ChainClient> Executor<'a, C> {
    pub fn new(chain: &'a C, deployer: Address, salt: B256) -> Self {
        Self {
            chain,
            deployer,
            salt,
        }
    }

    pub fn deployer(&self) -> Address {
        self.deployer
    }

    /// Address `init_code` lands at when created through the proxy with our salt.
    pub fn predict(&self, init_code: &[u8]) -> Address {
        DETERMINISTIC_DEPLOYMENT_PROXY.create2_from_code(self.salt, init_code)
    }

    /// Create contract `name` from `init_code`.
    ///
    /// With `deterministic` set, creation goes through the proxy unless the chain does not
    /// have it, in which case a plain `CREATE` is used instead.
    pub async fn deploy(
        &self,
        name: &str,
        init_code: Bytes,
        deterministic: bool,
    ) -> Result<Deployment> {
        let deployment = if deterministic && self.proxy_available().await? {
            self.deploy_deterministic(name, init_code).await?
        } else {
            if deterministic {
                tracing::warn!(
                    proxy = %DETERMINISTIC_DEPLOYMENT_PROXY,
                    contract = name,
                    "Deterministic deployment proxy not found on chain, using CREATE"
                );
            }
            self.deploy_direct(name, init_code).await?
        };

        tracing::info!(
            contract = name,
            address = %deployment.address,
            method = %deployment.method,
            "Deployed {} to {}",
            name,
            deployment.address
        );

        Ok(deployment)
    }

    /// Send `data` to `target` as transaction `name` and wait for it to succeed.
    pub async fn call(&self, name: &str, target: Address, data: Bytes) -> Result<B256> {
        let receipt = self
            .chain
            .send_transaction(TransactionRequest::call(self.deployer, target, data))
            .await
            .context(format!("Failed to send {name}"))?;

        if !receipt.success {
            anyhow::bail!("{name} reverted (tx {})", receipt.transaction_hash);
        }

        tracing::info!(
            call = name,
            %target,
            tx = %receipt.transaction_hash,
            "Executed {} on {}",
            name,
            target
        );

        Ok(receipt.transaction_hash)
    }

    /// Read-only call of `target` from the deployer account.
    pub async fn read(&self, target: Address, data: Bytes) -> Result<Bytes> {
        self.chain
            .call(TransactionRequest::call(self.deployer, target, data))
            .await
            .context(format!("Failed to call {target}"))
    }

    async fn proxy_available(&self) -> Result<bool> {
        let code = self
            .chain
            .code_at(DETERMINISTIC_DEPLOYMENT_PROXY)
            .await
            .context("Failed to check for the deterministic deployment proxy")?;

        Ok(!code.is_empty())
    }

    async fn deploy_deterministic(&self, name: &str, init_code: Bytes) -> Result<Deployment> {
        let address = self.predict(&init_code);

        let existing = self
            .chain
            .code_at(address)
            .await
            .context(format!("Failed to read code at {address}"))?;
        if !existing.is_empty() {
            tracing::debug!(
                contract = name,
                %address,
                "Code already present at deterministic address, skipping transaction"
            );
            return Ok(Deployment {
                address,
                transaction_hash: None,
                method: DeployMethod::Create2,
            });
        }

        let mut data = self.salt.to_vec();
        data.extend_from_slice(&init_code);

        let receipt = self
            .chain
            .send_transaction(TransactionRequest::call(
                self.deployer,
                DETERMINISTIC_DEPLOYMENT_PROXY,
                Bytes::from(data),
            ))
            .await
            .context(format!("Failed to deploy {name}"))?;

        if !receipt.success {
            anyhow::bail!(
                "Deployment of {name} reverted (tx {})",
                receipt.transaction_hash
            );
        }

        let code = self
            .chain
            .code_at(address)
            .await
            .context(format!("Failed to read code at {address}"))?;
        if code.is_empty() {
            anyhow::bail!(
                "Deployment of {name} succeeded but no code found at {address} (tx {})",
                receipt.transaction_hash
            );
        }

        Ok(Deployment {
            address,
            transaction_hash: Some(receipt.transaction_hash),
            method: DeployMethod::Create2,
        })
    }

    async fn deploy_direct(&self, name: &str, init_code: Bytes) -> Result<Deployment> {
        let receipt = self
            .chain
            .send_transaction(TransactionRequest::create(self.deployer, init_code))
            .await
            .context(format!("Failed to deploy {name}"))?;

        if !receipt.success {
            anyhow::bail!(
                "Deployment of {name} reverted (tx {})",
                receipt.transaction_hash
            );
        }

        let address = receipt.contract_address.with_context(|| {
            format!(
                "Receipt of {} has no contract address (tx {})",
                name, receipt.transaction_hash
            )
        })?;

        Ok(Deployment {
            address,
            transaction_hash: Some(receipt.transaction_hash),
            method: DeployMethod::Create,
        })
    }
}
