//! Running deployment manifests.
//!
//! A [`Sequence`] walks the selected steps of a [`Manifest`] in order and *ensures* every
//! contract: an address that resolves is reused, anything else is deployed and persisted
//! before the next contract is looked at. Since every confirmed deployment is written out
//! immediately, running a sequence again after a failure only performs what is left.
//!
//! The calls of a step come after its contracts. A call is only sent when its guard, a
//! read of the state the call produces, does not already hold.

use std::{collections::BTreeMap, fmt};

use alloy_core::{
    dyn_abi::{DynSolType, DynSolValue},
    primitives::{Address, B256, Bytes},
};
use anyhow::{Context, Result};
use comfy_table::{Table, presets::UTF8_FULL};
use derive_more::Deref;

use crate::{
    ArtifactStore, Bindings, CallSpec, ChainClient, ContractSpec, DeployMethod, DeploymentState,
    Executor, Manifest, ReadSpec, ResolvePolicy, Resolved, Signature, Source, abi,
};

/// Per-network deployment behaviour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployOptions {
    /// Account to deploy from. Defaults to the node's first account.
    pub deployer: Option<Address>,
    /// Chain id the node is expected to report.
    pub chain_id: Option<u64>,
    /// Ignore persisted addresses of deployable contracts and deploy them again.
    pub force_redeploy: bool,
    /// Check that persisted addresses still hold code before reusing them.
    pub verify_code: bool,
    /// Create contracts through the deterministic deployment proxy.
    pub deterministic: bool,
    pub salt: B256,
}

impl Default for DeployOptions {
    fn default() -> Self {
        Self {
            deployer: None,
            chain_id: None,
            force_redeploy: false,
            verify_code: true,
            deterministic: true,
            salt: B256::ZERO,
        }
    }
}

/// What ensuring a contract did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Reused {
        source: Source,
    },
    Deployed {
        /// `None` when deterministic deployment found the contract already in place.
        transaction_hash: Option<B256>,
        method: DeployMethod,
    },
    /// Read from a contract that created it.
    Queried {
        function: String,
    },
}

impl Outcome {
    pub fn is_deployed(&self) -> bool {
        matches!(self, Self::Deployed { .. })
    }

    pub fn is_reused(&self) -> bool {
        matches!(self, Self::Reused { .. })
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reused { source } => write!(f, "reused ({source})"),
            Self::Deployed {
                transaction_hash: Some(hash),
                method,
            } => write!(f, "deployed ({method}, tx {hash})"),
            Self::Deployed {
                transaction_hash: None,
                method,
            } => write!(f, "deployed ({method}, already on chain)"),
            Self::Queried { function } => write!(f, "queried ({function})"),
        }
    }
}

/// What ensuring a call did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallOutcome {
    Executed { transaction_hash: B256 },
    /// The guard already held.
    Skipped,
}

impl fmt::Display for CallOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Executed { transaction_hash } => write!(f, "executed (tx {transaction_hash})"),
            Self::Skipped => f.write_str("skipped (already done)"),
        }
    }
}

/// One ensured contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportEntry {
    pub step: String,
    pub symbol: String,
    pub name: String,
    pub address: Address,
    pub outcome: Outcome,
}

/// One ensured call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallEntry {
    pub step: String,
    pub name: String,
    /// Symbol of the called contract.
    pub contract: String,
    pub target: Address,
    pub outcome: CallOutcome,
}

/// Everything a run ensured, in execution order.
///
/// Dereferences to the contract entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deref)]
pub struct DeployReport {
    #[deref]
    entries: Vec<ReportEntry>,
    calls: Vec<CallEntry>,
}

impl DeployReport {
    pub fn deployed(&self) -> impl Iterator<Item = &ReportEntry> {
        self.entries.iter().filter(|entry| entry.outcome.is_deployed())
    }

    pub fn reused(&self) -> impl Iterator<Item = &ReportEntry> {
        self.entries.iter().filter(|entry| entry.outcome.is_reused())
    }

    pub fn queried(&self) -> impl Iterator<Item = &ReportEntry> {
        self.entries
            .iter()
            .filter(|entry| matches!(entry.outcome, Outcome::Queried { .. }))
    }

    pub fn calls(&self) -> &[CallEntry] {
        &self.calls
    }

    pub fn executed(&self) -> impl Iterator<Item = &CallEntry> {
        self.calls
            .iter()
            .filter(|call| matches!(call.outcome, CallOutcome::Executed { .. }))
    }

    pub fn skipped(&self) -> impl Iterator<Item = &CallEntry> {
        self.calls
            .iter()
            .filter(|call| call.outcome == CallOutcome::Skipped)
    }

    /// Address ensured for `symbol` during the run.
    pub fn address(&self, symbol: &str) -> Option<Address> {
        self.entries
            .iter()
            .find(|entry| entry.symbol == symbol)
            .map(|entry| entry.address)
    }

    pub fn to_table(&self) -> Table {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .set_header(vec!["Step", "Symbol", "Contract", "Address", "Outcome"]);

        for entry in &self.entries {
            table.add_row(vec![
                entry.step.clone(),
                entry.symbol.clone(),
                entry.name.clone(),
                entry.address.to_string(),
                entry.outcome.to_string(),
            ]);
        }

        for call in &self.calls {
            table.add_row(vec![
                call.step.clone(),
                call.contract.clone(),
                call.name.clone(),
                call.target.to_string(),
                call.outcome.to_string(),
            ]);
        }

        table
    }
}

/// Ensures the contracts and calls of a manifest on one network.
#[derive(Debug)]
pub struct Sequence<'a, C> {
    chain: &'a C,
    artifacts: ArtifactStore,
    state: DeploymentState,
    options: DeployOptions,
    deployer: Address,
    /// Every contract of the manifest being run, by symbol.
    catalog: BTreeMap<String, ContractSpec>,
}

impl<'a, C: ChainClient> Sequence<'a, C> {
    /// Connect to the chain and prepare a run.
    ///
    /// Fails when the node reports a chain id other than the configured one, or when no
    /// deployer account is configured and the node has none.
    pub async fn new(
        chain: &'a C,
        artifacts: ArtifactStore,
        state: DeploymentState,
        options: DeployOptions,
    ) -> Result<Self> {
        let chain_id = chain.chain_id().await.context("Failed to fetch chain id")?;

        if let Some(expected) = options.chain_id {
            if expected != chain_id {
                anyhow::bail!(
                    "Network {} expects chain id {expected} but the node reports {chain_id}",
                    state.network()
                );
            }
        }

        if let Some(recorded) = state.records.chain_id() {
            if recorded != chain_id {
                tracing::warn!(
                    network = state.network(),
                    recorded,
                    chain_id,
                    "Deployment records were written for a different chain"
                );
            }
        }
        state.records.ensure_chain_id(chain_id)?;

        let deployer = match options.deployer {
            Some(deployer) => deployer,
            None => chain
                .accounts()
                .await
                .context("Failed to fetch node accounts")?
                .first()
                .copied()
                .context("Node has no accounts to deploy from")?,
        };

        tracing::info!(
            network = state.network(),
            chain_id,
            %deployer,
            force_redeploy = options.force_redeploy,
            "Deployment session started"
        );

        Ok(Self {
            chain,
            artifacts,
            state,
            options,
            deployer,
            catalog: BTreeMap::new(),
        })
    }

    pub fn deployer(&self) -> Address {
        self.deployer
    }

    pub fn state(&self) -> &DeploymentState {
        &self.state
    }

    pub fn into_state(self) -> DeploymentState {
        self.state
    }

    /// Make sure `contract` exists on chain, deploying it if nothing usable resolves.
    pub async fn ensure(&mut self, contract: &ContractSpec) -> Result<(Address, Outcome)> {
        if let Some(resolved) = self.resolve(contract).await? {
            tracing::info!(
                contract = %contract.name,
                address = %resolved.address,
                source = %resolved.source,
                "Using {} at {}",
                contract.name,
                resolved.address
            );
            self.state.remember(contract, resolved.address);
            return Ok((
                resolved.address,
                Outcome::Reused {
                    source: resolved.source,
                },
            ));
        }

        if let Some(query) = &contract.query {
            return self.discover(contract, query).await;
        }

        if contract.external {
            anyhow::bail!(
                "External contract {} ({}) has no known address on {}",
                contract.name,
                contract.symbol,
                self.state.network()
            );
        }

        tracing::info!(contract = %contract.name, "Deploying {}", contract.name);

        let bindings = self.bindings(contract.dependencies()).await?;
        let artifact = self.artifacts.load(contract.artifact_name())?;
        let libraries = contract
            .libraries
            .iter()
            .map(|(library, symbol)| Ok((library.clone(), bindings.address(symbol)?)))
            .collect::<Result<BTreeMap<_, _>>>()?;
        let mut init_code = artifact
            .link(&libraries)
            .context(format!("Failed to link {}", contract.name))?
            .to_vec();
        init_code.extend_from_slice(
            &abi::encode_constructor_args(contract, &bindings)
                .context(format!("Invalid constructor arguments for {}", contract.name))?,
        );

        let deterministic =
            self.options.deterministic && contract.deterministic && !artifact.needs_linking();
        let deployment = self
            .executor()
            .deploy(&contract.name, Bytes::from(init_code), deterministic)
            .await?;

        self.state.commit(contract, deployment.address)?;

        Ok((
            deployment.address,
            Outcome::Deployed {
                transaction_hash: deployment.transaction_hash,
                method: deployment.method,
            },
        ))
    }

    /// Send `call` unless its guard shows it was already made.
    pub async fn ensure_call(&mut self, call: &CallSpec) -> Result<(Address, CallOutcome)> {
        let bindings = self.bindings(call.dependencies()).await?;
        let target = bindings.address(&call.contract)?;

        if self.guard_holds(call, &bindings).await? {
            tracing::info!(call = %call.name, %target, "Skipping {}, already done", call.name);
            return Ok((target, CallOutcome::Skipped));
        }

        let signature: Signature = call.function.parse()?;
        let data = signature.encode_call(bindings.values(&call.args, &signature.inputs)?)?;
        let transaction_hash = self.executor().call(&call.name, target, data).await?;

        if !self.guard_holds(call, &bindings).await? {
            tracing::warn!(
                call = %call.name,
                guard = %call.guard.function,
                "Guard of {} does not hold after sending it, the next run will send it again",
                call.name
            );
        }

        Ok((target, CallOutcome::Executed { transaction_hash }))
    }

    /// Ensure every contract and call of the steps selected by `tags`.
    pub async fn run(&mut self, manifest: &Manifest, tags: &[String]) -> Result<DeployReport> {
        let steps = manifest.select(tags)?;
        self.catalog = manifest
            .contracts()
            .map(|contract| (contract.symbol.clone(), contract.clone()))
            .collect();
        let mut report = DeployReport::default();

        for step in steps {
            tracing::info!(order = step.order, step = %step.name, "Running step");

            for contract in &step.contracts {
                let (address, outcome) = self.ensure(contract).await.context(format!(
                    "Step {} ({}) failed on {}",
                    step.order, step.name, contract.name
                ))?;

                report.entries.push(ReportEntry {
                    step: step.name.clone(),
                    symbol: contract.symbol.clone(),
                    name: contract.name.clone(),
                    address,
                    outcome,
                });
            }

            for call in &step.calls {
                let (target, outcome) = self.ensure_call(call).await.context(format!(
                    "Step {} ({}) failed on {}",
                    step.order, step.name, call.name
                ))?;

                report.calls.push(CallEntry {
                    step: step.name.clone(),
                    name: call.name.clone(),
                    contract: call.contract.clone(),
                    target,
                    outcome,
                });
            }
        }

        tracing::info!(
            deployed = report.deployed().count(),
            reused = report.reused().count(),
            queried = report.queried().count(),
            executed = report.executed().count(),
            skipped = report.skipped().count(),
            "Deployment finished"
        );

        Ok(report)
    }

    fn executor(&self) -> Executor<'a, C> {
        Executor::new(self.chain, self.deployer, self.options.salt)
    }

    fn policy(&self, contract: &ContractSpec) -> ResolvePolicy {
        if self.options.force_redeploy && !contract.external {
            ResolvePolicy::SessionOnly
        } else {
            ResolvePolicy::Full
        }
    }

    /// First usable address of `contract`. Sources pointing at an empty account are skipped.
    async fn resolve(&self, contract: &ContractSpec) -> Result<Option<Resolved>> {
        let candidates = self
            .state
            .resolver()
            .candidates(contract, self.policy(contract))
            .await;

        for candidate in candidates {
            if self
                .is_stale(contract, candidate.address, &candidate.source)
                .await?
            {
                tracing::warn!(
                    contract = %contract.name,
                    address = %candidate.address,
                    source = %candidate.source,
                    "No code at resolved address, ignoring it"
                );
                continue;
            }
            return Ok(Some(candidate));
        }

        Ok(None)
    }

    /// Address a `@symbol` reference stands for.
    ///
    /// Symbols of the running manifest go through the resolver, so contracts of steps that
    /// are not selected are found in their records.
    async fn address_of(&mut self, symbol: &str) -> Result<Address> {
        let Some(contract) = self.catalog.get(symbol).cloned() else {
            return self
                .state
                .store
                .get(symbol)
                .with_context(|| format!("Contract {symbol} is not resolved yet"));
        };

        let resolved = self.resolve(&contract).await?.with_context(|| {
            format!(
                "Contract {} ({symbol}) is not deployed on {}; run the step that deploys it first",
                contract.name,
                self.state.network()
            )
        })?;

        if resolved.source.is_persisted() {
            self.state.remember(&contract, resolved.address);
        }
        Ok(resolved.address)
    }

    async fn bindings(&mut self, symbols: Vec<&str>) -> Result<Bindings> {
        let mut bindings = Bindings::new(self.deployer);
        for symbol in symbols {
            let address = self.address_of(symbol).await?;
            bindings.bind(symbol, address);
        }
        Ok(bindings)
    }

    /// Find `contract` by reading it from the contract that created it.
    async fn discover(
        &mut self,
        contract: &ContractSpec,
        query: &ReadSpec,
    ) -> Result<(Address, Outcome)> {
        let bindings = self.bindings(query.dependencies()).await?;
        let (value, _) = self
            .read(query, None, &bindings)
            .await
            .context(format!("Failed to look up {}", contract.name))?;

        let address = value
            .as_address()
            .filter(|address| !address.is_zero())
            .with_context(|| format!("{} returned no address for {}", query.function, contract.name))?;

        if self.options.verify_code {
            let code = self
                .chain
                .code_at(address)
                .await
                .context(format!("Failed to read code of {} at {address}", contract.name))?;
            if code.is_empty() {
                anyhow::bail!(
                    "{} returned {address} for {}, which holds no code",
                    query.function,
                    contract.name
                );
            }
        }

        self.state.commit(contract, address)?;
        tracing::info!(
            contract = %contract.name,
            %address,
            function = %query.function,
            "Found {} at {}",
            contract.name,
            address
        );

        Ok((
            address,
            Outcome::Queried {
                function: query.function.clone(),
            },
        ))
    }

    /// Perform `view`, on `default_contract` unless it names its own contract.
    async fn read(
        &self,
        view: &ReadSpec,
        default_contract: Option<&str>,
        bindings: &Bindings,
    ) -> Result<(DynSolValue, DynSolType)> {
        let symbol = view
            .contract
            .as_deref()
            .or(default_contract)
            .with_context(|| format!("Read of {} names no contract", view.function))?;
        let target = bindings.address(symbol)?;

        let signature: Signature = view.function.parse()?;
        let data = signature.encode_call(bindings.values(&view.args, &signature.inputs)?)?;
        let output = self.executor().read(target, data).await?;

        abi::decode_output(&view.returns, view.field, &output)
            .context(format!("Failed to read {} on {symbol} ({target})", view.function))
    }

    async fn guard_holds(&self, call: &CallSpec, bindings: &Bindings) -> Result<bool> {
        let (value, ty) = self
            .read(&call.guard, Some(&call.contract), bindings)
            .await
            .context(format!("Failed to check whether {} was already sent", call.name))?;

        bindings.satisfies(&call.skip_if, &value, &ty)
    }

    /// Whether a persisted address must be ignored because the chain has no code there.
    async fn is_stale(
        &self,
        contract: &ContractSpec,
        address: Address,
        source: &Source,
    ) -> Result<bool> {
        if !self.options.verify_code || !source.is_persisted() {
            return Ok(false);
        }

        let code = self
            .chain
            .code_at(address)
            .await
            .context(format!("Failed to read code of {} at {address}", contract.name))?;

        Ok(code.is_empty())
    }
}
