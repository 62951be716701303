//! Deployment manifest.
//!
//! The manifest is a TOML file listing the deployment steps in order. Each step declares
//! the contracts it is responsible for, and each contract declares how it is wired to
//! contracts from earlier steps:
//!
//! ```toml
//! [[steps]]
//! order = 0
//! name = "uniswap-v3"
//! tags = ["UniswapV3"]
//!
//! [[steps.contracts]]
//! symbol = "wrappedNative"
//! name = "WETH"
//!
//! [[steps.contracts]]
//! symbol = "uniswapV3NftManager"
//! name = "NonfungiblePositionManager"
//! args = ["@uniswapV3Factory", "@wrappedNative", "@uniswapV3NftDescriptor"]
//! ```
//!
//! Steps may also list configuration transactions. A call is only sent when its guard,
//! a read against the chain, shows the work is not done yet:
//!
//! ```toml
//! [[steps.calls]]
//! name = "ctsi-faucet-minter"
//! contract = "ctsi"
//! function = "addMinter(address)"
//! args = ["@ctsiFaucet"]
//! guard = { function = "isMinter(address)", args = ["@ctsiFaucet"], returns = "(bool)" }
//! skip_if = "nonzero"
//! ```

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    path::Path,
    str::FromStr,
};

use alloy_core::{
    dyn_abi::DynSolType,
    primitives::{Address, Bytes, I256, U256},
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::abi::{self, Signature};

/// An argument of a constructor, call or read, written in the manifest as a string or as
/// an array of arguments.
///
/// | Syntax            | Meaning                                         |
/// |-------------------|-------------------------------------------------|
/// | `@symbol`         | address of a contract declared earlier          |
/// | `deployer`        | address of the deploying account                |
/// | `0x…` (20 bytes)  | literal address                                 |
/// | `uint:<n>`        | `uint256`, decimal or `0x` hex                  |
/// | `int:<n>`         | `int256`                                        |
/// | `bool:<b>`        | `bool`                                          |
/// | `string:<s>`      | `string`                                        |
/// | `bytes32:<s>`     | UTF-8 text right-padded to 32 bytes (max 31)    |
/// | `keccak256:<s>`   | Keccak-256 hash of the UTF-8 text               |
/// | `bytes:0x…`       | dynamic `bytes`                                 |
/// | `[a, b, …]`       | array, fixed array or tuple                     |
///
/// Integer widths and fixed-size types follow the declared parameter types when there are
/// some (call signatures, `constructor` of a contract).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawArg", into = "RawArg")]
pub enum Arg {
    Contract(String),
    Deployer,
    Address(Address),
    Uint(U256),
    Int(I256),
    Bool(bool),
    String(String),
    Bytes32(String),
    Keccak256(String),
    Bytes(Bytes),
    List(Vec<Arg>),
}

impl Arg {
    /// Symbols of the contracts this argument refers to.
    pub fn dependencies(&self) -> Vec<&str> {
        match self {
            Self::Contract(symbol) => vec![symbol],
            Self::List(items) => items.iter().flat_map(Arg::dependencies).collect(),
            _ => Vec::new(),
        }
    }

    fn contains_list(&self) -> bool {
        matches!(self, Self::List(_))
    }
}

/// Manifest form of an [`Arg`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum RawArg {
    Text(String),
    List(Vec<RawArg>),
}

impl TryFrom<RawArg> for Arg {
    type Error = anyhow::Error;

    fn try_from(value: RawArg) -> Result<Self> {
        match value {
            RawArg::Text(text) => text.parse(),
            RawArg::List(items) => Ok(Self::List(
                items
                    .into_iter()
                    .map(Arg::try_from)
                    .collect::<Result<_>>()?,
            )),
        }
    }
}

impl From<Arg> for RawArg {
    fn from(value: Arg) -> Self {
        match value {
            Arg::List(items) => Self::List(items.into_iter().map(RawArg::from).collect()),
            other => Self::Text(other.to_string()),
        }
    }
}

impl FromStr for Arg {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        if let Some(symbol) = s.strip_prefix('@') {
            if symbol.is_empty() {
                anyhow::bail!("Contract reference must name a symbol");
            }
            return Ok(Self::Contract(symbol.to_string()));
        }

        if s == "deployer" {
            return Ok(Self::Deployer);
        }

        if let Some((kind, value)) = s.split_once(':') {
            return match kind {
                "uint" => Ok(Self::Uint(
                    value
                        .parse::<U256>()
                        .map_err(|e| anyhow::anyhow!("Invalid uint argument {value:?}: {e}"))?,
                )),
                "int" => Ok(Self::Int(
                    value
                        .parse::<I256>()
                        .map_err(|e| anyhow::anyhow!("Invalid int argument {value:?}: {e}"))?,
                )),
                "bool" => Ok(Self::Bool(
                    value
                        .parse::<bool>()
                        .with_context(|| format!("Invalid bool argument {value:?}"))?,
                )),
                "string" => Ok(Self::String(value.to_string())),
                "bytes32" => {
                    if value.len() > 31 {
                        anyhow::bail!("bytes32 text {value:?} is longer than 31 bytes");
                    }
                    Ok(Self::Bytes32(value.to_string()))
                }
                "keccak256" => Ok(Self::Keccak256(value.to_string())),
                "bytes" => Ok(Self::Bytes(
                    value
                        .parse::<Bytes>()
                        .map_err(|e| anyhow::anyhow!("Invalid bytes argument {value:?}: {e}"))?,
                )),
                _ => anyhow::bail!("Unknown argument kind {kind:?}"),
            };
        }

        if s.starts_with("0x") {
            return s
                .parse::<Address>()
                .map(Self::Address)
                .map_err(|e| anyhow::anyhow!("Invalid address argument {s:?}: {e}"));
        }

        anyhow::bail!("Unrecognised argument {s:?}")
    }
}

impl fmt::Display for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Contract(symbol) => write!(f, "@{symbol}"),
            Self::Deployer => f.write_str("deployer"),
            Self::Address(address) => write!(f, "{address}"),
            Self::Uint(value) => write!(f, "uint:{value}"),
            Self::Int(value) => write!(f, "int:{value}"),
            Self::Bool(value) => write!(f, "bool:{value}"),
            Self::String(value) => write!(f, "string:{value}"),
            Self::Bytes32(value) => write!(f, "bytes32:{value}"),
            Self::Keccak256(value) => write!(f, "keccak256:{value}"),
            Self::Bytes(value) => write!(f, "bytes:0x{}", hex::encode(value)),
            Self::List(items) => {
                f.write_str("[")?;
                for (index, item) in items.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
        }
    }
}

/// A read-only function call (`eth_call`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadSpec {
    /// Symbol of the contract to read. Guards default to the contract of their call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract: Option<String>,
    /// Function signature, e.g. `balanceOf(address)`.
    pub function: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<Arg>,
    /// Output types, e.g. `(uint256)`. Static structs can be spelled out field by field.
    pub returns: String,
    /// Index of the output value to use.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub field: usize,
}

impl ReadSpec {
    pub fn new(function: impl Into<String>, returns: impl Into<String>) -> Self {
        Self {
            contract: None,
            function: function.into(),
            args: Vec::new(),
            returns: returns.into(),
            field: 0,
        }
    }

    pub fn on(mut self, contract: impl Into<String>) -> Self {
        self.contract = Some(contract.into());
        self
    }

    pub fn arg(mut self, arg: Arg) -> Self {
        self.args.push(arg);
        self
    }

    pub fn field(mut self, field: usize) -> Self {
        self.field = field;
        self
    }

    pub fn dependencies(&self) -> Vec<&str> {
        self.contract
            .as_deref()
            .into_iter()
            .chain(self.args.iter().flat_map(Arg::dependencies))
            .collect()
    }

    /// Output type of the selected field.
    pub fn output_type(&self) -> Result<DynSolType> {
        let types = abi::parse_types(&self.returns)?;
        types.get(self.field).cloned().with_context(|| {
            format!(
                "{} returns {} values, field {} does not exist",
                self.function,
                types.len(),
                self.field
            )
        })
    }

    fn validate(&self) -> Result<()> {
        let signature: Signature = self.function.parse()?;
        abi::check_args(&self.args, &signature.inputs)
            .context(format!("Invalid arguments for {}", self.function))?;
        self.output_type()?;
        Ok(())
    }
}

fn is_zero(value: &usize) -> bool {
    *value == 0
}

/// When a guard shows that a call has already been made.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    /// Any non-zero word, or a non-empty string, bytes or array.
    #[default]
    Nonzero,
    Equals(Arg),
    /// Unsigned value greater than or equal to the argument.
    AtLeast(Arg),
    /// Array holding the argument.
    Contains(Arg),
}

impl Condition {
    pub fn dependencies(&self) -> Vec<&str> {
        match self {
            Self::Nonzero => Vec::new(),
            Self::Equals(arg) | Self::AtLeast(arg) | Self::Contains(arg) => arg.dependencies(),
        }
    }
}

/// A configuration transaction, sent from the deployer unless its guard already holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSpec {
    /// Unique label, used in logs and reports.
    pub name: String,
    /// Symbol of the contract to call.
    pub contract: String,
    /// Function signature, e.g. `setAddress(bytes32,address)`.
    pub function: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<Arg>,
    pub guard: ReadSpec,
    #[serde(default)]
    pub skip_if: Condition,
}

impl CallSpec {
    pub fn new(
        name: impl Into<String>,
        contract: impl Into<String>,
        function: impl Into<String>,
        guard: ReadSpec,
        skip_if: Condition,
    ) -> Self {
        Self {
            name: name.into(),
            contract: contract.into(),
            function: function.into(),
            args: Vec::new(),
            guard,
            skip_if,
        }
    }

    pub fn arg(mut self, arg: Arg) -> Self {
        self.args.push(arg);
        self
    }

    /// Symbols that must resolve before the call can be checked or sent.
    pub fn dependencies(&self) -> Vec<&str> {
        std::iter::once(self.contract.as_str())
            .chain(self.args.iter().flat_map(Arg::dependencies))
            .chain(self.guard.dependencies())
            .chain(self.skip_if.dependencies())
            .collect()
    }

    fn validate(&self) -> Result<()> {
        let signature: Signature = self.function.parse()?;
        abi::check_args(&self.args, &signature.inputs)
            .context(format!("Invalid arguments for {}", self.function))?;
        self.guard.validate().context("Invalid guard")?;

        let output = self.guard.output_type()?;
        match &self.skip_if {
            Condition::Nonzero => {}
            Condition::Equals(arg) => abi::check_args(std::slice::from_ref(arg), &[output])?,
            Condition::AtLeast(arg) => {
                if !matches!(output, DynSolType::Uint(_)) {
                    anyhow::bail!("at_least needs an unsigned guard output, not {output}");
                }
                abi::check_args(std::slice::from_ref(arg), &[output])?;
            }
            Condition::Contains(arg) => match &output {
                DynSolType::Array(inner) | DynSolType::FixedArray(inner, _) => {
                    abi::check_args(std::slice::from_ref(arg), &[(**inner).clone()])?
                }
                _ => anyhow::bail!("contains needs an array guard output, not {output}"),
            },
        }

        Ok(())
    }
}

/// A contract shipped by a third-party package, named the way the package names it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageRef {
    /// Package name, as configured in `[packages]`.
    pub name: String,
    /// Contract name inside the package's deployment records.
    pub contract: String,
}

fn default_true() -> bool {
    true
}

fn is_true(value: &bool) -> bool {
    *value
}

/// One contract managed by the deployment sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractSpec {
    /// Address book key (e.g. `uniswapV3Factory`).
    pub symbol: String,
    /// Deployment name, used for record files and logs (e.g. `UniswapV3Factory`).
    pub name: String,
    /// Compiled artifact to deploy, when it differs from `name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<String>,
    /// Constructor arguments.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<Arg>,
    /// Constructor parameter types, e.g. `(address[3],uint256)`. Required for array
    /// arguments, optional otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constructor: Option<String>,
    /// Resolve-only: the contract is never deployed by this sequence.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub external: bool,
    /// Allow the deterministic (CREATE2) path for this contract.
    #[serde(default = "default_true", skip_serializing_if = "is_true")]
    pub deterministic: bool,
    /// Linked libraries: link placeholder name -> symbol of the library contract.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub libraries: BTreeMap<String, String>,
    /// Where a third-party package records this contract.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package: Option<PackageRef>,
    /// Created by another contract: found by reading its address from that contract
    /// instead of deploying it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<ReadSpec>,
}

impl ContractSpec {
    pub fn new(symbol: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            name: name.into(),
            artifact: None,
            args: Vec::new(),
            constructor: None,
            external: false,
            deterministic: true,
            libraries: BTreeMap::new(),
            package: None,
            query: None,
        }
    }

    pub fn artifact(mut self, artifact: impl Into<String>) -> Self {
        self.artifact = Some(artifact.into());
        self
    }

    pub fn arg(mut self, arg: Arg) -> Self {
        self.args.push(arg);
        self
    }

    pub fn constructor(mut self, types: impl Into<String>) -> Self {
        self.constructor = Some(types.into());
        self
    }

    pub fn query(mut self, query: ReadSpec) -> Self {
        self.query = Some(query);
        self
    }

    pub fn non_deterministic(mut self) -> Self {
        self.deterministic = false;
        self
    }

    pub fn library(mut self, placeholder: impl Into<String>, symbol: impl Into<String>) -> Self {
        self.libraries.insert(placeholder.into(), symbol.into());
        self
    }

    pub fn package(mut self, name: impl Into<String>, contract: impl Into<String>) -> Self {
        self.package = Some(PackageRef {
            name: name.into(),
            contract: contract.into(),
        });
        self
    }

    pub fn external(mut self) -> Self {
        self.external = true;
        self
    }

    /// Name of the compiled artifact to deploy.
    pub fn artifact_name(&self) -> &str {
        self.artifact.as_deref().unwrap_or(&self.name)
    }

    /// Constructor parameter types, when declared.
    pub fn constructor_types(&self) -> Result<Option<Vec<DynSolType>>> {
        self.constructor
            .as_deref()
            .map(abi::parse_types)
            .transpose()
            .context(format!("Invalid constructor types of {}", self.symbol))
    }

    /// Symbols this contract needs resolved before it can be deployed or queried.
    pub fn dependencies(&self) -> Vec<&str> {
        self.args
            .iter()
            .flat_map(Arg::dependencies)
            .chain(self.libraries.values().map(String::as_str))
            .chain(self.query.iter().flat_map(ReadSpec::dependencies))
            .collect()
    }

    fn validate(&self) -> Result<()> {
        if self.external && (!self.args.is_empty() || !self.libraries.is_empty()) {
            anyhow::bail!(
                "External contract {} cannot declare constructor arguments or libraries",
                self.symbol
            );
        }

        if let Some(query) = &self.query {
            if self.external
                || !self.args.is_empty()
                || !self.libraries.is_empty()
                || self.constructor.is_some()
            {
                anyhow::bail!(
                    "Queried contract {} cannot be external or declare constructor arguments or libraries",
                    self.symbol
                );
            }
            if query.contract.is_none() {
                anyhow::bail!("Query of {} must name the contract to read", self.symbol);
            }
            query
                .validate()
                .context(format!("Invalid query of {}", self.symbol))?;
            if query.output_type()? != DynSolType::Address {
                anyhow::bail!("Query of {} must return an address", self.symbol);
            }
        }

        match self.constructor_types()? {
            Some(types) => abi::check_args(&self.args, &types)
                .context(format!("Invalid constructor arguments of {}", self.symbol))?,
            None => {
                if self.args.iter().any(Arg::contains_list) {
                    anyhow::bail!(
                        "Contract {} passes an array argument, declare its `constructor` types",
                        self.symbol
                    );
                }
            }
        }

        Ok(())
    }
}

/// One step of the deployment sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepSpec {
    /// Position in the sequence; steps run in ascending order.
    pub order: u32,
    pub name: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Tags of earlier steps that must run whenever this step is selected.
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub contracts: Vec<ContractSpec>,
    /// Configuration transactions, run after the step's contracts are ensured.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub calls: Vec<CallSpec>,
}

impl StepSpec {
    pub fn new(order: u32, name: impl Into<String>) -> Self {
        Self {
            order,
            name: name.into(),
            tags: Vec::new(),
            dependencies: Vec::new(),
            contracts: Vec::new(),
            calls: Vec::new(),
        }
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn depends_on(mut self, tag: impl Into<String>) -> Self {
        self.dependencies.push(tag.into());
        self
    }

    pub fn contract(mut self, contract: ContractSpec) -> Self {
        self.contracts.push(contract);
        self
    }

    pub fn call(mut self, call: CallSpec) -> Self {
        self.calls.push(call);
        self
    }

    fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

/// The ordered list of deployment steps.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    steps: Vec<StepSpec>,
}

impl Manifest {
    /// Build a manifest from steps, sorting them by order and validating the dependency graph.
    pub fn new(mut steps: Vec<StepSpec>) -> Result<Self> {
        steps.sort_by_key(|step| step.order);
        let manifest = Self { steps };
        manifest.validate()?;
        Ok(manifest)
    }

    /// Parse a manifest from TOML.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let raw: Self = toml::from_str(content).context("Failed to parse manifest as TOML")?;
        Self::new(raw.steps)
    }

    /// Load a manifest from a TOML file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .context(format!("Failed to read manifest from {}", path.display()))?;
        let manifest = Self::from_toml_str(&content)
            .context(format!("Invalid manifest {}", path.display()))?;
        tracing::debug!(path = %path.display(), steps = manifest.steps.len(), "Manifest loaded");
        Ok(manifest)
    }

    pub fn steps(&self) -> &[StepSpec] {
        &self.steps
    }

    /// All contracts, in deployment order.
    pub fn contracts(&self) -> impl Iterator<Item = &ContractSpec> {
        self.steps.iter().flat_map(|step| step.contracts.iter())
    }

    /// Find a contract by symbol.
    pub fn contract(&self, symbol: &str) -> Option<&ContractSpec> {
        self.contracts().find(|contract| contract.symbol == symbol)
    }

    /// Check the invariants the sequence relies on:
    /// - step orders, symbols, deployment names and call names are unique;
    /// - every contract reference and library points at a contract declared earlier, calls
    ///   may also use the contracts of their own step;
    /// - every step dependency names a tag carried by an earlier step;
    /// - signatures parse and arguments fit their declared types.
    pub fn validate(&self) -> Result<()> {
        let mut orders = BTreeSet::new();
        let mut symbols = BTreeSet::new();
        let mut names = BTreeSet::new();
        let mut calls = BTreeSet::new();

        for (index, step) in self.steps.iter().enumerate() {
            if !orders.insert(step.order) {
                anyhow::bail!("Duplicate step order {} ({})", step.order, step.name);
            }

            for tag in &step.dependencies {
                if !self.steps[..index].iter().any(|earlier| earlier.has_tag(tag)) {
                    anyhow::bail!(
                        "Step {} depends on tag {tag:?}, which no earlier step carries",
                        step.name
                    );
                }
            }

            for contract in &step.contracts {
                for dependency in contract.dependencies() {
                    if !symbols.contains(dependency) {
                        anyhow::bail!(
                            "Contract {} in step {} references {dependency:?} before it is declared",
                            contract.symbol,
                            step.name
                        );
                    }
                }

                contract.validate()?;

                if !symbols.insert(contract.symbol.as_str()) {
                    anyhow::bail!("Duplicate contract symbol {:?}", contract.symbol);
                }
                if !names.insert(contract.name.as_str()) {
                    anyhow::bail!("Duplicate contract name {:?}", contract.name);
                }
            }

            for call in &step.calls {
                for dependency in call.dependencies() {
                    if !symbols.contains(dependency) {
                        anyhow::bail!(
                            "Call {} in step {} references {dependency:?}, which is not declared by this or an earlier step",
                            call.name,
                            step.name
                        );
                    }
                }

                call.validate()
                    .context(format!("Invalid call {} in step {}", call.name, step.name))?;

                if !calls.insert(call.name.as_str()) {
                    anyhow::bail!("Duplicate call name {:?}", call.name);
                }
            }
        }

        Ok(())
    }

    /// Select the steps to run for `tags`, in order.
    ///
    /// No tags selects every step. Otherwise the steps carrying any of the tags are
    /// selected together with the steps their dependencies point at, transitively.
    pub fn select(&self, tags: &[String]) -> Result<Vec<&StepSpec>> {
        if tags.is_empty() {
            return Ok(self.steps.iter().collect());
        }

        for tag in tags {
            if !self.steps.iter().any(|step| step.has_tag(tag)) {
                anyhow::bail!("No step carries tag {tag:?}");
            }
        }

        let mut pending: Vec<&str> = tags.iter().map(String::as_str).collect();
        let mut visited_tags = BTreeSet::new();
        let mut selected = BTreeSet::new();

        while let Some(tag) = pending.pop() {
            if !visited_tags.insert(tag) {
                continue;
            }
            for (index, step) in self.steps.iter().enumerate() {
                if step.has_tag(tag) && selected.insert(index) {
                    pending.extend(step.dependencies.iter().map(String::as_str));
                }
            }
        }

        Ok(selected.into_iter().map(|index| &self.steps[index]).collect())
    }
}
