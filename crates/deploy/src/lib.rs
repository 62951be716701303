//! stakeroute-deploy - Idempotent contract deployment for the stakeroute protocol.
//!
//! This crate resolves where the protocol's contracts (and the third-party protocols it
//! builds on) live on a network, deploys whatever is missing, and persists the result so
//! that the next run picks up where the last one stopped.

mod abi;
pub use abi::{Bindings, Signature, decode_output, encode_constructor_args, parse_types};

mod address_book;
pub use address_book::AddressStore;

mod artifact;
pub use artifact::{Artifact, ArtifactStore, LinkReference};

mod chain;
pub use chain::{ChainClient, Receipt, RpcChain, TransactionRequest, create_client, json_rpc_call};

mod config;
pub use config::{CONFIG_FILENAME, Config, LOCAL_RPC_URL, NetworkConfig, Paths};

mod executor;
pub use executor::{DETERMINISTIC_DEPLOYMENT_PROXY, DeployMethod, Deployment, Executor};

mod manifest;
pub use manifest::{
    Arg, CallSpec, Condition, ContractSpec, Manifest, PackageRef, ReadSpec, StepSpec,
};

mod records;
pub use records::{CHAIN_ID_FILENAME, DeploymentRecord, DeploymentRecords, PackageRecords};

mod registry;
pub use registry::{Registry, SessionRegistry};

mod resolver;
pub use resolver::{ResolvePolicy, Resolved, Resolver, Source};

mod sequence;
pub use sequence::{
    CallEntry, CallOutcome, DeployOptions, DeployReport, Outcome, ReportEntry, Sequence,
};

mod state;
pub use state::DeploymentState;

#[cfg(feature = "testing")]
pub mod testing;
