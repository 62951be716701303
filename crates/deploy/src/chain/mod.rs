//! Chain access.

use std::future::Future;

use alloy_core::primitives::{Address, B256, Bytes};
use anyhow::Result;

mod rpc;
pub use rpc::{RpcChain, create_client, json_rpc_call};

/// A transaction sent from a node-managed account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRequest {
    pub from: Address,
    /// `None` for contract creation.
    pub to: Option<Address>,
    pub data: Bytes,
}

impl TransactionRequest {
    /// A contract creation transaction.
    pub fn create(from: Address, init_code: Bytes) -> Self {
        Self {
            from,
            to: None,
            data: init_code,
        }
    }

    /// A call to `to` with `data`.
    pub fn call(from: Address, to: Address, data: Bytes) -> Self {
        Self {
            from,
            to: Some(to),
            data,
        }
    }
}

/// Outcome of a mined transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub transaction_hash: B256,
    /// Set for contract creation transactions.
    pub contract_address: Option<Address>,
    pub success: bool,
}

/// The chain-interaction runtime the deployment pipeline runs against.
pub trait ChainClient: Send + Sync {
    fn chain_id(&self) -> impl Future<Output = Result<u64>> + Send;

    /// Accounts managed by the node, in order.
    fn accounts(&self) -> impl Future<Output = Result<Vec<Address>>> + Send;

    /// Runtime code at `address`, empty for accounts without code.
    fn code_at(&self, address: Address) -> impl Future<Output = Result<Bytes>> + Send;

    /// Execute `tx` against the latest state without mining it (`eth_call`).
    fn call(&self, tx: TransactionRequest) -> impl Future<Output = Result<Bytes>> + Send;

    /// Send `tx` and wait until it is mined.
    fn send_transaction(
        &self,
        tx: TransactionRequest,
    ) -> impl Future<Output = Result<Receipt>> + Send;
}
