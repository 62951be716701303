//! In-memory chain for tests.
//!
//! [`MockChain`] executes contract creation the way a node would as far as addresses are
//! concerned: `CREATE` derives from sender and nonce, and calls to the deterministic
//! deployment proxy derive through `CREATE2`. The "runtime code" of a created contract is
//! simply its init code.
//!
//! Contract state is not executed. `eth_call` answers from stubs registered by the test,
//! and from simple effects of earlier transactions declared with [`MockChain::mirror`] and
//! [`MockChain::flag`]. Anything else reads as zero words.

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
};

use alloy_core::primitives::{Address, B256, Bytes, U256, address, bytes, keccak256};
use anyhow::Result;

use crate::{ChainClient, DETERMINISTIC_DEPLOYMENT_PROXY, Receipt, TransactionRequest};

/// Runtime code of the deterministic deployment proxy.
pub const PROXY_RUNTIME_CODE: Bytes = bytes!(
    "7fffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffe03601600081602082378035828234f58015156039578182fd5b8082525050506014600cf3"
);

/// First development account of hardhat and anvil nodes.
pub const DEV_ACCOUNT: Address = address!("f39Fd6e51aad88F6F4ce6aB8827279cffFb92266");

/// Zero words returned by views nothing was stubbed for.
const DEFAULT_OUTPUT_WORDS: usize = 16;

type Selector = [u8; 4];

/// Four-byte function selector of `signature`.
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// What a successful transaction leaves behind for later views.
#[derive(Debug, Clone)]
enum Effect {
    /// `setter(key.., value)` makes `getter(key..)` return `value`.
    Mirror { getter: Selector },
    /// `function(key.., ..)` makes `view(key..)` return `true`.
    Flag { view: Selector, key_words: usize },
}

#[derive(Debug, Default)]
struct MockState {
    code: HashMap<Address, Bytes>,
    nonces: HashMap<Address, u64>,
    transactions: Vec<TransactionRequest>,
    /// Number of transactions still allowed before sends start failing.
    remaining: Option<usize>,
    /// Exact calldata answers, per contract.
    views: HashMap<(Address, Bytes), Bytes>,
    /// Answers by selector, per contract.
    functions: HashMap<(Address, Selector), Bytes>,
    /// Answers by selector, on every contract.
    globals: HashMap<Selector, Bytes>,
    effects: HashMap<Selector, Vec<Effect>>,
}

impl MockState {
    fn view(&self, to: Address, data: &Bytes) -> Bytes {
        if let Some(output) = self.views.get(&(to, data.clone())) {
            return output.clone();
        }

        if data.len() >= 4 {
            let selector = [data[0], data[1], data[2], data[3]];
            if let Some(output) = self
                .functions
                .get(&(to, selector))
                .or_else(|| self.globals.get(&selector))
            {
                return output.clone();
            }
        }

        Bytes::from(vec![0u8; DEFAULT_OUTPUT_WORDS * 32])
    }

    fn apply_effects(&mut self, to: Address, data: &Bytes) {
        if data.len() < 4 {
            return;
        }
        let selector = [data[0], data[1], data[2], data[3]];
        let args = &data[4..];

        let Some(effects) = self.effects.get(&selector).cloned() else {
            return;
        };

        for effect in effects {
            match effect {
                Effect::Mirror { getter } => {
                    if args.len() < 32 {
                        continue;
                    }
                    let (key, value) = args.split_at(args.len() - 32);
                    let calldata = [getter.as_slice(), key].concat();
                    self.views
                        .insert((to, Bytes::from(calldata)), Bytes::copy_from_slice(value));
                }
                Effect::Flag { view, key_words } => {
                    let Some(key) = args.get(..key_words * 32) else {
                        continue;
                    };
                    let calldata = [view.as_slice(), key].concat();
                    self.views.insert(
                        (to, Bytes::from(calldata)),
                        Bytes::from(U256::from(1).to_be_bytes::<32>()),
                    );
                }
            }
        }
    }
}

/// In-memory [`ChainClient`].
#[derive(Debug)]
pub struct MockChain {
    chain_id: u64,
    accounts: Vec<Address>,
    state: Mutex<MockState>,
}

impl Default for MockChain {
    fn default() -> Self {
        Self::new()
    }
}

impl MockChain {
    /// A local chain (id 31337) with the deployment proxy installed.
    pub fn new() -> Self {
        let mut state = MockState::default();
        state
            .code
            .insert(DETERMINISTIC_DEPLOYMENT_PROXY, PROXY_RUNTIME_CODE);

        Self {
            chain_id: 31337,
            accounts: vec![DEV_ACCOUNT],
            state: Mutex::new(state),
        }
    }

    pub fn with_chain_id(mut self, chain_id: u64) -> Self {
        self.chain_id = chain_id;
        self
    }

    /// Remove the deployment proxy from the chain.
    pub fn without_proxy(self) -> Self {
        self.state().code.remove(&DETERMINISTIC_DEPLOYMENT_PROXY);
        self
    }

    /// Number of mined transactions, reverted ones included.
    pub fn transaction_count(&self) -> usize {
        self.state().transactions.len()
    }

    pub fn transactions(&self) -> Vec<TransactionRequest> {
        self.state().transactions.clone()
    }

    pub fn has_code(&self, address: Address) -> bool {
        self.state()
            .code
            .get(&address)
            .is_some_and(|code| !code.is_empty())
    }

    pub fn set_code(&self, address: Address, code: Bytes) {
        self.state().code.insert(address, code);
    }

    /// Wipe every contract but the proxy, like restarting a local node.
    pub fn reset(&self) {
        let mut state = self.state();
        state
            .code
            .retain(|address, _| *address == DETERMINISTIC_DEPLOYMENT_PROXY);
        state.nonces.clear();
        state.views.clear();
    }

    /// Let `count` more transactions through, then fail every send.
    pub fn fail_after(&self, count: usize) {
        self.state().remaining = Some(count);
    }

    /// Stop injecting failures.
    pub fn heal(&self) {
        self.state().remaining = None;
    }

    /// Answer `signature` on `to` with `output`, whatever the arguments.
    pub fn stub_call(&self, to: Address, signature: &str, output: Bytes) {
        self.state()
            .functions
            .insert((to, selector(signature)), output);
    }

    /// Answer `signature` with `output` on every contract.
    pub fn stub_function(&self, signature: &str, output: Bytes) {
        self.state().globals.insert(selector(signature), output);
    }

    /// After a successful `setter(key.., value)`, `getter(key..)` on the same contract
    /// returns `value`. Only static arguments are supported.
    pub fn mirror(&self, setter: &str, getter: &str) {
        self.state()
            .effects
            .entry(selector(setter))
            .or_default()
            .push(Effect::Mirror {
                getter: selector(getter),
            });
    }

    /// After a successful `function(..)`, `view` on the same contract returns `true` when
    /// called with the first `key_words` argument words of the transaction.
    pub fn flag(&self, function: &str, view: &str, key_words: usize) {
        self.state()
            .effects
            .entry(selector(function))
            .or_default()
            .push(Effect::Flag {
                view: selector(view),
                key_words,
            });
    }

    /// Transactions sent to `to`.
    pub fn calls_to(&self, to: Address) -> usize {
        self.state()
            .transactions
            .iter()
            .filter(|tx| tx.to == Some(to))
            .count()
    }

    /// Contract creations, through the proxy or not.
    pub fn creation_count(&self) -> usize {
        self.state()
            .transactions
            .iter()
            .filter(|tx| tx.to.is_none() || tx.to == Some(DETERMINISTIC_DEPLOYMENT_PROXY))
            .count()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn execute(state: &mut MockState, tx: &TransactionRequest) -> (Option<Address>, bool) {
        let nonce = state.nonces.entry(tx.from).or_default();
        let current = *nonce;
        *nonce += 1;

        match tx.to {
            None => {
                if tx.data.is_empty() {
                    return (None, false);
                }
                let created = tx.from.create(current);
                state.code.insert(created, tx.data.clone());
                (Some(created), true)
            }
            Some(to) if to == DETERMINISTIC_DEPLOYMENT_PROXY => {
                if !state.code.contains_key(&to) || tx.data.len() <= 32 {
                    return (None, false);
                }
                let salt = B256::from_slice(&tx.data[..32]);
                let init_code = &tx.data[32..];
                let created = to.create2_from_code(salt, init_code);
                if state.code.contains_key(&created) {
                    return (None, false);
                }
                state
                    .code
                    .insert(created, Bytes::copy_from_slice(init_code));
                (None, true)
            }
            Some(to) => {
                // Function calls into an account without code revert.
                if !tx.data.is_empty() && !state.code.get(&to).is_some_and(|c| !c.is_empty()) {
                    return (None, false);
                }
                state.apply_effects(to, &tx.data);
                (None, true)
            }
        }
    }
}

impl ChainClient for MockChain {
    async fn chain_id(&self) -> Result<u64> {
        Ok(self.chain_id)
    }

    async fn accounts(&self) -> Result<Vec<Address>> {
        Ok(self.accounts.clone())
    }

    async fn code_at(&self, address: Address) -> Result<Bytes> {
        Ok(self.state().code.get(&address).cloned().unwrap_or_default())
    }

    async fn call(&self, tx: TransactionRequest) -> Result<Bytes> {
        let Some(to) = tx.to else {
            anyhow::bail!("eth_call needs a target address");
        };

        let state = self.state();
        if !state.code.get(&to).is_some_and(|code| !code.is_empty()) {
            return Ok(Bytes::new());
        }

        Ok(state.view(to, &tx.data))
    }

    async fn send_transaction(&self, tx: TransactionRequest) -> Result<Receipt> {
        let mut state = self.state();

        if let Some(remaining) = state.remaining.as_mut() {
            if *remaining == 0 {
                anyhow::bail!("Injected failure: node rejected transaction");
            }
            *remaining -= 1;
        }

        let nonce = state.nonces.get(&tx.from).copied().unwrap_or_default();
        let mut preimage = tx.from.to_vec();
        preimage.extend_from_slice(&nonce.to_be_bytes());
        preimage.extend_from_slice(&state.transactions.len().to_be_bytes());
        let transaction_hash = keccak256(preimage);

        let (contract_address, success) = Self::execute(&mut state, &tx);
        state.transactions.push(tx);

        Ok(Receipt {
            transaction_hash,
            contract_address,
            success,
        })
    }
}
