//! JSON-RPC chain client over HTTP.

use std::time::{Duration, Instant};

use alloy_core::primitives::{Address, B256, Bytes};
use anyhow::Context;
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::Value;
use url::Url;

use super::{ChainClient, Receipt, TransactionRequest};

/// Default timeout for RPC requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default interval between receipt polling attempts.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Create an HTTP client configured for JSON-RPC requests.
pub fn create_client() -> Result<reqwest::Client, anyhow::Error> {
    reqwest::Client::builder()
        .timeout(DEFAULT_TIMEOUT)
        .build()
        .context("Failed to create HTTP client")
}

/// Make a JSON-RPC call and deserialize the result.
///
/// # Arguments
/// * `client` - The HTTP client to use
/// * `url` - The RPC endpoint URL
/// * `method` - The RPC method name
/// * `params` - The method parameters
///
/// # Returns
/// The deserialized result, or an error if the request failed or returned an error response.
pub async fn json_rpc_call<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &Url,
    method: &str,
    params: Vec<Value>,
) -> Result<T, anyhow::Error> {
    let response = client
        .post(url.clone())
        .json(&serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        }))
        .send()
        .await
        .with_context(|| format!("Failed to send {} request to {}", method, url))?;

    let result: Value = response
        .json()
        .await
        .with_context(|| format!("Failed to parse {} response", method))?;

    if let Some(error) = result.get("error") {
        anyhow::bail!(
            "RPC error on {}: {}",
            method,
            error
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown")
        );
    }

    let result_value = result
        .get("result")
        .context("No result in response")?
        .clone();

    serde_json::from_value(result_value)
        .with_context(|| format!("Failed to deserialize {} result", method))
}

/// Deserialize an optional u64 from a hex string (with 0x prefix).
fn deserialize_u64_from_hex<'de, D>(deserializer: D) -> std::result::Result<Option<u64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: Option<String> = Deserialize::deserialize(deserializer)?;
    s.map(|s| u64::from_str_radix(s.trim_start_matches("0x"), 16))
        .transpose()
        .map_err(serde::de::Error::custom)
}

/// The subset of `eth_getTransactionReceipt` we rely on.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcReceipt {
    transaction_hash: B256,
    #[serde(default)]
    contract_address: Option<Address>,
    /// Absent on chains that predate EIP-658.
    #[serde(default, deserialize_with = "deserialize_u64_from_hex")]
    status: Option<u64>,
}

impl TryFrom<RpcReceipt> for Receipt {
    type Error = anyhow::Error;

    fn try_from(receipt: RpcReceipt) -> anyhow::Result<Self> {
        let status = receipt.status.with_context(|| {
            format!(
                "Receipt of {} carries no status, cannot tell whether it reverted",
                receipt.transaction_hash
            )
        })?;

        Ok(Self {
            transaction_hash: receipt.transaction_hash,
            contract_address: receipt.contract_address,
            success: status == 1,
        })
    }
}

/// JSON object of `tx` as `eth_call` and `eth_sendTransaction` take it.
fn transaction_params(tx: &TransactionRequest) -> Value {
    let mut params = serde_json::json!({
        "from": tx.from,
        "data": tx.data,
    });
    if let Some(to) = tx.to {
        params["to"] = serde_json::json!(to);
    }
    params
}

/// [`ChainClient`] talking to a node over HTTP JSON-RPC.
///
/// Transactions are sent with `eth_sendTransaction`, so the sender must be an account
/// unlocked on the node.
#[derive(Debug, Clone)]
pub struct RpcChain {
    client: reqwest::Client,
    url: Url,
    poll_interval: Duration,
    confirmation_timeout: Option<Duration>,
}

impl RpcChain {
    pub fn new(url: Url) -> anyhow::Result<Self> {
        Ok(Self {
            client: create_client()?,
            url,
            poll_interval: DEFAULT_POLL_INTERVAL,
            confirmation_timeout: None,
        })
    }

    /// Give up waiting for a receipt after `timeout`. Waits forever when `None`.
    pub fn with_confirmation_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.confirmation_timeout = timeout;
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> anyhow::Result<T> {
        json_rpc_call(&self.client, &self.url, method, params).await
    }

    /// Poll until the receipt of `hash` is available.
    async fn wait_for_receipt(&self, hash: B256) -> anyhow::Result<Receipt> {
        let start = Instant::now();

        loop {
            let receipt: Option<RpcReceipt> = self
                .request("eth_getTransactionReceipt", vec![serde_json::json!(hash)])
                .await?;

            if let Some(receipt) = receipt {
                return Receipt::try_from(receipt);
            }

            if let Some(timeout) = self.confirmation_timeout {
                if start.elapsed() > timeout {
                    anyhow::bail!("Timeout waiting for transaction {hash} to be mined");
                }
            }

            tracing::trace!(tx = %hash, "Transaction pending, polling again...");
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

impl ChainClient for RpcChain {
    async fn chain_id(&self) -> anyhow::Result<u64> {
        let chain_id: String = self.request("eth_chainId", vec![]).await?;
        u64::from_str_radix(chain_id.trim_start_matches("0x"), 16)
            .context(format!("Invalid chain id {chain_id}"))
    }

    async fn accounts(&self) -> anyhow::Result<Vec<Address>> {
        self.request("eth_accounts", vec![]).await
    }

    async fn code_at(&self, address: Address) -> anyhow::Result<Bytes> {
        self.request(
            "eth_getCode",
            vec![serde_json::json!(address), serde_json::json!("latest")],
        )
        .await
    }

    async fn call(&self, tx: TransactionRequest) -> anyhow::Result<Bytes> {
        self.request(
            "eth_call",
            vec![transaction_params(&tx), serde_json::json!("latest")],
        )
        .await
    }

    async fn send_transaction(&self, tx: TransactionRequest) -> anyhow::Result<Receipt> {
        let hash: B256 = self
            .request("eth_sendTransaction", vec![transaction_params(&tx)])
            .await
            .context("Failed to send transaction")?;

        tracing::debug!(tx = %hash, from = %tx.from, "Transaction sent");

        self.wait_for_receipt(hash).await
    }
}
