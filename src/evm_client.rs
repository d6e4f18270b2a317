//! EVM Client Module
//!
//! JSON-RPC client for EVM-compatible nodes: block and log queries, persistent
//! log filters, read-only calls, and locally signed legacy (EIP-155)
//! transactions with receipt polling.

use anyhow::{Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::abi::{hex_to_bytes, parse_bytes32, parse_quantity, to_hex, Address, Bytes32};
use crate::crypto::Wallet;
use crate::error::RelayError;

const RPC_TIMEOUT: Duration = Duration::from_secs(15);
const RECEIPT_POLL_ATTEMPTS: u32 = 30;
const RECEIPT_POLL_INTERVAL: Duration = Duration::from_millis(500);

// ============================================================================
// API RESPONSE STRUCTURES
// ============================================================================

/// EVM event log entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct EvmLog {
    /// Address of the contract that emitted the event
    pub address: String,
    /// Array of topics (indexed event parameters)
    pub topics: Vec<String>,
    /// Event data (non-indexed parameters)
    pub data: String,
    /// Block number (JSON-RPC uses camelCase: blockNumber)
    #[serde(rename = "blockNumber", default)]
    pub block_number: Option<String>,
    /// Transaction hash (JSON-RPC uses camelCase: transactionHash)
    #[serde(rename = "transactionHash", default)]
    pub transaction_hash: Option<String>,
    /// Log index (JSON-RPC uses camelCase: logIndex)
    #[serde(rename = "logIndex", default)]
    pub log_index: Option<String>,
    /// Set by the node when a reorg drops the log
    #[serde(default)]
    pub removed: bool,
}

impl EvmLog {
    pub fn block(&self) -> u64 {
        self.block_number
            .as_deref()
            .and_then(|b| parse_quantity(b).ok())
            .unwrap_or(0)
    }

    pub fn index(&self) -> u64 {
        self.log_index
            .as_deref()
            .and_then(|i| parse_quantity(i).ok())
            .unwrap_or(0)
    }

    pub fn tx_hash(&self) -> &str {
        self.transaction_hash.as_deref().unwrap_or("")
    }

    /// Decoded non-indexed event data.
    pub fn data_bytes(&self) -> Result<Vec<u8>> {
        hex_to_bytes(&self.data).context("Invalid log data")
    }

    /// Topic at `index` as a 32-byte word.
    pub fn topic(&self, index: usize) -> Option<Bytes32> {
        self.topics.get(index).and_then(|t| parse_bytes32(t).ok())
    }

    /// Emitting contract address.
    pub fn emitter(&self) -> Option<Address> {
        crate::abi::parse_address(&self.address).ok()
    }
}

/// Transaction receipt, trimmed to what the relay reads.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct EvmReceipt {
    #[serde(rename = "transactionHash")]
    pub transaction_hash: String,
    #[serde(rename = "blockNumber", default)]
    pub block_number: Option<String>,
    /// "0x1" on success, "0x0" on revert
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub logs: Vec<EvmLog>,
}

impl EvmReceipt {
    pub fn succeeded(&self) -> bool {
        self.status.as_deref() == Some("0x1")
    }
}

/// A legacy transaction ready to sign.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyTransaction {
    pub nonce: u64,
    pub gas_price: u128,
    pub gas_limit: u64,
    pub to: Address,
    pub value: u128,
    pub data: Vec<u8>,
}

impl LegacyTransaction {
    /// EIP-155 signing hash: keccak256(rlp([nonce, gasPrice, gasLimit, to, value, data, chainId, 0, 0])).
    pub fn signing_hash(&self, chain_id: u64) -> Bytes32 {
        let mut items = self.base_items();
        items.push(rlp_encode_uint(chain_id as u128));
        items.push(vec![]);
        items.push(vec![]);
        crate::abi::keccak256(&rlp_encode_list(&items))
    }

    /// Signs the transaction and returns the raw RLP bytes for eth_sendRawTransaction.
    ///
    /// v = recovery_id + chainId * 2 + 35
    pub fn sign(&self, wallet: &Wallet, chain_id: u64) -> Result<Vec<u8>> {
        let hash = self.signing_hash(chain_id);
        let (r, s, recovery_id) = wallet
            .sign_hash(&hash)
            .context("Failed to sign EVM transaction")?;
        let v = (recovery_id as u128) + (chain_id as u128) * 2 + 35;

        let mut items = self.base_items();
        items.push(rlp_encode_uint(v));
        items.push(strip_leading_zeros(&r));
        items.push(strip_leading_zeros(&s));
        Ok(rlp_encode_list(&items))
    }

    fn base_items(&self) -> Vec<Vec<u8>> {
        vec![
            rlp_encode_uint(self.nonce as u128),
            rlp_encode_uint(self.gas_price),
            rlp_encode_uint(self.gas_limit as u128),
            self.to.to_vec(),
            rlp_encode_uint(self.value),
            self.data.clone(),
        ]
    }
}

// ============================================================================
// EVM CLIENT IMPLEMENTATION
// ============================================================================

/// Client for communicating with an EVM-compatible node via JSON-RPC
#[derive(Debug, Clone)]
pub struct EvmClient {
    /// HTTP client for making requests
    client: Client,
    /// Base URL of the EVM node (e.g., "http://127.0.0.1:8545")
    base_url: String,
}

impl EvmClient {
    /// Creates a new EVM client for the given node URL
    ///
    /// # Arguments
    ///
    /// * `node_url` - Base URL of the EVM node (e.g., "http://127.0.0.1:8545")
    ///
    /// # Returns
    ///
    /// * `Ok(EvmClient)` - Successfully created client
    /// * `Err(anyhow::Error)` - Failed to create client
    pub fn new(node_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: node_url.to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Generic JSON-RPC call helper.
    ///
    /// Transport failures, timeouts and JSON-RPC error objects surface as
    /// [`RelayError::RpcUnavailable`].
    pub async fn json_rpc<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<serde_json::Value>,
    ) -> Result<T> {
        let request = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1,
        });

        let unavailable = |reason: String| RelayError::RpcUnavailable {
            method: method.to_string(),
            reason,
        };

        let rpc_future = async {
            let resp = self
                .client
                .post(&self.base_url)
                .json(&request)
                .send()
                .await
                .map_err(|e| unavailable(format!("request to {} failed: {}", self.base_url, e)))?;
            resp.json::<serde_json::Value>()
                .await
                .map_err(|e| unavailable(format!("invalid response from {}: {}", self.base_url, e)))
        };

        let response = tokio::time::timeout(RPC_TIMEOUT, rpc_future)
            .await
            .map_err(|_| {
                unavailable(format!(
                    "timed out after {}s waiting for {}",
                    RPC_TIMEOUT.as_secs(),
                    self.base_url
                ))
            })??;

        if let Some(error) = response.get("error") {
            let code = error.get("code").and_then(|c| c.as_i64()).unwrap_or(0);
            let message = error
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown error");
            return Err(unavailable(format!("{} (code: {})", message, code)).into());
        }

        let result = response
            .get("result")
            .cloned()
            .ok_or_else(|| unavailable("no result in response".to_string()))?;

        serde_json::from_value(result)
            .with_context(|| format!("Failed to deserialize {} result", method))
    }

    /// Get the current block number.
    pub async fn block_number(&self) -> Result<u64> {
        let block_hex: String = self.json_rpc("eth_blockNumber", vec![]).await?;
        parse_quantity(&block_hex).context("Failed to parse block number")
    }

    pub async fn chain_id(&self) -> Result<u64> {
        let chain_id_hex: String = self.json_rpc("eth_chainId", vec![]).await?;
        parse_quantity(&chain_id_hex).context("Failed to parse chain id")
    }

    /// Timestamp of the latest block.
    pub async fn latest_block_timestamp(&self) -> Result<u64> {
        let block: serde_json::Value = self
            .json_rpc(
                "eth_getBlockByNumber",
                vec![serde_json::json!("latest"), serde_json::json!(false)],
            )
            .await?;
        let timestamp = block
            .get("timestamp")
            .and_then(|t| t.as_str())
            .context("Latest block has no timestamp")?;
        parse_quantity(timestamp).context("Failed to parse block timestamp")
    }

    /// eth_getLogs for one contract and event topic over an inclusive block range.
    pub async fn get_logs(
        &self,
        address: &Address,
        topic: &Bytes32,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<EvmLog>> {
        let filter = serde_json::json!({
            "address": to_hex(address),
            "topics": [to_hex(topic)],
            "fromBlock": format!("0x{:x}", from_block),
            "toBlock": format!("0x{:x}", to_block),
        });
        self.json_rpc("eth_getLogs", vec![filter]).await
    }

    /// Installs a persistent log filter starting at `from_block`; returns its id.
    pub async fn new_filter(
        &self,
        address: &Address,
        topic: &Bytes32,
        from_block: u64,
    ) -> Result<String> {
        let filter = serde_json::json!({
            "address": to_hex(address),
            "topics": [to_hex(topic)],
            "fromBlock": format!("0x{:x}", from_block),
        });
        self.json_rpc("eth_newFilter", vec![filter]).await
    }

    /// Logs accumulated by a filter since the previous poll.
    pub async fn filter_changes(&self, filter_id: &str) -> Result<Vec<EvmLog>> {
        self.json_rpc("eth_getFilterChanges", vec![serde_json::json!(filter_id)])
            .await
    }

    /// eth_call against the latest block; returns the raw return data.
    pub async fn call(&self, to: &Address, data: &[u8]) -> Result<Vec<u8>> {
        let result: String = self
            .json_rpc(
                "eth_call",
                vec![
                    serde_json::json!({
                        "to": to_hex(to),
                        "data": to_hex(data),
                    }),
                    serde_json::json!("latest"),
                ],
            )
            .await?;
        hex_to_bytes(&result).context("Invalid eth_call result")
    }

    /// eth_estimateGas; an execution error is reported as [`RelayError::TransactionReverted`].
    pub async fn estimate_gas(
        &self,
        from: &Address,
        to: &Address,
        data: &[u8],
        value: u128,
    ) -> Result<u64> {
        let request = serde_json::json!({
            "from": to_hex(from),
            "to": to_hex(to),
            "data": to_hex(data),
            "value": format!("0x{:x}", value),
        });
        let gas_hex: String = match self.json_rpc("eth_estimateGas", vec![request]).await {
            Ok(gas) => gas,
            Err(e) => {
                if let Some(RelayError::RpcUnavailable { reason, .. }) = RelayError::find(&e) {
                    if reason.to_lowercase().contains("revert") {
                        return Err(RelayError::TransactionReverted {
                            tx_hash: "(gas estimation)".to_string(),
                            reason: reason.clone(),
                        }
                        .into());
                    }
                }
                return Err(e);
            }
        };
        parse_quantity(&gas_hex).context("Failed to parse gas estimate")
    }

    pub async fn gas_price(&self) -> Result<u128> {
        let gas_price_hex: String = self.json_rpc("eth_gasPrice", vec![]).await?;
        let clean = gas_price_hex.strip_prefix("0x").unwrap_or(&gas_price_hex);
        if clean.is_empty() {
            return Ok(0);
        }
        u128::from_str_radix(clean, 16).context("Failed to parse gas price")
    }

    /// Pending transaction count of `address`.
    pub async fn transaction_count(&self, address: &Address) -> Result<u64> {
        let nonce_hex: String = self
            .json_rpc(
                "eth_getTransactionCount",
                vec![serde_json::json!(to_hex(address)), serde_json::json!("pending")],
            )
            .await?;
        parse_quantity(&nonce_hex).context("Failed to parse nonce")
    }

    /// Broadcasts a signed transaction; returns its hash.
    pub async fn send_raw_transaction(&self, raw_tx: &[u8]) -> Result<String> {
        self.json_rpc("eth_sendRawTransaction", vec![serde_json::json!(to_hex(raw_tx))])
            .await
    }

    /// Signs and broadcasts a legacy transaction from `wallet`.
    ///
    /// Fetches nonce and gas price from the node. Callers sending concurrently
    /// from the same wallet must serialize calls themselves.
    ///
    /// # Returns
    ///
    /// * `Ok(String)` - Transaction hash
    pub async fn send_transaction(
        &self,
        wallet: &Wallet,
        chain_id: u64,
        to: &Address,
        data: Vec<u8>,
        value: u128,
        gas_limit: u64,
    ) -> Result<String> {
        let nonce = self
            .transaction_count(&wallet.address())
            .await
            .context("eth_getTransactionCount failed")?;
        let gas_price = self.gas_price().await.context("eth_gasPrice failed")?;

        let tx = LegacyTransaction {
            nonce,
            gas_price,
            gas_limit,
            to: *to,
            value,
            data,
        };
        let raw_tx = tx.sign(wallet, chain_id)?;

        debug!(
            "EVM raw tx: nonce={}, gas_price={}, gas_limit={}, chain_id={}, from={}",
            nonce,
            gas_price,
            gas_limit,
            chain_id,
            wallet.address_hex()
        );

        self.send_raw_transaction(&raw_tx)
            .await
            .context("eth_sendRawTransaction failed")
    }

    /// Receipt of a transaction, `None` while pending.
    pub async fn transaction_receipt(&self, tx_hash: &str) -> Result<Option<EvmReceipt>> {
        self.json_rpc("eth_getTransactionReceipt", vec![serde_json::json!(tx_hash)])
            .await
    }

    /// Waits for a transaction receipt and verifies success.
    ///
    /// # Returns
    ///
    /// * `Ok(EvmReceipt)` - Mined with status 0x1
    /// * `Err` carrying [`RelayError::TransactionReverted`] - Mined with a failed status
    /// * `Err` carrying [`RelayError::ReceiptUnavailable`] - No receipt after polling
    pub async fn wait_for_receipt(&self, tx_hash: &str) -> Result<EvmReceipt> {
        for _ in 0..RECEIPT_POLL_ATTEMPTS {
            if let Some(receipt) = self.transaction_receipt(tx_hash).await? {
                if receipt.succeeded() {
                    return Ok(receipt);
                }
                return Err(RelayError::TransactionReverted {
                    tx_hash: tx_hash.to_string(),
                    reason: format!(
                        "status {}",
                        receipt.status.as_deref().unwrap_or("unknown")
                    ),
                }
                .into());
            }

            tokio::time::sleep(RECEIPT_POLL_INTERVAL).await;
        }

        Err(RelayError::ReceiptUnavailable(tx_hash.to_string()).into())
    }
}

// ============================================================================
// RLP ENCODING HELPERS (for legacy EVM transactions)
// ============================================================================

fn strip_leading_zeros(bytes: &[u8]) -> Vec<u8> {
    let start = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
    bytes[start..].to_vec()
}

/// Encode an unsigned integer as big-endian bytes with no leading zeros (RLP integer format).
fn rlp_encode_uint(val: u128) -> Vec<u8> {
    strip_leading_zeros(&val.to_be_bytes())
}

/// RLP-encode a single byte-string item.
fn rlp_encode_item(data: &[u8]) -> Vec<u8> {
    if data.len() == 1 && data[0] < 0x80 {
        vec![data[0]]
    } else if data.len() <= 55 {
        let mut out = vec![0x80 + data.len() as u8];
        out.extend_from_slice(data);
        out
    } else {
        let len_bytes = rlp_encode_uint(data.len() as u128);
        let mut out = vec![0xb7 + len_bytes.len() as u8];
        out.extend_from_slice(&len_bytes);
        out.extend_from_slice(data);
        out
    }
}

/// RLP-encode a list of items (each item is already raw bytes, NOT RLP-encoded).
pub fn rlp_encode_list(items: &[Vec<u8>]) -> Vec<u8> {
    let mut payload = Vec::new();
    for item in items {
        payload.extend(rlp_encode_item(item));
    }

    if payload.len() <= 55 {
        let mut out = vec![0xc0 + payload.len() as u8];
        out.extend(payload);
        out
    } else {
        let len_bytes = rlp_encode_uint(payload.len() as u128);
        let mut out = vec![0xf7 + len_bytes.len() as u8];
        out.extend_from_slice(&len_bytes);
        out.extend(payload);
        out
    }
}
