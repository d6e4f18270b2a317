//! Chain Connector Module
//!
//! Everything the role engines need from one EVM network sits behind the
//! [`MessagingChain`] trait: endpoint and ULN reads, receipts, and submission
//! of completing transactions from the network's admin wallet.
//! [`NetworkConnector`] is the JSON-RPC implementation; tests substitute an
//! in-memory chain.

pub mod connector;
pub mod contracts;
pub mod registry;

use anyhow::Result;
use async_trait::async_trait;

use crate::abi::{Address, Bytes32};
use crate::crypto::Wallet;
use crate::evm_client::EvmReceipt;

pub use connector::NetworkConnector;
pub use registry::NetworkRegistry;

/// Verification requirements of a receiver for one source eid.
///
/// Read fresh from ReceiveUln302 before every completion check.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UlnConfig {
    pub confirmations: u64,
    pub required_dvn_count: u8,
    pub optional_dvn_count: u8,
    pub optional_dvn_threshold: u8,
    pub required_dvns: Vec<Address>,
    pub optional_dvns: Vec<Address>,
}

impl UlnConfig {
    /// Attestations needed before a commit is attempted.
    pub fn quorum(&self) -> usize {
        self.required_dvn_count as usize + self.optional_dvn_threshold as usize
    }
}

/// Gas limit policy for a submitted transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GasLimit {
    /// eth_estimateGas plus headroom
    Estimate,
    Fixed(u64),
}

/// Operations on a single configured network.
#[async_trait]
pub trait MessagingChain: Send + Sync {
    /// Configured network name
    fn name(&self) -> &str;

    /// Endpoint id reported by the network's EndpointV2
    fn eid(&self) -> u32;

    fn endpoint_address(&self) -> Address;

    fn receive_uln_address(&self) -> Address;

    /// DVN multisig operated by this node, if configured
    fn dvn_address(&self) -> Option<Address>;

    /// Executor address fees must be paid to, if configured
    fn executor_address(&self) -> Option<Address>;

    /// Wallets whose signatures authorize DVN multisig calls, in signing order
    fn dvn_signers(&self) -> &[Wallet];

    async fn block_number(&self) -> Result<u64>;

    async fn latest_block_timestamp(&self) -> Result<u64>;

    /// Receipt of a mined transaction; `RelayError::ReceiptUnavailable` if the node has none.
    async fn transaction_receipt(&self, tx_hash: &str) -> Result<EvmReceipt>;

    async fn uln_config(&self, receiver: &Address, src_eid: u32) -> Result<UlnConfig>;

    async fn verifiable(
        &self,
        config: &UlnConfig,
        header_hash: &Bytes32,
        payload_hash: &Bytes32,
    ) -> Result<bool>;

    async fn inbound_nonce(&self, receiver: &Address, src_eid: u32, sender: &Bytes32)
        -> Result<u64>;

    async fn lazy_inbound_nonce(
        &self,
        receiver: &Address,
        src_eid: u32,
        sender: &Bytes32,
    ) -> Result<u64>;

    async fn inbound_payload_hash(
        &self,
        receiver: &Address,
        src_eid: u32,
        sender: &Bytes32,
        nonce: u64,
    ) -> Result<Bytes32>;

    /// Verifier id of the DVN multisig
    async fn dvn_vid(&self) -> Result<u32>;

    /// Signs and sends a transaction from the admin wallet and waits for a successful receipt.
    ///
    /// # Returns
    ///
    /// * `Ok(String)` - Hash of the confirmed transaction
    /// * `Err` carrying `RelayError::TransactionReverted` or `RelayError::ReceiptUnavailable`
    async fn submit(&self, to: Address, calldata: Vec<u8>, gas: GasLimit, value: u128)
        -> Result<String>;
}
