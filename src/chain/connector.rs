//! JSON-RPC network connector
//!
//! Binds one configured network: its RPC client, chain id, endpoint id,
//! contract addresses, admin wallet and DVN signer wallets.

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::abi::{to_hex, Address, Bytes32};
use crate::config::NetworkConfig;
use crate::crypto::Wallet;
use crate::error::RelayError;
use crate::evm_client::{EvmClient, EvmReceipt};

use super::contracts;
use super::{GasLimit, MessagingChain, UlnConfig};

/// Percentage applied on top of eth_estimateGas.
const GAS_HEADROOM_PERCENT: u64 = 120;

/// A connected network. Immutable after construction apart from the
/// submission lock.
#[derive(Debug)]
pub struct NetworkConnector {
    name: String,
    eid: u32,
    chain_id: u64,
    client: EvmClient,
    endpoint: Address,
    receive_uln: Address,
    dvn: Option<Address>,
    executor: Option<Address>,
    admin: Wallet,
    signers: Vec<Wallet>,
    /// Serializes nonce fetch, signing and broadcast for the admin wallet
    tx_lock: Mutex<()>,
}

impl NetworkConnector {
    /// Connects to a configured network and reads its chain id and endpoint id.
    ///
    /// # Arguments
    ///
    /// * `name` - Network name from the networks document
    /// * `config` - Resolved network configuration
    ///
    /// # Returns
    ///
    /// * `Ok(NetworkConnector)` - Connected network
    /// * `Err(anyhow::Error)` - Invalid keys or the node could not be queried
    pub async fn connect(name: &str, config: &NetworkConfig) -> Result<Self> {
        let client = EvmClient::new(&config.rpc_url)?;
        let admin = Wallet::from_hex(&config.private_key)
            .with_context(|| format!("Invalid admin private key for network {}", name))?;
        let signers = config
            .signer_keys
            .iter()
            .map(|key| Wallet::from_hex(key))
            .collect::<Result<Vec<_>>>()
            .with_context(|| format!("Invalid signer key for network {}", name))?;

        let chain_id = client
            .chain_id()
            .await
            .with_context(|| format!("Failed to read chain id of {}", name))?;
        let eid_data = client
            .call(&config.endpoint, &contracts::eid_call())
            .await
            .with_context(|| format!("Failed to read endpoint eid of {}", name))?;
        let eid = contracts::decode_u32(&eid_data)?;

        info!(
            "[{}] Connected: eid={}, chain_id={}, admin={}, signers={}",
            name,
            eid,
            chain_id,
            admin.address_hex(),
            signers.len()
        );

        Ok(Self {
            name: name.to_string(),
            eid,
            chain_id,
            client,
            endpoint: config.endpoint,
            receive_uln: config.receive_uln302,
            dvn: config.dvn,
            executor: config.executor,
            admin,
            signers,
            tx_lock: Mutex::new(()),
        })
    }

    pub fn client(&self) -> &EvmClient {
        &self.client
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn admin(&self) -> &Wallet {
        &self.admin
    }

    async fn read(&self, to: &Address, calldata: Vec<u8>) -> Result<Vec<u8>> {
        self.client.call(to, &calldata).await
    }
}

#[async_trait]
impl MessagingChain for NetworkConnector {
    fn name(&self) -> &str {
        &self.name
    }

    fn eid(&self) -> u32 {
        self.eid
    }

    fn endpoint_address(&self) -> Address {
        self.endpoint
    }

    fn receive_uln_address(&self) -> Address {
        self.receive_uln
    }

    fn dvn_address(&self) -> Option<Address> {
        self.dvn
    }

    fn executor_address(&self) -> Option<Address> {
        self.executor
    }

    fn dvn_signers(&self) -> &[Wallet] {
        &self.signers
    }

    async fn block_number(&self) -> Result<u64> {
        self.client.block_number().await
    }

    async fn latest_block_timestamp(&self) -> Result<u64> {
        self.client.latest_block_timestamp().await
    }

    async fn transaction_receipt(&self, tx_hash: &str) -> Result<EvmReceipt> {
        match self.client.transaction_receipt(tx_hash).await? {
            Some(receipt) => Ok(receipt),
            None => Err(RelayError::ReceiptUnavailable(tx_hash.to_string()).into()),
        }
    }

    async fn uln_config(&self, receiver: &Address, src_eid: u32) -> Result<UlnConfig> {
        let data = self
            .read(&self.receive_uln, contracts::get_uln_config_call(receiver, src_eid))
            .await
            .context("getUlnConfig failed")?;
        contracts::decode_uln_config(&data)
    }

    async fn verifiable(
        &self,
        config: &UlnConfig,
        header_hash: &Bytes32,
        payload_hash: &Bytes32,
    ) -> Result<bool> {
        let data = self
            .read(
                &self.receive_uln,
                contracts::verifiable_call(config, header_hash, payload_hash),
            )
            .await
            .context("verifiable failed")?;
        contracts::decode_bool(&data)
    }

    async fn inbound_nonce(
        &self,
        receiver: &Address,
        src_eid: u32,
        sender: &Bytes32,
    ) -> Result<u64> {
        let data = self
            .read(
                &self.endpoint,
                contracts::inbound_nonce_call(receiver, src_eid, sender),
            )
            .await
            .context("inboundNonce failed")?;
        contracts::decode_u64(&data)
    }

    async fn lazy_inbound_nonce(
        &self,
        receiver: &Address,
        src_eid: u32,
        sender: &Bytes32,
    ) -> Result<u64> {
        let data = self
            .read(
                &self.endpoint,
                contracts::lazy_inbound_nonce_call(receiver, src_eid, sender),
            )
            .await
            .context("lazyInboundNonce failed")?;
        contracts::decode_u64(&data)
    }

    async fn inbound_payload_hash(
        &self,
        receiver: &Address,
        src_eid: u32,
        sender: &Bytes32,
        nonce: u64,
    ) -> Result<Bytes32> {
        let data = self
            .read(
                &self.endpoint,
                contracts::inbound_payload_hash_call(receiver, src_eid, sender, nonce),
            )
            .await
            .context("inboundPayloadHash failed")?;
        contracts::decode_bytes32(&data)
    }

    async fn dvn_vid(&self) -> Result<u32> {
        let dvn = self
            .dvn
            .with_context(|| format!("No DVN address configured for {}", self.name))?;
        let data = self
            .read(&dvn, contracts::vid_call())
            .await
            .context("vid failed")?;
        contracts::decode_u32(&data)
    }

    async fn submit(
        &self,
        to: Address,
        calldata: Vec<u8>,
        gas: GasLimit,
        value: u128,
    ) -> Result<String> {
        let gas_limit = match gas {
            GasLimit::Fixed(limit) => limit,
            GasLimit::Estimate => {
                let estimate = self
                    .client
                    .estimate_gas(&self.admin.address(), &to, &calldata, value)
                    .await?;
                estimate.saturating_mul(GAS_HEADROOM_PERCENT) / 100
            }
        };

        let tx_hash = {
            let _guard = self.tx_lock.lock().await;
            self.client
                .send_transaction(&self.admin, self.chain_id, &to, calldata, value, gas_limit)
                .await?
        };
        info!(
            "[{}] Transaction sent: {} (to={}, gas_limit={})",
            self.name,
            tx_hash,
            to_hex(&to),
            gas_limit
        );

        let receipt = self.client.wait_for_receipt(&tx_hash).await?;
        debug!(
            "[{}] Receipt for {}: block={:?}",
            self.name, tx_hash, receipt.block_number
        );
        info!("[{}] Transaction confirmed: {}", self.name, tx_hash);

        Ok(tx_hash)
    }
}
