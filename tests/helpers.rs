//! Shared test helpers
//!
//! This module provides the fixtures used across the integration tests.
//!
//! The module is organized into several categories:
//! - **Constants**: Endpoint ids, addresses and keys used as test values
//! - **Mock Chain**: In-memory [`MessagingChain`] with scriptable state
//! - **Packet and Log Builders**: ABI-encoded protocol events and receipts
//! - **Ingestion Doubles**: Scripted event source, recording sink and pacer

#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use lz_relayer::abi::{encode, event_topic, to_hex, Address, Bytes32, Token};
use lz_relayer::chain::{GasLimit, MessagingChain, NetworkRegistry, UlnConfig};
use lz_relayer::codec::{address_to_bytes32, Packet};
use lz_relayer::crypto::Wallet;
use lz_relayer::error::RelayError;
use lz_relayer::evm_client::{EvmLog, EvmReceipt};
use lz_relayer::ingest::events::{
    DVN_FEE_PAID, EXECUTOR_FEE_PAID, PACKET_SENT, PACKET_VERIFIED, PAYLOAD_VERIFIED,
};
use lz_relayer::ingest::{EventKind, EventSink, EventSource, Pacer};
use rand::RngCore;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ============================================================================
// CONSTANTS
// ============================================================================

// -------------------------------- NETWORKS --------------------------------

pub const SOURCE_NETWORK: &str = "source";
pub const DESTINATION_NETWORK: &str = "destination";
pub const SOURCE_EID: u32 = 1;
pub const DESTINATION_EID: u32 = 2;

// ------------------------------- CONTRACTS --------------------------------

pub const SOURCE_ENDPOINT: Address = [0x11; 20];
pub const SOURCE_RECEIVE_ULN: Address = [0x12; 20];
pub const SOURCE_DVN: Address = [0x13; 20];
pub const SOURCE_EXECUTOR: Address = [0x14; 20];

pub const DESTINATION_ENDPOINT: Address = [0x21; 20];
pub const DESTINATION_RECEIVE_ULN: Address = [0x22; 20];
pub const DESTINATION_DVN: Address = [0x23; 20];
pub const DESTINATION_EXECUTOR: Address = [0x24; 20];

/// Send library reported by PacketSent
pub const SEND_LIBRARY: Address = [0x31; 20];

// ------------------------------ APPLICATIONS ------------------------------

pub const SENDER_APP: Address = [0xaa; 20];
pub const RECEIVER_APP: Address = [0xbb; 20];

/// Two independent DVNs attesting on the destination
pub const DVN_A: Address = [0xd1; 20];
pub const DVN_B: Address = [0xd2; 20];

// ---------------------------------- KEYS ----------------------------------

/// Well-known development key (Hardhat account 0)
pub const DEV_PRIVATE_KEY: &str =
    "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

/// Address of DEV_PRIVATE_KEY
pub const DEV_ADDRESS: &str = "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266";

/// Second development key (Hardhat account 1)
pub const DEV_PRIVATE_KEY_2: &str =
    "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";

/// Address of DEV_PRIVATE_KEY_2
pub const DEV_ADDRESS_2: &str = "0x70997970c51812dc3a010c7d01b50e0d17dc79c8";

// -------------------------------- OTHER -----------------------------------

pub const DUMMY_TX_HASH: &str =
    "0x00000000000000000000000000000000000000000000000000000000000000f1";

pub const DUMMY_PROOF_HASH: Bytes32 = [0x5a; 32];

// ============================================================================
// MOCK CHAIN
// ============================================================================

/// A transaction handed to [`MessagingChain::submit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub to: Address,
    pub calldata: Vec<u8>,
    pub gas: GasLimit,
    pub value: u128,
}

/// Scriptable on-chain state of a [`MockChain`].
#[derive(Debug, Default)]
pub struct MockState {
    pub head: u64,
    pub timestamp: u64,
    pub vid: u32,
    pub uln_config: UlnConfig,
    pub verifiable: bool,
    /// `verifiable` flips to true once a transaction is submitted
    pub verifiable_after_submit: bool,
    pub inbound_nonce: u64,
    pub lazy_inbound_nonce: u64,
    /// inboundPayloadHash by nonce; missing nonces read as empty
    pub payload_hashes: HashMap<u64, Bytes32>,
    pub receipts: HashMap<String, EvmReceipt>,
    pub submissions: Vec<Submission>,
    /// Every submission reverts
    pub revert_submissions: bool,
    pub uln_config_reads: usize,
    pub verifiable_reads: usize,
}

/// In-memory network.
pub struct MockChain {
    name: String,
    eid: u32,
    endpoint: Address,
    receive_uln: Address,
    dvn: Option<Address>,
    executor: Option<Address>,
    signers: Vec<Wallet>,
    pub state: Mutex<MockState>,
}

impl MockChain {
    pub fn new(
        name: &str,
        eid: u32,
        endpoint: Address,
        receive_uln: Address,
        dvn: Option<Address>,
        executor: Option<Address>,
    ) -> Self {
        Self {
            name: name.to_string(),
            eid,
            endpoint,
            receive_uln,
            dvn,
            executor,
            signers: Vec::new(),
            state: Mutex::new(MockState::default()),
        }
    }

    /// Source network fixture (eid 1).
    pub fn source() -> Self {
        Self::new(
            SOURCE_NETWORK,
            SOURCE_EID,
            SOURCE_ENDPOINT,
            SOURCE_RECEIVE_ULN,
            Some(SOURCE_DVN),
            Some(SOURCE_EXECUTOR),
        )
    }

    /// Destination network fixture (eid 2).
    pub fn destination() -> Self {
        Self::new(
            DESTINATION_NETWORK,
            DESTINATION_EID,
            DESTINATION_ENDPOINT,
            DESTINATION_RECEIVE_ULN,
            Some(DESTINATION_DVN),
            Some(DESTINATION_EXECUTOR),
        )
    }

    pub fn with_signers(mut self, signers: Vec<Wallet>) -> Self {
        self.signers = signers;
        self
    }

    /// Runs `f` against the mutable state.
    pub fn with_state<R>(&self, f: impl FnOnce(&mut MockState) -> R) -> R {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    pub fn add_receipt(&self, receipt: EvmReceipt) {
        self.with_state(|s| {
            s.receipts
                .insert(receipt.transaction_hash.clone(), receipt);
        });
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.with_state(|s| s.submissions.clone())
    }
}

#[async_trait]
impl MessagingChain for MockChain {
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
        Ok(self.with_state(|s| s.head))
    }

    async fn latest_block_timestamp(&self) -> Result<u64> {
        Ok(self.with_state(|s| s.timestamp))
    }

    async fn transaction_receipt(&self, tx_hash: &str) -> Result<EvmReceipt> {
        self.with_state(|s| s.receipts.get(tx_hash).cloned())
            .ok_or_else(|| RelayError::ReceiptUnavailable(tx_hash.to_string()).into())
    }

    async fn uln_config(&self, _receiver: &Address, _src_eid: u32) -> Result<UlnConfig> {
        Ok(self.with_state(|s| {
            s.uln_config_reads += 1;
            s.uln_config.clone()
        }))
    }

    async fn verifiable(
        &self,
        _config: &UlnConfig,
        _header_hash: &Bytes32,
        _payload_hash: &Bytes32,
    ) -> Result<bool> {
        Ok(self.with_state(|s| {
            s.verifiable_reads += 1;
            s.verifiable
        }))
    }

    async fn inbound_nonce(
        &self,
        _receiver: &Address,
        _src_eid: u32,
        _sender: &Bytes32,
    ) -> Result<u64> {
        Ok(self.with_state(|s| s.inbound_nonce))
    }

    async fn lazy_inbound_nonce(
        &self,
        _receiver: &Address,
        _src_eid: u32,
        _sender: &Bytes32,
    ) -> Result<u64> {
        Ok(self.with_state(|s| s.lazy_inbound_nonce))
    }

    async fn inbound_payload_hash(
        &self,
        _receiver: &Address,
        _src_eid: u32,
        _sender: &Bytes32,
        nonce: u64,
    ) -> Result<Bytes32> {
        Ok(self.with_state(|s| s.payload_hashes.get(&nonce).copied().unwrap_or([0u8; 32])))
    }

    async fn dvn_vid(&self) -> Result<u32> {
        Ok(self.with_state(|s| s.vid))
    }

    async fn submit(
        &self,
        to: Address,
        calldata: Vec<u8>,
        gas: GasLimit,
        value: u128,
    ) -> Result<String> {
        self.with_state(|s| -> Result<String> {
            if s.revert_submissions {
                return Err(RelayError::TransactionReverted {
                    tx_hash: "(gas estimation)".to_string(),
                    reason: "execution reverted".to_string(),
                }
                .into());
            }
            s.submissions.push(Submission {
                to,
                calldata,
                gas,
                value,
            });
            if s.verifiable_after_submit {
                s.verifiable = true;
            }
            Ok(format!("0x{:064x}", s.submissions.len()))
        })
    }
}

/// Source and destination fixtures registered together.
pub struct TestNetworks {
    pub source: Arc<MockChain>,
    pub destination: Arc<MockChain>,
    pub registry: Arc<NetworkRegistry>,
}

pub fn build_test_networks(source: MockChain, destination: MockChain) -> TestNetworks {
    let source = Arc::new(source);
    let destination = Arc::new(destination);
    let mut registry = NetworkRegistry::new();
    registry
        .register(source.clone() as Arc<dyn MessagingChain>)
        .unwrap();
    registry
        .register(destination.clone() as Arc<dyn MessagingChain>)
        .unwrap();
    TestNetworks {
        source,
        destination,
        registry: Arc::new(registry),
    }
}

/// UlnConfig requiring `required` DVNs plus `threshold` optional ones.
pub fn uln_config(confirmations: u64, required: &[Address], optional: &[Address], threshold: u8) -> UlnConfig {
    UlnConfig {
        confirmations,
        required_dvn_count: required.len() as u8,
        optional_dvn_count: optional.len() as u8,
        optional_dvn_threshold: threshold,
        required_dvns: required.to_vec(),
        optional_dvns: optional.to_vec(),
    }
}

// ============================================================================
// PACKET AND LOG BUILDERS
// ============================================================================

/// Packet from SENDER_APP on eid 1 to RECEIVER_APP on eid 2.
pub fn test_packet(nonce: u64) -> Packet {
    Packet::new(
        nonce,
        SOURCE_EID,
        address_to_bytes32(&SENDER_APP),
        DESTINATION_EID,
        address_to_bytes32(&RECEIVER_APP),
        b"hello".to_vec(),
    )
}

/// Type 3 options with one executor lzReceive entry.
pub fn type3_options(gas: u128, value: u128) -> Vec<u8> {
    let mut options = vec![0x00, 0x03];
    options.push(1);
    if value == 0 {
        options.extend_from_slice(&17u16.to_be_bytes());
        options.push(1);
        options.extend_from_slice(&gas.to_be_bytes());
    } else {
        options.extend_from_slice(&33u16.to_be_bytes());
        options.push(1);
        options.extend_from_slice(&gas.to_be_bytes());
        options.extend_from_slice(&value.to_be_bytes());
    }
    options
}

/// Hash of a numbered test transaction.
pub fn tx_hash(n: u64) -> String {
    format!("0x{:064x}", n)
}

fn log(emitter: &Address, signature: &str, data: Vec<u8>, tx: &str, block: u64, index: u64) -> EvmLog {
    EvmLog {
        address: to_hex(emitter),
        topics: vec![to_hex(&event_topic(signature))],
        data: to_hex(&data),
        block_number: Some(format!("0x{:x}", block)),
        transaction_hash: Some(tx.to_string()),
        log_index: Some(format!("0x{:x}", index)),
        removed: false,
    }
}

pub fn packet_sent_log(packet: &Packet, options: &[u8], tx: &str, block: u64) -> EvmLog {
    packet_sent_log_raw(&packet.encode(), options, tx, block)
}

/// PacketSent carrying arbitrary encoded bytes.
pub fn packet_sent_log_raw(encoded: &[u8], options: &[u8], tx: &str, block: u64) -> EvmLog {
    let data = encode(&[
        Token::Bytes(encoded.to_vec()),
        Token::Bytes(options.to_vec()),
        Token::Address(SEND_LIBRARY),
    ]);
    log(&SOURCE_ENDPOINT, PACKET_SENT, data, tx, block, 0)
}

pub fn payload_verified_log(dvn: &Address, header: &[u8], confirmations: u128, proof_hash: &Bytes32) -> EvmLog {
    let data = encode(&[
        Token::Address(*dvn),
        Token::Bytes(header.to_vec()),
        Token::Uint(confirmations),
        Token::FixedBytes(*proof_hash),
    ]);
    log(&DESTINATION_RECEIVE_ULN, PAYLOAD_VERIFIED, data, DUMMY_TX_HASH, 50, 0)
}

/// PacketVerified for the route and nonce of `packet`.
pub fn packet_verified_log(packet: &Packet) -> EvmLog {
    let data = encode(&[
        Token::Tuple(vec![
            Token::Uint(packet.src_eid as u128),
            Token::FixedBytes(packet.sender),
            Token::Uint(packet.nonce as u128),
        ]),
        Token::Address(packet.receiver_address()),
        Token::FixedBytes(packet.payload_hash()),
    ]);
    log(&DESTINATION_ENDPOINT, PACKET_VERIFIED, data, DUMMY_TX_HASH, 60, 0)
}

pub fn executor_fee_log(executor: &Address, fee: u128, tx: &str) -> EvmLog {
    let data = encode(&[Token::Address(*executor), Token::Uint(fee)]);
    log(&SOURCE_EXECUTOR, EXECUTOR_FEE_PAID, data, tx, 10, 1)
}

pub fn dvn_fee_log(required: &[Address], optional: &[Address], fees: &[u128], tx: &str) -> EvmLog {
    let data = encode(&[
        Token::Array(required.iter().copied().map(Token::Address).collect()),
        Token::Array(optional.iter().copied().map(Token::Address).collect()),
        Token::Array(fees.iter().copied().map(Token::Uint).collect()),
    ]);
    log(&SOURCE_RECEIVE_ULN, DVN_FEE_PAID, data, tx, 10, 2)
}

/// Successful receipt holding `logs`.
pub fn receipt(tx: &str, logs: Vec<EvmLog>) -> EvmReceipt {
    EvmReceipt {
        transaction_hash: tx.to_string(),
        block_number: Some("0xa".to_string()),
        status: Some("0x1".to_string()),
        logs,
    }
}

/// Bare log at (block, index) for ordering tests.
pub fn ordered_log(block: u64, index: u64) -> EvmLog {
    log(&SOURCE_ENDPOINT, PACKET_SENT, Vec::new(), &tx_hash(block * 1000 + index), block, index)
}

// ============================================================================
// WALLETS AND FILES
// ============================================================================

pub fn dev_wallet() -> Wallet {
    Wallet::from_hex(DEV_PRIVATE_KEY).unwrap()
}

pub fn dev_wallet_2() -> Wallet {
    Wallet::from_hex(DEV_PRIVATE_KEY_2).unwrap()
}

/// Wallet from fresh random bytes.
pub fn random_wallet() -> Wallet {
    let mut rng = rand::thread_rng();
    loop {
        let mut key = [0u8; 32];
        rng.fill_bytes(&mut key);
        if let Ok(wallet) = Wallet::from_hex(&hex::encode(key)) {
            return wallet;
        }
    }
}

/// Fresh empty directory under the system temp dir.
pub fn temp_dir(prefix: &str) -> PathBuf {
    let mut suffix = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut suffix);
    let dir = std::env::temp_dir().join(format!("{}-{}", prefix, hex::encode(suffix)));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

// ============================================================================
// INGESTION DOUBLES
// ============================================================================

/// Event source backed by a fixed log set and scripted filter batches.
#[derive(Default)]
pub struct ScriptedSource {
    pub head: Mutex<u64>,
    /// Logs returned by range fetches, in the order given
    pub logs: Mutex<Vec<EvmLog>>,
    /// Every (from, to) window fetched
    pub windows: Mutex<Vec<(u64, u64)>>,
    /// from_block of every installed filter
    pub installs: Mutex<Vec<u64>>,
    /// Results returned by successive filter polls
    pub batches: Mutex<VecDeque<Result<Vec<EvmLog>, String>>>,
    pub polled_ids: Mutex<Vec<String>>,
}

impl ScriptedSource {
    pub fn new(head: u64, logs: Vec<EvmLog>) -> Self {
        Self {
            head: Mutex::new(head),
            logs: Mutex::new(logs),
            ..Default::default()
        }
    }

    pub fn push_batch(&self, batch: Result<Vec<EvmLog>, String>) {
        self.batches.lock().unwrap().push_back(batch);
    }

    pub fn windows(&self) -> Vec<(u64, u64)> {
        self.windows.lock().unwrap().clone()
    }

    pub fn installs(&self) -> Vec<u64> {
        self.installs.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventSource for ScriptedSource {
    fn network(&self) -> &str {
        SOURCE_NETWORK
    }

    async fn head(&self) -> Result<u64> {
        Ok(*self.head.lock().unwrap())
    }

    async fn fetch(&self, _kind: EventKind, from_block: u64, to_block: u64) -> Result<Vec<EvmLog>> {
        self.windows.lock().unwrap().push((from_block, to_block));
        Ok(self
            .logs
            .lock()
            .unwrap()
            .iter()
            .filter(|log| log.block() >= from_block && log.block() <= to_block)
            .cloned()
            .collect())
    }

    async fn install_filter(&self, _kind: EventKind, from_block: u64) -> Result<String> {
        let mut installs = self.installs.lock().unwrap();
        installs.push(from_block);
        Ok(format!("0x{:x}", installs.len()))
    }

    async fn poll_filter(&self, filter_id: &str) -> Result<Vec<EvmLog>> {
        self.polled_ids.lock().unwrap().push(filter_id.to_string());
        match self.batches.lock().unwrap().pop_front() {
            Some(Ok(logs)) => Ok(logs),
            Some(Err(reason)) => Err(anyhow::anyhow!(reason)),
            None => Ok(Vec::new()),
        }
    }
}

/// Sink recording every dispatched log.
#[derive(Default)]
pub struct RecordingSink {
    pub received: Mutex<Vec<(String, EventKind, EvmLog)>>,
    /// Reported as the pending floor of every (network, kind)
    pub floor: Mutex<Option<u64>>,
}

impl RecordingSink {
    /// (block, index) of every dispatched log, in dispatch order.
    pub fn positions(&self) -> Vec<(u64, u64)> {
        self.received
            .lock()
            .unwrap()
            .iter()
            .map(|(_, _, log)| (log.block(), log.index()))
            .collect()
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn dispatch(&self, network: &str, kind: EventKind, log: EvmLog) {
        self.received
            .lock()
            .unwrap()
            .push((network.to_string(), kind, log));
    }

    async fn pending_floor(&self, _network: &str, _kind: EventKind) -> Option<u64> {
        *self.floor.lock().unwrap()
    }
}

/// Pacer that records pauses instead of sleeping.
#[derive(Default)]
pub struct RecordingPacer {
    pub pauses: Mutex<Vec<Duration>>,
}

impl RecordingPacer {
    pub fn pauses(&self) -> Vec<Duration> {
        self.pauses.lock().unwrap().clone()
    }
}

#[async_trait]
impl Pacer for RecordingPacer {
    async fn pause(&self, duration: Duration) {
        self.pauses.lock().unwrap().push(duration);
    }
}
