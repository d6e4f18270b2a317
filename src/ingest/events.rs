//! Typed protocol events
//!
//! Decoders for the endpoint and library events the role engines consume.
//! All parameters of these events are non-indexed, so everything is read
//! from the log data.

use anyhow::{Context, Result};
use std::fmt;

use crate::abi::{event_topic, keccak256, to_hex, AbiReader, Address, Bytes32};
use crate::evm_client::{EvmLog, EvmReceipt};

pub const PACKET_SENT: &str = "PacketSent(bytes,bytes,address)";
pub const PAYLOAD_VERIFIED: &str = "PayloadVerified(address,bytes,uint256,bytes32)";
pub const PACKET_VERIFIED: &str = "PacketVerified((uint32,bytes32,uint64),address,bytes32)";
pub const DVN_FEE_PAID: &str = "DVNFeePaid(address[],address[],uint256[])";
pub const EXECUTOR_FEE_PAID: &str = "ExecutorFeePaid(address,uint256)";

// ============================================================================
// EVENT KINDS
// ============================================================================

/// Events a role can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    /// EndpointV2 on the source network
    PacketSent,
    /// ReceiveUln302 on the destination network
    PayloadVerified,
    /// EndpointV2 on the destination network
    PacketVerified,
}

impl EventKind {
    pub fn signature(&self) -> &'static str {
        match self {
            EventKind::PacketSent => PACKET_SENT,
            EventKind::PayloadVerified => PAYLOAD_VERIFIED,
            EventKind::PacketVerified => PACKET_VERIFIED,
        }
    }

    pub fn topic(&self) -> Bytes32 {
        event_topic(self.signature())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::PacketSent => "PacketSent",
            EventKind::PayloadVerified => "PayloadVerified",
            EventKind::PacketVerified => "PacketVerified",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// EVENTS
// ============================================================================

/// `PacketSent(bytes encodedPayload, bytes options, address sendLibrary)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketSentEvent {
    /// Network the event was observed on
    pub network: String,
    pub encoded_packet: Vec<u8>,
    pub options: Vec<u8>,
    pub send_library: Address,
    pub tx_hash: String,
    pub block_number: u64,
}

impl PacketSentEvent {
    pub fn from_log(network: &str, log: &EvmLog) -> Result<Self> {
        let data = log.data_bytes()?;
        let reader = AbiReader::new(&data);
        Ok(Self {
            network: network.to_string(),
            encoded_packet: reader.bytes(0).context("PacketSent: encodedPayload")?,
            options: reader.bytes(1).context("PacketSent: options")?,
            send_library: reader.address(2).context("PacketSent: sendLibrary")?,
            tx_hash: log.tx_hash().to_string(),
            block_number: log.block(),
        })
    }
}

/// `PayloadVerified(address dvn, bytes header, uint256 confirmations, bytes32 proofHash)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadVerifiedEvent {
    pub dvn: Address,
    pub header: Vec<u8>,
    pub confirmations: Bytes32,
    pub proof_hash: Bytes32,
}

impl PayloadVerifiedEvent {
    pub fn from_log(log: &EvmLog) -> Result<Self> {
        let data = log.data_bytes()?;
        let reader = AbiReader::new(&data);
        Ok(Self {
            dvn: reader.address(0).context("PayloadVerified: dvn")?,
            header: reader.bytes(1).context("PayloadVerified: header")?,
            confirmations: reader.word(2).context("PayloadVerified: confirmations")?,
            proof_hash: reader.word(3).context("PayloadVerified: proofHash")?,
        })
    }

    pub fn header_hash(&self) -> Bytes32 {
        keccak256(&self.header)
    }
}

/// `PacketVerified(Origin origin, address receiver, bytes32 payloadHash)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketVerifiedEvent {
    pub src_eid: u32,
    pub sender: Bytes32,
    pub nonce: u64,
    pub receiver: Address,
    pub payload_hash: Bytes32,
}

impl PacketVerifiedEvent {
    pub fn from_log(log: &EvmLog) -> Result<Self> {
        let data = log.data_bytes()?;
        let reader = AbiReader::new(&data);
        Ok(Self {
            src_eid: u32::try_from(reader.uint(0)?).context("PacketVerified: srcEid")?,
            sender: reader.word(1).context("PacketVerified: sender")?,
            nonce: reader.u64(2).context("PacketVerified: nonce")?,
            receiver: reader.address(3).context("PacketVerified: receiver")?,
            payload_hash: reader.word(4).context("PacketVerified: payloadHash")?,
        })
    }
}

/// `DVNFeePaid(address[] requiredDVNs, address[] optionalDVNs, uint256[] fees)`
///
/// `fees` is indexed like `requiredDVNs ‖ optionalDVNs`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DvnFeePaidEvent {
    pub required_dvns: Vec<Address>,
    pub optional_dvns: Vec<Address>,
    pub fees: Vec<Bytes32>,
}

impl DvnFeePaidEvent {
    pub fn from_log(log: &EvmLog) -> Result<Self> {
        let data = log.data_bytes()?;
        let reader = AbiReader::new(&data);
        Ok(Self {
            required_dvns: reader.address_array(0).context("DVNFeePaid: requiredDVNs")?,
            optional_dvns: reader.address_array(1).context("DVNFeePaid: optionalDVNs")?,
            fees: reader.word_array(2).context("DVNFeePaid: fees")?,
        })
    }

    /// Fee paid to `dvn`, or the first positive fee when no DVN is given.
    pub fn fee_for(&self, dvn: Option<&Address>) -> Option<Bytes32> {
        match dvn {
            Some(dvn) => self
                .required_dvns
                .iter()
                .chain(self.optional_dvns.iter())
                .position(|candidate| candidate == dvn)
                .and_then(|index| self.fees.get(index).copied()),
            None => self.fees.iter().copied().find(is_positive),
        }
    }
}

/// `ExecutorFeePaid(address executor, uint256 fee)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorFeePaidEvent {
    pub executor: Address,
    pub fee: Bytes32,
}

impl ExecutorFeePaidEvent {
    pub fn from_log(log: &EvmLog) -> Result<Self> {
        let data = log.data_bytes()?;
        let reader = AbiReader::new(&data);
        Ok(Self {
            executor: reader.address(0).context("ExecutorFeePaid: executor")?,
            fee: reader.word(1).context("ExecutorFeePaid: fee")?,
        })
    }
}

// ============================================================================
// RECEIPT HELPERS
// ============================================================================

/// First log in `receipt` whose topic0 is the hash of `signature`.
pub fn find_log<'a>(receipt: &'a EvmReceipt, signature: &str) -> Option<&'a EvmLog> {
    let topic = event_topic(signature);
    receipt.logs.iter().find(|log| log.topic(0) == Some(topic))
}

/// True if a uint256 word is non-zero.
pub fn is_positive(value: &Bytes32) -> bool {
    value.iter().any(|b| *b != 0)
}

/// Display form of a uint256 word: decimal when it fits in u128, hex otherwise.
pub fn format_amount(value: &Bytes32) -> String {
    match crate::abi::word_to_u128(value) {
        Ok(amount) => amount.to_string(),
        Err(_) => to_hex(value),
    }
}
