//! Packet Codec Module
//!
//! Decodes the `encodedPayload` carried by `PacketSent` into a [`Packet`],
//! re-encodes it to the canonical PacketV1 layout, and derives the header and
//! payload hashes that identify the message on-chain.
//!
//! ## Layout
//!
//! ```text
//! version:u8 | nonce:u64 | srcEid:u32 | sender:bytes32 | dstEid:u32 | receiver:bytes32 | guid:bytes32 | message
//! 0            1           9            13               45           49                 81             113
//! ```
//!
//! The header covers bytes `[0, 81)`; the payload covers `[81, end)`.

pub mod options;

use crate::abi::{keccak256, Address, Bytes32};
use crate::error::RelayError;

pub use options::{decode_executor_options, ExecutorOptions};

/// Only supported packet version.
pub const PACKET_VERSION: u8 = 1;

const NONCE_OFFSET: usize = 1;
const SRC_EID_OFFSET: usize = 9;
const SENDER_OFFSET: usize = 13;
const DST_EID_OFFSET: usize = 45;
const RECEIVER_OFFSET: usize = 49;
const GUID_OFFSET: usize = 81;
const MESSAGE_OFFSET: usize = 113;

/// Length of the routing header.
pub const HEADER_LEN: usize = GUID_OFFSET;

// ============================================================================
// PACKET
// ============================================================================

/// A cross-chain message as emitted by the source endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Packet {
    pub nonce: u64,
    pub src_eid: u32,
    /// Sender address, left-padded to 32 bytes
    pub sender: Bytes32,
    pub dst_eid: u32,
    /// Receiver address, left-padded to 32 bytes
    pub receiver: Bytes32,
    pub guid: Bytes32,
    pub message: Vec<u8>,
}

impl Packet {
    /// Builds a packet, deriving its GUID from the routing fields.
    pub fn new(
        nonce: u64,
        src_eid: u32,
        sender: Bytes32,
        dst_eid: u32,
        receiver: Bytes32,
        message: Vec<u8>,
    ) -> Self {
        let guid = compute_guid(nonce, src_eid, &sender, dst_eid, &receiver);
        Self {
            nonce,
            src_eid,
            sender,
            dst_eid,
            receiver,
            guid,
            message,
        }
    }

    /// Receiver as a 20-byte EVM address.
    pub fn receiver_address(&self) -> Address {
        bytes32_to_address(&self.receiver)
    }

    /// Canonical encoding of this packet.
    pub fn encode(&self) -> Vec<u8> {
        encode(self)
    }

    /// Routing header bytes of the canonical encoding.
    pub fn header(&self) -> Vec<u8> {
        self.encode()[..HEADER_LEN].to_vec()
    }

    /// Payload bytes (guid ‖ message) of the canonical encoding.
    pub fn payload(&self) -> Vec<u8> {
        self.encode()[HEADER_LEN..].to_vec()
    }

    pub fn header_hash(&self) -> Bytes32 {
        header_hash(&self.encode())
    }

    pub fn payload_hash(&self) -> Bytes32 {
        payload_hash(&self.encode())
    }
}

/// Deterministic message identifier.
///
/// keccak256(nonce:u64 ‖ srcEid:u32 ‖ sender:bytes32 ‖ dstEid:u32 ‖ receiver:bytes32)
pub fn compute_guid(
    nonce: u64,
    src_eid: u32,
    sender: &Bytes32,
    dst_eid: u32,
    receiver: &Bytes32,
) -> Bytes32 {
    let mut data = Vec::with_capacity(8 + 4 + 32 + 4 + 32);
    data.extend_from_slice(&nonce.to_be_bytes());
    data.extend_from_slice(&src_eid.to_be_bytes());
    data.extend_from_slice(sender);
    data.extend_from_slice(&dst_eid.to_be_bytes());
    data.extend_from_slice(receiver);
    keccak256(&data)
}

// ============================================================================
// ENCODING / DECODING
// ============================================================================

/// Encodes a packet into the PacketV1 wire format.
pub fn encode(packet: &Packet) -> Vec<u8> {
    let mut out = Vec::with_capacity(MESSAGE_OFFSET + packet.message.len());
    out.push(PACKET_VERSION);
    out.extend_from_slice(&packet.nonce.to_be_bytes());
    out.extend_from_slice(&packet.src_eid.to_be_bytes());
    out.extend_from_slice(&packet.sender);
    out.extend_from_slice(&packet.dst_eid.to_be_bytes());
    out.extend_from_slice(&packet.receiver);
    out.extend_from_slice(&packet.guid);
    out.extend_from_slice(&packet.message);
    out
}

/// Decodes a PacketV1 encoding.
///
/// Fails with [`RelayError::MalformedPacket`] when the input is shorter than the
/// fixed region, carries an unknown version, or its GUID does not match the
/// routing fields.
pub fn decode(raw: &[u8]) -> Result<Packet, RelayError> {
    if raw.len() < MESSAGE_OFFSET {
        return Err(RelayError::MalformedPacket(format!(
            "expected at least {} bytes, got {}",
            MESSAGE_OFFSET,
            raw.len()
        )));
    }
    if raw[0] != PACKET_VERSION {
        return Err(RelayError::MalformedPacket(format!(
            "unsupported packet version {}",
            raw[0]
        )));
    }

    let nonce = u64::from_be_bytes(fixed(&raw[NONCE_OFFSET..SRC_EID_OFFSET]));
    let src_eid = u32::from_be_bytes(fixed(&raw[SRC_EID_OFFSET..SENDER_OFFSET]));
    let sender: Bytes32 = fixed(&raw[SENDER_OFFSET..DST_EID_OFFSET]);
    let dst_eid = u32::from_be_bytes(fixed(&raw[DST_EID_OFFSET..RECEIVER_OFFSET]));
    let receiver: Bytes32 = fixed(&raw[RECEIVER_OFFSET..GUID_OFFSET]);
    let guid: Bytes32 = fixed(&raw[GUID_OFFSET..MESSAGE_OFFSET]);

    let expected = compute_guid(nonce, src_eid, &sender, dst_eid, &receiver);
    if guid != expected {
        return Err(RelayError::MalformedPacket(format!(
            "guid 0x{} does not match routing fields (expected 0x{})",
            hex::encode(guid),
            hex::encode(expected)
        )));
    }

    Ok(Packet {
        nonce,
        src_eid,
        sender,
        dst_eid,
        receiver,
        guid,
        message: raw[MESSAGE_OFFSET..].to_vec(),
    })
}

/// keccak256 over the routing header of an encoded packet.
pub fn header_hash(encoded: &[u8]) -> Bytes32 {
    keccak256(&encoded[..HEADER_LEN.min(encoded.len())])
}

/// keccak256 over guid ‖ message of an encoded packet.
pub fn payload_hash(encoded: &[u8]) -> Bytes32 {
    keccak256(encoded.get(GUID_OFFSET..).unwrap_or(&[]))
}

fn fixed<const N: usize>(slice: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(slice);
    out
}

// ============================================================================
// ADDRESS HELPERS
// ============================================================================

/// Low 20 bytes of a left-padded bytes32 address.
pub fn bytes32_to_address(value: &Bytes32) -> Address {
    fixed(&value[12..])
}

/// Left-pads a 20-byte address to bytes32.
pub fn address_to_bytes32(address: &Address) -> Bytes32 {
    let mut out = [0u8; 32];
    out[12..].copy_from_slice(address);
    out
}
