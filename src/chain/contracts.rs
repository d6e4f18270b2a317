//! Contract call encoding
//!
//! Calldata builders and return-value decoders for the EndpointV2,
//! ReceiveUln302 and DVN multisig functions the relay uses.

use anyhow::{Context, Result};

use crate::abi::{encode_call, AbiReader, Address, Bytes32, Token};
use crate::codec::Packet;

use super::UlnConfig;

// ============================================================================
// FUNCTION SIGNATURES
// ============================================================================

pub const EID: &str = "eid()";
pub const INBOUND_NONCE: &str = "inboundNonce(address,uint32,bytes32)";
pub const LAZY_INBOUND_NONCE: &str = "lazyInboundNonce(address,uint32,bytes32)";
pub const INBOUND_PAYLOAD_HASH: &str = "inboundPayloadHash(address,uint32,bytes32,uint64)";
pub const GET_ULN_CONFIG: &str = "getUlnConfig(address,uint32)";
pub const VERIFIABLE: &str =
    "verifiable((uint64,uint8,uint8,uint8,address[],address[]),bytes32,bytes32)";
pub const VID: &str = "vid()";
pub const VERIFY: &str = "verify(bytes,bytes32,uint64)";
pub const EXECUTE: &str = "execute((uint32,address,bytes,uint256,bytes)[])";
pub const COMMIT_VERIFICATION: &str = "commitVerification(bytes,bytes32)";
pub const LZ_RECEIVE: &str = "lzReceive((uint32,bytes32,uint64),address,bytes32,bytes,bytes)";

// ============================================================================
// READS
// ============================================================================

pub fn eid_call() -> Vec<u8> {
    encode_call(EID, &[])
}

pub fn inbound_nonce_call(receiver: &Address, src_eid: u32, sender: &Bytes32) -> Vec<u8> {
    encode_call(INBOUND_NONCE, &nonce_args(receiver, src_eid, sender))
}

pub fn lazy_inbound_nonce_call(receiver: &Address, src_eid: u32, sender: &Bytes32) -> Vec<u8> {
    encode_call(LAZY_INBOUND_NONCE, &nonce_args(receiver, src_eid, sender))
}

fn nonce_args(receiver: &Address, src_eid: u32, sender: &Bytes32) -> Vec<Token> {
    vec![
        Token::Address(*receiver),
        Token::Uint(src_eid as u128),
        Token::FixedBytes(*sender),
    ]
}

pub fn inbound_payload_hash_call(
    receiver: &Address,
    src_eid: u32,
    sender: &Bytes32,
    nonce: u64,
) -> Vec<u8> {
    let mut args = nonce_args(receiver, src_eid, sender);
    args.push(Token::Uint(nonce as u128));
    encode_call(INBOUND_PAYLOAD_HASH, &args)
}

pub fn get_uln_config_call(receiver: &Address, src_eid: u32) -> Vec<u8> {
    encode_call(
        GET_ULN_CONFIG,
        &[Token::Address(*receiver), Token::Uint(src_eid as u128)],
    )
}

fn uln_config_token(config: &UlnConfig) -> Token {
    Token::Tuple(vec![
        Token::Uint(config.confirmations as u128),
        Token::Uint(config.required_dvn_count as u128),
        Token::Uint(config.optional_dvn_count as u128),
        Token::Uint(config.optional_dvn_threshold as u128),
        Token::Array(config.required_dvns.iter().copied().map(Token::Address).collect()),
        Token::Array(config.optional_dvns.iter().copied().map(Token::Address).collect()),
    ])
}

pub fn verifiable_call(config: &UlnConfig, header_hash: &Bytes32, payload_hash: &Bytes32) -> Vec<u8> {
    encode_call(
        VERIFIABLE,
        &[
            uln_config_token(config),
            Token::FixedBytes(*header_hash),
            Token::FixedBytes(*payload_hash),
        ],
    )
}

pub fn vid_call() -> Vec<u8> {
    encode_call(VID, &[])
}

/// Decodes the `UlnConfig` struct returned by `getUlnConfig`.
pub fn decode_uln_config(data: &[u8]) -> Result<UlnConfig> {
    let reader = AbiReader::new(data);
    let tuple = reader.tuple(0).context("Invalid getUlnConfig return data")?;

    let small = |index: usize| -> Result<u8> {
        u8::try_from(tuple.uint(index)?).context("UlnConfig count does not fit in uint8")
    };

    Ok(UlnConfig {
        confirmations: tuple.u64(0)?,
        required_dvn_count: small(1)?,
        optional_dvn_count: small(2)?,
        optional_dvn_threshold: small(3)?,
        required_dvns: tuple.address_array(4)?,
        optional_dvns: tuple.address_array(5)?,
    })
}

pub fn decode_bool(data: &[u8]) -> Result<bool> {
    AbiReader::new(data).bool(0)
}

pub fn decode_u64(data: &[u8]) -> Result<u64> {
    AbiReader::new(data).u64(0)
}

pub fn decode_u32(data: &[u8]) -> Result<u32> {
    u32::try_from(AbiReader::new(data).uint(0)?).context("Value does not fit in uint32")
}

pub fn decode_bytes32(data: &[u8]) -> Result<Bytes32> {
    AbiReader::new(data).word(0)
}

// ============================================================================
// WRITES
// ============================================================================

/// `verify(packetHeader, payloadHash, confirmations)` on ReceiveUln302.
pub fn verify_call(header: &[u8], payload_hash: &Bytes32, confirmations: u64) -> Vec<u8> {
    encode_call(
        VERIFY,
        &[
            Token::Bytes(header.to_vec()),
            Token::FixedBytes(*payload_hash),
            Token::Uint(confirmations as u128),
        ],
    )
}

/// One DVN multisig `ExecuteParam`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecuteParam {
    pub vid: u32,
    pub target: Address,
    pub call_data: Vec<u8>,
    pub expiration: u64,
    pub signatures: Vec<u8>,
}

/// `execute(ExecuteParam[])` on the DVN multisig.
pub fn execute_call(params: &[ExecuteParam]) -> Vec<u8> {
    let items = params
        .iter()
        .map(|p| {
            Token::Tuple(vec![
                Token::Uint(p.vid as u128),
                Token::Address(p.target),
                Token::Bytes(p.call_data.clone()),
                Token::Uint(p.expiration as u128),
                Token::Bytes(p.signatures.clone()),
            ])
        })
        .collect();
    encode_call(EXECUTE, &[Token::Array(items)])
}

/// `commitVerification(packetHeader, payloadHash)` on ReceiveUln302.
pub fn commit_verification_call(header: &[u8], payload_hash: &Bytes32) -> Vec<u8> {
    encode_call(
        COMMIT_VERIFICATION,
        &[Token::Bytes(header.to_vec()), Token::FixedBytes(*payload_hash)],
    )
}

/// `lzReceive(origin, receiver, guid, message, extraData)` on EndpointV2, with empty extraData.
pub fn lz_receive_call(packet: &Packet) -> Vec<u8> {
    encode_call(
        LZ_RECEIVE,
        &[
            Token::Tuple(vec![
                Token::Uint(packet.src_eid as u128),
                Token::FixedBytes(packet.sender),
                Token::Uint(packet.nonce as u128),
            ]),
            Token::Address(packet.receiver_address()),
            Token::FixedBytes(packet.guid),
            Token::Bytes(packet.message.clone()),
            Token::Bytes(vec![]),
        ],
    )
}
