//! Solidity ABI Encoding Module
//!
//! Minimal head/tail ABI encoder and word reader for the handful of contract
//! calls, return values and event payloads the relay touches. Selectors and
//! event topics are keccak256 hashes of canonical signatures.

use anyhow::{Context, Result};
use sha3::{Digest, Keccak256};

/// 20-byte EVM account address.
pub type Address = [u8; 20];

/// 32-byte word (hashes, bytes32 values).
pub type Bytes32 = [u8; 32];

const WORD: usize = 32;

// ============================================================================
// HASHING HELPERS
// ============================================================================

/// keccak256 over arbitrary bytes.
pub fn keccak256(data: &[u8]) -> Bytes32 {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Function selector: keccak256(signature)[0..4].
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// Event topic: keccak256(signature).
pub fn event_topic(signature: &str) -> Bytes32 {
    keccak256(signature.as_bytes())
}

// ============================================================================
// ENCODING
// ============================================================================

/// A single ABI value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Address(Address),
    /// Unsigned integer of any width up to 128 bits, encoded as uint256
    Uint(u128),
    FixedBytes(Bytes32),
    Bytes(Vec<u8>),
    Array(Vec<Token>),
    Tuple(Vec<Token>),
}

impl Token {
    fn is_dynamic(&self) -> bool {
        match self {
            Token::Bytes(_) | Token::Array(_) => true,
            Token::Tuple(items) => items.iter().any(Token::is_dynamic),
            _ => false,
        }
    }

    /// Size of this token's slot in the head section.
    fn head_len(&self) -> usize {
        match self {
            Token::Tuple(items) if !self.is_dynamic() => {
                items.iter().map(Token::head_len).sum()
            }
            _ => WORD,
        }
    }
}

/// Left-pads an unsigned integer into a 32-byte word.
pub fn uint_word(value: u128) -> Bytes32 {
    let mut word = [0u8; 32];
    word[16..].copy_from_slice(&value.to_be_bytes());
    word
}

/// Left-pads an address into a 32-byte word.
pub fn address_word(address: &Address) -> Bytes32 {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(address);
    word
}

fn encode_bytes(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(WORD + data.len() + WORD);
    out.extend_from_slice(&uint_word(data.len() as u128));
    out.extend_from_slice(data);
    let padding = (WORD - (data.len() % WORD)) % WORD;
    out.extend(std::iter::repeat(0u8).take(padding));
    out
}

fn encode_token(token: &Token) -> Vec<u8> {
    match token {
        Token::Address(address) => address_word(address).to_vec(),
        Token::Uint(value) => uint_word(*value).to_vec(),
        Token::FixedBytes(word) => word.to_vec(),
        Token::Bytes(data) => encode_bytes(data),
        Token::Array(items) => {
            let mut out = uint_word(items.len() as u128).to_vec();
            out.extend(encode(items));
            out
        }
        Token::Tuple(items) => encode(items),
    }
}

/// ABI-encodes a sequence of tokens (the argument list of a call).
pub fn encode(tokens: &[Token]) -> Vec<u8> {
    let head_size: usize = tokens.iter().map(Token::head_len).sum();
    let mut head = Vec::with_capacity(head_size);
    let mut tail = Vec::new();

    for token in tokens {
        if token.is_dynamic() {
            head.extend_from_slice(&uint_word((head_size + tail.len()) as u128));
            tail.extend(encode_token(token));
        } else {
            head.extend(encode_token(token));
        }
    }

    head.extend(tail);
    head
}

/// Builds calldata: selector followed by the encoded arguments.
pub fn encode_call(signature: &str, tokens: &[Token]) -> Vec<u8> {
    let mut data = selector(signature).to_vec();
    data.extend(encode(tokens));
    data
}

// ============================================================================
// DECODING
// ============================================================================

/// Reads head words and dynamic values out of ABI-encoded data.
///
/// Indices address head words; dynamic values follow their offset pointer,
/// which is relative to the start of the reader's data.
#[derive(Debug, Clone, Copy)]
pub struct AbiReader<'a> {
    data: &'a [u8],
}

impl<'a> AbiReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    fn slice(&self, start: usize, len: usize) -> Result<&'a [u8]> {
        let end = start
            .checked_add(len)
            .context("ABI offset overflow")?;
        self.data.get(start..end).with_context(|| {
            format!(
                "ABI data too short: need {} bytes at offset {}, have {}",
                len,
                start,
                self.data.len()
            )
        })
    }

    fn word_at(&self, offset: usize) -> Result<Bytes32> {
        let mut word = [0u8; 32];
        word.copy_from_slice(self.slice(offset, WORD)?);
        Ok(word)
    }

    fn usize_at(&self, offset: usize) -> Result<usize> {
        let value = word_to_u128(&self.word_at(offset)?)?;
        usize::try_from(value).context("ABI length does not fit in usize")
    }

    /// Raw head word `index`.
    pub fn word(&self, index: usize) -> Result<Bytes32> {
        self.word_at(index * WORD)
    }

    pub fn uint(&self, index: usize) -> Result<u128> {
        word_to_u128(&self.word(index)?)
    }

    pub fn u64(&self, index: usize) -> Result<u64> {
        u64::try_from(self.uint(index)?).context("ABI value does not fit in u64")
    }

    pub fn bool(&self, index: usize) -> Result<bool> {
        Ok(self.uint(index)? != 0)
    }

    pub fn address(&self, index: usize) -> Result<Address> {
        Ok(word_to_address(&self.word(index)?))
    }

    /// Dynamic `bytes` value referenced by head word `index`.
    pub fn bytes(&self, index: usize) -> Result<Vec<u8>> {
        let offset = self.usize_at(index * WORD)?;
        let len = self.usize_at(offset)?;
        Ok(self.slice(offset + WORD, len)?.to_vec())
    }

    /// Dynamic tuple (or array body) referenced by head word `index`.
    pub fn tuple(&self, index: usize) -> Result<AbiReader<'a>> {
        let offset = self.usize_at(index * WORD)?;
        let rest = self
            .data
            .get(offset..)
            .context("ABI tuple offset out of range")?;
        Ok(AbiReader::new(rest))
    }

    fn array(&self, index: usize) -> Result<(usize, AbiReader<'a>)> {
        let offset = self.usize_at(index * WORD)?;
        let len = self.usize_at(offset)?;
        let body = self
            .data
            .get(offset + WORD..)
            .context("ABI array offset out of range")?;
        Ok((len, AbiReader::new(body)))
    }

    pub fn address_array(&self, index: usize) -> Result<Vec<Address>> {
        let (len, body) = self.array(index)?;
        (0..len).map(|i| body.address(i)).collect()
    }

    pub fn uint_array(&self, index: usize) -> Result<Vec<u128>> {
        let (len, body) = self.array(index)?;
        (0..len).map(|i| body.uint(i)).collect()
    }

    /// Array of raw words (uint256 values that may exceed u128).
    pub fn word_array(&self, index: usize) -> Result<Vec<Bytes32>> {
        let (len, body) = self.array(index)?;
        (0..len).map(|i| body.word(i)).collect()
    }
}

/// Converts a big-endian word to u128, failing if the high half is set.
pub fn word_to_u128(word: &Bytes32) -> Result<u128> {
    if word[..16].iter().any(|b| *b != 0) {
        anyhow::bail!("ABI uint256 value exceeds u128: 0x{}", hex::encode(word));
    }
    let mut low = [0u8; 16];
    low.copy_from_slice(&word[16..]);
    Ok(u128::from_be_bytes(low))
}

/// Takes the low 20 bytes of a word as an address.
pub fn word_to_address(word: &Bytes32) -> Address {
    let mut address = [0u8; 20];
    address.copy_from_slice(&word[12..]);
    address
}

// ============================================================================
// HEX HELPERS
// ============================================================================

/// Convert hex string (with or without 0x prefix) to bytes.
pub fn hex_to_bytes(hex_str: &str) -> Result<Vec<u8>> {
    let hex_clean = hex_str.strip_prefix("0x").unwrap_or(hex_str);
    hex::decode(hex_clean).context("Invalid hex string")
}

/// Encode bytes as a 0x-prefixed hex string.
pub fn to_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

/// Parse a 0x-prefixed (or bare) hex string into a 32-byte word.
///
/// Left-pads short values so quantities with stripped leading zeros parse.
pub fn parse_bytes32(value: &str) -> Result<Bytes32> {
    let hex_clean = value.strip_prefix("0x").unwrap_or(value);
    if hex_clean.len() > 64 {
        anyhow::bail!("Hex value longer than 32 bytes: {}", value);
    }
    let padded = format!("{:0>64}", hex_clean);
    let bytes = hex::decode(&padded).context("Invalid 32-byte hex value")?;
    let mut word = [0u8; 32];
    word.copy_from_slice(&bytes);
    Ok(word)
}

/// Parse a 20-byte EVM address.
pub fn parse_address(value: &str) -> Result<Address> {
    let bytes = hex_to_bytes(value)?;
    if bytes.len() != 20 {
        anyhow::bail!(
            "Invalid EVM address length: expected 20 bytes, got {} ({})",
            bytes.len(),
            value
        );
    }
    let mut address = [0u8; 20];
    address.copy_from_slice(&bytes);
    Ok(address)
}

/// Parse a JSON-RPC hex quantity ("0x1a") into u64.
pub fn parse_quantity(value: &str) -> Result<u64> {
    let clean = value.strip_prefix("0x").unwrap_or(value);
    if clean.is_empty() {
        return Ok(0);
    }
    u64::from_str_radix(clean, 16).with_context(|| format!("Invalid hex quantity: {}", value))
}
