//! Cryptographic Operations Module
//!
//! secp256k1 wallets used by the relay: the per-network admin wallet that
//! signs transactions, and the DVN signer wallets that sign verification
//! digests for the multisig.
//!
//! Private keys are never logged; `Debug` only prints the derived address.

use anyhow::{Context, Result};
use k256::ecdsa::{
    RecoveryId, Signature as EcdsaSignature, SigningKey as EcdsaSigningKey,
    VerifyingKey as EcdsaVerifyingKey,
};
use std::fmt;

use crate::abi::{keccak256, to_hex, Address, Bytes32};

/// Ethereum personal-message prefix for a 32-byte message.
const PERSONAL_MESSAGE_PREFIX: &[u8] = b"\x19Ethereum Signed Message:\n32";

// ============================================================================
// WALLET
// ============================================================================

/// secp256k1 key pair with its derived Ethereum address.
#[derive(Clone)]
pub struct Wallet {
    signing_key: EcdsaSigningKey,
    address: Address,
}

impl Wallet {
    /// Creates a wallet from a hex-encoded 32-byte private key (0x prefix optional).
    ///
    /// # Arguments
    ///
    /// * `private_key` - Hex private key
    ///
    /// # Returns
    ///
    /// * `Ok(Wallet)` - Wallet with derived address
    /// * `Err(anyhow::Error)` - Key is not valid hex or not a valid secp256k1 scalar
    pub fn from_hex(private_key: &str) -> Result<Self> {
        let clean = private_key.trim();
        let clean = clean.strip_prefix("0x").unwrap_or(clean);
        let bytes = hex::decode(clean).context("Private key is not valid hex")?;

        if bytes.len() != 32 {
            anyhow::bail!(
                "Invalid private key length: expected 32 bytes, got {}",
                bytes.len()
            );
        }

        let signing_key = EcdsaSigningKey::from_slice(&bytes)
            .map_err(|e| anyhow::anyhow!("Invalid secp256k1 private key: {}", e))?;
        let address = public_key_to_address(signing_key.verifying_key());

        Ok(Self {
            signing_key,
            address,
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Address as a 0x-prefixed lowercase hex string.
    pub fn address_hex(&self) -> String {
        to_hex(&self.address)
    }

    /// Signs a 32-byte hash without any prefix (transaction hashes).
    ///
    /// # Returns
    ///
    /// * `Ok((r, s, recovery_id))` - r and s are 32-byte big-endian, recovery_id is 0 or 1
    pub fn sign_hash(&self, hash: &Bytes32) -> Result<([u8; 32], [u8; 32], u8)> {
        let (signature, recovery_id): (EcdsaSignature, RecoveryId) = self
            .signing_key
            .sign_prehash_recoverable(hash)
            .map_err(|e| anyhow::anyhow!("Failed to sign hash: {}", e))?;

        let sig_bytes = signature.to_bytes();
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&sig_bytes[..32]);
        s.copy_from_slice(&sig_bytes[32..64]);

        Ok((r, s, recovery_id.to_byte()))
    }

    /// Signs `digest` as an Ethereum personal message.
    ///
    /// The signed hash is keccak256("\x19Ethereum Signed Message:\n32" || digest).
    ///
    /// # Returns
    ///
    /// * `Ok([u8; 65])` - r || s || v with v in {27, 28}
    pub fn sign_personal(&self, digest: &Bytes32) -> Result<[u8; 65]> {
        let hash = personal_message_hash(digest);
        let (r, s, recovery_id) = self.sign_hash(&hash)?;

        let mut signature = [0u8; 65];
        signature[..32].copy_from_slice(&r);
        signature[32..64].copy_from_slice(&s);
        signature[64] = recovery_id + 27;
        Ok(signature)
    }
}

impl fmt::Debug for Wallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wallet")
            .field("address", &self.address_hex())
            .finish()
    }
}

// ============================================================================
// HELPERS
// ============================================================================

/// keccak256("\x19Ethereum Signed Message:\n32" || digest)
pub fn personal_message_hash(digest: &Bytes32) -> Bytes32 {
    let mut prefixed = Vec::with_capacity(PERSONAL_MESSAGE_PREFIX.len() + 32);
    prefixed.extend_from_slice(PERSONAL_MESSAGE_PREFIX);
    prefixed.extend_from_slice(digest);
    keccak256(&prefixed)
}

/// Derives the Ethereum address of a public key.
///
/// keccak256(uncompressed_public_key without 0x04)[12..32]
pub fn public_key_to_address(verifying_key: &EcdsaVerifyingKey) -> Address {
    let point = verifying_key.to_encoded_point(false);
    let hash = keccak256(&point.as_bytes()[1..]);
    let mut address = [0u8; 20];
    address.copy_from_slice(&hash[12..]);
    address
}

/// Recovers the signer address of a 65-byte r || s || v signature over `hash`.
///
/// Accepts v as 0/1 or 27/28.
pub fn recover_address(hash: &Bytes32, signature: &[u8]) -> Result<Address> {
    if signature.len() != 65 {
        anyhow::bail!(
            "Invalid signature length: expected 65 bytes, got {}",
            signature.len()
        );
    }

    let v = signature[64];
    let recovery_byte = if v >= 27 { v - 27 } else { v };
    let recovery_id = RecoveryId::from_byte(recovery_byte)
        .with_context(|| format!("Invalid recovery id: {}", v))?;
    let sig = EcdsaSignature::from_slice(&signature[..64])
        .map_err(|e| anyhow::anyhow!("Invalid signature encoding: {}", e))?;

    let verifying_key = EcdsaVerifyingKey::recover_from_prehash(hash, &sig, recovery_id)
        .map_err(|e| anyhow::anyhow!("Failed to recover public key: {}", e))?;

    Ok(public_key_to_address(&verifying_key))
}
