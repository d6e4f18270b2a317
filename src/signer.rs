//! Quorum Signer
//!
//! Builds the DVN multisig `ExecuteParam` for a target call: the digest
//! `keccak256(vid:u32 ‖ target:address ‖ expiration:uint256 ‖ callData)`
//! is signed as a personal message by every signer key, and the 65-byte
//! signatures are concatenated in key order.

use anyhow::{Context, Result};

use crate::abi::{keccak256, uint_word, Address, Bytes32};
use crate::chain::contracts::ExecuteParam;
use crate::crypto::Wallet;

/// Seconds a signed DVN instruction stays valid.
pub const EXPIRATION_WINDOW_SECS: u64 = 86_400;

/// Digest the multisig checks signatures against (before the personal prefix).
pub fn execute_digest(vid: u32, target: &Address, expiration: u64, call_data: &[u8]) -> Bytes32 {
    let mut data = Vec::with_capacity(4 + 20 + 32 + call_data.len());
    data.extend_from_slice(&vid.to_be_bytes());
    data.extend_from_slice(target);
    data.extend_from_slice(&uint_word(expiration as u128));
    data.extend_from_slice(call_data);
    keccak256(&data)
}

/// Signs `digest` with each wallet and concatenates the signatures.
pub fn sign_all(signers: &[Wallet], digest: &Bytes32) -> Result<Vec<u8>> {
    if signers.is_empty() {
        anyhow::bail!("No DVN signer keys configured");
    }

    let mut signatures = Vec::with_capacity(signers.len() * 65);
    for signer in signers {
        let signature = signer
            .sign_personal(digest)
            .with_context(|| format!("Signer {} failed", signer.address_hex()))?;
        signatures.extend_from_slice(&signature);
    }
    Ok(signatures)
}

/// Builds a signed `ExecuteParam` for `call_data` on `target`.
///
/// # Arguments
///
/// * `vid` - Verifier id of the DVN multisig
/// * `target` - Contract the multisig will call
/// * `call_data` - Calldata the multisig forwards
/// * `now` - Current destination chain timestamp; expiration is `now + 86400`
/// * `signers` - Multisig signer wallets, in signing order
pub fn build_execute_param(
    vid: u32,
    target: Address,
    call_data: Vec<u8>,
    now: u64,
    signers: &[Wallet],
) -> Result<ExecuteParam> {
    let expiration = now.saturating_add(EXPIRATION_WINDOW_SECS);
    let digest = execute_digest(vid, &target, expiration, &call_data);
    let signatures = sign_all(signers, &digest)?;

    Ok(ExecuteParam {
        vid,
        target,
        call_data,
        expiration,
        signatures,
    })
}
