//! Error types
//!
//! The relay distinguishes a small set of failure kinds that change how a
//! packet is handled. Everything else travels as `anyhow::Error` with context.

use thiserror::Error;

/// Failure kinds a role engine branches on.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    /// Encoded packet could not be decoded (dropped, never retried for that event)
    #[error("Malformed packet: {0}")]
    MalformedPacket(String),

    /// No configured network serves the destination endpoint id
    #[error("Unsupported destination eid {0}")]
    UnsupportedDestination(u32),

    /// Packet options carry no executor lzReceive option
    #[error("Packet does not contain executor lzReceive options")]
    MissingExecutorOptions,

    /// Transaction was mined with a failed status or rejected by gas estimation
    #[error("Transaction {tx_hash} reverted: {reason}")]
    TransactionReverted { tx_hash: String, reason: String },

    /// JSON-RPC endpoint unreachable or answered with an error
    #[error("RPC unavailable ({method}): {reason}")]
    RpcUnavailable { method: String, reason: String },

    /// Receipt for the send transaction could not be fetched
    #[error("Transaction receipt unavailable for {0}")]
    ReceiptUnavailable(String),
}

impl RelayError {
    /// Returns the `RelayError` carried by an `anyhow::Error`, if any.
    pub fn find(err: &anyhow::Error) -> Option<&RelayError> {
        err.chain().find_map(|cause| cause.downcast_ref::<RelayError>())
    }
}
