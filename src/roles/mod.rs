//! Role Engines
//!
//! The three off-chain roles. Each engine is an [`EventSink`]: ingested logs
//! are handed to a spawned handler task, and handler failures are logged
//! with network and transaction context without stopping ingestion.
//!
//! Each dispatched log holds its block in the engine's
//! [`PendingBlocks`](crate::ingest::PendingBlocks)
//! until its handler finishes, and pooled entries hold theirs until they
//! complete. A transient failure pins the block so the next restart
//! backfills it again.

pub mod committer;
pub mod executor;
pub mod tasks;
pub mod verifier;

use anyhow::Result;
use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::abi::to_hex;
use crate::chain::MessagingChain;
use crate::codec::{self, Packet};
use crate::error::RelayError;
use crate::evm_client::EvmLog;
use crate::ingest::events::{
    find_log, format_amount, is_positive, DvnFeePaidEvent, ExecutorFeePaidEvent, PacketSentEvent,
    DVN_FEE_PAID, EXECUTOR_FEE_PAID,
};
use crate::ingest::{BlockHold, EventKind, EventSink};
use crate::pool::PendingEntry;

pub use committer::CommitterEngine;
pub use executor::ExecutorEngine;
pub use tasks::HandlerTasks;
pub use verifier::VerifierEngine;

// ============================================================================
// ROLE SELECTION
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Verifier,
    Committer,
    Executor,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Verifier => "verifier",
            Role::Committer => "committer",
            Role::Executor => "executor",
        }
    }

    /// Events the role subscribes to on every network.
    pub fn event_kinds(&self) -> &'static [EventKind] {
        match self {
            Role::Verifier => &[EventKind::PacketSent],
            Role::Committer => &[EventKind::PacketSent, EventKind::PayloadVerified],
            Role::Executor => &[EventKind::PacketSent, EventKind::PacketVerified],
        }
    }
}

impl FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "verifier" | "dvn" => Ok(Role::Verifier),
            "committer" => Ok(Role::Committer),
            "executor" => Ok(Role::Executor),
            other => anyhow::bail!(
                "Unknown role '{}' (expected verifier, committer or executor)",
                other
            ),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A running role: consumes events and may own background tasks.
#[async_trait]
pub trait RoleEngine: EventSink {
    fn role(&self) -> Role;

    /// Handler and background tasks of this engine.
    fn tasks(&self) -> &HandlerTasks;

    /// Starts background work such as the verifier sweep.
    fn spawn_background(&self) -> Vec<JoinHandle<()>> {
        Vec::new()
    }

    /// Stops background loops and waits up to `grace` for running tasks.
    ///
    /// # Returns
    ///
    /// * `true` - Nothing was left running
    /// * `false` - Tasks were still running at the deadline
    async fn shutdown(&self, grace: Duration) -> bool {
        self.tasks().close();
        let running = self.tasks().running();
        if running > 0 {
            info!("{} waiting for {} running tasks", self.role(), running);
        }
        self.tasks().wait_idle(grace).await
    }
}

// ============================================================================
// SHARED HANDLING
// ============================================================================

/// Failures a later attempt can succeed on: node or receipt unavailability.
pub(crate) fn is_transient(err: &anyhow::Error) -> bool {
    matches!(
        RelayError::find(err),
        Some(RelayError::RpcUnavailable { .. }) | Some(RelayError::ReceiptUnavailable(_))
    )
}

/// Pins `hold` if `err` is transient, otherwise releases it.
pub(crate) fn release_or_pin(hold: BlockHold, err: &anyhow::Error) {
    if is_transient(err) {
        warn!(
            "[{}] {} block {} kept for the next restart",
            hold.network(),
            hold.kind(),
            hold.block()
        );
        hold.pin();
    }
}

/// Pins the blocks `entry` holds if `err` is transient.
pub(crate) fn release_or_pin_entry(entry: PendingEntry, err: &anyhow::Error) {
    if is_transient(err) {
        warn!(
            "[{}] Packet {} kept for the next restart",
            entry.event.network,
            to_hex(&entry.guid())
        );
        entry.pin_holds();
    }
}

/// Logs a failed handler at a level matching its error kind.
pub(crate) fn log_handler_failure(
    role: Role,
    network: &str,
    kind: EventKind,
    log: &EvmLog,
    err: &anyhow::Error,
) {
    match RelayError::find(err) {
        Some(RelayError::MalformedPacket(_))
        | Some(RelayError::UnsupportedDestination(_))
        | Some(RelayError::MissingExecutorOptions)
        | Some(RelayError::ReceiptUnavailable(_)) => warn!(
            "[{}] {} {} dropped (tx {}): {:#}",
            network,
            role,
            kind,
            log.tx_hash(),
            err
        ),
        _ => error!(
            "[{}] {} {} handler failed (tx {}): {:#}",
            network,
            role,
            kind,
            log.tx_hash(),
            err
        ),
    }
}

/// Decodes the packet carried by a `PacketSent` event.
pub(crate) fn decode_packet(event: &PacketSentEvent) -> Result<Packet> {
    Ok(codec::decode(&event.encoded_packet)?)
}

/// True if the transaction that emitted `event` paid the executor.
///
/// Requires a positive `ExecutorFeePaid` in the same receipt, paid to the
/// source network's configured executor when one is set.
pub(crate) async fn executor_fee_paid(
    source: &dyn MessagingChain,
    event: &PacketSentEvent,
) -> Result<bool> {
    let receipt = source.transaction_receipt(&event.tx_hash).await?;
    let fee_log = match find_log(&receipt, EXECUTOR_FEE_PAID) {
        Some(log) => log,
        None => {
            info!(
                "[{}] No ExecutorFeePaid in tx {}, skipping",
                source.name(),
                event.tx_hash
            );
            return Ok(false);
        }
    };

    let fee = ExecutorFeePaidEvent::from_log(fee_log)?;
    if let Some(expected) = source.executor_address() {
        if fee.executor != expected {
            info!(
                "[{}] Executor fee in tx {} paid to {}, not us",
                source.name(),
                event.tx_hash,
                to_hex(&fee.executor)
            );
            return Ok(false);
        }
    }
    if !is_positive(&fee.fee) {
        info!("[{}] Zero executor fee in tx {}", source.name(), event.tx_hash);
        return Ok(false);
    }

    info!(
        "[{}] Executor fee {} paid in tx {}",
        source.name(),
        format_amount(&fee.fee),
        event.tx_hash
    );
    Ok(true)
}

/// True if the transaction that emitted `event` paid this node's DVN.
pub(crate) async fn dvn_fee_paid(
    source: &dyn MessagingChain,
    event: &PacketSentEvent,
) -> Result<bool> {
    let receipt = source.transaction_receipt(&event.tx_hash).await?;
    let fee_log = match find_log(&receipt, DVN_FEE_PAID) {
        Some(log) => log,
        None => {
            info!(
                "[{}] No DVNFeePaid in tx {}, skipping",
                source.name(),
                event.tx_hash
            );
            return Ok(false);
        }
    };

    let paid = DvnFeePaidEvent::from_log(fee_log)?;
    let dvn = source.dvn_address();
    match paid.fee_for(dvn.as_ref()) {
        Some(fee) if is_positive(&fee) => {
            info!(
                "[{}] DVN fee {} paid in tx {}",
                source.name(),
                format_amount(&fee),
                event.tx_hash
            );
            Ok(true)
        }
        _ => {
            info!(
                "[{}] No DVN fee for us in tx {}",
                source.name(),
                event.tx_hash
            );
            Ok(false)
        }
    }
}
