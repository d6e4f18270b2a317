//! Executor engine
//!
//! Pools fee-paid packets and delivers them with `lzReceive` once the
//! destination endpoint reports them executable.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::abi::{to_hex, Bytes32};
use crate::chain::{contracts, GasLimit, MessagingChain, NetworkRegistry};
use crate::codec::{decode_executor_options, Packet};
use crate::evm_client::EvmLog;
use crate::ingest::events::{PacketSentEvent, PacketVerifiedEvent};
use crate::ingest::{EventKind, EventSink, PendingBlocks};
use crate::pool::{BucketGuard, InsertOutcome, PacketPool, PendingEntry};

use super::{
    decode_packet, executor_fee_paid, log_handler_failure, release_or_pin, release_or_pin_entry,
    HandlerTasks, Role, RoleEngine,
};

/// Inbound payload hash of a nonce that was never verified, or already executed.
pub const EMPTY_PAYLOAD_HASH: Bytes32 = [0u8; 32];

/// Inbound payload hash of a nonce that was skipped or nilified.
pub const NIL_PAYLOAD_HASH: Bytes32 = [0xffu8; 32];

/// True if `payload_hash` records a verified payload.
pub fn is_verified_hash(payload_hash: &Bytes32) -> bool {
    *payload_hash != EMPTY_PAYLOAD_HASH && *payload_hash != NIL_PAYLOAD_HASH
}

#[derive(Clone)]
pub struct ExecutorEngine {
    registry: Arc<NetworkRegistry>,
    pool: PacketPool,
    blocks: PendingBlocks,
    tasks: HandlerTasks,
}

impl ExecutorEngine {
    pub fn new(registry: Arc<NetworkRegistry>) -> Self {
        Self {
            registry,
            pool: PacketPool::new(),
            blocks: PendingBlocks::new(),
            tasks: HandlerTasks::new(),
        }
    }

    pub fn pool(&self) -> &PacketPool {
        &self.pool
    }

    pub fn pending_blocks(&self) -> &PendingBlocks {
        &self.blocks
    }

    async fn handle(&self, network: &str, kind: EventKind, log: &EvmLog) -> Result<()> {
        match kind {
            EventKind::PacketSent => self.handle_packet_sent(network, log).await,
            EventKind::PacketVerified => self.handle_packet_verified(network, log).await,
            EventKind::PayloadVerified => Ok(()),
        }
    }

    /// Pools a packet whose send paid the executor fee.
    ///
    /// A packet whose payload is already verified on the destination is
    /// evaluated right away: its `PacketVerified` may predate the pooling,
    /// as after a restart that resumed from a checkpoint.
    pub async fn handle_packet_sent(&self, network: &str, log: &EvmLog) -> Result<()> {
        let source = self
            .registry
            .by_name(network)
            .with_context(|| format!("Unknown network {}", network))?;
        let event = PacketSentEvent::from_log(network, log)?;
        let packet = decode_packet(&event)?;
        let destination = self.registry.destination(packet.dst_eid)?;

        if !executor_fee_paid(source.as_ref(), &event).await? {
            return Ok(());
        }

        let guid = packet.guid;
        let entry = PendingEntry::new(event, packet)
            .with_hold(self.blocks.hold(network, EventKind::PacketSent, log.block()));
        let mut bucket = self.pool.lock(entry.dst_eid()).await;
        match bucket.insert(entry) {
            InsertOutcome::AlreadyCompleted => {
                info!(
                    "[{}] Packet {} already executed, ignoring",
                    network,
                    to_hex(&guid)
                );
                return Ok(());
            }
            _ => info!("[{}] Packet received of guid: {}", network, to_hex(&guid)),
        }

        let ready = take_executable(destination.as_ref(), &mut bucket, &[guid], None).await;
        drop(bucket);

        self.execute_all(destination.as_ref(), ready, EventKind::PacketSent, log)
            .await;
        Ok(())
    }

    /// Delivers pooled packets on the verified route that are now executable.
    ///
    /// The verified nonce itself goes through the full predicate. Other
    /// pooled nonces of the route are only considered once their own
    /// payload is verified.
    pub async fn handle_packet_verified(&self, network: &str, log: &EvmLog) -> Result<()> {
        let destination = self
            .registry
            .by_name(network)
            .with_context(|| format!("Unknown network {}", network))?;
        let event = PacketVerifiedEvent::from_log(log)?;
        info!(
            "[{}] Packet verified: src_eid={}, sender={}, nonce={}",
            network,
            event.src_eid,
            to_hex(&event.sender),
            event.nonce
        );

        let ready = {
            let mut bucket = self.pool.lock(destination.eid()).await;
            let candidates: Vec<Bytes32> = bucket
                .entries()
                .into_iter()
                .filter(|entry| {
                    entry.packet.src_eid == event.src_eid
                        && entry.packet.sender == event.sender
                        && entry.packet.receiver_address() == event.receiver
                })
                .map(|entry| entry.guid())
                .collect();
            let ready =
                take_executable(destination.as_ref(), &mut bucket, &candidates, Some(event.nonce))
                    .await;
            ready
        };

        self.execute_all(destination.as_ref(), ready, EventKind::PacketVerified, log)
            .await;
        Ok(())
    }

    async fn execute_all(
        &self,
        destination: &dyn MessagingChain,
        ready: Vec<PendingEntry>,
        kind: EventKind,
        log: &EvmLog,
    ) {
        for entry in ready {
            if let Err(e) = self.execute(destination, &entry).await {
                log_handler_failure(Role::Executor, destination.name(), kind, log, &e);
                debug!(
                    "[{}] Execution of {} abandoned",
                    destination.name(),
                    to_hex(&entry.guid())
                );
                release_or_pin_entry(entry, &e);
            }
        }
    }

    async fn execute(&self, destination: &dyn MessagingChain, entry: &PendingEntry) -> Result<()> {
        let guid = to_hex(&entry.guid());
        let options = decode_executor_options(&entry.event.options)
            .with_context(|| format!("Packet {} has no executor options", guid))?;

        let gas_limit = u64::try_from(options.gas).unwrap_or(u64::MAX);
        let calldata = contracts::lz_receive_call(&entry.packet);
        let tx_hash = destination
            .submit(
                destination.endpoint_address(),
                calldata,
                GasLimit::Fixed(gas_limit),
                options.value,
            )
            .await
            .with_context(|| format!("lzReceive for {}", guid))?;

        info!(
            "[{}] Executed {} in tx {}",
            destination.name(),
            guid,
            tx_hash
        );
        Ok(())
    }
}

/// Takes the executable entries among `guids` under the bucket lock.
///
/// Only a packet whose nonce is `trigger_nonce` may pass on an unverified
/// payload hash; every other candidate needs a verified one.
async fn take_executable(
    destination: &dyn MessagingChain,
    bucket: &mut BucketGuard,
    guids: &[Bytes32],
    trigger_nonce: Option<u64>,
) -> Vec<PendingEntry> {
    let mut ready = Vec::new();
    for guid in guids {
        let packet = match bucket.get(guid) {
            Some(entry) => entry.packet.clone(),
            None => continue,
        };

        let executable = match inbound_payload_hash(destination, &packet).await {
            Ok(payload_hash)
                if trigger_nonce != Some(packet.nonce) && !is_verified_hash(&payload_hash) =>
            {
                debug!(
                    "[{}] Packet {} not verified yet",
                    destination.name(),
                    to_hex(guid)
                );
                Ok(false)
            }
            Ok(payload_hash) => evaluate(destination, &packet, payload_hash).await,
            Err(e) => Err(e),
        };

        match executable {
            Ok(true) => ready.extend(bucket.take(guid)),
            Ok(false) => {}
            Err(e) => warn!(
                "[{}] Executable check failed for {}: {:#}",
                destination.name(),
                to_hex(guid),
                e
            ),
        }
    }
    ready
}

async fn inbound_payload_hash(destination: &dyn MessagingChain, packet: &Packet) -> Result<Bytes32> {
    destination
        .inbound_payload_hash(
            &packet.receiver_address(),
            packet.src_eid,
            &packet.sender,
            packet.nonce,
        )
        .await
}

/// Executability of `packet` against the destination endpoint's inbound state.
///
/// With `ph = inboundPayloadHash(receiver, srcEid, sender, nonce)`:
/// 1. `ph` empty and nonce at or below the lazy inbound nonce: already executed.
/// 2. `ph` not nil and nonce at or below the inbound nonce: executable.
/// 3. `ph` neither empty nor nil: verified, waiting on earlier nonces.
/// 4. Otherwise executable.
pub async fn is_executable(destination: &dyn MessagingChain, packet: &Packet) -> Result<bool> {
    let payload_hash = inbound_payload_hash(destination, packet).await?;
    evaluate(destination, packet, payload_hash).await
}

async fn evaluate(
    destination: &dyn MessagingChain,
    packet: &Packet,
    payload_hash: Bytes32,
) -> Result<bool> {
    let receiver = packet.receiver_address();
    if payload_hash == EMPTY_PAYLOAD_HASH {
        let lazy_nonce = destination
            .lazy_inbound_nonce(&receiver, packet.src_eid, &packet.sender)
            .await?;
        if packet.nonce <= lazy_nonce {
            info!(
                "[{}] Packet {} has already been executed",
                destination.name(),
                to_hex(&packet.guid)
            );
            return Ok(false);
        }
    }

    if payload_hash != NIL_PAYLOAD_HASH {
        let inbound_nonce = destination
            .inbound_nonce(&receiver, packet.src_eid, &packet.sender)
            .await?;
        if packet.nonce <= inbound_nonce {
            info!(
                "[{}] Packet {} is executable",
                destination.name(),
                to_hex(&packet.guid)
            );
            return Ok(true);
        }
    }

    if is_verified_hash(&payload_hash) {
        info!(
            "[{}] Packet {} is verified but not executable",
            destination.name(),
            to_hex(&packet.guid)
        );
        return Ok(false);
    }

    debug!(
        "[{}] Packet {} executable by default",
        destination.name(),
        to_hex(&packet.guid)
    );
    Ok(true)
}

#[async_trait]
impl EventSink for ExecutorEngine {
    async fn dispatch(&self, network: &str, kind: EventKind, log: EvmLog) {
        let hold = self.blocks.hold(network, kind, log.block());
        let engine = self.clone();
        let network = network.to_string();
        self.tasks.spawn(async move {
            if let Err(e) = engine.handle(&network, kind, &log).await {
                log_handler_failure(Role::Executor, &network, kind, &log, &e);
                release_or_pin(hold, &e);
            }
        });
    }

    async fn pending_floor(&self, network: &str, kind: EventKind) -> Option<u64> {
        self.blocks.floor(network, kind)
    }
}

impl RoleEngine for ExecutorEngine {
    fn role(&self) -> Role {
        Role::Executor
    }

    fn tasks(&self) -> &HandlerTasks {
        &self.tasks
    }
}
