//! Verifier (DVN) engine
//!
//! Pools packets whose send paid this DVN, and on every sweep signs and
//! submits a `verify` for each pooled packet the destination does not yet
//! consider verifiable.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::abi::to_hex;
use crate::chain::{contracts, GasLimit, MessagingChain, NetworkRegistry};
use crate::evm_client::EvmLog;
use crate::ingest::events::PacketSentEvent;
use crate::ingest::{EventKind, EventSink, PendingBlocks};
use crate::pool::{InsertOutcome, PacketPool, PendingEntry};
use crate::signer::build_execute_param;

use super::{
    decode_packet, dvn_fee_paid, log_handler_failure, release_or_pin, release_or_pin_entry,
    HandlerTasks, Role, RoleEngine,
};

/// Result of processing one pooled packet in a sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// verify was submitted; holds the transaction hash
    Submitted(String),
    /// Destination already considers the packet verifiable
    AlreadyVerifiable,
    /// Not enough source confirmations yet; returned to the pool
    AwaitingConfirmations,
}

#[derive(Clone)]
pub struct VerifierEngine {
    registry: Arc<NetworkRegistry>,
    pool: PacketPool,
    delay: Duration,
    blocks: PendingBlocks,
    tasks: HandlerTasks,
}

impl VerifierEngine {
    /// # Arguments
    ///
    /// * `registry` - Connected networks
    /// * `delay` - Interval between sweeps of the pool
    pub fn new(registry: Arc<NetworkRegistry>, delay: Duration) -> Self {
        Self {
            registry,
            pool: PacketPool::new(),
            delay,
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

    /// Pools a packet whose send paid this DVN.
    pub async fn handle_packet_sent(&self, network: &str, log: &EvmLog) -> Result<()> {
        let source = self
            .registry
            .by_name(network)
            .with_context(|| format!("Unknown network {}", network))?;
        let event = PacketSentEvent::from_log(network, log)?;
        let packet = decode_packet(&event)?;

        if !dvn_fee_paid(source.as_ref(), &event).await? {
            return Ok(());
        }

        let guid = packet.guid;
        let entry = PendingEntry::new(event, packet)
            .with_hold(self.blocks.hold(network, EventKind::PacketSent, log.block()));
        match self.pool.insert(entry).await {
            InsertOutcome::AlreadyCompleted => info!(
                "[{}] Packet {} already handled, ignoring",
                network,
                to_hex(&guid)
            ),
            _ => info!("[{}] Packet received of guid: {}", network, to_hex(&guid)),
        }
        Ok(())
    }

    /// Drains the pool and processes every entry concurrently.
    ///
    /// # Returns
    ///
    /// Per-entry outcomes in pool order.
    pub async fn sweep(&self) -> Vec<Result<VerifyOutcome>> {
        let entries = self.pool.drain_all().await;
        if entries.is_empty() {
            return Vec::new();
        }
        debug!("Verifier sweep over {} packets", entries.len());

        let tasks = entries.into_iter().map(|entry| async move {
            let guid = to_hex(&entry.guid());
            let network = entry.event.network.clone();
            let result = self.process(entry).await;
            match &result {
                Ok(VerifyOutcome::Submitted(tx_hash)) => {
                    info!("[{}] Verified {} in tx {}", network, guid, tx_hash)
                }
                Ok(VerifyOutcome::AlreadyVerifiable) => {
                    info!("[{}] Packet {} already verifiable, skipping", network, guid)
                }
                Ok(VerifyOutcome::AwaitingConfirmations) => {
                    debug!("[{}] Packet {} awaiting confirmations", network, guid)
                }
                Err(e) => warn!("[{}] Verification of {} failed: {:#}", network, guid, e),
            }
            result
        });
        join_all(tasks).await
    }

    /// Verifies one drained entry on its destination.
    ///
    /// An entry still short of confirmations goes back to the pool. A
    /// transient failure keeps the entry's block held for the next restart.
    pub async fn process(&self, entry: PendingEntry) -> Result<VerifyOutcome> {
        match self.verify(&entry).await {
            Ok(VerifyOutcome::AwaitingConfirmations) => {
                self.pool.requeue(entry).await;
                Ok(VerifyOutcome::AwaitingConfirmations)
            }
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                release_or_pin_entry(entry, &e);
                Err(e)
            }
        }
    }

    async fn verify(&self, entry: &PendingEntry) -> Result<VerifyOutcome> {
        let packet = &entry.packet;
        let destination = self.registry.destination(packet.dst_eid)?;
        let receiver = packet.receiver_address();
        let config = destination.uln_config(&receiver, packet.src_eid).await?;

        if config.confirmations > 0 {
            if let Some(source) = self.registry.by_name(&entry.event.network) {
                let head = source.block_number().await?;
                if head < entry.event.block_number.saturating_add(config.confirmations) {
                    return Ok(VerifyOutcome::AwaitingConfirmations);
                }
            }
        }

        let header_hash = entry.header_hash();
        let payload_hash = entry.payload_hash();
        if destination
            .verifiable(&config, &header_hash, &payload_hash)
            .await?
        {
            return Ok(VerifyOutcome::AlreadyVerifiable);
        }

        let tx_hash = self
            .submit_verify(destination.as_ref(), entry, config.confirmations)
            .await?;

        let verified = destination
            .verifiable(&config, &header_hash, &payload_hash)
            .await
            .unwrap_or(false);
        info!(
            "[{}] Packet {} verifiable after verify: {}",
            destination.name(),
            to_hex(&entry.guid()),
            verified
        );

        Ok(VerifyOutcome::Submitted(tx_hash))
    }

    async fn submit_verify(
        &self,
        destination: &dyn MessagingChain,
        entry: &PendingEntry,
        confirmations: u64,
    ) -> Result<String> {
        let dvn = destination
            .dvn_address()
            .with_context(|| format!("No DVN address configured for {}", destination.name()))?;
        let call_data =
            contracts::verify_call(&entry.packet.header(), &entry.payload_hash(), confirmations);
        let vid = destination.dvn_vid().await?;
        let now = destination.latest_block_timestamp().await?;
        let param = build_execute_param(
            vid,
            destination.receive_uln_address(),
            call_data,
            now,
            destination.dvn_signers(),
        )?;

        destination
            .submit(dvn, contracts::execute_call(&[param]), GasLimit::Estimate, 0)
            .await
            .with_context(|| format!("DVN execute for {}", to_hex(&entry.guid())))
    }
}

#[async_trait]
impl EventSink for VerifierEngine {
    async fn dispatch(&self, network: &str, kind: EventKind, log: EvmLog) {
        if kind != EventKind::PacketSent {
            return;
        }
        let hold = self.blocks.hold(network, kind, log.block());
        let engine = self.clone();
        let network = network.to_string();
        self.tasks.spawn(async move {
            if let Err(e) = engine.handle_packet_sent(&network, &log).await {
                log_handler_failure(Role::Verifier, &network, kind, &log, &e);
                release_or_pin(hold, &e);
            }
        });
    }

    async fn pending_floor(&self, network: &str, kind: EventKind) -> Option<u64> {
        self.blocks.floor(network, kind)
    }
}

impl RoleEngine for VerifierEngine {
    fn role(&self) -> Role {
        Role::Verifier
    }

    fn tasks(&self) -> &HandlerTasks {
        &self.tasks
    }

    /// Sweeps every `delay` until shutdown; a running sweep is finished first.
    fn spawn_background(&self) -> Vec<JoinHandle<()>> {
        let engine = self.clone();
        let handle = self.tasks.spawn(async move {
            info!("Verifier sweep every {:?}", engine.delay);
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(engine.delay) => {}
                    _ = engine.tasks.closed() => break,
                }
                engine.sweep().await;
            }
            info!("Verifier sweep stopped");
        });
        vec![handle]
    }
}
