//! Committer engine
//!
//! Pools fee-paid packets, collects `PayloadVerified` attestations for them
//! and commits the verification on the destination once the receiver's
//! quorum is met and the receive library agrees the packet is verifiable.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

use crate::abi::{to_hex, Bytes32};
use crate::chain::{contracts, GasLimit, MessagingChain, NetworkRegistry};
use crate::evm_client::EvmLog;
use crate::ingest::events::{PacketSentEvent, PayloadVerifiedEvent};
use crate::ingest::{EventKind, EventSink, PendingBlocks};
use crate::pool::{Attestation, BucketGuard, InsertOutcome, PacketPool, PendingEntry, ProofOutcome};

use super::{
    decode_packet, executor_fee_paid, log_handler_failure, release_or_pin, release_or_pin_entry,
    HandlerTasks, Role, RoleEngine,
};

#[derive(Clone)]
pub struct CommitterEngine {
    registry: Arc<NetworkRegistry>,
    pool: PacketPool,
    blocks: PendingBlocks,
    tasks: HandlerTasks,
}

impl CommitterEngine {
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
            EventKind::PayloadVerified => self.handle_payload_verified(network, log).await,
            EventKind::PacketVerified => Ok(()),
        }
    }

    /// Pools a packet whose send paid the executor fee.
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
        let mut bucket = self.pool.lock(packet.dst_eid).await;
        let entry = PendingEntry::new(event, packet)
            .with_hold(self.blocks.hold(network, EventKind::PacketSent, log.block()));
        let outcome = bucket.insert(entry);
        match outcome {
            InsertOutcome::AlreadyCompleted => {
                info!(
                    "[{}] Packet {} already committed, ignoring",
                    network,
                    to_hex(&guid)
                );
                return Ok(());
            }
            InsertOutcome::Inserted { absorbed } | InsertOutcome::Replaced { absorbed } => {
                info!(
                    "[{}] Packet received of guid: {} ({} buffered proofs)",
                    network,
                    to_hex(&guid),
                    absorbed
                );
            }
        }

        if outcome.absorbed() == 0 {
            return Ok(());
        }
        let ready = self
            .take_if_committable(destination.as_ref(), &mut bucket, &guid)
            .await?;
        drop(bucket);

        if let Some(entry) = ready {
            self.commit(destination.as_ref(), entry).await?;
        }
        Ok(())
    }

    /// Records an attestation and commits if the quorum is now met.
    pub async fn handle_payload_verified(&self, network: &str, log: &EvmLog) -> Result<()> {
        let destination = self
            .registry
            .by_name(network)
            .with_context(|| format!("Unknown network {}", network))?;
        let event = PayloadVerifiedEvent::from_log(log)?;
        let header_hash = event.header_hash();
        let attestation = Attestation {
            verifier: event.dvn,
            proof_hash: event.proof_hash,
        };

        let hold = self
            .blocks
            .hold(network, EventKind::PayloadVerified, log.block());
        let mut bucket = self.pool.lock(destination.eid()).await;
        let guid = match bucket.append_held_proof(&header_hash, attestation, Some(hold)) {
            ProofOutcome::Appended { guid, count } => {
                info!(
                    "[{}] Proof from {} appended to {} ({} total)",
                    network,
                    to_hex(&event.dvn),
                    to_hex(&guid),
                    count
                );
                guid
            }
            ProofOutcome::Duplicate { guid } => {
                debug!(
                    "[{}] Duplicate proof from {} for {}",
                    network,
                    to_hex(&event.dvn),
                    to_hex(&guid)
                );
                guid
            }
            ProofOutcome::Orphaned => {
                debug!(
                    "[{}] Proof for unknown header {} buffered",
                    network,
                    to_hex(&header_hash)
                );
                return Ok(());
            }
        };

        let ready = self
            .take_if_committable(destination.as_ref(), &mut bucket, &guid)
            .await?;
        drop(bucket);

        if let Some(entry) = ready {
            self.commit(destination.as_ref(), entry).await?;
        }
        Ok(())
    }

    /// Completion check under the bucket lock.
    ///
    /// Removes and returns the entry when its attestations reach
    /// `requiredDVNCount + optionalDVNThreshold` and `verifiable` holds.
    async fn take_if_committable(
        &self,
        destination: &dyn MessagingChain,
        bucket: &mut BucketGuard,
        guid: &Bytes32,
    ) -> Result<Option<PendingEntry>> {
        let (receiver, src_eid, count, header_hash, payload_hash) = match bucket.get(guid) {
            Some(entry) => (
                entry.packet.receiver_address(),
                entry.packet.src_eid,
                entry.attestation_count(),
                entry.header_hash(),
                entry.payload_hash(),
            ),
            None => return Ok(None),
        };

        let config = destination.uln_config(&receiver, src_eid).await?;
        if count < config.quorum() {
            debug!(
                "[{}] {} has {}/{} proofs",
                destination.name(),
                to_hex(guid),
                count,
                config.quorum()
            );
            return Ok(None);
        }

        if !destination
            .verifiable(&config, &header_hash, &payload_hash)
            .await?
        {
            info!(
                "[{}] Quorum count met for {} but not verifiable yet",
                destination.name(),
                to_hex(guid)
            );
            return Ok(None);
        }

        info!("[{}] Quorum met for {}", destination.name(), to_hex(guid));
        Ok(bucket.take(guid))
    }

    /// Commits a taken entry, pinning its blocks if the submission failed transiently.
    async fn commit(&self, destination: &dyn MessagingChain, entry: PendingEntry) -> Result<()> {
        let result = self.submit_commit(destination, &entry).await;
        if let Err(e) = &result {
            release_or_pin_entry(entry, e);
        }
        result
    }

    async fn submit_commit(
        &self,
        destination: &dyn MessagingChain,
        entry: &PendingEntry,
    ) -> Result<()> {
        let calldata =
            contracts::commit_verification_call(&entry.packet.header(), &entry.payload_hash());
        let tx_hash = destination
            .submit(
                destination.receive_uln_address(),
                calldata,
                GasLimit::Estimate,
                0,
            )
            .await
            .with_context(|| format!("commitVerification for {}", to_hex(&entry.guid())))?;
        info!(
            "[{}] Committed {} in tx {}",
            destination.name(),
            to_hex(&entry.guid()),
            tx_hash
        );
        Ok(())
    }
}

#[async_trait]
impl EventSink for CommitterEngine {
    async fn dispatch(&self, network: &str, kind: EventKind, log: EvmLog) {
        let hold = self.blocks.hold(network, kind, log.block());
        let engine = self.clone();
        let network = network.to_string();
        self.tasks.spawn(async move {
            if let Err(e) = engine.handle(&network, kind, &log).await {
                log_handler_failure(Role::Committer, &network, kind, &log, &e);
                release_or_pin(hold, &e);
            }
        });
    }

    async fn pending_floor(&self, network: &str, kind: EventKind) -> Option<u64> {
        self.blocks.floor(network, kind)
    }
}

impl RoleEngine for CommitterEngine {
    fn role(&self) -> Role {
        Role::Committer
    }

    fn tasks(&self) -> &HandlerTasks {
        &self.tasks
    }
}
