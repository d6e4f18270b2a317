//! Pending pool entries.

use crate::abi::{Address, Bytes32};
use crate::codec::Packet;
use crate::ingest::events::PacketSentEvent;
use crate::ingest::BlockHold;

/// A verifier's proof for a packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Attestation {
    pub verifier: Address,
    pub proof_hash: Bytes32,
}

/// A fee-confirmed packet waiting for its role's completion condition.
///
/// The entry may hold the block of its `PacketSent` and of each
/// attestation, keeping those checkpoints back while it is unfinished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry {
    pub event: PacketSentEvent,
    pub packet: Packet,
    attestations: Vec<Attestation>,
    hold: Option<BlockHold>,
    proof_holds: Vec<BlockHold>,
}

impl PendingEntry {
    pub fn new(event: PacketSentEvent, packet: Packet) -> Self {
        Self {
            event,
            packet,
            attestations: Vec::new(),
            hold: None,
            proof_holds: Vec::new(),
        }
    }

    /// Holds the `PacketSent` block for as long as the entry lives.
    pub fn with_hold(mut self, hold: BlockHold) -> Self {
        self.hold = Some(hold);
        self
    }

    pub fn hold(&self) -> Option<&BlockHold> {
        self.hold.as_ref()
    }

    /// Keeps every block this entry holds pinned for the rest of the process.
    pub fn pin_holds(self) {
        if let Some(hold) = self.hold {
            hold.pin();
        }
        for hold in self.proof_holds {
            hold.pin();
        }
    }

    pub fn guid(&self) -> Bytes32 {
        self.packet.guid
    }

    pub fn dst_eid(&self) -> u32 {
        self.packet.dst_eid
    }

    /// Header hash, recomputed from the packet on every call.
    pub fn header_hash(&self) -> Bytes32 {
        self.packet.header_hash()
    }

    /// Payload hash, recomputed from the packet on every call.
    pub fn payload_hash(&self) -> Bytes32 {
        self.packet.payload_hash()
    }

    pub fn attestations(&self) -> &[Attestation] {
        &self.attestations
    }

    pub fn attestation_count(&self) -> usize {
        self.attestations.len()
    }

    /// Adds an attestation unless this verifier already attested.
    ///
    /// # Returns
    ///
    /// * `true` - Attestation recorded
    /// * `false` - Duplicate verifier, ignored
    pub(crate) fn add_attestation(
        &mut self,
        attestation: Attestation,
        hold: Option<BlockHold>,
    ) -> bool {
        if self
            .attestations
            .iter()
            .any(|a| a.verifier == attestation.verifier)
        {
            return false;
        }
        self.attestations.push(attestation);
        self.proof_holds.extend(hold);
        true
    }

    pub(crate) fn clear_attestations(&mut self) {
        self.attestations.clear();
        self.proof_holds.clear();
    }
}
