//! Idempotent Packet Pool
//!
//! Pending packets keyed by destination eid and GUID. Each destination has
//! its own bucket behind an async mutex, so a completion check and the
//! removal that follows it run in one critical section.
//!
//! Removing an entry is what marks it complete: completed GUIDs are
//! remembered (bounded), and a later fee event for the same GUID is refused.
//! Proofs that arrive before their packet's fee event are kept as orphans
//! and absorbed when the packet is inserted.

mod entry;

pub use entry::{Attestation, PendingEntry};

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use crate::abi::{to_hex, Bytes32};
use crate::ingest::BlockHold;

/// Completed GUIDs remembered per bucket.
pub const COMPLETED_CAPACITY: usize = 10_000;

/// Orphan attestations buffered per bucket.
pub const ORPHAN_CAPACITY: usize = 1_024;

// ============================================================================
// OUTCOMES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// New entry; `absorbed` orphan attestations were attached
    Inserted { absorbed: usize },
    /// An entry with this GUID existed and was reset
    Replaced { absorbed: usize },
    /// GUID already completed by this process; nothing inserted
    AlreadyCompleted,
}

impl InsertOutcome {
    pub fn absorbed(&self) -> usize {
        match self {
            InsertOutcome::Inserted { absorbed } | InsertOutcome::Replaced { absorbed } => {
                *absorbed
            }
            InsertOutcome::AlreadyCompleted => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProofOutcome {
    /// Attached to the entry with this GUID; `count` attestations now held
    Appended { guid: Bytes32, count: usize },
    /// This verifier already attested the entry
    Duplicate { guid: Bytes32 },
    /// No pooled entry has this header; buffered
    Orphaned,
}

// ============================================================================
// BUCKET
// ============================================================================

#[derive(Debug, Default)]
struct Bucket {
    entries: HashMap<Bytes32, PendingEntry>,
    orphans: VecDeque<(Bytes32, Attestation, Option<BlockHold>)>,
    completed: HashSet<Bytes32>,
    completed_order: VecDeque<Bytes32>,
}

impl Bucket {
    fn mark_completed(&mut self, guid: Bytes32) {
        if self.completed.insert(guid) {
            self.completed_order.push_back(guid);
            while self.completed_order.len() > COMPLETED_CAPACITY {
                if let Some(oldest) = self.completed_order.pop_front() {
                    self.completed.remove(&oldest);
                }
            }
        }
    }

    fn absorb_orphans(&mut self, entry: &mut PendingEntry) -> usize {
        let header_hash = entry.header_hash();
        let mut absorbed = 0;
        for (orphan_header, attestation, hold) in std::mem::take(&mut self.orphans) {
            if orphan_header != header_hash {
                self.orphans.push_back((orphan_header, attestation, hold));
            } else if entry.add_attestation(attestation, hold) {
                absorbed += 1;
            }
        }
        absorbed
    }
}

/// Exclusive access to one destination bucket.
pub struct BucketGuard {
    dst_eid: u32,
    bucket: OwnedMutexGuard<Bucket>,
}

impl BucketGuard {
    pub fn dst_eid(&self) -> u32 {
        self.dst_eid
    }

    /// Inserts a fee-confirmed entry with a fresh accumulator.
    ///
    /// Re-inserting a pooled GUID replaces the entry and discards the
    /// attestations it had collected; only buffered orphans are re-absorbed.
    pub fn insert(&mut self, mut entry: PendingEntry) -> InsertOutcome {
        let guid = entry.guid();
        if self.bucket.completed.contains(&guid) {
            return InsertOutcome::AlreadyCompleted;
        }

        entry.clear_attestations();
        let absorbed = self.bucket.absorb_orphans(&mut entry);
        match self.bucket.entries.insert(guid, entry) {
            Some(previous) => {
                if previous.attestation_count() > 0 {
                    debug!(
                        "Re-inserted {} for eid {}, discarded {} attestations",
                        to_hex(&guid),
                        self.dst_eid,
                        previous.attestation_count()
                    );
                }
                InsertOutcome::Replaced { absorbed }
            }
            None => InsertOutcome::Inserted { absorbed },
        }
    }

    /// Puts back an entry taken for processing that is not complete yet.
    ///
    /// Unlike [`insert`](Self::insert) this keeps the entry's attestations
    /// and lifts the completion mark set by the removal.
    pub fn requeue(&mut self, entry: PendingEntry) {
        let guid = entry.guid();
        if self.bucket.completed.remove(&guid) {
            self.bucket.completed_order.retain(|g| *g != guid);
        }
        self.bucket.entries.insert(guid, entry);
    }

    /// Attaches an attestation to the entry whose header hashes to `header_hash`.
    pub fn append_proof(&mut self, header_hash: &Bytes32, attestation: Attestation) -> ProofOutcome {
        self.append_held_proof(header_hash, attestation, None)
    }

    /// Like [`append_proof`](Self::append_proof), keeping `hold` alive with
    /// the attestation, pooled or orphaned.
    pub fn append_held_proof(
        &mut self,
        header_hash: &Bytes32,
        attestation: Attestation,
        hold: Option<BlockHold>,
    ) -> ProofOutcome {
        let matching = self
            .bucket
            .entries
            .values_mut()
            .find(|entry| entry.header_hash() == *header_hash);

        match matching {
            Some(entry) => {
                let guid = entry.guid();
                if entry.add_attestation(attestation, hold) {
                    ProofOutcome::Appended {
                        guid,
                        count: entry.attestation_count(),
                    }
                } else {
                    ProofOutcome::Duplicate { guid }
                }
            }
            None => {
                let duplicate = self
                    .bucket
                    .orphans
                    .iter()
                    .any(|(h, a, _)| h == header_hash && a.verifier == attestation.verifier);
                if !duplicate {
                    self.bucket
                        .orphans
                        .push_back((*header_hash, attestation, hold));
                    while self.bucket.orphans.len() > ORPHAN_CAPACITY {
                        self.bucket.orphans.pop_front();
                    }
                }
                ProofOutcome::Orphaned
            }
        }
    }

    pub fn get(&self, guid: &Bytes32) -> Option<&PendingEntry> {
        self.bucket.entries.get(guid)
    }

    pub fn contains(&self, guid: &Bytes32) -> bool {
        self.bucket.entries.contains_key(guid)
    }

    /// Entries ordered by (source eid, nonce).
    pub fn entries(&self) -> Vec<&PendingEntry> {
        let mut entries: Vec<&PendingEntry> = self.bucket.entries.values().collect();
        entries.sort_by_key(|e| (e.packet.src_eid, e.packet.nonce, e.guid()));
        entries
    }

    /// Removes an entry, marking its GUID completed.
    pub fn take(&mut self, guid: &Bytes32) -> Option<PendingEntry> {
        let entry = self.bucket.entries.remove(guid)?;
        self.bucket.mark_completed(*guid);
        Some(entry)
    }

    /// Removes every entry, marking each completed.
    pub fn drain(&mut self) -> Vec<PendingEntry> {
        let mut entries: Vec<PendingEntry> = self.bucket.entries.drain().map(|(_, e)| e).collect();
        entries.sort_by_key(|e| (e.packet.src_eid, e.packet.nonce, e.guid()));
        for entry in &entries {
            self.bucket.mark_completed(entry.guid());
        }
        entries
    }

    pub fn is_completed(&self, guid: &Bytes32) -> bool {
        self.bucket.completed.contains(guid)
    }

    pub fn orphan_count(&self) -> usize {
        self.bucket.orphans.len()
    }

    pub fn len(&self) -> usize {
        self.bucket.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bucket.entries.is_empty()
    }
}

// ============================================================================
// POOL
// ============================================================================

/// Pending packets of one role.
#[derive(Debug, Default, Clone)]
pub struct PacketPool {
    buckets: Arc<StdMutex<HashMap<u32, Arc<Mutex<Bucket>>>>>,
}

impl PacketPool {
    pub fn new() -> Self {
        Self::default()
    }

    fn bucket(&self, dst_eid: u32) -> Arc<Mutex<Bucket>> {
        let mut buckets = match self.buckets.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        buckets.entry(dst_eid).or_default().clone()
    }

    fn bucket_eids(&self) -> Vec<u32> {
        let buckets = match self.buckets.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut eids: Vec<u32> = buckets.keys().copied().collect();
        eids.sort_unstable();
        eids
    }

    /// Locks the bucket of `dst_eid`, creating it if needed.
    pub async fn lock(&self, dst_eid: u32) -> BucketGuard {
        BucketGuard {
            dst_eid,
            bucket: self.bucket(dst_eid).lock_owned().await,
        }
    }

    /// Inserts under the entry's destination eid.
    pub async fn insert(&self, entry: PendingEntry) -> InsertOutcome {
        self.lock(entry.dst_eid()).await.insert(entry)
    }

    pub async fn append_proof(
        &self,
        dst_eid: u32,
        header_hash: &Bytes32,
        attestation: Attestation,
    ) -> ProofOutcome {
        self.lock(dst_eid).await.append_proof(header_hash, attestation)
    }

    pub async fn take(&self, dst_eid: u32, guid: &Bytes32) -> Option<PendingEntry> {
        self.lock(dst_eid).await.take(guid)
    }

    pub async fn requeue(&self, entry: PendingEntry) {
        self.lock(entry.dst_eid()).await.requeue(entry)
    }

    /// Removes every entry from every bucket, one bucket at a time.
    pub async fn drain_all(&self) -> Vec<PendingEntry> {
        let mut drained = Vec::new();
        for eid in self.bucket_eids() {
            drained.extend(self.lock(eid).await.drain());
        }
        drained
    }

    pub async fn contains(&self, dst_eid: u32, guid: &Bytes32) -> bool {
        self.lock(dst_eid).await.contains(guid)
    }

    /// Total pending entries across buckets.
    pub async fn len(&self) -> usize {
        let mut total = 0;
        for eid in self.bucket_eids() {
            total += self.lock(eid).await.len();
        }
        total
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
