//! Pending block ledger
//!
//! Blocks whose events are still being handled or are held in a pool. An
//! ingestor never checkpoints past the lowest held block of its (network,
//! event kind), so a restart re-ingests every event that had not finished.
//!
//! A [`BlockHold`] releases its block when dropped. A pinned hold is never
//! released and keeps the checkpoint at its block for the rest of the
//! process, which is how a transient failure is left for the next restart.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex};

use super::EventKind;

type Key = (String, EventKind);

#[derive(Debug, Default)]
struct Ledger {
    blocks: HashMap<Key, BTreeMap<u64, usize>>,
}

impl Ledger {
    fn acquire(&mut self, key: &Key, block: u64) {
        *self
            .blocks
            .entry(key.clone())
            .or_default()
            .entry(block)
            .or_insert(0) += 1;
    }

    fn release(&mut self, key: &Key, block: u64) {
        let Some(held) = self.blocks.get_mut(key) else {
            return;
        };
        if let Some(count) = held.get_mut(&block) {
            *count -= 1;
            if *count == 0 {
                held.remove(&block);
            }
        }
        if held.is_empty() {
            self.blocks.remove(key);
        }
    }
}

/// Shared ledger of held blocks per (network, event kind).
#[derive(Debug, Default, Clone)]
pub struct PendingBlocks {
    ledger: Arc<Mutex<Ledger>>,
}

impl PendingBlocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_ledger<T>(&self, f: impl FnOnce(&mut Ledger) -> T) -> T {
        let mut ledger = match self.ledger.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut ledger)
    }

    /// Holds `block` until the returned guard is dropped.
    pub fn hold(&self, network: &str, kind: EventKind, block: u64) -> BlockHold {
        let key = (network.to_string(), kind);
        self.with_ledger(|ledger| ledger.acquire(&key, block));
        BlockHold {
            blocks: self.clone(),
            key,
            block,
            pinned: false,
        }
    }

    /// Lowest held block of (`network`, `kind`).
    pub fn floor(&self, network: &str, kind: EventKind) -> Option<u64> {
        let key = (network.to_string(), kind);
        self.with_ledger(|ledger| {
            ledger
                .blocks
                .get(&key)
                .and_then(|held| held.keys().next().copied())
        })
    }
}

/// One held block. Cloning holds the block again.
pub struct BlockHold {
    blocks: PendingBlocks,
    key: Key,
    block: u64,
    pinned: bool,
}

impl BlockHold {
    pub fn network(&self) -> &str {
        &self.key.0
    }

    pub fn kind(&self) -> EventKind {
        self.key.1
    }

    pub fn block(&self) -> u64 {
        self.block
    }

    /// Keeps the block held for the rest of the process.
    pub fn pin(mut self) {
        self.pinned = true;
    }
}

impl Clone for BlockHold {
    fn clone(&self) -> Self {
        self.blocks.hold(&self.key.0, self.key.1, self.block)
    }
}

impl PartialEq for BlockHold {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.block == other.block
    }
}

impl Eq for BlockHold {}

impl fmt::Debug for BlockHold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockHold({}/{}@{})", self.key.0, self.key.1, self.block)
    }
}

impl Drop for BlockHold {
    fn drop(&mut self) {
        if self.pinned {
            return;
        }
        let (key, block) = (&self.key, self.block);
        self.blocks.with_ledger(|ledger| ledger.release(key, block));
    }
}
