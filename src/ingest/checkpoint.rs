//! Backfill checkpoints
//!
//! Next block to fetch per (network, event kind). The in-memory store is the
//! default; the JSON file store lets a restart resume where it stopped.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::EventKind;

/// Persistence for backfill cursors. Saved values only ever grow.
pub trait CheckpointStore: Send + Sync {
    fn load(&self, network: &str, kind: EventKind) -> Result<Option<u64>>;

    fn save(&self, network: &str, kind: EventKind, next_block: u64) -> Result<()>;
}

fn key(network: &str, kind: EventKind) -> String {
    format!("{}/{}", network, kind)
}

/// Returns true if `next_block` advanced the cursor stored under `key`.
fn advance(map: &mut BTreeMap<String, u64>, key: String, next_block: u64) -> bool {
    match map.get(&key) {
        Some(existing) if *existing >= next_block => false,
        _ => {
            map.insert(key, next_block);
            true
        }
    }
}

// ============================================================================
// IN-MEMORY STORE
// ============================================================================

#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    cursors: Mutex<BTreeMap<String, u64>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn load(&self, network: &str, kind: EventKind) -> Result<Option<u64>> {
        let cursors = self
            .cursors
            .lock()
            .map_err(|_| anyhow::anyhow!("Checkpoint store lock poisoned"))?;
        Ok(cursors.get(&key(network, kind)).copied())
    }

    fn save(&self, network: &str, kind: EventKind, next_block: u64) -> Result<()> {
        let mut cursors = self
            .cursors
            .lock()
            .map_err(|_| anyhow::anyhow!("Checkpoint store lock poisoned"))?;
        advance(&mut cursors, key(network, kind), next_block);
        Ok(())
    }
}

// ============================================================================
// JSON FILE STORE
// ============================================================================

/// Checkpoints kept in a JSON object `{ "network/Kind": next_block }`.
#[derive(Debug)]
pub struct FileCheckpointStore {
    path: PathBuf,
    cursors: Mutex<BTreeMap<String, u64>>,
}

impl FileCheckpointStore {
    /// Opens the store, reading existing checkpoints if the file exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let cursors = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read checkpoint file {}", path.display()))?;
            if content.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&content).with_context(|| {
                    format!("Failed to parse checkpoint file {}", path.display())
                })?
            }
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path,
            cursors: Mutex::new(cursors),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn load(&self, network: &str, kind: EventKind) -> Result<Option<u64>> {
        let cursors = self
            .cursors
            .lock()
            .map_err(|_| anyhow::anyhow!("Checkpoint store lock poisoned"))?;
        Ok(cursors.get(&key(network, kind)).copied())
    }

    fn save(&self, network: &str, kind: EventKind, next_block: u64) -> Result<()> {
        let mut cursors = self
            .cursors
            .lock()
            .map_err(|_| anyhow::anyhow!("Checkpoint store lock poisoned"))?;
        if !advance(&mut cursors, key(network, kind), next_block) {
            return Ok(());
        }

        let content = serde_json::to_string_pretty(&*cursors)
            .context("Failed to serialize checkpoints")?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, content)
            .with_context(|| format!("Failed to write checkpoint file {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace checkpoint file {}", self.path.display()))?;
        Ok(())
    }
}
