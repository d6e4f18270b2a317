//! Event Ingestion Module
//!
//! One ingestor per (network, event kind). It first backfills every log from
//! its checkpoint (block 1 by default) up to the head observed at start, in
//! windows of `block_range` blocks, then follows new logs through a
//! persistent node filter installed at the first block not yet fetched.
//! Both phases hand logs to the same [`EventSink`], in block and log-index
//! order.
//!
//! Collaborators are traits so tests can drive the engine without a node or
//! wall-clock delays: [`EventSource`] (head, window fetch, filters),
//! [`Pacer`] (sleeps) and [`CheckpointStore`].
//!
//! A saved checkpoint never passes the sink's pending floor: the lowest
//! block whose events are still being handled or sit in a pool.

pub mod checkpoint;
pub mod events;
pub mod pending;
pub mod source;

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::evm_client::EvmLog;

pub use checkpoint::{CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
pub use events::EventKind;
pub use pending::{BlockHold, PendingBlocks};
pub use source::TokioPacer;

/// First block scanned when no checkpoint exists.
pub const GENESIS_CURSOR: u64 = 1;

// ============================================================================
// COLLABORATORS
// ============================================================================

/// Read access to one network's logs.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Network name used for logging and checkpoints
    fn network(&self) -> &str;

    async fn head(&self) -> Result<u64>;

    /// Logs of `kind` in the inclusive block range.
    async fn fetch(&self, kind: EventKind, from_block: u64, to_block: u64) -> Result<Vec<EvmLog>>;

    /// Installs a persistent filter for `kind` starting at `from_block`.
    async fn install_filter(&self, kind: EventKind, from_block: u64) -> Result<String>;

    /// Logs the filter collected since the last poll.
    async fn poll_filter(&self, filter_id: &str) -> Result<Vec<EvmLog>>;
}

/// Sleep between backfill windows and live polls.
#[async_trait]
pub trait Pacer: Send + Sync {
    async fn pause(&self, duration: Duration);
}

/// Receives every ingested log. Implementations must not block for long;
/// role engines spawn a task per log.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn dispatch(&self, network: &str, kind: EventKind, log: EvmLog);

    /// Lowest block of (`network`, `kind`) whose events are not finished.
    async fn pending_floor(&self, _network: &str, _kind: EventKind) -> Option<u64> {
        None
    }
}

/// Timing and window settings shared by all ingestors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestSettings {
    /// Blocks per backfill window
    pub block_range: u64,
    /// Pause between backfill windows
    pub interval: Duration,
    /// Pause between live filter polls and before a restart
    pub poll_interval: Duration,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            block_range: 1000,
            interval: Duration::from_millis(1000),
            poll_interval: Duration::from_millis(2000),
        }
    }
}

/// State of a live subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveCursor {
    pub filter_id: String,
    /// Block after the last dispatched log
    pub next_block: u64,
}

// ============================================================================
// INGESTOR
// ============================================================================

/// Backfill and live follow for one (network, event kind).
#[derive(Clone)]
pub struct EventIngestor {
    source: Arc<dyn EventSource>,
    kind: EventKind,
    sink: Arc<dyn EventSink>,
    pacer: Arc<dyn Pacer>,
    checkpoints: Arc<dyn CheckpointStore>,
    settings: IngestSettings,
}

impl EventIngestor {
    pub fn new(
        source: Arc<dyn EventSource>,
        kind: EventKind,
        sink: Arc<dyn EventSink>,
        pacer: Arc<dyn Pacer>,
        checkpoints: Arc<dyn CheckpointStore>,
        settings: IngestSettings,
    ) -> Self {
        Self {
            source,
            kind,
            sink,
            pacer,
            checkpoints,
            settings,
        }
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    fn network(&self) -> &str {
        self.source.network()
    }

    async fn dispatch_sorted(&self, mut logs: Vec<EvmLog>) -> Option<u64> {
        logs.sort_by_key(|log| (log.block(), log.index()));
        let mut last_block = None;
        for log in logs {
            if log.removed {
                debug!(
                    "[{}] Skipping removed {} log in tx {}",
                    self.network(),
                    self.kind,
                    log.tx_hash()
                );
                continue;
            }
            last_block = Some(log.block());
            self.sink.dispatch(self.network(), self.kind, log).await;
        }
        last_block
    }

    /// Saves `next_block`, held back to the sink's pending floor.
    async fn save_checkpoint(&self, next_block: u64) -> Result<()> {
        let floor = self.sink.pending_floor(self.network(), self.kind).await;
        let block = match floor {
            Some(floor) if floor < next_block => {
                debug!(
                    "[{}] {} checkpoint held at block {} (fetched to {})",
                    self.network(),
                    self.kind,
                    floor,
                    next_block
                );
                floor
            }
            _ => next_block,
        };
        self.checkpoints.save(self.network(), self.kind, block)
    }

    /// Fetches and dispatches every log from the checkpoint up to the head
    /// observed at the start of the call.
    ///
    /// # Returns
    ///
    /// * `Ok(u64)` - First block not yet fetched
    /// * `Err(anyhow::Error)` - Head or window fetch failed; windows already
    ///   dispatched stay checkpointed
    pub async fn backfill(&self) -> Result<u64> {
        if self.settings.block_range == 0 {
            anyhow::bail!("block_range must be greater than zero");
        }

        let mut cursor = self
            .checkpoints
            .load(self.network(), self.kind)?
            .unwrap_or(GENESIS_CURSOR);
        let head = self
            .source
            .head()
            .await
            .with_context(|| format!("[{}] Failed to read head", self.network()))?;

        info!(
            "[{}] Backfilling {} from block {} to {}",
            self.network(),
            self.kind,
            cursor,
            head
        );

        while cursor <= head {
            let to = cursor
                .saturating_add(self.settings.block_range - 1)
                .min(head);
            let logs = self
                .source
                .fetch(self.kind, cursor, to)
                .await
                .with_context(|| {
                    format!(
                        "[{}] Failed to fetch {} logs for blocks {}..={}",
                        self.network(),
                        self.kind,
                        cursor,
                        to
                    )
                })?;

            info!(
                "[{}] {} blocks {}..={}: {} events",
                self.network(),
                self.kind,
                cursor,
                to,
                logs.len()
            );
            self.dispatch_sorted(logs).await;

            cursor = to + 1;
            self.save_checkpoint(cursor).await?;
            self.pacer.pause(self.settings.interval).await;
        }

        Ok(cursor)
    }

    /// Installs the live filter at `from_block`.
    pub async fn subscribe(&self, from_block: u64) -> Result<LiveCursor> {
        let filter_id = self
            .source
            .install_filter(self.kind, from_block)
            .await
            .with_context(|| {
                format!(
                    "[{}] Failed to install {} filter",
                    self.network(),
                    self.kind
                )
            })?;
        info!(
            "[{}] Live {} filter {} from block {}",
            self.network(),
            self.kind,
            filter_id,
            from_block
        );
        Ok(LiveCursor {
            filter_id,
            next_block: from_block,
        })
    }

    /// Polls the live filter once and dispatches what it returned.
    ///
    /// A failed poll reinstalls the filter from `live.next_block`.
    ///
    /// # Returns
    ///
    /// * `Ok(usize)` - Number of logs received
    pub async fn poll(&self, live: &mut LiveCursor) -> Result<usize> {
        match self.source.poll_filter(&live.filter_id).await {
            Ok(logs) => {
                let count = logs.len();
                if count > 0 {
                    debug!(
                        "[{}] {} live batch: {} events",
                        self.network(),
                        self.kind,
                        count
                    );
                }
                if let Some(last_block) = self.dispatch_sorted(logs).await {
                    live.next_block = live.next_block.max(last_block + 1);
                }
                self.save_checkpoint(live.next_block).await?;
                Ok(count)
            }
            Err(e) => {
                warn!(
                    "[{}] {} filter {} poll failed, reinstalling from block {}: {:#}",
                    self.network(),
                    self.kind,
                    live.filter_id,
                    live.next_block,
                    e
                );
                *live = self.subscribe(live.next_block).await?;
                Ok(0)
            }
        }
    }

    /// Backfill then follow the live filter. Only returns on error.
    pub async fn run(&self) -> Result<()> {
        let cursor = self.backfill().await?;
        let mut live = self.subscribe(cursor).await?;
        loop {
            self.pacer.pause(self.settings.poll_interval).await;
            self.poll(&mut live).await?;
        }
    }

    /// Runs forever, restarting from the last checkpoint after a failure.
    pub async fn supervise(self) {
        loop {
            if let Err(e) = self.run().await {
                error!(
                    "[{}] {} ingestion failed, restarting in {:?}: {:#}",
                    self.network(),
                    self.kind,
                    self.settings.poll_interval,
                    e
                );
            }
            self.pacer.pause(self.settings.poll_interval).await;
        }
    }
}
