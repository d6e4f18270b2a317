//! Tests for backfill, live subscription and checkpoints.

mod helpers;

use helpers::{
    ordered_log, temp_dir, RecordingPacer, RecordingSink, ScriptedSource, SOURCE_NETWORK,
};
use lz_relayer::ingest::{
    CheckpointStore, EventIngestor, EventKind, FileCheckpointStore, IngestSettings,
    MemoryCheckpointStore, PendingBlocks,
};
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    source: Arc<ScriptedSource>,
    sink: Arc<RecordingSink>,
    pacer: Arc<RecordingPacer>,
    checkpoints: Arc<MemoryCheckpointStore>,
    ingestor: EventIngestor,
}

fn harness(source: ScriptedSource, block_range: u64) -> Harness {
    let source = Arc::new(source);
    let sink = Arc::new(RecordingSink::default());
    let pacer = Arc::new(RecordingPacer::default());
    let checkpoints = Arc::new(MemoryCheckpointStore::new());
    let settings = IngestSettings {
        block_range,
        interval: Duration::from_millis(1000),
        poll_interval: Duration::from_millis(2000),
    };
    let ingestor = EventIngestor::new(
        source.clone(),
        EventKind::PacketSent,
        sink.clone(),
        pacer.clone(),
        checkpoints.clone(),
        settings,
    );
    Harness {
        source,
        sink,
        pacer,
        checkpoints,
        ingestor,
    }
}

// ============================================================================
// BACKFILL TESTS
// ============================================================================

/// Test that backfill covers [1, head] in windows of block_range.
/// Why: A head of 2500 with range 1000 needs exactly three queries.
#[tokio::test]
async fn test_backfill_windows() {
    let h = harness(ScriptedSource::new(2500, Vec::new()), 1000);

    let next = h.ingestor.backfill().await.unwrap();

    assert_eq!(next, 2501, "Next block follows the head");
    assert_eq!(
        h.source.windows(),
        vec![(1, 1000), (1001, 2000), (2001, 2500)],
        "Windows are contiguous and capped at the head"
    );
    assert_eq!(
        h.pacer.pauses(),
        vec![Duration::from_millis(1000); 3],
        "One pause per window"
    );
    assert_eq!(
        h.checkpoints.load(SOURCE_NETWORK, EventKind::PacketSent).unwrap(),
        Some(2501)
    );
}

/// Test that a head exactly on a window boundary needs no extra window.
/// Why: The window count is ceil(head / range).
#[tokio::test]
async fn test_backfill_exact_boundary() {
    let h = harness(ScriptedSource::new(2000, Vec::new()), 1000);
    h.ingestor.backfill().await.unwrap();
    assert_eq!(h.source.windows(), vec![(1, 1000), (1001, 2000)]);
}

/// Test that a chain at block 0 performs no queries.
/// Why: There is nothing to backfill before the first block.
#[tokio::test]
async fn test_backfill_empty_chain() {
    let h = harness(ScriptedSource::new(0, Vec::new()), 1000);
    let next = h.ingestor.backfill().await.unwrap();
    assert_eq!(next, 1);
    assert!(h.source.windows().is_empty());
    assert!(h.pacer.pauses().is_empty());
}

/// Test that logs are dispatched in (block, logIndex) order and removed logs are skipped.
/// Why: Handlers rely on source order; reorged-out logs must not be handled.
#[tokio::test]
async fn test_backfill_dispatch_order() {
    let mut removed = ordered_log(5, 0);
    removed.removed = true;
    let logs = vec![
        ordered_log(7, 1),
        ordered_log(3, 2),
        removed,
        ordered_log(7, 0),
        ordered_log(3, 1),
    ];
    let h = harness(ScriptedSource::new(10, logs), 1000);

    h.ingestor.backfill().await.unwrap();

    assert_eq!(h.sink.positions(), vec![(3, 1), (3, 2), (7, 0), (7, 1)]);
    let received = h.sink.received.lock().unwrap();
    assert!(
        received
            .iter()
            .all(|(network, kind, _)| network == SOURCE_NETWORK && *kind == EventKind::PacketSent),
        "Network and kind are passed through"
    );
}

/// Test that backfill resumes from a stored checkpoint.
/// Why: A restart must not rescan windows already processed.
#[tokio::test]
async fn test_backfill_resumes_from_checkpoint() {
    let h = harness(ScriptedSource::new(2500, Vec::new()), 1000);
    h.checkpoints
        .save(SOURCE_NETWORK, EventKind::PacketSent, 2001)
        .unwrap();

    h.ingestor.backfill().await.unwrap();
    assert_eq!(h.source.windows(), vec![(2001, 2500)]);
}

/// Test that a zero block range is rejected.
/// Why: The window loop would never advance.
#[tokio::test]
async fn test_backfill_rejects_zero_range() {
    let h = harness(ScriptedSource::new(10, Vec::new()), 0);
    assert!(h.ingestor.backfill().await.is_err());
}

// ============================================================================
// LIVE SUBSCRIPTION TESTS
// ============================================================================

/// Test that the live filter starts at the first block backfill did not fetch.
/// Why: Logs in the head block must be seen exactly once across both phases.
#[tokio::test]
async fn test_subscribe_after_backfill() {
    let h = harness(ScriptedSource::new(2500, Vec::new()), 1000);
    let next = h.ingestor.backfill().await.unwrap();
    let live = h.ingestor.subscribe(next).await.unwrap();

    assert_eq!(h.source.installs(), vec![2501]);
    assert_eq!(live.next_block, 2501);
    assert_eq!(live.filter_id, "0x1");
}

/// Test that a poll dispatches its batch and advances the checkpoint.
/// Why: Live logs follow the same order and persistence rules as backfill.
#[tokio::test]
async fn test_poll_dispatches_and_advances() {
    let h = harness(ScriptedSource::new(100, Vec::new()), 1000);
    let mut live = h.ingestor.subscribe(101).await.unwrap();
    h.source
        .push_batch(Ok(vec![ordered_log(105, 1), ordered_log(103, 0)]));

    let count = h.ingestor.poll(&mut live).await.unwrap();

    assert_eq!(count, 2);
    assert_eq!(h.sink.positions(), vec![(103, 0), (105, 1)]);
    assert_eq!(live.next_block, 106);
    assert_eq!(
        h.checkpoints.load(SOURCE_NETWORK, EventKind::PacketSent).unwrap(),
        Some(106)
    );
}

/// Test that an empty poll leaves the cursor alone.
/// Why: Quiet blocks are normal and must not move the live cursor.
#[tokio::test]
async fn test_poll_empty_batch() {
    let h = harness(ScriptedSource::new(100, Vec::new()), 1000);
    let mut live = h.ingestor.subscribe(101).await.unwrap();

    assert_eq!(h.ingestor.poll(&mut live).await.unwrap(), 0);
    assert_eq!(live.next_block, 101);
}

/// Test that a failed poll reinstalls the filter from the next unseen block.
/// Why: Nodes drop idle filters; the subscription must recover without a gap.
#[tokio::test]
async fn test_poll_failure_reinstalls_filter() {
    let h = harness(ScriptedSource::new(100, Vec::new()), 1000);
    let mut live = h.ingestor.subscribe(101).await.unwrap();
    h.source.push_batch(Ok(vec![ordered_log(120, 0)]));
    h.source.push_batch(Err("filter not found".to_string()));

    h.ingestor.poll(&mut live).await.unwrap();
    let count = h.ingestor.poll(&mut live).await.unwrap();

    assert_eq!(count, 0);
    assert_eq!(h.source.installs(), vec![101, 121], "Reinstalled after the last log");
    assert_eq!(live.filter_id, "0x2", "Cursor holds the new filter");
    assert_eq!(live.next_block, 121);
}

// ============================================================================
// PENDING FLOOR TESTS
// ============================================================================

/// Test that backfill never checkpoints past the sink's pending floor.
/// Why: Events still being handled must be backfilled again after a restart.
#[tokio::test]
async fn test_backfill_checkpoint_held_at_floor() {
    let h = harness(ScriptedSource::new(2500, vec![ordered_log(40, 0)]), 1000);
    *h.sink.floor.lock().unwrap() = Some(40);

    let next = h.ingestor.backfill().await.unwrap();

    assert_eq!(next, 2501, "Fetching still reaches the head");
    assert_eq!(
        h.checkpoints.load(SOURCE_NETWORK, EventKind::PacketSent).unwrap(),
        Some(40)
    );
}

/// Test that a quiet poll advances a held checkpoint once the floor clears.
/// Why: Without new logs the checkpoint would otherwise stay behind until the next event.
#[tokio::test]
async fn test_poll_advances_checkpoint_when_floor_clears() {
    let h = harness(ScriptedSource::new(100, vec![ordered_log(40, 0)]), 1000);
    *h.sink.floor.lock().unwrap() = Some(40);
    let cursor = h.ingestor.backfill().await.unwrap();
    let mut live = h.ingestor.subscribe(cursor).await.unwrap();

    h.ingestor.poll(&mut live).await.unwrap();
    assert_eq!(
        h.checkpoints.load(SOURCE_NETWORK, EventKind::PacketSent).unwrap(),
        Some(40),
        "Still held"
    );

    *h.sink.floor.lock().unwrap() = None;
    h.ingestor.poll(&mut live).await.unwrap();
    assert_eq!(
        h.checkpoints.load(SOURCE_NETWORK, EventKind::PacketSent).unwrap(),
        Some(101)
    );
}

/// Test that the ledger floor is the lowest live hold per (network, kind).
/// Why: Holds are released in any order as handlers and pooled entries finish.
#[test]
fn test_pending_blocks_floor() {
    let blocks = PendingBlocks::new();
    let high = blocks.hold("a", EventKind::PacketSent, 20);
    let low = blocks.hold("a", EventKind::PacketSent, 10);
    let _other = blocks.hold("b", EventKind::PacketSent, 1);

    assert_eq!(blocks.floor("a", EventKind::PacketSent), Some(10));
    assert_eq!(blocks.floor("a", EventKind::PacketVerified), None, "Kinds are separate");

    drop(low);
    assert_eq!(blocks.floor("a", EventKind::PacketSent), Some(20));
    drop(high);
    assert_eq!(blocks.floor("a", EventKind::PacketSent), None);
}

/// Test that cloned and pinned holds keep their block.
/// Why: A pooled entry clone is a second claim; a pinned hold waits for the restart.
#[test]
fn test_pending_blocks_clone_and_pin() {
    let blocks = PendingBlocks::new();
    let hold = blocks.hold("a", EventKind::PacketSent, 7);
    let copy = hold.clone();
    drop(hold);
    assert_eq!(blocks.floor("a", EventKind::PacketSent), Some(7), "Clone still holds");

    copy.pin();
    assert_eq!(blocks.floor("a", EventKind::PacketSent), Some(7), "Pinned hold stays");
}

// ============================================================================
// CHECKPOINT STORE TESTS
// ============================================================================

/// Test that checkpoints never move backwards.
/// Why: A late save from an older window must not cause a rescan loop.
#[test]
fn test_memory_checkpoint_monotonic() {
    let store = MemoryCheckpointStore::new();
    assert_eq!(store.load("net", EventKind::PacketSent).unwrap(), None);

    store.save("net", EventKind::PacketSent, 500).unwrap();
    store.save("net", EventKind::PacketSent, 300).unwrap();
    assert_eq!(store.load("net", EventKind::PacketSent).unwrap(), Some(500));
    assert_eq!(
        store.load("net", EventKind::PacketVerified).unwrap(),
        None,
        "Kinds are tracked separately"
    );
}

/// Test that the file store persists checkpoints across reopen.
/// Why: This is what lets a restarted process skip its backfill.
#[test]
fn test_file_checkpoint_persists() {
    let dir = temp_dir("lz-relayer-checkpoints");
    let path = dir.join("checkpoints.json");

    {
        let store = FileCheckpointStore::open(&path).unwrap();
        store.save("sepolia", EventKind::PayloadVerified, 1234).unwrap();
    }

    let reopened = FileCheckpointStore::open(&path).unwrap();
    assert_eq!(
        reopened.load("sepolia", EventKind::PayloadVerified).unwrap(),
        Some(1234)
    );
    let content = std::fs::read_to_string(&path).unwrap();
    assert!(content.contains("sepolia/PayloadVerified"), "Keyed by network and kind");

    std::fs::remove_dir_all(dir).unwrap();
}
