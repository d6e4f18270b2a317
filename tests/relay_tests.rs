//! Tests for service wiring: ingestors feeding a role engine, restarts from
//! checkpoints and shutdown.

mod helpers;

use helpers::{
    build_test_networks, executor_fee_log, ordered_log, packet_sent_log, packet_verified_log,
    receipt, test_packet, tx_hash, type3_options, MockChain, RecordingPacer, RecordingSink,
    ScriptedSource, TestNetworks, DESTINATION_EID, DESTINATION_NETWORK, SOURCE_EXECUTOR,
    SOURCE_NETWORK,
};
use lz_relayer::codec::Packet;
use lz_relayer::ingest::{
    CheckpointStore, EventIngestor, EventKind, EventSource, IngestSettings, MemoryCheckpointStore,
    TokioPacer,
};
use lz_relayer::relay::{shutdown, spawn_ingestors, Engine};
use lz_relayer::roles::{ExecutorEngine, HandlerTasks, Role, RoleEngine};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const SETTINGS: IngestSettings = IngestSettings {
    block_range: 1000,
    interval: Duration::from_millis(1),
    poll_interval: Duration::from_millis(5),
};

/// Networks where `packet` paid the source executor, and a source holding its PacketSent.
fn setup(packet: &Packet) -> (TestNetworks, Arc<ScriptedSource>) {
    let networks = build_test_networks(MockChain::source(), MockChain::destination());
    let tx = tx_hash(packet.nonce);
    networks.source.add_receipt(receipt(
        &tx,
        vec![executor_fee_log(&SOURCE_EXECUTOR, 100, &tx)],
    ));
    let log = packet_sent_log(packet, &type3_options(200_000, 0), &tx, 10);
    (networks, Arc::new(ScriptedSource::new(100, vec![log])))
}

fn packet_sent_ingestor(
    source: Arc<ScriptedSource>,
    engine: Arc<ExecutorEngine>,
    checkpoints: Arc<MemoryCheckpointStore>,
) -> EventIngestor {
    EventIngestor::new(
        source,
        EventKind::PacketSent,
        engine,
        Arc::new(RecordingPacer::default()),
        checkpoints,
        SETTINGS,
    )
}

/// Sets its flag when dropped, which for a spawned task means aborted or finished.
struct SetOnDrop(Arc<AtomicBool>);

impl Drop for SetOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

// ============================================================================
// INGESTOR TO ENGINE TESTS
// ============================================================================

/// Test that a backfilled PacketSent reaches the engine's pool through dispatch.
/// Why: The ingestor and the role handlers only meet through the EventSink seam.
#[tokio::test]
async fn test_backfill_feeds_engine_pool() {
    let packet = test_packet(5);
    let (networks, source) = setup(&packet);
    let engine = Arc::new(ExecutorEngine::new(networks.registry.clone()));
    let checkpoints = Arc::new(MemoryCheckpointStore::new());
    let ingestor = packet_sent_ingestor(source, engine.clone(), checkpoints.clone());

    assert_eq!(ingestor.backfill().await.unwrap(), 101);
    assert!(engine.tasks().wait_idle(Duration::from_secs(5)).await);

    assert!(engine.pool().contains(DESTINATION_EID, &packet.guid).await);
    assert_eq!(
        checkpoints.load(SOURCE_NETWORK, EventKind::PacketSent).unwrap(),
        Some(10),
        "Checkpoint held at the pooled packet"
    );

    networks.destination.with_state(|s| {
        s.payload_hashes.insert(5, packet.payload_hash());
        s.inbound_nonce = 5;
    });
    engine
        .handle_packet_verified(DESTINATION_NETWORK, &packet_verified_log(&packet))
        .await
        .unwrap();
    let mut live = ingestor.subscribe(101).await.unwrap();
    ingestor.poll(&mut live).await.unwrap();

    assert_eq!(networks.destination.submissions().len(), 1);
    assert_eq!(
        checkpoints.load(SOURCE_NETWORK, EventKind::PacketSent).unwrap(),
        Some(101),
        "Checkpoint moves on once the packet is executed"
    );
}

/// Test that a restart from the checkpoint recovers a packet that was pending at exit.
/// Why: The pool lives in memory; the checkpoint is what carries pending work over.
#[tokio::test]
async fn test_restart_recovers_pending_packet() {
    let packet = test_packet(5);
    let (networks, source) = setup(&packet);
    let checkpoints = Arc::new(MemoryCheckpointStore::new());

    let first = Arc::new(ExecutorEngine::new(networks.registry.clone()));
    packet_sent_ingestor(source.clone(), first.clone(), checkpoints.clone())
        .backfill()
        .await
        .unwrap();
    assert!(first.tasks().wait_idle(Duration::from_secs(5)).await);
    assert!(first.pool().contains(DESTINATION_EID, &packet.guid).await);
    drop(first);

    // Verified while the executor was down: no PacketVerified follows the restart
    networks.destination.with_state(|s| {
        s.payload_hashes.insert(5, packet.payload_hash());
        s.inbound_nonce = 5;
    });

    let second = Arc::new(ExecutorEngine::new(networks.registry.clone()));
    packet_sent_ingestor(source.clone(), second.clone(), checkpoints.clone())
        .backfill()
        .await
        .unwrap();
    assert!(second.tasks().wait_idle(Duration::from_secs(5)).await);

    assert_eq!(
        source.windows().last(),
        Some(&(10, 100)),
        "Second run resumes at the held block"
    );
    assert_eq!(networks.destination.submissions().len(), 1, "Delivered after restart");
    assert!(second.pool().is_empty().await);
}

/// Test that every (network, kind) the role consumes gets a running ingestor.
/// Why: The executor needs both PacketSent and PacketVerified from every network.
#[tokio::test]
async fn test_spawn_ingestors_covers_role_kinds() {
    let source = Arc::new(ScriptedSource::new(100, vec![ordered_log(40, 0)]));
    let sink = Arc::new(RecordingSink::default());
    let checkpoints = Arc::new(MemoryCheckpointStore::new());
    let sources: Vec<Arc<dyn EventSource>> = vec![source];

    let handles = spawn_ingestors(
        Role::Executor,
        &sources,
        sink.clone(),
        Arc::new(TokioPacer),
        checkpoints.clone(),
        SETTINGS,
    );
    assert_eq!(handles.len(), 2);
    tokio::time::sleep(Duration::from_millis(200)).await;
    for handle in &handles {
        handle.abort();
    }

    let mut kinds: Vec<EventKind> = sink
        .received
        .lock()
        .unwrap()
        .iter()
        .map(|(network, kind, _)| {
            assert_eq!(network, SOURCE_NETWORK);
            *kind
        })
        .collect();
    kinds.sort();
    assert_eq!(kinds, vec![EventKind::PacketSent, EventKind::PacketVerified]);
    for kind in Role::Executor.event_kinds() {
        assert_eq!(
            checkpoints.load(SOURCE_NETWORK, *kind).unwrap(),
            Some(101),
            "{} backfilled to the head",
            kind
        );
    }
}

// ============================================================================
// SHUTDOWN TESTS
// ============================================================================

/// Test that shutdown aborts ingestion but lets a running handler finish.
/// Why: Aborting a handler mid-submit can leave a transaction half sent.
#[tokio::test]
async fn test_shutdown_drains_running_handlers() {
    let networks = build_test_networks(MockChain::source(), MockChain::destination());
    let executor = ExecutorEngine::new(networks.registry.clone());
    let tasks = executor.tasks().clone();
    let engine = Engine::new(executor);

    let handler_done = Arc::new(AtomicBool::new(false));
    let done = handler_done.clone();
    tasks.spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        done.store(true, Ordering::SeqCst);
    });

    let ingestor_stopped = Arc::new(AtomicBool::new(false));
    let guard = SetOnDrop(ingestor_stopped.clone());
    let ingestor = tokio::spawn(async move {
        let _guard = guard;
        std::future::pending::<()>().await;
    });

    assert!(shutdown(&engine, vec![ingestor], Vec::new(), Duration::from_secs(5)).await);
    assert!(handler_done.load(Ordering::SeqCst), "Handler ran to completion");
    assert_eq!(tasks.running(), 0);

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(ingestor_stopped.load(Ordering::SeqCst), "Ingestor was aborted");
}

/// Test that shutdown gives up after the grace period.
/// Why: A hung RPC call must not keep the process alive forever.
#[tokio::test]
async fn test_shutdown_grace_expires() {
    let networks = build_test_networks(MockChain::source(), MockChain::destination());
    let executor = ExecutorEngine::new(networks.registry.clone());
    let tasks = executor.tasks().clone();
    let engine = Engine::new(executor);
    tasks.spawn(std::future::pending::<()>());

    assert!(!shutdown(&engine, Vec::new(), Vec::new(), Duration::from_millis(50)).await);
    assert_eq!(tasks.running(), 1, "Hung task is abandoned, not counted done");
}

/// Test that a closed tracker resolves its waiters and reports idle.
/// Why: Background loops watch the close signal to stop between iterations.
#[tokio::test]
async fn test_handler_tasks_close_and_idle() {
    let tasks = HandlerTasks::new();
    assert!(!tasks.is_closed());
    assert!(tasks.wait_idle(Duration::from_millis(10)).await, "Idle with nothing spawned");

    let watcher = tasks.clone();
    let loop_task = tasks.spawn(async move { watcher.closed().await });
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(tasks.running(), 1);

    tasks.close();
    assert!(tasks.is_closed());
    assert!(tasks.wait_idle(Duration::from_secs(5)).await);
    assert!(loop_task.await.is_ok());
}
