//! Service wiring
//!
//! Connects every configured network, builds the engine for the selected
//! role, and starts one supervised ingestor per (network, event kind).
//! On Ctrl-C the ingestors stop first, then the engine gets a grace period
//! to finish running handlers and submissions.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::chain::{MessagingChain, NetworkConnector, NetworkRegistry};
use crate::config::Config;
use crate::ingest::{
    CheckpointStore, EventIngestor, EventSink, EventSource, FileCheckpointStore, IngestSettings,
    MemoryCheckpointStore, Pacer, TokioPacer,
};
use crate::roles::{CommitterEngine, ExecutorEngine, Role, RoleEngine, VerifierEngine};

/// Time running handlers get to finish after Ctrl-C.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Connected networks with both of their roles: chain operations and log source.
pub struct ConnectedNetworks {
    pub registry: Arc<NetworkRegistry>,
    pub sources: Vec<Arc<dyn EventSource>>,
}

/// Connects every network in `config`.
pub async fn connect_networks(config: &Config) -> Result<ConnectedNetworks> {
    let mut registry = NetworkRegistry::new();
    let mut sources: Vec<Arc<dyn EventSource>> = Vec::new();

    for (name, network) in &config.networks {
        let connector = Arc::new(
            NetworkConnector::connect(name, network)
                .await
                .with_context(|| format!("Failed to connect network {}", name))?,
        );
        registry.register(connector.clone() as Arc<dyn MessagingChain>)?;
        sources.push(connector as Arc<dyn EventSource>);
    }

    Ok(ConnectedNetworks {
        registry: Arc::new(registry),
        sources,
    })
}

/// The selected role's engine, viewed as an event sink and as a role.
pub struct Engine {
    pub sink: Arc<dyn EventSink>,
    pub role: Arc<dyn RoleEngine>,
}

impl Engine {
    pub fn new<E: RoleEngine + 'static>(engine: E) -> Self {
        let engine = Arc::new(engine);
        Self {
            sink: engine.clone(),
            role: engine,
        }
    }
}

/// Builds the engine for the configured role.
pub fn build_engine(config: &Config, registry: Arc<NetworkRegistry>) -> Engine {
    match config.settings.role {
        Role::Verifier => {
            Engine::new(VerifierEngine::new(registry, config.settings.delay))
        }
        Role::Committer => Engine::new(CommitterEngine::new(registry)),
        Role::Executor => Engine::new(ExecutorEngine::new(registry)),
    }
}

/// Checkpoint store selected by `CHECKPOINT_PATH`.
pub fn build_checkpoints(config: &Config) -> Result<Arc<dyn CheckpointStore>> {
    match &config.settings.checkpoint_path {
        Some(path) => {
            info!("Persisting checkpoints to {}", path.display());
            Ok(Arc::new(FileCheckpointStore::open(path)?))
        }
        None => Ok(Arc::new(MemoryCheckpointStore::new())),
    }
}

/// Spawns a supervised ingestor for every source and every kind the role consumes.
pub fn spawn_ingestors(
    role: Role,
    sources: &[Arc<dyn EventSource>],
    sink: Arc<dyn EventSink>,
    pacer: Arc<dyn Pacer>,
    checkpoints: Arc<dyn CheckpointStore>,
    settings: IngestSettings,
) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();
    for source in sources {
        for kind in role.event_kinds() {
            let ingestor = EventIngestor::new(
                source.clone(),
                *kind,
                sink.clone(),
                pacer.clone(),
                checkpoints.clone(),
                settings,
            );
            handles.push(tokio::spawn(ingestor.supervise()));
        }
    }
    handles
}

/// Runs the relay until Ctrl-C.
pub async fn run(config: Config) -> Result<()> {
    let role = config.settings.role;
    info!(
        "Starting {} over {} networks",
        role,
        config.networks.len()
    );

    let networks = connect_networks(&config).await?;
    let engine = build_engine(&config, networks.registry.clone());
    let checkpoints = build_checkpoints(&config)?;

    let ingestors = spawn_ingestors(
        role,
        &networks.sources,
        engine.sink.clone(),
        Arc::new(TokioPacer),
        checkpoints,
        config.settings.ingest(),
    );
    let background = engine.role.spawn_background();
    info!(
        "{} running with {} tasks",
        role,
        ingestors.len() + background.len()
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutdown requested, stopping {}", role);
    shutdown(&engine, ingestors, background, SHUTDOWN_GRACE).await;
    Ok(())
}

/// Stops ingestion, then drains the engine for up to `grace`.
///
/// # Returns
///
/// * `true` - Every handler and background task finished in time
/// * `false` - Tasks still running at the deadline were aborted
pub async fn shutdown(
    engine: &Engine,
    ingestors: Vec<JoinHandle<()>>,
    background: Vec<JoinHandle<()>>,
    grace: Duration,
) -> bool {
    for handle in ingestors {
        handle.abort();
    }
    if engine.role.shutdown(grace).await {
        info!("{} drained", engine.role.role());
        return true;
    }

    warn!(
        "{} still had {} running tasks after {:?}, abandoning them",
        engine.role.role(),
        engine.role.tasks().running(),
        grace
    );
    for handle in background {
        handle.abort();
    }
    false
}
