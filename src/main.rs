//! LayerZero-style Relay Agents
//!
//! Runs one role (verifier, committer or executor) over every network in the
//! networks document until interrupted.
//!
//! ## Security Requirements
//!
//! **CRITICAL**: This service holds admin and DVN signer keys for every
//! configured network. Keep the networks document out of version control.

use anyhow::Result;
use std::path::PathBuf;
use tracing::info;

use lz_relayer::config::Config;
use lz_relayer::relay;
use lz_relayer::roles::Role;

// ============================================================================
// MAIN APPLICATION ENTRY POINT
// ============================================================================

/// Main application entry point.
///
/// This function:
/// 1. Initializes logging and tracing
/// 2. Parses command line arguments
/// 3. Loads and validates configuration
/// 4. Runs the selected role until Ctrl-C
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|arg| arg == "--help" || arg == "-h") {
        println!("LayerZero relay agents");
        println!();
        println!("Usage: lz-relayer [OPTIONS]");
        println!();
        println!("Options:");
        println!("  --config <path>   Networks document (default: networks.config[.$ENV].json)");
        println!("  --role <role>     verifier | committer | executor (overrides ROLE)");
        println!("  --help, -h        Show this help message");
        println!();
        println!("Environment variables:");
        println!("  NETWORKS_CONFIG_PATH  Path to the networks document");
        println!("  ENV                   Selects networks.config.$ENV.json");
        println!("  DEPLOYMENTS_PATH      Directory of <network>/<Contract>.json deployments");
        println!("  ROLE                  Role to run (default: executor)");
        println!("  DELAY                 Verifier sweep interval in ms (default: 10000)");
        println!("  INTERVAL              Pause between backfill windows in ms (default: 1000)");
        println!("  BLOCK_RANGE           Blocks per backfill window (default: 1000)");
        println!("  POLL_INTERVAL         Live filter polling interval in ms (default: 2000)");
        println!("  CHECKPOINT_PATH       Persist backfill checkpoints to this JSON file");
        return Ok(());
    }

    let mut config_path: Option<PathBuf> = None;
    let mut role: Option<Role> = None;

    let mut i = 1; // Skip program name
    while i < args.len() {
        match args[i].as_str() {
            "--config" if i + 1 < args.len() => {
                config_path = Some(PathBuf::from(&args[i + 1]));
                i += 1;
            }
            "--role" if i + 1 < args.len() => {
                role = Some(args[i + 1].parse()?);
                i += 1;
            }
            other => anyhow::bail!("Unknown argument '{}' (see --help)", other),
        }
        i += 1;
    }

    let config = Config::load_from(config_path.as_deref(), role)?;
    info!(
        "Configuration loaded from {} ({} networks, role {})",
        config.source.display(),
        config.networks.len(),
        config.settings.role
    );

    relay::run(config).await
}
