//! Configuration Management Module
//!
//! Loads the networks document (network name → RPC URL, keys, contract
//! addresses) and the runtime settings supplied through environment
//! variables, and validates both before any connection is made.
//!
//! ## Networks document
//!
//! ```json
//! {
//!   "sepolia": {
//!     "rpcUrl": "https://...",
//!     "privateKey": "0x...",
//!     "signerKeys": ["0x..."],
//!     "endpoint": "0x...",
//!     "receiveUln302": "0x...",
//!     "dvn": "0x...",
//!     "executor": "0x..."
//!   }
//! }
//! ```
//!
//! Missing contract addresses are read from `deployments/<network>/<Contract>.json`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::abi::{parse_address, Address};
use crate::crypto::Wallet;
use crate::ingest::IngestSettings;
use crate::roles::Role;

pub const DEFAULT_DELAY_MS: u64 = 10_000;
pub const DEFAULT_INTERVAL_MS: u64 = 1_000;
pub const DEFAULT_BLOCK_RANGE: u64 = 1_000;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;

const ENDPOINT_CONTRACT: &str = "EndpointV2";
const RECEIVE_ULN_CONTRACT: &str = "ReceiveUln302";
const DVN_CONTRACT: &str = "DVN";
const EXECUTOR_CONTRACT: &str = "Executor";

// ============================================================================
// CONFIGURATION STRUCTURES
// ============================================================================

/// One entry of the networks document, as written.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkEntry {
    pub rpc_url: String,
    /// Admin wallet key (hex)
    pub private_key: String,
    /// DVN multisig signer keys (hex), signing order
    #[serde(default)]
    pub signer_keys: Vec<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default, rename = "receiveUln302")]
    pub receive_uln302: Option<String>,
    #[serde(default)]
    pub dvn: Option<String>,
    #[serde(default)]
    pub executor: Option<String>,
}

/// A network with every address resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkConfig {
    pub rpc_url: String,
    pub private_key: String,
    pub signer_keys: Vec<String>,
    pub endpoint: Address,
    pub receive_uln302: Address,
    pub dvn: Option<Address>,
    pub executor: Option<Address>,
}

/// Runtime settings from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub role: Role,
    /// Verifier sweep interval (`DELAY`)
    pub delay: Duration,
    /// Pause between backfill windows (`INTERVAL`)
    pub interval: Duration,
    /// Blocks per backfill window (`BLOCK_RANGE`)
    pub block_range: u64,
    /// Live filter polling interval (`POLL_INTERVAL`)
    pub poll_interval: Duration,
    /// Checkpoint file (`CHECKPOINT_PATH`); in-memory when unset
    pub checkpoint_path: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            role: Role::Executor,
            delay: Duration::from_millis(DEFAULT_DELAY_MS),
            interval: Duration::from_millis(DEFAULT_INTERVAL_MS),
            block_range: DEFAULT_BLOCK_RANGE,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            checkpoint_path: None,
        }
    }
}

impl Settings {
    /// Reads settings from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads settings through `lookup`, applying defaults for unset keys.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Settings::default();
        let number = |key: &str, default: u64| -> Result<u64> {
            match lookup(key).filter(|v| !v.trim().is_empty()) {
                Some(value) => value
                    .trim()
                    .parse::<u64>()
                    .with_context(|| format!("{} must be a non-negative integer, got '{}'", key, value)),
                None => Ok(default),
            }
        };

        let role = match lookup("ROLE").filter(|v| !v.trim().is_empty()) {
            Some(value) => value.parse()?,
            None => defaults.role,
        };

        Ok(Self {
            role,
            delay: Duration::from_millis(number("DELAY", DEFAULT_DELAY_MS)?),
            interval: Duration::from_millis(number("INTERVAL", DEFAULT_INTERVAL_MS)?),
            block_range: number("BLOCK_RANGE", DEFAULT_BLOCK_RANGE)?,
            poll_interval: Duration::from_millis(number("POLL_INTERVAL", DEFAULT_POLL_INTERVAL_MS)?),
            checkpoint_path: lookup("CHECKPOINT_PATH")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
        })
    }

    pub fn ingest(&self) -> IngestSettings {
        IngestSettings {
            block_range: self.block_range,
            interval: self.interval,
            poll_interval: self.poll_interval,
        }
    }
}

/// Complete service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Networks by name, in name order
    pub networks: BTreeMap<String, NetworkConfig>,
    pub settings: Settings,
    /// File the networks were loaded from
    pub source: PathBuf,
}

impl Config {
    /// Loads configuration from the default locations and the environment.
    pub fn load() -> Result<Self> {
        Self::load_from(None, None)
    }

    /// Loads configuration.
    ///
    /// # Arguments
    ///
    /// * `path` - Networks document; defaults to `NETWORKS_CONFIG_PATH`, then
    ///   `networks.config.$ENV.json` when `ENV` is set, then `networks.config.json`
    /// * `role` - Overrides `ROLE`
    ///
    /// # Returns
    ///
    /// * `Ok(Config)` - Validated configuration
    /// * `Err(anyhow::Error)` - Missing file, parse failure or invalid values
    pub fn load_from(path: Option<&Path>, role: Option<Role>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => default_networks_path(),
        };
        if !path.exists() {
            anyhow::bail!(
                "Networks configuration '{}' not found. Set NETWORKS_CONFIG_PATH or pass --config <path>",
                path.display()
            );
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let deployments = match std::env::var("DEPLOYMENTS_PATH") {
            Ok(dir) if !dir.trim().is_empty() => PathBuf::from(dir),
            _ => path
                .parent()
                .map(|p| p.join("deployments"))
                .unwrap_or_else(|| PathBuf::from("deployments")),
        };
        let networks = parse_networks(&content, &deployments)
            .with_context(|| format!("Invalid networks configuration {}", path.display()))?;

        let mut settings = Settings::from_env()?;
        if let Some(role) = role {
            settings.role = role;
        }

        let config = Self {
            networks,
            settings,
            source: path,
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks every network and setting.
    pub fn validate(&self) -> Result<()> {
        if self.networks.is_empty() {
            anyhow::bail!("No networks configured");
        }
        if self.settings.block_range == 0 {
            anyhow::bail!("BLOCK_RANGE must be greater than zero");
        }

        for (name, network) in &self.networks {
            if network.rpc_url.trim().is_empty() {
                anyhow::bail!("Network {}: rpcUrl is empty", name);
            }
            url::Url::parse(&network.rpc_url)
                .with_context(|| format!("Network {}: invalid rpcUrl '{}'", name, network.rpc_url))?;
            Wallet::from_hex(&network.private_key)
                .with_context(|| format!("Network {}: invalid privateKey", name))?;
            for (index, key) in network.signer_keys.iter().enumerate() {
                Wallet::from_hex(key)
                    .with_context(|| format!("Network {}: invalid signerKeys[{}]", name, index))?;
            }
        }

        if self.settings.role == Role::Verifier {
            for (name, network) in &self.networks {
                if network.dvn.is_some() && network.signer_keys.is_empty() {
                    anyhow::bail!("Network {}: dvn is set but signerKeys is empty", name);
                }
            }
        }
        Ok(())
    }
}

// ============================================================================
// LOADING HELPERS
// ============================================================================

fn default_networks_path() -> PathBuf {
    if let Ok(path) = std::env::var("NETWORKS_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }
    match std::env::var("ENV") {
        Ok(env) if !env.trim().is_empty() => PathBuf::from(format!("networks.config.{}.json", env.trim())),
        _ => PathBuf::from("networks.config.json"),
    }
}

/// Parses a networks document and resolves contract addresses.
///
/// # Arguments
///
/// * `content` - JSON networks document
/// * `deployments` - Directory holding `<network>/<Contract>.json` files
pub fn parse_networks(content: &str, deployments: &Path) -> Result<BTreeMap<String, NetworkConfig>> {
    let entries: BTreeMap<String, NetworkEntry> =
        serde_json::from_str(content).context("Networks document is not valid JSON")?;

    entries
        .into_iter()
        .map(|(name, entry)| {
            let resolved = resolve_network(&name, entry, deployments)?;
            Ok((name, resolved))
        })
        .collect()
}

fn resolve_network(name: &str, entry: NetworkEntry, deployments: &Path) -> Result<NetworkConfig> {
    let endpoint = resolve_address(name, "endpoint", entry.endpoint, deployments, ENDPOINT_CONTRACT)?
        .with_context(|| format!("Network {}: no endpoint address configured or deployed", name))?;
    let receive_uln302 = resolve_address(
        name,
        "receiveUln302",
        entry.receive_uln302,
        deployments,
        RECEIVE_ULN_CONTRACT,
    )?
    .with_context(|| format!("Network {}: no receiveUln302 address configured or deployed", name))?;
    let dvn = resolve_address(name, "dvn", entry.dvn, deployments, DVN_CONTRACT)?;
    let executor = resolve_address(name, "executor", entry.executor, deployments, EXECUTOR_CONTRACT)?;

    Ok(NetworkConfig {
        rpc_url: entry.rpc_url,
        private_key: entry.private_key,
        signer_keys: entry.signer_keys,
        endpoint,
        receive_uln302,
        dvn,
        executor,
    })
}

fn resolve_address(
    network: &str,
    field: &str,
    configured: Option<String>,
    deployments: &Path,
    contract: &str,
) -> Result<Option<Address>> {
    if let Some(value) = configured {
        let address = parse_address(&value)
            .with_context(|| format!("Network {}: invalid {} address", network, field))?;
        return Ok(Some(address));
    }
    read_deployment(deployments, network, contract)
}

#[derive(Debug, Deserialize)]
struct Deployment {
    address: String,
}

/// Address recorded in `deployments/<network>/<contract>.json`, if the file exists.
pub fn read_deployment(deployments: &Path, network: &str, contract: &str) -> Result<Option<Address>> {
    let path = deployments.join(network).join(format!("{}.json", contract));
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let deployment: Deployment = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    let address = parse_address(&deployment.address)
        .with_context(|| format!("Invalid address in {}", path.display()))?;
    Ok(Some(address))
}
