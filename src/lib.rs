//! LayerZero-style Relay Agents Library
//!
//! Off-chain Verifier (DVN), Committer and Executor agents. Each agent
//! watches `PacketSent` and verification events on every configured EVM
//! network, backfills what it missed while offline, and completes each
//! message on its destination chain exactly once.
pub mod abi;
pub mod chain;
pub mod codec;
pub mod config;
pub mod crypto;
pub mod error;
pub mod evm_client;
pub mod ingest;
pub mod pool;
pub mod relay;
pub mod roles;
pub mod signer;

// Re-export commonly used types
pub use chain::{MessagingChain, NetworkConnector, NetworkRegistry, UlnConfig};
pub use codec::Packet;
pub use config::{Config, NetworkConfig, Settings};
pub use crypto::Wallet;
pub use error::RelayError;
pub use pool::{PacketPool, PendingEntry};
pub use roles::{CommitterEngine, ExecutorEngine, Role, VerifierEngine};
