//! JSON-RPC event source and wall-clock pacer.

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

use crate::abi::Address;
use crate::chain::{MessagingChain, NetworkConnector};
use crate::evm_client::EvmLog;

use super::{EventKind, EventSource, Pacer};

impl NetworkConnector {
    /// Contract that emits `kind` on this network.
    pub fn event_emitter(&self, kind: EventKind) -> Address {
        match kind {
            EventKind::PacketSent | EventKind::PacketVerified => self.endpoint_address(),
            EventKind::PayloadVerified => self.receive_uln_address(),
        }
    }
}

#[async_trait]
impl EventSource for NetworkConnector {
    fn network(&self) -> &str {
        self.name()
    }

    async fn head(&self) -> Result<u64> {
        self.client().block_number().await
    }

    async fn fetch(&self, kind: EventKind, from_block: u64, to_block: u64) -> Result<Vec<EvmLog>> {
        self.client()
            .get_logs(&self.event_emitter(kind), &kind.topic(), from_block, to_block)
            .await
    }

    async fn install_filter(&self, kind: EventKind, from_block: u64) -> Result<String> {
        self.client()
            .new_filter(&self.event_emitter(kind), &kind.topic(), from_block)
            .await
    }

    async fn poll_filter(&self, filter_id: &str) -> Result<Vec<EvmLog>> {
        self.client().filter_changes(filter_id).await
    }
}

/// Sleeps on the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioPacer;

#[async_trait]
impl Pacer for TokioPacer {
    async fn pause(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
