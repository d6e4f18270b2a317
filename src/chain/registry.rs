//! Network registry
//!
//! Lookup of connected networks by configured name and by endpoint id.

use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::RelayError;

use super::MessagingChain;

/// Connected networks, fixed after startup.
#[derive(Clone, Default)]
pub struct NetworkRegistry {
    by_name: HashMap<String, Arc<dyn MessagingChain>>,
    by_eid: HashMap<u32, Arc<dyn MessagingChain>>,
    /// Names in registration order
    order: Vec<String>,
}

impl NetworkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a network. Fails if its name or eid is already taken.
    pub fn register(&mut self, network: Arc<dyn MessagingChain>) -> Result<()> {
        let name = network.name().to_string();
        let eid = network.eid();

        if self.by_name.contains_key(&name) {
            anyhow::bail!("Network {} registered twice", name);
        }
        if let Some(existing) = self.by_eid.get(&eid) {
            anyhow::bail!(
                "Networks {} and {} share eid {}",
                existing.name(),
                name,
                eid
            );
        }

        self.by_eid.insert(eid, network.clone());
        self.by_name.insert(name.clone(), network);
        self.order.push(name);
        Ok(())
    }

    pub fn by_name(&self, name: &str) -> Option<Arc<dyn MessagingChain>> {
        self.by_name.get(name).cloned()
    }

    pub fn by_eid(&self, eid: u32) -> Option<Arc<dyn MessagingChain>> {
        self.by_eid.get(&eid).cloned()
    }

    /// Network serving `eid`, or [`RelayError::UnsupportedDestination`].
    pub fn destination(&self, eid: u32) -> Result<Arc<dyn MessagingChain>, RelayError> {
        self.by_eid(eid)
            .ok_or(RelayError::UnsupportedDestination(eid))
    }

    /// All networks in registration order.
    pub fn networks(&self) -> Vec<Arc<dyn MessagingChain>> {
        self.order
            .iter()
            .filter_map(|name| self.by_name.get(name).cloned())
            .collect()
    }

    pub fn eids(&self) -> Vec<u32> {
        self.networks().iter().map(|n| n.eid()).collect()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
