// Registry of connected chains, keyed by chain name

use std::collections::BTreeMap;
use std::sync::Arc;

use super::{Chain, ChainInfo};
use crate::error::{RelayError, Result};

/// Chains known to the relayer. Names are unique and case-sensitive.
#[derive(Default, Clone)]
pub struct ChainRegistry {
    chains: BTreeMap<String, Arc<dyn Chain>>,
}

impl ChainRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a chain under its own id
    pub fn register(&mut self, chain: Arc<dyn Chain>) -> Result<()> {
        let id = chain.chain_id().to_string();
        if self.chains.contains_key(&id) {
            return Err(RelayError::DuplicateChain(id));
        }
        self.chains.insert(id, chain);
        Ok(())
    }

    pub fn get(&self, chain_id: &str) -> Result<Arc<dyn Chain>> {
        self.chains
            .get(chain_id)
            .cloned()
            .ok_or_else(|| RelayError::UnknownChain(chain_id.to_string()))
    }

    pub fn contains(&self, chain_id: &str) -> bool {
        self.chains.contains_key(chain_id)
    }

    pub fn remove(&mut self, chain_id: &str) -> Option<Arc<dyn Chain>> {
        self.chains.remove(chain_id)
    }

    /// Chain ids in sorted order
    pub fn ids(&self) -> Vec<String> {
        self.chains.keys().cloned().collect()
    }

    pub fn infos(&self) -> Vec<ChainInfo> {
        self.chains.values().map(|c| c.info().clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Arc<dyn Chain>)> {
        self.chains.iter()
    }

    pub fn len(&self) -> usize {
        self.chains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }
}
