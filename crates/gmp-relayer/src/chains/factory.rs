// Chain factory for creating appropriate chain implementations
// Handles EVM gateways and Cosmos chains (gateway and IBC roles)

use std::sync::Arc;

use super::{Chain, CosmosChain, EvmChain, IbcEndpoint};
use crate::config::{ChainConfig, ChainSpecificConfig};
use crate::error::ChainError;

/// Factory for creating chain instances based on configuration
pub struct ChainFactory;

impl ChainFactory {
    /// Create a chain instance from configuration
    pub fn create_chain(config: &ChainConfig) -> Result<Arc<dyn Chain>, ChainError> {
        match &config.config {
            ChainSpecificConfig::Evm { .. } => {
                let chain = EvmChain::new(config)?;
                Ok(Arc::new(chain))
            }
            ChainSpecificConfig::Cosmos { .. } => {
                let chain = CosmosChain::new(config)?;
                Ok(Arc::new(chain))
            }
        }
    }

    /// Create an IBC endpoint; only Cosmos chains carry IBC channels
    pub fn create_ibc_endpoint(config: &ChainConfig) -> Result<Arc<dyn IbcEndpoint>, ChainError> {
        match &config.config {
            ChainSpecificConfig::Cosmos { .. } => {
                let chain = CosmosChain::new(config)?;
                Ok(Arc::new(chain))
            }
            ChainSpecificConfig::Evm { .. } => Err(ChainError::Unsupported(format!(
                "chain {} has no IBC module",
                config.chain_id
            ))),
        }
    }
}
