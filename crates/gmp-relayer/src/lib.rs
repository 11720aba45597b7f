// Cross-chain message relayer library
// This module structure exposes the relayer components for testing and external use

pub mod chains;
pub mod config;
pub mod error;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod monitor;
pub mod relay;
pub mod utils;

// Re-export commonly used types for convenience
pub use chains::{Chain, ChainFactory, ChainRegistry, CommandId, GatewayEvent, IbcEndpoint, IbcPacket};
pub use config::{ChainConfig, ChainSpecificConfig, ChannelConfig, RelayerConfig};
pub use error::{ChainError, RelayError};
#[cfg(feature = "metrics")]
pub use metrics::RelayerMetrics;
pub use monitor::{EventHub, EventTag, MonitorConfig, RelayEvent, SubscriptionHandle};
pub use relay::{
    DispatcherConfig, GatewayDispatcher, GasPolicy, IbcRelayer, MessageStatus, RelayCoordinator, RelayData,
    RelayOutcome, Relayer, RelayerKind,
};
