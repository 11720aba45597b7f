// Core relay engine: gateway dispatch for EVM chains and packet relay between Cosmos chains

pub mod coordinator;
pub mod dispatcher;
pub mod ibc;
pub mod ledger;
pub mod listener;
pub mod message;
pub mod retry;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;

use crate::chains::CommandId;
use crate::error::RelayError;

pub use coordinator::RelayCoordinator;
pub use dispatcher::{DispatcherConfig, GatewayDispatcher};
pub use ibc::{ChannelRelayState, Direction, IbcRelayResult, IbcRelayer};
pub use ledger::{GasLedger, GasPaymentRecord, GasPolicy};
pub use listener::{EventListener, PolledBatch};
pub use message::{MessageKind, MessageStatus, OutboundMessage};
pub use retry::RetryPolicy;

/// Status change of one message during a cycle
#[derive(Debug, Clone, PartialEq)]
pub struct RelayOutcome {
    pub command_id: CommandId,
    pub source_chain: String,
    pub status: MessageStatus,
    pub reason: Option<String>,
}

/// Result of one relay cycle
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelayData {
    /// Destination chain -> outcomes, in processing order
    pub outcomes: BTreeMap<String, Vec<RelayOutcome>>,
    /// Heights at which IBC relay transactions landed
    pub heights: Vec<u64>,
}

impl RelayData {
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty() && self.heights.is_empty()
    }

    pub fn push(&mut self, destination_chain: &str, outcome: RelayOutcome) {
        self.outcomes
            .entry(destination_chain.to_string())
            .or_default()
            .push(outcome);
    }

    /// Outcomes for one destination chain
    pub fn outcomes_for(&self, destination_chain: &str) -> &[RelayOutcome] {
        self.outcomes
            .get(destination_chain)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn merge(&mut self, other: RelayData) {
        for (chain, outcomes) in other.outcomes {
            self.outcomes.entry(chain).or_default().extend(outcomes);
        }
        self.heights.extend(other.heights);
    }
}

/// Kind of relayer driven by the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RelayerKind {
    Gateway,
    Ibc,
}

impl fmt::Display for RelayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayerKind::Gateway => write!(f, "gateway"),
            RelayerKind::Ibc => write!(f, "ibc"),
        }
    }
}

/// Something the coordinator can run once per cycle
#[async_trait]
pub trait Relayer: Send {
    fn kind(&self) -> RelayerKind;

    /// Run one cycle
    async fn relay_cycle(&mut self) -> Result<RelayData, RelayError>;

    /// Result of the last cycle
    fn relay_data(&self) -> &RelayData;

    /// Drop per-run gas bookkeeping on teardown
    fn clear_gas_events(&mut self) {}
}
