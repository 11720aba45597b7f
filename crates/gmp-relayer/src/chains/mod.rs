// Chain-related types and the adapter traits the relay engine drives
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::ChannelOrdering;
use crate::error::ChainError;

pub mod abi;
pub mod cosmos;
pub mod cosmos_tx;
pub mod evm;
pub mod factory;
pub mod registry;

pub use cosmos::CosmosChain;
pub use evm::EvmChain;
pub use factory::ChainFactory;
pub use registry::ChainRegistry;

/// Chain family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChainKind {
    Evm,
    Cosmos,
}

impl fmt::Display for ChainKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainKind::Evm => write!(f, "evm"),
            ChainKind::Cosmos => write!(f, "cosmos"),
        }
    }
}

/// Static description of a connected chain. Immutable once registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainInfo {
    pub id: String,
    pub kind: ChainKind,
    pub rpc_endpoint: String,
    /// LCD endpoint (Cosmos only)
    pub lcd_endpoint: Option<String>,
    /// Native currency symbol or denom
    pub native_denom: String,
    /// Address transactions are sent from, if the relayer can sign here
    pub signer: Option<String>,
}

/// Deterministic identifier of a relayed message.
///
/// Derived from the source chain, transaction hash and log index so that
/// re-ingesting the same source event always yields the same id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommandId(pub [u8; 32]);

impl CommandId {
    pub fn derive(source_chain: &str, tx_hash: &str, log_index: u64) -> Self {
        let preimage = format!("{}:{}:{}", source_chain, tx_hash.to_lowercase(), log_index);
        Self(abi::keccak256(preimage.as_bytes()))
    }

    pub fn from_hex(value: &str) -> Result<Self, ChainError> {
        let bytes = hex::decode(value.strip_prefix("0x").unwrap_or(value))
            .map_err(|e| ChainError::Decode(format!("command id {}: {}", value, e)))?;
        let array: [u8; 32] = bytes
            .try_into()
            .map_err(|_| ChainError::Decode(format!("command id {} is not 32 bytes", value)))?;
        Ok(Self(array))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

/// Position of an event in its chain's total order: block height, then
/// intra-block log index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventPosition {
    pub height: u64,
    pub index: u64,
}

/// Event families a listener can poll for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// `ContractCall`, `ContractCallWithToken` and `TokenSent`
    ContractCalls,
    /// Every gas-service payment family
    GasPayments,
    /// Destination-side `ContractCallApproved*` and `Executed`
    Approvals,
    All,
}

impl EventKind {
    pub fn matches(&self, data: &GatewayEventData) -> bool {
        match self {
            EventKind::All => true,
            EventKind::ContractCalls => matches!(
                data,
                GatewayEventData::ContractCall { .. } | GatewayEventData::TokenSent { .. }
            ),
            EventKind::GasPayments => matches!(data, GatewayEventData::GasPaid { .. }),
            EventKind::Approvals => matches!(
                data,
                GatewayEventData::ContractCallApproved { .. } | GatewayEventData::Executed { .. }
            ),
        }
    }
}

/// Token carried alongside a call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenAmount {
    pub symbol: String,
    pub amount: u128,
}

/// What a gas payment was made in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GasAsset {
    Native,
    /// ERC-20 address or non-native denom
    Token(String),
}

/// Fields shared by a call and the gas payments made for it
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallKey {
    pub source_chain: String,
    pub sender: String,
    pub destination_chain: String,
    pub destination_address: String,
    pub payload_hash: String,
}

impl CallKey {
    /// Addresses and hashes are compared case-insensitively
    pub fn new(
        source_chain: &str,
        sender: &str,
        destination_chain: &str,
        destination_address: &str,
        payload_hash: &str,
    ) -> Self {
        Self {
            source_chain: source_chain.to_string(),
            sender: sender.to_lowercase(),
            destination_chain: destination_chain.to_string(),
            destination_address: destination_address.to_lowercase(),
            payload_hash: payload_hash.to_lowercase(),
        }
    }
}

/// Decoded gateway or gas-service event
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEventData {
    ContractCall {
        sender: String,
        destination_chain: String,
        destination_address: String,
        payload_hash: String,
        payload: Vec<u8>,
        token: Option<TokenAmount>,
    },
    /// Plain token transfer through the gateway
    TokenSent {
        sender: String,
        destination_chain: String,
        destination_address: String,
        token: TokenAmount,
    },
    GasPaid {
        source_address: String,
        destination_chain: String,
        destination_address: String,
        payload_hash: String,
        amount: u128,
        asset: GasAsset,
        refund_address: String,
        /// Paid for a `ContractCallWithToken`
        for_token_call: bool,
    },
    ContractCallApproved {
        command_id: CommandId,
        source_chain: String,
        source_address: String,
        contract_address: String,
        payload_hash: String,
        with_mint: bool,
    },
    Executed {
        command_id: CommandId,
    },
}

/// Gateway event with its on-chain coordinates
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayEvent {
    pub chain_id: String,
    pub tx_hash: String,
    pub position: EventPosition,
    pub data: GatewayEventData,
}

impl GatewayEvent {
    /// Command id of a source-side call event
    pub fn command_id(&self) -> CommandId {
        CommandId::derive(&self.chain_id, &self.tx_hash, self.position.index)
    }

    /// Correlation key for call and gas events
    pub fn call_key(&self) -> Option<CallKey> {
        match &self.data {
            GatewayEventData::ContractCall {
                sender,
                destination_chain,
                destination_address,
                payload_hash,
                ..
            } => Some(CallKey::new(
                &self.chain_id,
                sender,
                destination_chain,
                destination_address,
                payload_hash,
            )),
            GatewayEventData::GasPaid {
                source_address,
                destination_chain,
                destination_address,
                payload_hash,
                ..
            } => Some(CallKey::new(
                &self.chain_id,
                source_address,
                destination_chain,
                destination_address,
                payload_hash,
            )),
            _ => None,
        }
    }
}

/// Gateway command kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandKind {
    ApproveContractCall,
    ApproveContractCallWithMint,
    /// Mint a transferred token straight to an account
    MintToken,
}

impl CommandKind {
    /// Command name as understood by the gateway's batched `execute(bytes)`
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::ApproveContractCall => "approveContractCall",
            CommandKind::ApproveContractCallWithMint => "approveContractCallWithMint",
            CommandKind::MintToken => "mintToken",
        }
    }
}

/// Approval submitted to a destination gateway
#[derive(Debug, Clone, PartialEq)]
pub struct ApprovalCommand {
    pub command_id: CommandId,
    pub kind: CommandKind,
    pub source_chain: String,
    pub source_address: String,
    pub contract_address: String,
    pub payload_hash: String,
    pub token: Option<TokenAmount>,
}

/// Call into the destination application once its command is approved
#[derive(Debug, Clone, PartialEq)]
pub struct ExecuteCall {
    pub command_id: CommandId,
    pub source_chain: String,
    pub source_address: String,
    pub contract_address: String,
    pub payload: Vec<u8>,
    pub token: Option<TokenAmount>,
}

/// Confirmed transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOutcome {
    pub tx_hash: String,
    pub height: u64,
}

/// Generic chain interface for gateway-style relay
#[async_trait]
pub trait Chain: Send + Sync {
    /// Static chain description
    fn info(&self) -> &ChainInfo;

    fn chain_id(&self) -> &str {
        &self.info().id
    }

    /// Get the latest block height
    async fn latest_height(&self) -> Result<u64, ChainError>;

    /// Decoded gateway/gas-service events of `kind` in `[from, to]`, in
    /// ascending (height, index) order
    async fn gateway_events(
        &self,
        kind: EventKind,
        from: u64,
        to: u64,
    ) -> Result<Vec<GatewayEvent>, ChainError>;

    /// Whether several approvals can be submitted in one transaction
    fn supports_batch_approval(&self) -> bool {
        false
    }

    /// Submit approvals; more than one command requires batch support
    async fn approve(&self, commands: &[ApprovalCommand]) -> Result<TxOutcome, ChainError>;

    /// Invoke the destination application's handler
    async fn execute(&self, call: &ExecuteCall) -> Result<TxOutcome, ChainError>;

    /// Health check
    async fn health_check(&self) -> Result<(), ChainError>;
}

/// IBC client height
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct IbcHeight {
    pub revision_number: u64,
    pub revision_height: u64,
}

/// IBC packet structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IbcPacket {
    pub sequence: u64,
    pub source_port: String,
    pub source_channel: String,
    pub destination_port: String,
    pub destination_channel: String,
    pub data: Vec<u8>,
    pub timeout_height: IbcHeight,
    pub timeout_timestamp: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Init,
    TryOpen,
    Open,
    Closed,
}

/// One end of an IBC channel as reported by its chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelEnd {
    pub port_id: String,
    pub channel_id: String,
    pub state: ChannelState,
    pub ordering: ChannelOrdering,
    pub counterparty_port_id: String,
    pub counterparty_channel_id: Option<String>,
}

/// Merkle proof of a store key at a height
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketProof {
    pub proof: Vec<u8>,
    pub height: IbcHeight,
}

/// Cosmos chain acting as one end of an IBC channel
#[async_trait]
pub trait IbcEndpoint: Send + Sync {
    fn chain_id(&self) -> &str;

    async fn latest_height(&self) -> Result<u64, ChainError>;

    /// Channels bound to `port_id`
    async fn query_channels(&self, port_id: &str) -> Result<Vec<ChannelEnd>, ChainError>;

    /// Open a channel on `port_id` towards the counterparty; returns this end
    async fn open_channel(
        &self,
        port_id: &str,
        counterparty_chain_id: &str,
        counterparty_port_id: &str,
        ordering: ChannelOrdering,
    ) -> Result<ChannelEnd, ChainError>;

    /// Sequences that still have a packet commitment on this (sending) end
    async fn packet_commitments(&self, port_id: &str, channel_id: &str) -> Result<Vec<u64>, ChainError>;

    /// Subset of `sequences` this (receiving) end has not received
    async fn unreceived_packets(
        &self,
        port_id: &str,
        channel_id: &str,
        sequences: &[u64],
    ) -> Result<Vec<u64>, ChainError>;

    /// Sequences with an acknowledgement written on this (receiving) end
    async fn packet_acknowledgements(&self, port_id: &str, channel_id: &str) -> Result<Vec<u64>, ChainError>;

    /// Subset of `sequences` whose acknowledgement this (sending) end has not processed
    async fn unreceived_acks(
        &self,
        port_id: &str,
        channel_id: &str,
        sequences: &[u64],
    ) -> Result<Vec<u64>, ChainError>;

    /// Next sequence this (receiving) end expects on an ordered channel
    async fn next_sequence_recv(&self, port_id: &str, channel_id: &str) -> Result<u64, ChainError>;

    /// Packet as emitted by `send_packet` on this end
    async fn sent_packet(&self, port_id: &str, channel_id: &str, sequence: u64) -> Result<IbcPacket, ChainError>;

    /// Acknowledgement bytes written on this (receiving) end
    async fn written_ack(&self, port_id: &str, channel_id: &str, sequence: u64) -> Result<Vec<u8>, ChainError>;

    /// Proof of the packet commitment on this (sending) end
    async fn commitment_proof(&self, port_id: &str, channel_id: &str, sequence: u64) -> Result<PacketProof, ChainError>;

    /// Proof of the acknowledgement on this (receiving) end
    async fn ack_proof(&self, port_id: &str, channel_id: &str, sequence: u64) -> Result<PacketProof, ChainError>;

    async fn submit_recv_packet(&self, packet: &IbcPacket, proof: &PacketProof) -> Result<TxOutcome, ChainError>;

    async fn submit_acknowledgement(
        &self,
        packet: &IbcPacket,
        acknowledgement: &[u8],
        proof: &PacketProof,
    ) -> Result<TxOutcome, ChainError>;
}
