// Outbound message lifecycle tracked by the gateway dispatcher
use chrono::{DateTime, Utc};
use std::fmt;

use crate::chains::{
    ApprovalCommand, CallKey, CommandId, CommandKind, EventPosition, ExecuteCall, GatewayEvent,
    GatewayEventData, TokenAmount,
};
use crate::error::RelayError;

/// Relay status of one message.
///
/// Statuses only move forward one step at a time through
/// `Pending -> Approvable -> Approved -> Executed`; any non-terminal status
/// may divert to `Failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageStatus {
    /// Waiting for enough gas
    Pending,
    /// Gas consumed, approval not yet confirmed
    Approvable,
    /// Approved on the destination gateway
    Approved,
    Executed,
    Failed(String),
}

impl MessageStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, MessageStatus::Executed | MessageStatus::Failed(_))
    }

    pub fn name(&self) -> &'static str {
        match self {
            MessageStatus::Pending => "pending",
            MessageStatus::Approvable => "approvable",
            MessageStatus::Approved => "approved",
            MessageStatus::Executed => "executed",
            MessageStatus::Failed(_) => "failed",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            MessageStatus::Pending => 0,
            MessageStatus::Approvable => 1,
            MessageStatus::Approved => 2,
            MessageStatus::Executed => 3,
            MessageStatus::Failed(_) => 4,
        }
    }

    /// Whether `self -> next` is a legal transition
    pub fn can_advance_to(&self, next: &MessageStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            MessageStatus::Failed(_) => true,
            _ => next.rank() == self.rank() + 1,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            MessageStatus::Failed(reason) => Some(reason),
            _ => None,
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageStatus::Failed(reason) => write!(f, "failed: {}", reason),
            other => write!(f, "{}", other.name()),
        }
    }
}

/// What the destination gateway is asked to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Approve, then execute the destination contract
    ContractCall,
    /// Mint the sent token to the destination account; approval completes it
    TokenTransfer,
}

/// A cross-chain call or token transfer observed on its source chain
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub command_id: CommandId,
    pub kind: MessageKind,
    pub source_chain: String,
    pub source_tx_hash: String,
    pub position: EventPosition,
    pub destination_chain: String,
    pub sender: String,
    pub destination_address: String,
    pub payload_hash: String,
    pub payload: Vec<u8>,
    pub token: Option<TokenAmount>,
    pub status: MessageStatus,
    /// Approved before its gas was covered; execution waits for payment
    pub awaiting_gas: bool,
    /// Approve/execute submissions spent so far
    pub attempts: u32,
    pub observed_at: DateTime<Utc>,
}

impl OutboundMessage {
    /// Build a message from a source-side call or transfer event
    pub fn from_event(event: &GatewayEvent) -> Option<Self> {
        let (kind, sender, destination_chain, destination_address, payload_hash, payload, token) =
            match &event.data {
                GatewayEventData::ContractCall {
                    sender,
                    destination_chain,
                    destination_address,
                    payload_hash,
                    payload,
                    token,
                } => (
                    MessageKind::ContractCall,
                    sender,
                    destination_chain,
                    destination_address,
                    payload_hash.clone(),
                    payload.clone(),
                    token.clone(),
                ),
                GatewayEventData::TokenSent {
                    sender,
                    destination_chain,
                    destination_address,
                    token,
                } => (
                    MessageKind::TokenTransfer,
                    sender,
                    destination_chain,
                    destination_address,
                    format!("0x{}", "00".repeat(32)),
                    Vec::new(),
                    Some(token.clone()),
                ),
                _ => return None,
            };

        Some(Self {
            command_id: event.command_id(),
            kind,
            source_chain: event.chain_id.clone(),
            source_tx_hash: event.tx_hash.clone(),
            position: event.position,
            destination_chain: destination_chain.clone(),
            sender: sender.clone(),
            destination_address: destination_address.clone(),
            payload_hash,
            payload,
            token,
            status: MessageStatus::Pending,
            awaiting_gas: false,
            attempts: 0,
            observed_at: Utc::now(),
        })
    }

    /// Whether the destination still needs an execute call after approval
    pub fn needs_execution(&self) -> bool {
        self.kind == MessageKind::ContractCall && !self.awaiting_gas
    }

    pub fn call_key(&self) -> CallKey {
        CallKey::new(
            &self.source_chain,
            &self.sender,
            &self.destination_chain,
            &self.destination_address,
            &self.payload_hash,
        )
    }

    pub fn approval_command(&self) -> ApprovalCommand {
        let kind = match (self.kind, &self.token) {
            (MessageKind::TokenTransfer, _) => CommandKind::MintToken,
            (MessageKind::ContractCall, Some(_)) => CommandKind::ApproveContractCallWithMint,
            (MessageKind::ContractCall, None) => CommandKind::ApproveContractCall,
        };
        ApprovalCommand {
            command_id: self.command_id,
            kind,
            source_chain: self.source_chain.clone(),
            source_address: self.sender.clone(),
            contract_address: self.destination_address.clone(),
            payload_hash: self.payload_hash.clone(),
            token: self.token.clone(),
        }
    }

    pub fn execute_call(&self) -> ExecuteCall {
        ExecuteCall {
            command_id: self.command_id,
            source_chain: self.source_chain.clone(),
            source_address: self.sender.clone(),
            contract_address: self.destination_address.clone(),
            payload: self.payload.clone(),
            token: self.token.clone(),
        }
    }

    /// Move to `next`, rejecting backward or skipping transitions
    pub fn advance(&mut self, next: MessageStatus) -> Result<(), RelayError> {
        if !self.status.can_advance_to(&next) {
            return Err(RelayError::InvalidTransition {
                command_id: self.command_id.to_string(),
                from: self.status.name().to_string(),
                to: next.name().to_string(),
            });
        }
        self.status = next;
        Ok(())
    }

    /// Divert to `Failed`; a no-op on terminal messages
    pub fn fail(&mut self, reason: impl Into<String>) {
        if !self.status.is_terminal() {
            self.status = MessageStatus::Failed(reason.into());
        }
    }
}
