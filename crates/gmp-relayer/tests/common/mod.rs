// In-memory chains shared by the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use gmp_relayer::chains::{
    abi, ApprovalCommand, Chain, ChainInfo, ChainKind, ChannelEnd, ChannelState, CommandId, CommandKind,
    EventKind, EventPosition, ExecuteCall, GasAsset, GatewayEvent, GatewayEventData, IbcEndpoint,
    IbcHeight, IbcPacket, PacketProof, TokenAmount, TxOutcome,
};
use gmp_relayer::config::{ChannelConfig, ChannelOrdering};
use gmp_relayer::relay::{DispatcherConfig, RetryPolicy};
use gmp_relayer::ChainError;

pub const SENDER: &str = "0x00000000000000000000000000000000000000a1";
pub const DEST_CONTRACT: &str = "0x00000000000000000000000000000000000000b2";

pub fn payload_hash(payload: &[u8]) -> String {
    format!("0x{}", hex::encode(abi::keccak256(payload)))
}

/// Dispatcher settings that never sleep between retries
pub fn dispatcher_config(execute_attempts: u32) -> DispatcherConfig {
    DispatcherConfig {
        execute_attempts,
        submit_backoff: RetryPolicy::immediate(0),
        poll_retry: RetryPolicy::immediate(1),
        ..DispatcherConfig::default()
    }
}

/// Gateway chain serving scripted events and recording every write
pub struct MockChain {
    info: ChainInfo,
    events: Mutex<Vec<GatewayEvent>>,
    head: AtomicU64,
    batch: bool,
    approvals: Mutex<Vec<Vec<CommandId>>>,
    commands: Mutex<Vec<ApprovalCommand>>,
    executions: Mutex<Vec<CommandId>>,
    execute_attempts: AtomicU32,
    reverting_payloads: Mutex<HashSet<Vec<u8>>>,
    poll_failures: AtomicU32,
    approve_failures: AtomicU32,
}

impl MockChain {
    fn with_kind(id: &str, kind: ChainKind, batch: bool) -> Self {
        Self {
            info: ChainInfo {
                id: id.to_string(),
                kind,
                rpc_endpoint: format!("mock://{}", id),
                lcd_endpoint: None,
                native_denom: "ETH".to_string(),
                signer: Some(SENDER.to_string()),
            },
            events: Mutex::new(vec![]),
            head: AtomicU64::new(0),
            batch,
            approvals: Mutex::new(vec![]),
            commands: Mutex::new(vec![]),
            executions: Mutex::new(vec![]),
            execute_attempts: AtomicU32::new(0),
            reverting_payloads: Mutex::new(HashSet::new()),
            poll_failures: AtomicU32::new(0),
            approve_failures: AtomicU32::new(0),
        }
    }

    pub fn evm(id: &str, batch: bool) -> Arc<Self> {
        Arc::new(Self::with_kind(id, ChainKind::Evm, batch))
    }

    /// Source-only chain; gateway commands are rejected
    pub fn cosmos(id: &str) -> Arc<Self> {
        Arc::new(Self::with_kind(id, ChainKind::Cosmos, false))
    }

    /// Emit events in one new block and one transaction
    pub fn emit_block(&self, data: Vec<GatewayEventData>) -> Vec<GatewayEvent> {
        let height = self.head.fetch_add(1, Ordering::SeqCst) + 1;
        let tx_hash = format!("0x{:064x}", height);
        let events: Vec<GatewayEvent> = data
            .into_iter()
            .enumerate()
            .map(|(index, data)| GatewayEvent {
                chain_id: self.info.id.clone(),
                tx_hash: tx_hash.clone(),
                position: EventPosition {
                    height,
                    index: index as u64,
                },
                data,
            })
            .collect();
        self.events.lock().unwrap().extend(events.iter().cloned());
        events
    }

    /// Emit a `ContractCall` and return its command id
    pub fn call(&self, destination: &str, payload: &[u8]) -> CommandId {
        self.emit_block(vec![contract_call(destination, payload)])[0].command_id()
    }

    /// Emit a `TokenSent` and return its command id
    pub fn send_token(&self, destination: &str, recipient: &str, symbol: &str, amount: u128) -> CommandId {
        self.emit_block(vec![token_sent(destination, recipient, symbol, amount)])[0].command_id()
    }

    pub fn pay_gas(&self, destination: &str, payload: &[u8], amount: u128) {
        self.emit_block(vec![gas_paid(destination, payload, amount)]);
    }

    /// Mine empty blocks
    pub fn advance(&self, blocks: u64) {
        self.head.fetch_add(blocks, Ordering::SeqCst);
    }

    pub fn head(&self) -> u64 {
        self.head.load(Ordering::SeqCst)
    }

    pub fn revert_payload(&self, payload: &[u8]) {
        self.reverting_payloads.lock().unwrap().insert(payload.to_vec());
    }

    pub fn fail_polls(&self, count: u32) {
        self.poll_failures.store(count, Ordering::SeqCst);
    }

    pub fn fail_approvals(&self, count: u32) {
        self.approve_failures.store(count, Ordering::SeqCst);
    }

    /// Approval transactions, each with the command ids it carried
    pub fn approvals(&self) -> Vec<Vec<CommandId>> {
        self.approvals.lock().unwrap().clone()
    }

    /// Every approved command, in submission order
    pub fn commands(&self) -> Vec<ApprovalCommand> {
        self.commands.lock().unwrap().clone()
    }

    pub fn command_kinds(&self) -> Vec<CommandKind> {
        self.commands().iter().map(|c| c.kind).collect()
    }

    /// Successful executions
    pub fn executions(&self) -> Vec<CommandId> {
        self.executions.lock().unwrap().clone()
    }

    /// Execute submissions, including reverted ones
    pub fn execute_attempts(&self) -> u32 {
        self.execute_attempts.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.approvals.lock().unwrap().len() + self.execute_attempts() as usize
    }

    fn tx(&self, label: &str) -> TxOutcome {
        let height = self.head();
        TxOutcome {
            tx_hash: format!("0x{}{:x}", label, height),
            height,
        }
    }
}

#[async_trait]
impl Chain for MockChain {
    fn info(&self) -> &ChainInfo {
        &self.info
    }

    async fn latest_height(&self) -> Result<u64, ChainError> {
        let left = self.poll_failures.load(Ordering::SeqCst);
        if left > 0 {
            self.poll_failures.store(left - 1, Ordering::SeqCst);
            return Err(ChainError::Transport("connection reset by peer".into()));
        }
        Ok(self.head())
    }

    async fn gateway_events(&self, kind: EventKind, from: u64, to: u64) -> Result<Vec<GatewayEvent>, ChainError> {
        Ok(self
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.position.height >= from && e.position.height <= to && kind.matches(&e.data))
            .cloned()
            .collect())
    }

    fn supports_batch_approval(&self) -> bool {
        self.batch
    }

    async fn approve(&self, commands: &[ApprovalCommand]) -> Result<TxOutcome, ChainError> {
        if self.info.kind == ChainKind::Cosmos {
            return Err(ChainError::Unsupported(format!("{} has no gateway", self.info.id)));
        }
        let left = self.approve_failures.load(Ordering::SeqCst);
        if left > 0 {
            self.approve_failures.store(left - 1, Ordering::SeqCst);
            return Err(ChainError::Rpc("nonce too low".into()));
        }
        self.approvals
            .lock()
            .unwrap()
            .push(commands.iter().map(|c| c.command_id).collect());
        self.commands.lock().unwrap().extend(commands.iter().cloned());
        Ok(self.tx("a"))
    }

    async fn execute(&self, call: &ExecuteCall) -> Result<TxOutcome, ChainError> {
        if self.info.kind == ChainKind::Cosmos {
            return Err(ChainError::Unsupported(format!("{} has no gateway", self.info.id)));
        }
        self.execute_attempts.fetch_add(1, Ordering::SeqCst);
        if self.reverting_payloads.lock().unwrap().contains(&call.payload) {
            return Err(ChainError::Reverted("ExecuteFailed()".into()));
        }
        self.executions.lock().unwrap().push(call.command_id);
        Ok(self.tx("e"))
    }

    async fn health_check(&self) -> Result<(), ChainError> {
        Ok(())
    }
}

pub fn contract_call(destination: &str, payload: &[u8]) -> GatewayEventData {
    GatewayEventData::ContractCall {
        sender: SENDER.to_string(),
        destination_chain: destination.to_string(),
        destination_address: DEST_CONTRACT.to_string(),
        payload_hash: payload_hash(payload),
        payload: payload.to_vec(),
        token: None,
    }
}

pub fn token_sent(destination: &str, recipient: &str, symbol: &str, amount: u128) -> GatewayEventData {
    GatewayEventData::TokenSent {
        sender: SENDER.to_string(),
        destination_chain: destination.to_string(),
        destination_address: recipient.to_string(),
        token: TokenAmount {
            symbol: symbol.to_string(),
            amount,
        },
    }
}

pub fn gas_paid(destination: &str, payload: &[u8], amount: u128) -> GatewayEventData {
    GatewayEventData::GasPaid {
        source_address: SENDER.to_string(),
        destination_chain: destination.to_string(),
        destination_address: DEST_CONTRACT.to_string(),
        payload_hash: payload_hash(payload),
        amount,
        asset: GasAsset::Native,
        refund_address: SENDER.to_string(),
        for_token_call: false,
    }
}

/// One end of an IBC channel. Receiving a packet writes its acknowledgement
/// at once; processing an acknowledgement clears the sent commitment.
pub struct MockEndpoint {
    chain_id: String,
    port: String,
    channel: String,
    counterparty_port: String,
    counterparty_channel: String,
    ordering: ChannelOrdering,
    channels: Mutex<Vec<ChannelEnd>>,
    open_calls: AtomicU32,
    sent: Mutex<BTreeSet<u64>>,
    received: Mutex<BTreeSet<u64>>,
    acks: Mutex<BTreeSet<u64>>,
    next_recv: AtomicU64,
    failing_recv: Mutex<HashSet<u64>>,
    failing_ack: Mutex<HashSet<u64>>,
    recv_order: Mutex<Vec<u64>>,
    height: AtomicU64,
}

impl MockEndpoint {
    pub fn new(
        chain_id: &str,
        channel: &str,
        counterparty_channel: &str,
        ordering: ChannelOrdering,
        base_height: u64,
    ) -> Self {
        Self {
            chain_id: chain_id.to_string(),
            port: "transfer".to_string(),
            channel: channel.to_string(),
            counterparty_port: "transfer".to_string(),
            counterparty_channel: counterparty_channel.to_string(),
            ordering,
            channels: Mutex::new(vec![]),
            open_calls: AtomicU32::new(0),
            sent: Mutex::new(BTreeSet::new()),
            received: Mutex::new(BTreeSet::new()),
            acks: Mutex::new(BTreeSet::new()),
            next_recv: AtomicU64::new(1),
            failing_recv: Mutex::new(HashSet::new()),
            failing_ack: Mutex::new(HashSet::new()),
            recv_order: Mutex::new(vec![]),
            height: AtomicU64::new(base_height),
        }
    }

    fn own_end(&self) -> ChannelEnd {
        ChannelEnd {
            port_id: self.port.clone(),
            channel_id: self.channel.clone(),
            state: ChannelState::Open,
            ordering: self.ordering,
            counterparty_port_id: self.counterparty_port.clone(),
            counterparty_channel_id: Some(self.counterparty_channel.clone()),
        }
    }

    /// Report this end's channel as already open
    pub fn mark_open(&self) {
        self.channels.lock().unwrap().push(self.own_end());
    }

    /// Report an extra channel end from query_channels
    pub fn add_channel(&self, channel: &str, counterparty_channel: &str) {
        let mut end = self.own_end();
        end.channel_id = channel.to_string();
        end.counterparty_channel_id = Some(counterparty_channel.to_string());
        self.channels.lock().unwrap().push(end);
    }

    /// Commit packets for sending on this end
    pub fn send(&self, sequences: &[u64]) {
        self.sent.lock().unwrap().extend(sequences.iter().copied());
    }

    pub fn fail_recv(&self, sequence: u64) {
        self.failing_recv.lock().unwrap().insert(sequence);
    }

    pub fn heal_recv(&self, sequence: u64) {
        self.failing_recv.lock().unwrap().remove(&sequence);
    }

    /// Reject acknowledgements for `sequence` submitted on this end
    pub fn fail_ack(&self, sequence: u64) {
        self.failing_ack.lock().unwrap().insert(sequence);
    }

    pub fn heal_ack(&self, sequence: u64) {
        self.failing_ack.lock().unwrap().remove(&sequence);
    }

    pub fn open_calls(&self) -> u32 {
        self.open_calls.load(Ordering::SeqCst)
    }

    /// Sequences received on this end, in submission order
    pub fn recv_order(&self) -> Vec<u64> {
        self.recv_order.lock().unwrap().clone()
    }

    /// Commitments still waiting for an acknowledgement
    pub fn outstanding(&self) -> Vec<u64> {
        self.sent.lock().unwrap().iter().copied().collect()
    }

    fn bump(&self) -> u64 {
        self.height.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn proof(&self) -> PacketProof {
        PacketProof {
            proof: vec![0xaa],
            height: IbcHeight {
                revision_number: 0,
                revision_height: self.height.load(Ordering::SeqCst),
            },
        }
    }
}

/// Two ends of `transfer/channel-0` (wasm) <-> `transfer/channel-7` (axelar).
/// Transactions land from height 101 on wasm and 201 on axelar.
pub fn endpoint_pair(ordering: ChannelOrdering, open: bool) -> (Arc<MockEndpoint>, Arc<MockEndpoint>) {
    let a = MockEndpoint::new("wasm", "channel-0", "channel-7", ordering, 100);
    let b = MockEndpoint::new("axelar", "channel-7", "channel-0", ordering, 200);
    if open {
        a.mark_open();
        b.mark_open();
    }
    (Arc::new(a), Arc::new(b))
}

pub fn channel_config(ordering: ChannelOrdering) -> ChannelConfig {
    ChannelConfig {
        id: "wasm-axelar".to_string(),
        chain_a: "wasm".to_string(),
        chain_b: "axelar".to_string(),
        port_a: "transfer".to_string(),
        port_b: "transfer".to_string(),
        channel_a: None,
        channel_b: None,
        ordering,
        max_parallel_packets: 4,
    }
}

#[async_trait]
impl IbcEndpoint for MockEndpoint {
    fn chain_id(&self) -> &str {
        &self.chain_id
    }

    async fn latest_height(&self) -> Result<u64, ChainError> {
        Ok(self.height.load(Ordering::SeqCst))
    }

    async fn query_channels(&self, port_id: &str) -> Result<Vec<ChannelEnd>, ChainError> {
        Ok(self
            .channels
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.port_id == port_id)
            .cloned()
            .collect())
    }

    async fn open_channel(
        &self,
        port_id: &str,
        _counterparty_chain_id: &str,
        counterparty_port_id: &str,
        ordering: ChannelOrdering,
    ) -> Result<ChannelEnd, ChainError> {
        self.open_calls.fetch_add(1, Ordering::SeqCst);
        let end = ChannelEnd {
            port_id: port_id.to_string(),
            counterparty_port_id: counterparty_port_id.to_string(),
            ordering,
            ..self.own_end()
        };
        self.channels.lock().unwrap().push(end.clone());
        Ok(end)
    }

    async fn packet_commitments(&self, _port_id: &str, channel_id: &str) -> Result<Vec<u64>, ChainError> {
        if channel_id != self.channel {
            return Ok(vec![]);
        }
        Ok(self.outstanding())
    }

    async fn unreceived_packets(
        &self,
        _port_id: &str,
        _channel_id: &str,
        sequences: &[u64],
    ) -> Result<Vec<u64>, ChainError> {
        let received = self.received.lock().unwrap();
        Ok(sequences.iter().copied().filter(|s| !received.contains(s)).collect())
    }

    async fn packet_acknowledgements(&self, _port_id: &str, _channel_id: &str) -> Result<Vec<u64>, ChainError> {
        Ok(self.acks.lock().unwrap().iter().copied().collect())
    }

    async fn unreceived_acks(
        &self,
        _port_id: &str,
        _channel_id: &str,
        sequences: &[u64],
    ) -> Result<Vec<u64>, ChainError> {
        let sent = self.sent.lock().unwrap();
        Ok(sequences.iter().copied().filter(|s| sent.contains(s)).collect())
    }

    async fn next_sequence_recv(&self, _port_id: &str, _channel_id: &str) -> Result<u64, ChainError> {
        Ok(self.next_recv.load(Ordering::SeqCst))
    }

    async fn sent_packet(&self, port_id: &str, channel_id: &str, sequence: u64) -> Result<IbcPacket, ChainError> {
        if !self.sent.lock().unwrap().contains(&sequence) {
            return Err(ChainError::NotFound(format!("send_packet {}", sequence)));
        }
        Ok(IbcPacket {
            sequence,
            source_port: port_id.to_string(),
            source_channel: channel_id.to_string(),
            destination_port: self.counterparty_port.clone(),
            destination_channel: self.counterparty_channel.clone(),
            data: format!("packet-{}", sequence).into_bytes(),
            timeout_height: IbcHeight::default(),
            timeout_timestamp: 0,
        })
    }

    async fn written_ack(&self, _port_id: &str, _channel_id: &str, sequence: u64) -> Result<Vec<u8>, ChainError> {
        if !self.acks.lock().unwrap().contains(&sequence) {
            return Err(ChainError::NotFound(format!("write_acknowledgement {}", sequence)));
        }
        Ok(br#"{"result":"AQ=="}"#.to_vec())
    }

    async fn commitment_proof(&self, _port_id: &str, _channel_id: &str, _sequence: u64) -> Result<PacketProof, ChainError> {
        Ok(self.proof())
    }

    async fn ack_proof(&self, _port_id: &str, _channel_id: &str, _sequence: u64) -> Result<PacketProof, ChainError> {
        Ok(self.proof())
    }

    async fn submit_recv_packet(&self, packet: &IbcPacket, _proof: &PacketProof) -> Result<TxOutcome, ChainError> {
        let sequence = packet.sequence;
        if self.failing_recv.lock().unwrap().contains(&sequence) {
            return Err(ChainError::Rpc(format!("packet {} verification failed", sequence)));
        }
        if self.ordering == ChannelOrdering::Ordered && sequence != self.next_recv.load(Ordering::SeqCst) {
            return Err(ChainError::Rpc(format!("packet sequence {} out of order", sequence)));
        }
        self.received.lock().unwrap().insert(sequence);
        self.acks.lock().unwrap().insert(sequence);
        self.recv_order.lock().unwrap().push(sequence);
        self.next_recv.fetch_max(sequence + 1, Ordering::SeqCst);
        let height = self.bump();
        Ok(TxOutcome {
            tx_hash: format!("{}-recv-{}", self.chain_id, sequence),
            height,
        })
    }

    async fn submit_acknowledgement(
        &self,
        packet: &IbcPacket,
        _acknowledgement: &[u8],
        _proof: &PacketProof,
    ) -> Result<TxOutcome, ChainError> {
        if self.failing_ack.lock().unwrap().contains(&packet.sequence) {
            return Err(ChainError::Rpc(format!("acknowledgement {} proof rejected", packet.sequence)));
        }
        self.sent.lock().unwrap().remove(&packet.sequence);
        let height = self.bump();
        Ok(TxOutcome {
            tx_hash: format!("{}-ack-{}", self.chain_id, packet.sequence),
            height,
        })
    }
}
