// Gateway dispatcher: correlates calls with gas payments and drives approve/execute
use async_trait::async_trait;
use futures::future::join_all;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use super::ledger::{GasLedger, GasPolicy};
use super::listener::{EventListener, PolledBatch};
use super::message::{MessageKind, MessageStatus, OutboundMessage};
use super::retry::RetryPolicy;
use super::{RelayData, RelayOutcome, Relayer, RelayerKind};
use crate::chains::{
    ApprovalCommand, Chain, ChainRegistry, CommandId, EventKind, GatewayEvent, GatewayEventData, TxOutcome,
};
use crate::config::RelayerConfig;
use crate::error::{ChainError, RelayError};
#[cfg(feature = "metrics")]
use crate::metrics::RelayerMetrics;

pub const UNKNOWN_DESTINATION: &str = "unknown destination chain";

type FailureCallback = Box<dyn Fn(&RelayOutcome) + Send + Sync>;

/// Dispatcher tuning
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Approve/execute submissions allowed per message
    pub execute_attempts: u32,
    /// Delay between failed submissions
    pub submit_backoff: RetryPolicy,
    /// Retry budget inside one chain poll
    pub poll_retry: RetryPolicy,
    pub max_block_range: u64,
    pub start_heights: HashMap<String, u64>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            execute_attempts: 3,
            submit_backoff: RetryPolicy::default(),
            poll_retry: RetryPolicy::default(),
            max_block_range: 1_000,
            start_heights: HashMap::new(),
        }
    }
}

impl DispatcherConfig {
    pub fn from_config(config: &RelayerConfig) -> Self {
        let retry = RetryPolicy::from_global(&config.global);
        Self {
            execute_attempts: config.global.execute_attempts.max(1),
            submit_backoff: retry.clone(),
            poll_retry: retry,
            max_block_range: config.global.max_block_range,
            start_heights: config
                .chains
                .values()
                .map(|chain| (chain.chain_id.clone(), chain.start_height))
                .collect(),
        }
    }
}

/// Messages of one destination after its approve/execute pass
struct DestinationReport {
    messages: Vec<(u64, OutboundMessage)>,
    approvals_submitted: u64,
}

/// Relays gateway messages between the chains of a registry
pub struct GatewayDispatcher {
    registry: ChainRegistry,
    listener: EventListener,
    ledger: GasLedger,
    policy: GasPolicy,
    config: DispatcherConfig,
    /// Live messages keyed by ingestion order
    messages: BTreeMap<u64, OutboundMessage>,
    index: HashMap<CommandId, u64>,
    /// Every command id ever ingested, with its latest status
    known: HashMap<CommandId, MessageStatus>,
    next_seq: u64,
    approved_seen: HashSet<CommandId>,
    executed_seen: HashSet<CommandId>,
    relay_data: RelayData,
    on_failure: Vec<FailureCallback>,
    #[cfg(feature = "metrics")]
    metrics: Option<Arc<RelayerMetrics>>,
}

impl GatewayDispatcher {
    pub fn new(registry: ChainRegistry, policy: GasPolicy, config: DispatcherConfig) -> Self {
        let mut listener = EventListener::new(config.max_block_range, config.poll_retry.clone());
        for (chain_id, height) in &config.start_heights {
            listener.set_start_height(chain_id, *height);
        }

        Self {
            registry,
            listener,
            ledger: GasLedger::new(),
            policy,
            config,
            messages: BTreeMap::new(),
            index: HashMap::new(),
            known: HashMap::new(),
            next_seq: 0,
            approved_seen: HashSet::new(),
            executed_seen: HashSet::new(),
            relay_data: RelayData::default(),
            on_failure: Vec::new(),
            #[cfg(feature = "metrics")]
            metrics: None,
        }
    }

    #[cfg(feature = "metrics")]
    pub fn with_metrics(mut self, metrics: Arc<RelayerMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Register a callback invoked once for every message that fails
    pub fn on_failure<F>(&mut self, callback: F)
    where
        F: Fn(&RelayOutcome) + Send + Sync + 'static,
    {
        self.on_failure.push(Box::new(callback));
    }

    pub fn registry(&self) -> &ChainRegistry {
        &self.registry
    }

    pub fn ledger(&self) -> &GasLedger {
        &self.ledger
    }

    pub fn ledger_mut(&mut self) -> &mut GasLedger {
        &mut self.ledger
    }

    pub fn relay_data(&self) -> &RelayData {
        &self.relay_data
    }

    pub fn clear_gas_events(&mut self) {
        self.ledger.clear_gas_events();
    }

    pub fn watermark(&self, chain_id: &str) -> Option<u64> {
        self.listener.watermark(chain_id, EventKind::All)
    }

    /// Latest status of a message, including evicted terminal ones
    pub fn status(&self, command_id: &CommandId) -> Option<MessageStatus> {
        self.index
            .get(command_id)
            .and_then(|seq| self.messages.get(seq))
            .map(|message| message.status.clone())
            .or_else(|| self.known.get(command_id).cloned())
    }

    /// Snapshot of non-terminal messages, oldest first
    pub fn pending(&self) -> Vec<OutboundMessage> {
        self.messages
            .values()
            .filter(|message| !message.status.is_terminal())
            .cloned()
            .collect()
    }

    /// Run one cycle: poll, correlate, approve, execute, report
    pub async fn relay(&mut self) -> Result<RelayData, RelayError> {
        let started = Instant::now();
        let before: HashMap<CommandId, MessageStatus> = self
            .messages
            .values()
            .map(|message| (message.command_id, message.status.clone()))
            .collect();

        let batches = self.poll_all().await;
        for batch in &batches {
            for event in &batch.events {
                self.ingest(event);
            }
        }

        self.evaluate_gas();
        let approvals = self.dispatch().await;
        let data = self.collect_outcomes(&before);

        for batch in &batches {
            self.listener.commit(batch);
        }

        self.observe_cycle(&data, approvals, started);
        if !data.is_empty() {
            info!(
                destinations = data.outcomes.len(),
                outcomes = data.outcomes.values().map(Vec::len).sum::<usize>(),
                "relay cycle finished"
            );
        }
        self.relay_data = data.clone();
        Ok(data)
    }

    /// Poll every registered chain concurrently; failed chains are skipped
    async fn poll_all(&mut self) -> Vec<PolledBatch> {
        let chains: Vec<Arc<dyn Chain>> = self.registry.iter().map(|(_, chain)| chain.clone()).collect();
        let listener = &self.listener;
        let results = join_all(chains.iter().map(|chain| async move {
            (chain.chain_id().to_string(), listener.poll(chain.as_ref(), EventKind::All).await)
        }))
        .await;

        let mut batches = Vec::with_capacity(results.len());
        for (chain_id, result) in results {
            match result {
                Ok(batch) => batches.push(batch),
                Err(e) => {
                    warn!(chain = %chain_id, error = %e, "poll failed, chain skipped this cycle");
                    self.count_rpc_error();
                }
            }
        }
        batches
    }

    fn ingest(&mut self, event: &GatewayEvent) {
        match &event.data {
            GatewayEventData::ContractCall { .. } | GatewayEventData::TokenSent { .. } => {
                let command_id = event.command_id();
                if self.known.contains_key(&command_id) {
                    debug!(command_id = %command_id, "message already known, skipping");
                    return;
                }
                let Some(message) = OutboundMessage::from_event(event) else {
                    return;
                };
                info!(
                    command_id = %command_id,
                    source = %message.source_chain,
                    destination = %message.destination_chain,
                    tx_hash = %message.source_tx_hash,
                    "new outbound message"
                );
                let seq = self.next_seq;
                self.next_seq += 1;
                self.known.insert(command_id, MessageStatus::Pending);
                self.index.insert(command_id, seq);
                self.messages.insert(seq, message);
            }
            GatewayEventData::GasPaid { .. } => {
                self.ledger.record(event);
            }
            GatewayEventData::ContractCallApproved { command_id, .. } => {
                if !self.is_settled(command_id) {
                    self.approved_seen.insert(*command_id);
                }
            }
            GatewayEventData::Executed { command_id } => {
                if !self.is_settled(command_id) {
                    self.executed_seen.insert(*command_id);
                }
            }
        }
    }

    /// Whether the message already reached a terminal status and was evicted
    fn is_settled(&self, command_id: &CommandId) -> bool {
        !self.index.contains_key(command_id)
            && self.known.get(command_id).is_some_and(MessageStatus::is_terminal)
    }

    /// Move pending messages with enough gas to `Approvable`.
    ///
    /// Token transfers carry no gas. With unpaid approval enabled, calls short
    /// of gas are approved anyway and only lose `awaiting_gas` once paid.
    fn evaluate_gas(&mut self) {
        for message in self.messages.values_mut() {
            let unpaid = message.awaiting_gas && !message.status.is_terminal();
            if message.status != MessageStatus::Pending && !unpaid {
                continue;
            }
            if !self.registry.contains(&message.destination_chain) {
                self.ledger.release(&message.command_id);
                message.fail(UNKNOWN_DESTINATION);
                continue;
            }
            if message.kind == MessageKind::TokenTransfer {
                if let Err(e) = message.advance(MessageStatus::Approvable) {
                    error!(error = %e, "unexpected transition");
                }
                continue;
            }

            let threshold = self
                .policy
                .threshold(&message.source_chain, &message.destination_chain);
            let paid = if threshold == 0 {
                0
            } else {
                self.ledger
                    .reserve(message.command_id, &message.call_key(), threshold, &self.policy)
            };
            if paid < threshold {
                if message.status == MessageStatus::Pending && self.policy.approves_unpaid() {
                    if let Err(e) = message.advance(MessageStatus::Approvable) {
                        error!(error = %e, "unexpected transition");
                        continue;
                    }
                    message.awaiting_gas = true;
                    info!(
                        command_id = %message.command_id,
                        paid = %paid,
                        threshold = %threshold,
                        "approving without gas, execution left to the destination"
                    );
                } else {
                    debug!(command_id = %message.command_id, paid = %paid, threshold = %threshold, "insufficient gas");
                }
                continue;
            }

            let consumed = self.ledger.consume(&message.command_id);
            if unpaid {
                message.awaiting_gas = false;
                info!(command_id = %message.command_id, paid = %paid, "gas covered, message executable");
                continue;
            }
            if let Err(e) = message.advance(MessageStatus::Approvable) {
                error!(error = %e, "unexpected transition");
                continue;
            }
            debug!(
                command_id = %message.command_id,
                records = consumed.len(),
                paid = %paid,
                "message approvable"
            );
        }
    }

    /// Approve and execute per destination; destinations run concurrently.
    /// Returns the number of approval transactions submitted.
    async fn dispatch(&mut self) -> u64 {
        let mut groups: BTreeMap<String, Vec<(u64, OutboundMessage)>> = BTreeMap::new();
        let ready: Vec<u64> = self
            .messages
            .iter()
            .filter(|(_, m)| matches!(m.status, MessageStatus::Approvable | MessageStatus::Approved))
            .map(|(seq, _)| *seq)
            .collect();
        for seq in ready {
            if let Some(message) = self.messages.remove(&seq) {
                groups
                    .entry(message.destination_chain.clone())
                    .or_default()
                    .push((seq, message));
            }
        }
        if groups.is_empty() {
            return 0;
        }

        let mut work = Vec::with_capacity(groups.len());
        for (destination, mut messages) in groups {
            match self.registry.get(&destination) {
                Ok(chain) => work.push((chain, messages)),
                Err(_) => {
                    for (seq, message) in messages.iter_mut() {
                        message.fail(UNKNOWN_DESTINATION);
                        self.messages.insert(*seq, message.clone());
                    }
                }
            }
        }

        let approved_seen = &self.approved_seen;
        let executed_seen = &self.executed_seen;
        let config = &self.config;
        let reports = join_all(work.into_iter().map(|(chain, messages)| {
            dispatch_destination(chain, messages, approved_seen, executed_seen, config)
        }))
        .await;

        let mut approvals = 0;
        for report in reports {
            approvals += report.approvals_submitted;
            for (seq, message) in report.messages {
                self.messages.insert(seq, message);
            }
        }
        approvals
    }

    /// Build the cycle's outcomes, notify failures and evict terminal messages
    fn collect_outcomes(&mut self, before: &HashMap<CommandId, MessageStatus>) -> RelayData {
        let mut data = RelayData::default();
        let mut terminal = Vec::new();
        let fresh = MessageStatus::Pending;

        for (seq, message) in &self.messages {
            let previous = before.get(&message.command_id).unwrap_or(&fresh);
            self.known.insert(message.command_id, message.status.clone());
            if &message.status != previous {
                let outcome = RelayOutcome {
                    command_id: message.command_id,
                    source_chain: message.source_chain.clone(),
                    status: message.status.clone(),
                    reason: message.status.reason().map(str::to_string),
                };
                if matches!(message.status, MessageStatus::Failed(_)) {
                    warn!(
                        command_id = %message.command_id,
                        destination = %message.destination_chain,
                        reason = outcome.reason.as_deref().unwrap_or_default(),
                        "message failed"
                    );
                    for callback in &self.on_failure {
                        callback(&outcome);
                    }
                }
                data.push(&message.destination_chain, outcome);
            }
            if message.status.is_terminal() {
                terminal.push((*seq, message.command_id));
            }
        }

        for (seq, command_id) in terminal {
            self.messages.remove(&seq);
            self.index.remove(&command_id);
            self.approved_seen.remove(&command_id);
            self.executed_seen.remove(&command_id);
        }
        data
    }

    fn count_rpc_error(&self) {
        #[cfg(feature = "metrics")]
        if let Some(metrics) = &self.metrics {
            metrics.rpc_errors.inc();
        }
    }

    #[allow(unused_variables)]
    fn observe_cycle(&self, data: &RelayData, approvals: u64, started: Instant) {
        #[cfg(feature = "metrics")]
        if let Some(metrics) = &self.metrics {
            let statuses = data.outcomes.values().flatten().map(|o| &o.status);
            for status in statuses {
                match status {
                    MessageStatus::Executed => metrics.messages_executed.inc(),
                    MessageStatus::Failed(_) => metrics.messages_failed.inc(),
                    _ => {}
                }
            }
            metrics.approvals_submitted.inc_by(approvals as f64);
            metrics.relay_cycle_duration.observe(started.elapsed().as_secs_f64());
        }
    }
}

/// Approve then execute the messages bound for one destination, serially
async fn dispatch_destination(
    chain: Arc<dyn Chain>,
    mut messages: Vec<(u64, OutboundMessage)>,
    approved_seen: &HashSet<CommandId>,
    executed_seen: &HashSet<CommandId>,
    config: &DispatcherConfig,
) -> DestinationReport {
    // Destination-side events settle what is already done
    for (_, message) in messages.iter_mut() {
        let command_id = message.command_id;
        if executed_seen.contains(&command_id) {
            if message.status == MessageStatus::Approvable {
                if let Err(e) = message.advance(MessageStatus::Approved) {
                    error!(error = %e, "unexpected transition");
                }
            }
            if message.advance(MessageStatus::Executed).is_ok() {
                info!(command_id = %command_id, "executed on destination by another party");
            }
        } else if message.status == MessageStatus::Approvable && approved_seen.contains(&command_id) {
            if message.advance(MessageStatus::Approved).is_ok() {
                debug!(command_id = %command_id, "approval already observed on destination");
            }
        }
    }

    let approvals_submitted = approve_all(chain.as_ref(), &mut messages, config).await;

    for (_, message) in messages.iter_mut() {
        if message.status != MessageStatus::Approved {
            continue;
        }
        let kind = message.kind;
        match kind {
            MessageKind::TokenTransfer => {
                if message.advance(MessageStatus::Executed).is_ok() {
                    info!(command_id = %message.command_id, destination = %chain.chain_id(), "token minted");
                }
            }
            MessageKind::ContractCall if message.needs_execution() => {
                execute_one(chain.as_ref(), message, config).await;
            }
            MessageKind::ContractCall => {}
        }
    }

    DestinationReport {
        messages,
        approvals_submitted,
    }
}

/// Submit approvals until every message is approved or out of attempts
async fn approve_all(chain: &dyn Chain, messages: &mut [(u64, OutboundMessage)], config: &DispatcherConfig) -> u64 {
    let mut submitted = 0;
    let mut round = 0;
    loop {
        let waiting: Vec<usize> = messages
            .iter()
            .enumerate()
            .filter(|(_, (_, m))| m.status == MessageStatus::Approvable)
            .map(|(i, _)| i)
            .collect();
        if waiting.is_empty() {
            return submitted;
        }
        if round > 0 {
            sleep(config.submit_backoff.delay(round - 1)).await;
        }
        round += 1;

        if chain.supports_batch_approval() {
            let commands: Vec<ApprovalCommand> = waiting
                .iter()
                .map(|&i| messages[i].1.approval_command())
                .collect();
            let result = chain.approve(&commands).await;
            if result.is_ok() {
                submitted += 1;
            }
            for &i in &waiting {
                apply_approval(chain.chain_id(), &mut messages[i].1, &result, config.execute_attempts);
            }
        } else {
            for &i in &waiting {
                let command = messages[i].1.approval_command();
                let result = chain.approve(std::slice::from_ref(&command)).await;
                if result.is_ok() {
                    submitted += 1;
                }
                apply_approval(chain.chain_id(), &mut messages[i].1, &result, config.execute_attempts);
            }
        }
    }
}

fn apply_approval(
    destination: &str,
    message: &mut OutboundMessage,
    result: &Result<TxOutcome, ChainError>,
    budget: u32,
) {
    match result {
        Ok(tx) => {
            if message.advance(MessageStatus::Approved).is_ok() {
                info!(
                    command_id = %message.command_id,
                    destination = %destination,
                    tx_hash = %tx.tx_hash,
                    "command approved"
                );
            }
        }
        Err(e @ ChainError::Unsupported(_)) => message.fail(e.to_string()),
        Err(e) => {
            message.attempts += 1;
            if message.attempts >= budget {
                message.fail(e.to_string());
            } else {
                warn!(
                    command_id = %message.command_id,
                    destination = %destination,
                    attempt = message.attempts,
                    error = %e,
                    "approval failed, will retry"
                );
            }
        }
    }
}

/// Execute an approved message, retrying within the attempt budget
async fn execute_one(chain: &dyn Chain, message: &mut OutboundMessage, config: &DispatcherConfig) {
    loop {
        let error = match chain.execute(&message.execute_call()).await {
            Ok(tx) => {
                if message.advance(MessageStatus::Executed).is_ok() {
                    info!(
                        command_id = %message.command_id,
                        destination = %chain.chain_id(),
                        tx_hash = %tx.tx_hash,
                        height = tx.height,
                        "message executed"
                    );
                }
                return;
            }
            Err(e @ ChainError::Unsupported(_)) => {
                message.fail(e.to_string());
                return;
            }
            Err(ChainError::Reverted(reason)) => RelayError::ExecutionReverted {
                command_id: message.command_id.to_string(),
                reason,
            },
            Err(e) => RelayError::Chain(e),
        };

        message.attempts += 1;
        if message.attempts >= config.execute_attempts {
            message.fail(error.to_string());
            return;
        }
        warn!(
            command_id = %message.command_id,
            destination = %chain.chain_id(),
            attempt = message.attempts,
            error = %error,
            "execution failed, will retry"
        );
        sleep(config.submit_backoff.delay(message.attempts - 1)).await;
    }
}

#[async_trait]
impl Relayer for GatewayDispatcher {
    fn kind(&self) -> RelayerKind {
        RelayerKind::Gateway
    }

    async fn relay_cycle(&mut self) -> Result<RelayData, RelayError> {
        self.relay().await
    }

    fn relay_data(&self) -> &RelayData {
        &self.relay_data
    }

    fn clear_gas_events(&mut self) {
        self.ledger.clear_gas_events();
    }
}
