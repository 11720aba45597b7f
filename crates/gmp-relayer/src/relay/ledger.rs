// Gas payment accounting: unbound, reserved and consumed records
use std::collections::{HashMap, HashSet};
use tracing::debug;

use crate::chains::{CallKey, CommandId, EventPosition, GasAsset, GatewayEvent, GatewayEventData};
use crate::config::{parse_amount, GasPolicyConfig};
use crate::error::RelayError;

/// One gas-service payment
#[derive(Debug, Clone, PartialEq)]
pub struct GasPaymentRecord {
    pub source_chain: String,
    pub tx_hash: String,
    pub position: EventPosition,
    pub key: CallKey,
    pub payer: String,
    pub refund_address: String,
    pub amount: u128,
    pub asset: GasAsset,
    pub for_token_call: bool,
    /// Message the record is reserved for or was consumed by
    pub command_id: Option<CommandId>,
}

impl GasPaymentRecord {
    pub fn from_event(event: &GatewayEvent) -> Option<Self> {
        let GatewayEventData::GasPaid {
            source_address,
            amount,
            asset,
            refund_address,
            for_token_call,
            ..
        } = &event.data
        else {
            return None;
        };

        Some(Self {
            source_chain: event.chain_id.clone(),
            tx_hash: event.tx_hash.clone(),
            position: event.position,
            key: event.call_key()?,
            payer: source_address.clone(),
            refund_address: refund_address.clone(),
            amount: *amount,
            asset: asset.clone(),
            for_token_call: *for_token_call,
            command_id: None,
        })
    }

    fn identity(&self) -> (String, String, EventPosition) {
        (self.source_chain.clone(), self.tx_hash.clone(), self.position)
    }
}

/// Required gas per (source, destination) route
#[derive(Debug, Clone)]
pub struct GasPolicy {
    default_threshold: u128,
    count_token_payments: bool,
    approve_unpaid: bool,
    routes: HashMap<(String, String), u128>,
}

impl Default for GasPolicy {
    fn default() -> Self {
        Self {
            default_threshold: 1,
            count_token_payments: false,
            approve_unpaid: false,
            routes: HashMap::new(),
        }
    }
}

impl GasPolicy {
    pub fn new(default_threshold: u128) -> Self {
        Self {
            default_threshold,
            ..Self::default()
        }
    }

    /// No payment required on any route
    pub fn waived() -> Self {
        Self::new(0)
    }

    pub fn from_config(config: &GasPolicyConfig) -> Result<Self, RelayError> {
        let parse = |value: &str| {
            parse_amount(value).map_err(|e| RelayError::Config(format!("{:#}", e)))
        };
        let mut routes = HashMap::new();
        for route in &config.routes {
            routes.insert(
                (route.source_chain.clone(), route.destination_chain.clone()),
                parse(&route.threshold)?,
            );
        }
        Ok(Self {
            default_threshold: parse(&config.default_threshold)?,
            count_token_payments: config.count_token_payments,
            approve_unpaid: config.approve_unpaid,
            routes,
        })
    }

    pub fn with_route(mut self, source_chain: &str, destination_chain: &str, threshold: u128) -> Self {
        self.routes
            .insert((source_chain.to_string(), destination_chain.to_string()), threshold);
        self
    }

    pub fn with_token_payments(mut self, count: bool) -> Self {
        self.count_token_payments = count;
        self
    }

    /// Approve calls still short of gas, leaving execution to whoever pays
    /// or to a manual `execute` on the destination
    pub fn with_unpaid_approval(mut self, approve: bool) -> Self {
        self.approve_unpaid = approve;
        self
    }

    pub fn approves_unpaid(&self) -> bool {
        self.approve_unpaid
    }

    pub fn threshold(&self, source_chain: &str, destination_chain: &str) -> u128 {
        self.routes
            .get(&(source_chain.to_string(), destination_chain.to_string()))
            .copied()
            .unwrap_or(self.default_threshold)
    }

    /// Whether a record counts toward a threshold
    pub fn counts(&self, record: &GasPaymentRecord) -> bool {
        matches!(record.asset, GasAsset::Native) || self.count_token_payments
    }
}

/// Gas payments seen by one relayer instance
#[derive(Debug, Default)]
pub struct GasLedger {
    unbound: Vec<GasPaymentRecord>,
    reserved: HashMap<CommandId, Vec<GasPaymentRecord>>,
    consumed: Vec<GasPaymentRecord>,
    contract_call_gas_events: Vec<GasPaymentRecord>,
    contract_call_with_token_gas_events: Vec<GasPaymentRecord>,
    seen: HashSet<(String, String, EventPosition)>,
}

impl GasLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a gas event; returns false for duplicates and non-gas events
    pub fn record(&mut self, event: &GatewayEvent) -> bool {
        let Some(record) = GasPaymentRecord::from_event(event) else {
            return false;
        };
        if !self.seen.insert(record.identity()) {
            return false;
        }

        if record.for_token_call {
            self.contract_call_with_token_gas_events.push(record.clone());
        } else {
            self.contract_call_gas_events.push(record.clone());
        }
        debug!(
            chain = %record.source_chain,
            tx_hash = %record.tx_hash,
            amount = %record.amount,
            "gas payment recorded"
        );
        self.unbound.push(record);
        true
    }

    /// Reserve unbound payments matching `key` for `command_id` until the
    /// counted total reaches `threshold`. Returns the counted total now
    /// reserved for the message.
    pub fn reserve(&mut self, command_id: CommandId, key: &CallKey, threshold: u128, policy: &GasPolicy) -> u128 {
        let mut total = self.reserved_total(&command_id, policy);
        let mut index = 0;
        while total < threshold && index < self.unbound.len() {
            let candidate = &self.unbound[index];
            if &candidate.key == key && policy.counts(candidate) {
                let mut record = self.unbound.remove(index);
                total = total.saturating_add(record.amount);
                record.command_id = Some(command_id);
                self.reserved.entry(command_id).or_default().push(record);
            } else {
                index += 1;
            }
        }
        total
    }

    pub fn reserved_total(&self, command_id: &CommandId, policy: &GasPolicy) -> u128 {
        self.reserved
            .get(command_id)
            .map(|records| {
                records
                    .iter()
                    .filter(|r| policy.counts(r))
                    .fold(0u128, |acc, r| acc.saturating_add(r.amount))
            })
            .unwrap_or(0)
    }

    /// Spend everything reserved for `command_id`; each record is consumed once
    pub fn consume(&mut self, command_id: &CommandId) -> Vec<GasPaymentRecord> {
        let records = self.reserved.remove(command_id).unwrap_or_default();
        self.consumed.extend(records.iter().cloned());
        records
    }

    /// Return reservations of a message that will never be approved
    pub fn release(&mut self, command_id: &CommandId) {
        if let Some(records) = self.reserved.remove(command_id) {
            self.unbound.extend(records.into_iter().map(|mut r| {
                r.command_id = None;
                r
            }));
        }
    }

    pub fn consumed(&self) -> &[GasPaymentRecord] {
        &self.consumed
    }

    pub fn consumed_for(&self, command_id: &CommandId) -> u128 {
        self.consumed
            .iter()
            .filter(|r| r.command_id.as_ref() == Some(command_id))
            .fold(0u128, |acc, r| acc.saturating_add(r.amount))
    }

    pub fn unbound(&self) -> &[GasPaymentRecord] {
        &self.unbound
    }

    pub fn contract_call_gas_events(&self) -> &[GasPaymentRecord] {
        &self.contract_call_gas_events
    }

    pub fn contract_call_with_token_gas_events(&self) -> &[GasPaymentRecord] {
        &self.contract_call_with_token_gas_events
    }

    /// Drop the gas-event collections between test runs
    pub fn clear_gas_events(&mut self) {
        self.contract_call_gas_events.clear();
        self.contract_call_with_token_gas_events.clear();
    }

    /// Drop everything, including reservations and consumption history
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
