// Packet relay between two Cosmos chains over one IBC channel
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{RelayData, Relayer, RelayerKind};
use crate::chains::{ChannelEnd, ChannelState, IbcEndpoint};
use crate::config::{ChannelConfig, ChannelOrdering};
use crate::error::{ChainError, RelayError};
use crate::utils::parse_channel_id;
#[cfg(feature = "metrics")]
use crate::metrics::RelayerMetrics;

/// Direction of packet flow over a channel link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Packets sent on chain A, received on chain B
    AToB,
    /// Packets sent on chain B, received on chain A
    BToA,
}

impl Direction {
    pub fn reverse(&self) -> Self {
        match self {
            Direction::AToB => Direction::BToA,
            Direction::BToA => Direction::AToB,
        }
    }
}

/// Channel ids of a link and the last relayed sequence per direction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRelayState {
    pub link_id: String,
    pub channel_a: Option<String>,
    pub channel_b: Option<String>,
    last_relayed: HashMap<Direction, u64>,
}

impl ChannelRelayState {
    pub fn new(link_id: &str, channel_a: Option<String>, channel_b: Option<String>) -> Self {
        Self {
            link_id: link_id.to_string(),
            channel_a,
            channel_b,
            last_relayed: HashMap::new(),
        }
    }

    /// Highest sequence relayed in `direction`; 0 before the first packet
    pub fn last_relayed(&self, direction: Direction) -> u64 {
        self.last_relayed.get(&direction).copied().unwrap_or(0)
    }

    /// Never moves backwards
    fn advance(&mut self, direction: Direction, sequence: u64) {
        let entry = self.last_relayed.entry(direction).or_insert(0);
        *entry = (*entry).max(sequence);
    }

    pub fn is_established(&self) -> bool {
        self.channel_a.is_some() && self.channel_b.is_some()
    }
}

/// Heights at which relay transactions landed: receives first, then acks
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IbcRelayResult {
    pub heights: Vec<u64>,
}

/// One direction of the link, resolved to endpoints and channel ids
#[derive(Clone, Copy)]
struct Leg<'a> {
    source: &'a dyn IbcEndpoint,
    destination: &'a dyn IbcEndpoint,
    source_port: &'a str,
    source_channel: &'a str,
    destination_port: &'a str,
    destination_channel: &'a str,
}

impl Leg<'_> {
    fn label(&self) -> String {
        format!("{}/{}", self.source_channel, self.source_port)
    }
}

/// Outcome of relaying one direction's receive packets or acknowledgements
#[derive(Default)]
struct DirectionReport {
    /// (sequence, height), ascending by sequence
    landed: Vec<(u64, u64)>,
    /// Highest sequence below which everything pending was relayed
    advance_to: Option<u64>,
    error: Option<RelayError>,
}

pub struct IbcRelayer {
    config: ChannelConfig,
    chain_a: Arc<dyn IbcEndpoint>,
    chain_b: Arc<dyn IbcEndpoint>,
    state: ChannelRelayState,
    relay_data: RelayData,
    #[cfg(feature = "metrics")]
    metrics: Option<Arc<RelayerMetrics>>,
}

impl IbcRelayer {
    pub fn new(config: ChannelConfig, chain_a: Arc<dyn IbcEndpoint>, chain_b: Arc<dyn IbcEndpoint>) -> Self {
        let state = ChannelRelayState::new(&config.id, config.channel_a.clone(), config.channel_b.clone());
        Self {
            config,
            chain_a,
            chain_b,
            state,
            relay_data: RelayData::default(),
            #[cfg(feature = "metrics")]
            metrics: None,
        }
    }

    #[cfg(feature = "metrics")]
    pub fn with_metrics(mut self, metrics: Arc<RelayerMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn state(&self) -> &ChannelRelayState {
        &self.state
    }

    pub fn link_id(&self) -> &str {
        &self.config.id
    }

    /// Find or open the channel between both ends. Returns (channel on A, channel on B).
    pub async fn setup(&mut self) -> Result<(String, String), RelayError> {
        if let (Some(a), Some(b)) = (&self.state.channel_a, &self.state.channel_b) {
            return Ok((a.clone(), b.clone()));
        }

        let ends_a = self.chain_a.query_channels(&self.config.port_a).await?;
        let ends_b = self.chain_b.query_channels(&self.config.port_b).await?;

        if let Some((a, b)) = self.find_open_pair(&ends_a, &ends_b) {
            info!(link = %self.config.id, channel_a = %a, channel_b = %b, "found existing channel");
            self.record(a.clone(), b.clone());
            return Ok((a, b));
        }

        info!(
            link = %self.config.id,
            chain_a = %self.chain_a.chain_id(),
            chain_b = %self.chain_b.chain_id(),
            "opening channel"
        );
        let end = self
            .chain_a
            .open_channel(
                &self.config.port_a,
                self.chain_b.chain_id(),
                &self.config.port_b,
                self.config.ordering,
            )
            .await?;
        let counterparty = end.counterparty_channel_id.clone().ok_or_else(|| {
            ChainError::NotFound(format!(
                "counterparty of {} on {} after channel open",
                end.channel_id,
                self.chain_a.chain_id()
            ))
        })?;
        self.record(end.channel_id.clone(), counterparty.clone());
        Ok((end.channel_id, counterparty))
    }

    /// Newest open channel pair matching the link; ends that were opened
    /// again by a restarted harness get higher channel numbers
    fn find_open_pair(&self, ends_a: &[ChannelEnd], ends_b: &[ChannelEnd]) -> Option<(String, String)> {
        ends_a
            .iter()
            .filter(|a| {
                a.state == ChannelState::Open
                    && a.ordering == self.config.ordering
                    && a.counterparty_port_id == self.config.port_b
            })
            .filter_map(|a| {
                let b_id = a.counterparty_channel_id.as_ref()?;
                ends_b
                    .iter()
                    .find(|b| {
                        &b.channel_id == b_id
                            && b.state == ChannelState::Open
                            && b.counterparty_port_id == self.config.port_a
                            && b.counterparty_channel_id.as_deref() == Some(a.channel_id.as_str())
                    })
                    .map(|b| (a.channel_id.clone(), b.channel_id.clone()))
            })
            .max_by_key(|(a, _)| parse_channel_id(a))
    }

    fn record(&mut self, channel_a: String, channel_b: String) {
        self.state.channel_a = Some(channel_a);
        self.state.channel_b = Some(channel_b);
    }

    fn leg(&self, direction: Direction) -> Result<Leg<'_>, RelayError> {
        let (Some(channel_a), Some(channel_b)) = (&self.state.channel_a, &self.state.channel_b) else {
            return Err(RelayError::Config(format!("channel link {} is not set up", self.config.id)));
        };
        Ok(match direction {
            Direction::AToB => Leg {
                source: self.chain_a.as_ref(),
                destination: self.chain_b.as_ref(),
                source_port: &self.config.port_a,
                source_channel: channel_a,
                destination_port: &self.config.port_b,
                destination_channel: channel_b,
            },
            Direction::BToA => Leg {
                source: self.chain_b.as_ref(),
                destination: self.chain_a.as_ref(),
                source_port: &self.config.port_b,
                source_channel: channel_b,
                destination_port: &self.config.port_a,
                destination_channel: channel_a,
            },
        })
    }

    /// Relay pending packets and acknowledgements in both directions
    pub async fn relay(&mut self) -> Result<IbcRelayResult, RelayError> {
        if !self.state.is_established() {
            self.setup().await?;
        }

        let mut heights = Vec::new();
        for direction in [Direction::AToB, Direction::BToA] {
            let report = self.relay_packets(direction).await?;
            if let Some(sequence) = report.advance_to {
                self.state.advance(direction, sequence);
            }
            heights.extend(report.landed.iter().map(|(_, height)| *height));
            if let Some(e) = report.error {
                warn!(link = %self.config.id, ?direction, error = %e, "packet relay aborted for this cycle");
            }
        }

        for direction in [Direction::AToB, Direction::BToA] {
            let report = self.relay_acks(direction).await?;
            heights.extend(report.landed.iter().map(|(_, height)| *height));
            if let Some(e) = report.error {
                warn!(link = %self.config.id, ?direction, error = %e, "ack relay incomplete for this cycle");
            }
        }

        #[cfg(feature = "metrics")]
        if let Some(metrics) = &self.metrics {
            metrics.packets_relayed.inc_by(heights.len() as f64);
        }
        if !heights.is_empty() {
            info!(link = %self.config.id, transactions = heights.len(), "ibc relay finished");
        }
        Ok(IbcRelayResult { heights })
    }

    async fn relay_packets(&self, direction: Direction) -> Result<DirectionReport, RelayError> {
        let leg = self.leg(direction)?;
        let watermark = self.state.last_relayed(direction);

        let pending = match self.pending_packets(leg, watermark).await {
            Ok(pending) => pending,
            Err(e) => {
                return Ok(DirectionReport {
                    error: Some(e),
                    ..DirectionReport::default()
                })
            }
        };
        if pending.is_empty() {
            return Ok(DirectionReport::default());
        }
        debug!(link = %self.config.id, ?direction, ?pending, "pending packets");

        let results = match self.config.ordering {
            ChannelOrdering::Ordered => {
                if let Err(e) = check_ordered(leg, &pending).await {
                    return Ok(DirectionReport {
                        error: Some(e),
                        ..DirectionReport::default()
                    });
                }
                let mut results = Vec::with_capacity(pending.len());
                for &sequence in &pending {
                    let result = relay_packet(leg, sequence).await;
                    let failed = result.is_err();
                    results.push((sequence, result));
                    if failed {
                        break;
                    }
                }
                results
            }
            ChannelOrdering::Unordered => {
                let mut results: Vec<_> = stream::iter(pending.iter().copied())
                    .map(|sequence| async move { (sequence, relay_packet(leg, sequence).await) })
                    .buffer_unordered(self.config.max_parallel_packets.max(1))
                    .collect()
                    .await;
                results.sort_by_key(|(sequence, _)| *sequence);
                results
            }
        };

        let mut report = DirectionReport::default();
        let mut prefix_intact = true;
        for (sequence, result) in results {
            match result {
                Ok(height) => {
                    report.landed.push((sequence, height));
                    if prefix_intact {
                        report.advance_to = Some(sequence);
                    }
                }
                Err(e) => {
                    prefix_intact = false;
                    warn!(link = %self.config.id, ?direction, sequence, error = %e, "packet relay failed");
                    if report.error.is_none() {
                        report.error = Some(e);
                    }
                }
            }
        }
        Ok(report)
    }

    /// Committed on the source above the watermark and not yet received
    async fn pending_packets(&self, leg: Leg<'_>, watermark: u64) -> Result<Vec<u64>, RelayError> {
        let mut commitments = leg
            .source
            .packet_commitments(leg.source_port, leg.source_channel)
            .await?;
        commitments.retain(|sequence| *sequence > watermark);
        commitments.sort_unstable();
        commitments.dedup();
        if commitments.is_empty() {
            return Ok(commitments);
        }

        let mut pending = leg
            .destination
            .unreceived_packets(leg.destination_port, leg.destination_channel, &commitments)
            .await?;
        pending.sort_unstable();
        pending.dedup();
        Ok(pending)
    }

    /// Submit acknowledgements written on the destination back to the source.
    /// A failed sequence is skipped; the rest of the batch is still attempted.
    async fn relay_acks(&self, direction: Direction) -> Result<DirectionReport, RelayError> {
        let leg = self.leg(direction)?;
        let unacked = match unacked_sequences(leg).await {
            Ok(unacked) => unacked,
            Err(e) => {
                return Ok(DirectionReport {
                    error: Some(e),
                    ..DirectionReport::default()
                })
            }
        };

        let mut report = DirectionReport::default();
        for sequence in unacked {
            match relay_ack(leg, sequence).await {
                Ok(height) => report.landed.push((sequence, height)),
                Err(e) => {
                    warn!(link = %self.config.id, ?direction, sequence, error = %e, "acknowledgement relay failed");
                    if report.error.is_none() {
                        report.error = Some(e);
                    }
                }
            }
        }
        Ok(report)
    }
}

/// Acks written on the destination whose packets are still committed on the source
async fn unacked_sequences(leg: Leg<'_>) -> Result<Vec<u64>, RelayError> {
    let written = leg
        .destination
        .packet_acknowledgements(leg.destination_port, leg.destination_channel)
        .await?;
    if written.is_empty() {
        return Ok(vec![]);
    }
    let mut unacked = leg
        .source
        .unreceived_acks(leg.source_port, leg.source_channel, &written)
        .await?;
    unacked.sort_unstable();
    Ok(unacked)
}

async fn relay_ack(leg: Leg<'_>, sequence: u64) -> Result<u64, RelayError> {
    let packet = leg.source.sent_packet(leg.source_port, leg.source_channel, sequence).await?;
    let ack = leg
        .destination
        .written_ack(leg.destination_port, leg.destination_channel, sequence)
        .await?;
    let proof = leg
        .destination
        .ack_proof(leg.destination_port, leg.destination_channel, sequence)
        .await?;
    let tx = leg.source.submit_acknowledgement(&packet, &ack, &proof).await?;
    debug!(channel = %leg.label(), sequence, height = tx.height, "acknowledgement relayed");
    Ok(tx.height)
}

/// Ordered channels accept only the next expected sequence, without gaps
async fn check_ordered(leg: Leg<'_>, pending: &[u64]) -> Result<(), RelayError> {
    let expected = leg
        .destination
        .next_sequence_recv(leg.destination_port, leg.destination_channel)
        .await?;
    if pending[0] != expected {
        return Err(RelayError::OrderingViolation {
            channel: leg.label(),
            expected,
            found: pending[0],
        });
    }
    if let Some(gap) = pending.windows(2).find(|w| w[1] != w[0] + 1) {
        return Err(RelayError::OrderingViolation {
            channel: leg.label(),
            expected: gap[0] + 1,
            found: gap[1],
        });
    }
    Ok(())
}

async fn relay_packet(leg: Leg<'_>, sequence: u64) -> Result<u64, RelayError> {
    let packet = leg.source.sent_packet(leg.source_port, leg.source_channel, sequence).await?;
    let proof = leg
        .source
        .commitment_proof(leg.source_port, leg.source_channel, sequence)
        .await?;
    let tx = leg.destination.submit_recv_packet(&packet, &proof).await?;
    debug!(channel = %leg.label(), sequence, height = tx.height, "packet received");
    Ok(tx.height)
}

#[async_trait]
impl Relayer for IbcRelayer {
    fn kind(&self) -> RelayerKind {
        RelayerKind::Ibc
    }

    async fn relay_cycle(&mut self) -> Result<RelayData, RelayError> {
        let result = self.relay().await?;
        self.relay_data = RelayData {
            heights: result.heights,
            ..RelayData::default()
        };
        Ok(self.relay_data.clone())
    }

    fn relay_data(&self) -> &RelayData {
        &self.relay_data
    }
}
