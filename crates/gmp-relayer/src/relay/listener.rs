// Watermarked event listener over registered chains
use std::collections::HashMap;
use tracing::debug;

use super::retry::RetryPolicy;
use crate::chains::{Chain, EventKind, GatewayEvent};
use crate::error::RelayError;

/// Events returned by one poll, covering heights `[from, to]`.
///
/// An empty range (`from > to`) means the chain had no new blocks.
#[derive(Debug, Clone)]
pub struct PolledBatch {
    pub chain_id: String,
    pub kind: EventKind,
    pub from: u64,
    pub to: u64,
    pub events: Vec<GatewayEvent>,
}

impl PolledBatch {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Whether the batch covers at least one block
    pub fn has_range(&self) -> bool {
        self.from <= self.to
    }
}

/// Per-(chain, kind) watermarks: the highest height already processed
pub struct EventListener {
    watermarks: HashMap<(String, EventKind), u64>,
    start_heights: HashMap<String, u64>,
    max_block_range: u64,
    retry: RetryPolicy,
}

impl EventListener {
    pub fn new(max_block_range: u64, retry: RetryPolicy) -> Self {
        Self {
            watermarks: HashMap::new(),
            start_heights: HashMap::new(),
            max_block_range: max_block_range.max(1),
            retry,
        }
    }

    /// First height scanned on `chain_id` before any watermark exists
    pub fn set_start_height(&mut self, chain_id: &str, height: u64) {
        self.start_heights.insert(chain_id.to_string(), height);
    }

    pub fn watermark(&self, chain_id: &str, kind: EventKind) -> Option<u64> {
        self.watermarks.get(&(chain_id.to_string(), kind)).copied()
    }

    /// Next height a poll of `(chain_id, kind)` starts from
    pub fn next_height(&self, chain_id: &str, kind: EventKind) -> u64 {
        match self.watermark(chain_id, kind) {
            Some(height) => height + 1,
            None => self.start_heights.get(chain_id).copied().unwrap_or(0),
        }
    }

    /// New events after the watermark, ascending by (height, index).
    ///
    /// The watermark is not moved; call [`EventListener::commit`] once the
    /// batch has been processed.
    pub async fn poll(&self, chain: &dyn Chain, kind: EventKind) -> Result<PolledBatch, RelayError> {
        let chain_id = chain.chain_id().to_string();
        let from = self.next_height(&chain_id, kind);

        let head = self
            .retry
            .run(&chain_id, "latest_height", || chain.latest_height())
            .await?;

        if from > head {
            return Ok(PolledBatch {
                chain_id,
                kind,
                from,
                to: from - 1,
                events: vec![],
            });
        }

        let to = head.min(from.saturating_add(self.max_block_range - 1));
        let mut events = self
            .retry
            .run(&chain_id, "gateway_events", || chain.gateway_events(kind, from, to))
            .await?;
        events.retain(|e| e.position.height >= from && e.position.height <= to && kind.matches(&e.data));
        events.sort_by_key(|e| e.position);

        debug!(chain = %chain_id, ?kind, from, to, events = events.len(), "polled chain");
        Ok(PolledBatch {
            chain_id,
            kind,
            from,
            to,
            events,
        })
    }

    /// Mark a processed batch; watermarks never move backwards
    pub fn commit(&mut self, batch: &PolledBatch) {
        if !batch.has_range() {
            return;
        }
        let key = (batch.chain_id.clone(), batch.kind);
        let current = self.watermarks.get(&key).copied();
        if current.map_or(true, |height| batch.to > height) {
            self.watermarks.insert(key, batch.to);
        }
    }

    /// Forget a chain's watermarks
    pub fn reset(&mut self, chain_id: &str) {
        self.watermarks.retain(|(id, _), _| id != chain_id);
    }
}
