// Utility functions and helpers

use std::time::Duration;

use crate::error::ChainError;

/// Exponential backoff delay calculator
pub fn exponential_backoff(retry_count: u32, base_delay_ms: u64, max_delay_ms: u64) -> Duration {
    let factor = 2_u64.checked_pow(retry_count).unwrap_or(u64::MAX);
    let delay_ms = base_delay_ms.saturating_mul(factor);
    Duration::from_millis(delay_ms.min(max_delay_ms))
}

/// Backoff with up to 10% random jitter, still capped at `max_delay_ms`
pub fn backoff_with_jitter(retry_count: u32, base_delay_ms: u64, max_delay_ms: u64) -> Duration {
    let delay = exponential_backoff(retry_count, base_delay_ms, max_delay_ms).as_millis() as u64;
    let jitter = fastrand::u64(0..=delay / 10);
    Duration::from_millis(delay.saturating_add(jitter).min(max_delay_ms))
}

/// Parse a `0x`-prefixed hex quantity as returned by EVM JSON-RPC
pub fn parse_hex_u64(value: &str) -> Result<u64, ChainError> {
    let digits = value.strip_prefix("0x").unwrap_or(value);
    if digits.is_empty() {
        return Ok(0);
    }
    u64::from_str_radix(digits, 16)
        .map_err(|e| ChainError::Decode(format!("invalid hex quantity {}: {}", value, e)))
}

/// Parse channel identifier from string
pub fn parse_channel_id(chan_id: &str) -> Option<u64> {
    chan_id.strip_prefix("channel-")?.parse().ok()
}
