// Error types shared by chain adapters and the relay engine
use thiserror::Error;

/// Errors raised by a chain adapter while querying or submitting
#[derive(Error, Debug, Clone)]
pub enum ChainError {
    /// Transport failure: connection refused/reset, timeout, DNS
    #[error("transport error: {0}")]
    Transport(String),

    /// The node answered with an error payload
    #[error("rpc error: {0}")]
    Rpc(String),

    /// The transaction was mined (or simulated) and reverted
    #[error("execution reverted: {0}")]
    Reverted(String),

    /// A response or log could not be decoded
    #[error("decode error: {0}")]
    Decode(String),

    /// A command could not be encoded for submission
    #[error("encode error: {0}")]
    Encode(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// The chain family cannot perform the requested operation
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[error("signing error: {0}")]
    Signing(String),
}

impl ChainError {
    /// Whether retrying the same request later may succeed.
    ///
    /// Transport failures are always transient. Node-side errors are transient
    /// when they describe congestion or account sequencing rather than a
    /// rejected call (rate limits, gateway errors, mempool, nonce, sequence).
    pub fn is_transient(&self) -> bool {
        match self {
            ChainError::Transport(_) => true,
            ChainError::Rpc(msg) => {
                let msg = msg.to_lowercase();
                msg.contains("rate limit")
                    || msg.contains("too many requests")
                    || msg.contains("429")
                    || msg.contains("502")
                    || msg.contains("503")
                    || msg.contains("504")
                    || msg.contains("service unavailable")
                    || msg.contains("mempool")
                    || msg.contains("nonce")
                    || msg.contains("account sequence mismatch")
                    || msg.contains("timed out")
            }
            _ => false,
        }
    }

    pub fn is_revert(&self) -> bool {
        matches!(self, ChainError::Reverted(_))
    }
}

impl From<reqwest::Error> for ChainError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() || err.is_request() {
            ChainError::Transport(err.to_string())
        } else if let Some(status) = err.status() {
            ChainError::Rpc(format!("http status {}: {}", status.as_u16(), err))
        } else if err.is_decode() {
            ChainError::Decode(err.to_string())
        } else {
            ChainError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ChainError {
    fn from(err: serde_json::Error) -> Self {
        ChainError::Decode(err.to_string())
    }
}

/// Errors raised by the relay engine
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("chain {0} is already registered")]
    DuplicateChain(String),

    #[error("chain {0} is not registered")]
    UnknownChain(String),

    /// RPC/network failure that outlived the retry budget
    #[error("transient failure on chain {chain} after {attempts} attempts: {source}")]
    TransientChain {
        chain: String,
        attempts: u32,
        #[source]
        source: ChainError,
    },

    #[error("execution of command {command_id} reverted: {reason}")]
    ExecutionReverted { command_id: String, reason: String },

    /// An ordered channel direction observed a sequence gap
    #[error("ordering violation on {channel}: expected sequence {expected}, found {found}")]
    OrderingViolation {
        channel: String,
        expected: u64,
        found: u64,
    },

    #[error("invalid status transition for {command_id}: {from} -> {to}")]
    InvalidTransition {
        command_id: String,
        from: String,
        to: String,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Chain(#[from] ChainError),
}

pub type Result<T, E = RelayError> = std::result::Result<T, E>;
