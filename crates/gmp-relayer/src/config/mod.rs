use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayerConfig {
    pub global: GlobalConfig,
    pub chains: HashMap<String, ChainConfig>,
    #[serde(default)]
    pub gas: GasPolicyConfig,
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Log level for the relayer
    pub log_level: String,
    /// Maximum number of retries for transient RPC failures inside a poll
    pub max_retries: u32,
    /// Base retry delay in milliseconds
    pub retry_delay_ms: u64,
    /// Backoff cap in milliseconds
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,
    /// Period of the relay cycle timer
    #[serde(default = "default_relay_interval_ms")]
    pub relay_interval_ms: u64,
    /// Largest block range requested from a chain in one poll
    #[serde(default = "default_max_block_range")]
    pub max_block_range: u64,
    /// Attempt budget per message for approve/execute submissions
    #[serde(default = "default_execute_attempts")]
    pub execute_attempts: u32,
}

fn default_max_retry_delay_ms() -> u64 {
    10_000
}

fn default_relay_interval_ms() -> u64 {
    2_000
}

fn default_max_block_range() -> u64 {
    1_000
}

fn default_execute_attempts() -> u32 {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Chain identifier, also the name used as `sourceChain`/`destinationChain`
    pub chain_id: String,
    /// RPC endpoint (EVM JSON-RPC or Tendermint RPC)
    pub rpc_endpoint: String,
    /// First height scanned when the relayer starts
    #[serde(default)]
    pub start_height: u64,
    /// Chain-specific configuration
    pub config: ChainSpecificConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ChainSpecificConfig {
    #[serde(rename = "evm")]
    Evm {
        /// Deployed gateway contract
        gateway_address: String,
        /// Deployed gas service contract
        gas_service_address: String,
        /// Unlocked, funded dev account used as `from`
        signer_address: String,
        /// Native currency symbol (ETH, AVAX, ...)
        native_symbol: String,
        /// Whether the gateway accepts batched `execute(bytes)` approvals
        #[serde(default = "default_true")]
        supports_batch: bool,
        /// How long to wait for a receipt before treating a submission as transient
        #[serde(default = "default_confirmation_timeout_ms")]
        confirmation_timeout_ms: u64,
    },
    #[serde(rename = "cosmos")]
    Cosmos {
        /// LCD (REST) endpoint
        lcd_endpoint: String,
        /// Bech32 address prefix
        address_prefix: String,
        /// Native denom; derived from the chain name when omitted
        denom: Option<String>,
        /// Gas price and denom, e.g. "1uwasm"
        gas_price: String,
        /// Hex-encoded secp256k1 secret key for signing relay transactions
        signer_key: Option<String>,
        /// Bech32 address matching `signer_key`
        signer_address: Option<String>,
    },
}

fn default_true() -> bool {
    true
}

fn default_confirmation_timeout_ms() -> u64 {
    30_000
}

impl ChainSpecificConfig {
    /// Chain family name as used in logs and the registry
    pub fn family(&self) -> &'static str {
        match self {
            ChainSpecificConfig::Evm { .. } => "evm",
            ChainSpecificConfig::Cosmos { .. } => "cosmos",
        }
    }
}

/// Native denom of a Cosmos chain: the configured one, else `uwasm` for the
/// wasm chain and `uaxl` for anything else.
pub fn cosmos_default_denom(chain_id: &str) -> String {
    if chain_id.starts_with("wasm") {
        "uwasm".to_string()
    } else {
        "uaxl".to_string()
    }
}

/// Gas sufficiency policy.
///
/// Thresholds are decimal strings so that wei-sized values survive TOML's
/// 64-bit integers. A threshold of `"0"` waives payment entirely.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GasPolicyConfig {
    pub default_threshold: String,
    /// Count gas paid in ERC-20 tokens (or non-native denoms) toward the threshold
    #[serde(default)]
    pub count_token_payments: bool,
    /// Approve calls that are short of gas; they are executed once paid
    #[serde(default)]
    pub approve_unpaid: bool,
    #[serde(default)]
    pub routes: Vec<RouteThresholdConfig>,
}

impl Default for GasPolicyConfig {
    fn default() -> Self {
        Self {
            default_threshold: "1".to_string(),
            count_token_payments: false,
            approve_unpaid: false,
            routes: vec![],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteThresholdConfig {
    pub source_chain: String,
    pub destination_chain: String,
    pub threshold: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelOrdering {
    Ordered,
    Unordered,
}

impl ChannelOrdering {
    /// Parse the ordering names used by ibc-go (`ORDER_ORDERED`, `ORDER_UNORDERED`)
    pub fn from_ibc(value: &str) -> Option<Self> {
        match value {
            "ORDER_ORDERED" => Some(ChannelOrdering::Ordered),
            "ORDER_UNORDERED" => Some(ChannelOrdering::Unordered),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Channel link identifier used in logs and relay data
    pub id: String,
    pub chain_a: String,
    pub chain_b: String,
    pub port_a: String,
    pub port_b: String,
    /// Known channel id on chain A (discovered by setup when absent)
    pub channel_a: Option<String>,
    /// Known channel id on chain B (discovered by setup when absent)
    pub channel_b: Option<String>,
    pub ordering: ChannelOrdering,
    /// Upper bound on concurrent submissions for unordered channels
    #[serde(default = "default_max_parallel_packets")]
    pub max_parallel_packets: usize,
}

fn default_max_parallel_packets() -> usize {
    8
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics server
    pub enabled: bool,
    /// Metrics server host
    pub host: String,
    /// Metrics server port
    pub port: u16,
}

impl RelayerConfig {
    /// Load configuration from TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: RelayerConfig = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get chain configuration by ID
    pub fn get_chain(&self, chain_id: &str) -> Option<&ChainConfig> {
        self.chains.get(chain_id)
    }

    /// Get channel configuration by ID
    pub fn get_channel(&self, channel_id: &str) -> Option<&ChannelConfig> {
        self.channels.iter().find(|c| c.id == channel_id)
    }

    /// Check cross references and numeric fields
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.global.relay_interval_ms == 0 {
            anyhow::bail!("global.relay_interval_ms must be greater than zero");
        }
        if self.global.execute_attempts == 0 {
            anyhow::bail!("global.execute_attempts must be at least 1");
        }
        if self.global.max_block_range == 0 {
            anyhow::bail!("global.max_block_range must be greater than zero");
        }

        for (key, chain) in &self.chains {
            if key != &chain.chain_id {
                anyhow::bail!(
                    "chain entry '{}' declares chain_id '{}'; they must match",
                    key,
                    chain.chain_id
                );
            }
        }

        parse_amount(&self.gas.default_threshold)
            .context("gas.default_threshold is not a decimal amount")?;
        for route in &self.gas.routes {
            parse_amount(&route.threshold).with_context(|| {
                format!(
                    "gas threshold for {} -> {} is not a decimal amount",
                    route.source_chain, route.destination_chain
                )
            })?;
            for chain in [&route.source_chain, &route.destination_chain] {
                if !self.chains.contains_key(chain) {
                    anyhow::bail!("gas route references unknown chain '{}'", chain);
                }
            }
        }

        for channel in &self.channels {
            for chain_id in [&channel.chain_a, &channel.chain_b] {
                match self.chains.get(chain_id) {
                    None => anyhow::bail!(
                        "channel '{}' references unknown chain '{}'",
                        channel.id,
                        chain_id
                    ),
                    Some(chain) if !matches!(chain.config, ChainSpecificConfig::Cosmos { .. }) => {
                        anyhow::bail!(
                            "channel '{}' endpoint '{}' is not a cosmos chain",
                            channel.id,
                            chain_id
                        )
                    }
                    Some(_) => {}
                }
            }
            if channel.max_parallel_packets == 0 {
                anyhow::bail!("channel '{}' max_parallel_packets must be at least 1", channel.id);
            }
        }

        Ok(())
    }
}

/// Parse a decimal token amount
pub fn parse_amount(value: &str) -> anyhow::Result<u128> {
    value
        .trim()
        .parse::<u128>()
        .with_context(|| format!("invalid amount '{}'", value))
}

impl Default for RelayerConfig {
    fn default() -> Self {
        let mut chains = HashMap::new();

        // Two local EVM chains with the usual dev account
        for (index, name) in ["Ethereum", "Avalanche"].iter().enumerate() {
            chains.insert(name.to_string(), ChainConfig {
                chain_id: name.to_string(),
                rpc_endpoint: format!("http://localhost:8500/{}", index),
                start_height: 0,
                config: ChainSpecificConfig::Evm {
                    gateway_address: "0x0000000000000000000000000000000000000000".to_string(),
                    gas_service_address: "0x0000000000000000000000000000000000000000".to_string(),
                    signer_address: "0x0000000000000000000000000000000000000000".to_string(),
                    native_symbol: if index == 0 { "ETH" } else { "AVAX" }.to_string(),
                    supports_batch: true,
                    confirmation_timeout_ms: default_confirmation_timeout_ms(),
                },
            });
        }

        Self {
            global: GlobalConfig {
                log_level: "info".to_string(),
                max_retries: 3,
                retry_delay_ms: 500,
                max_retry_delay_ms: default_max_retry_delay_ms(),
                relay_interval_ms: default_relay_interval_ms(),
                max_block_range: default_max_block_range(),
                execute_attempts: default_execute_attempts(),
            },
            chains,
            gas: GasPolicyConfig::default(),
            channels: vec![],
            metrics: MetricsConfig {
                enabled: false,
                host: "127.0.0.1".to_string(),
                port: 3001,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[global]
log_level = "debug"
max_retries = 2
retry_delay_ms = 10

[chains.Ethereum]
chain_id = "Ethereum"
rpc_endpoint = "http://localhost:8545"

[chains.Ethereum.config]
type = "evm"
gateway_address = "0x1111111111111111111111111111111111111111"
gas_service_address = "0x2222222222222222222222222222222222222222"
signer_address = "0x3333333333333333333333333333333333333333"
native_symbol = "ETH"

[chains.wasm]
chain_id = "wasm"
rpc_endpoint = "http://localhost/wasm-rpc"

[chains.wasm.config]
type = "cosmos"
lcd_endpoint = "http://localhost/wasm-lcd"
address_prefix = "wasm"
gas_price = "1uwasm"

[chains.axelar]
chain_id = "axelar"
rpc_endpoint = "http://localhost/axelar-rpc"

[chains.axelar.config]
type = "cosmos"
lcd_endpoint = "http://localhost/axelar-lcd"
address_prefix = "axelar"
gas_price = "1uaxl"

[gas]
default_threshold = "0"

[[channels]]
id = "wasm-axelar"
chain_a = "wasm"
chain_b = "axelar"
port_a = "transfer"
port_b = "transfer"
ordering = "unordered"

[metrics]
enabled = false
host = "127.0.0.1"
port = 9090
"#;

    #[test]
    fn test_parse_sample_config() {
        let config: RelayerConfig = toml::from_str(SAMPLE).unwrap();
        assert_eq!(config.global.relay_interval_ms, 2_000);
        assert_eq!(config.global.execute_attempts, 3);
        assert_eq!(config.chains.len(), 3);
        assert_eq!(config.channels[0].max_parallel_packets, 8);
        assert_eq!(config.channels[0].ordering, ChannelOrdering::Unordered);

        match &config.get_chain("Ethereum").unwrap().config {
            ChainSpecificConfig::Evm { supports_batch, .. } => assert!(*supports_batch),
            other => panic!("unexpected chain config {:?}", other),
        }
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_unknown_channel_chain() {
        let mut config: RelayerConfig = toml::from_str(SAMPLE).unwrap();
        config.channels[0].chain_b = "osmosis".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("unknown chain 'osmosis'"));
    }

    #[test]
    fn test_validate_rejects_evm_channel_endpoint() {
        let mut config: RelayerConfig = toml::from_str(SAMPLE).unwrap();
        config.channels[0].chain_a = "Ethereum".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_threshold() {
        let mut config = RelayerConfig::default();
        config.gas.default_threshold = "lots".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_denoms() {
        assert_eq!(cosmos_default_denom("wasm"), "uwasm");
        assert_eq!(cosmos_default_denom("axelar"), "uaxl");
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = RelayerConfig::default();
        config.validate().unwrap();
        assert_eq!(config.gas.default_threshold, "1");
    }
}
