//! EVM chain adapter
//!
//! Talks to a local EVM node over JSON-RPC: reads gateway and gas-service logs
//! with `eth_getLogs`, submits approvals and executions from an unlocked dev
//! account with `eth_sendTransaction`, and confirms them by polling receipts.

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use super::abi::{self, ParamType, Token};
use super::{
    ApprovalCommand, Chain, ChainInfo, ChainKind, CommandId, CommandKind, EventKind, EventPosition,
    ExecuteCall, GasAsset, GatewayEvent, GatewayEventData, TokenAmount, TxOutcome,
};
use crate::config::{ChainConfig, ChainSpecificConfig};
use crate::error::ChainError;
use crate::utils::parse_hex_u64;

pub const CONTRACT_CALL: &str = "ContractCall(address,string,string,bytes32,bytes)";
pub const CONTRACT_CALL_WITH_TOKEN: &str =
    "ContractCallWithToken(address,string,string,bytes32,bytes,string,uint256)";
pub const TOKEN_SENT: &str = "TokenSent(address,string,string,string,uint256)";
pub const NATIVE_GAS_PAID: &str =
    "NativeGasPaidForContractCall(address,string,string,bytes32,uint256,address)";
pub const NATIVE_GAS_PAID_WITH_TOKEN: &str =
    "NativeGasPaidForContractCallWithToken(address,string,string,bytes32,string,uint256,uint256,address)";
pub const GAS_PAID: &str = "GasPaidForContractCall(address,string,string,bytes32,address,uint256,address)";
pub const GAS_PAID_WITH_TOKEN: &str =
    "GasPaidForContractCallWithToken(address,string,string,bytes32,string,uint256,address,uint256,address)";
pub const CONTRACT_CALL_APPROVED: &str =
    "ContractCallApproved(bytes32,string,string,address,bytes32,bytes32,uint256)";
pub const CONTRACT_CALL_APPROVED_WITH_MINT: &str =
    "ContractCallApprovedWithMint(bytes32,string,string,address,bytes32,string,uint256,bytes32,uint256)";
pub const EXECUTED: &str = "Executed(bytes32)";

const APPROVE_CONTRACT_CALL: &str = "approveContractCall(bytes32,string,string,address,bytes32)";
const APPROVE_CONTRACT_CALL_WITH_MINT: &str =
    "approveContractCallWithMint(bytes32,string,string,address,bytes32,string,uint256)";
const MINT_TOKEN: &str = "mintToken(bytes32,string,address,uint256)";
const GATEWAY_EXECUTE: &str = "execute(bytes)";
const APP_EXECUTE: &str = "execute(bytes32,string,string,bytes)";
const APP_EXECUTE_WITH_TOKEN: &str = "executeWithToken(bytes32,string,string,bytes,string,uint256)";

/// EVM JSON-RPC request wrapper
#[derive(Debug, Serialize)]
struct JsonRpcRequest {
    jsonrpc: &'static str,
    method: String,
    params: Vec<serde_json::Value>,
    id: u64,
}

/// EVM JSON-RPC response wrapper
#[derive(Debug, Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// EVM event log entry
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EvmLog {
    /// Address of the contract that emitted the event
    pub address: String,
    /// Indexed event parameters, topic0 first
    pub topics: Vec<String>,
    /// Non-indexed parameters
    pub data: String,
    #[serde(rename = "blockNumber")]
    pub block_number: String,
    #[serde(rename = "transactionHash")]
    pub transaction_hash: String,
    #[serde(rename = "logIndex")]
    pub log_index: String,
    #[serde(default)]
    pub removed: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct EvmReceipt {
    #[serde(rename = "blockNumber")]
    block_number: String,
    status: Option<String>,
}

/// Topic hashes computed once per adapter
#[derive(Debug, Clone)]
struct Topics {
    contract_call: String,
    contract_call_with_token: String,
    token_sent: String,
    native_gas_paid: String,
    native_gas_paid_with_token: String,
    gas_paid: String,
    gas_paid_with_token: String,
    approved: String,
    approved_with_mint: String,
    executed: String,
}

impl Topics {
    fn new() -> Self {
        Self {
            contract_call: abi::event_topic(CONTRACT_CALL),
            contract_call_with_token: abi::event_topic(CONTRACT_CALL_WITH_TOKEN),
            token_sent: abi::event_topic(TOKEN_SENT),
            native_gas_paid: abi::event_topic(NATIVE_GAS_PAID),
            native_gas_paid_with_token: abi::event_topic(NATIVE_GAS_PAID_WITH_TOKEN),
            gas_paid: abi::event_topic(GAS_PAID),
            gas_paid_with_token: abi::event_topic(GAS_PAID_WITH_TOKEN),
            approved: abi::event_topic(CONTRACT_CALL_APPROVED),
            approved_with_mint: abi::event_topic(CONTRACT_CALL_APPROVED_WITH_MINT),
            executed: abi::event_topic(EXECUTED),
        }
    }

    fn for_kind(&self, kind: EventKind) -> Vec<String> {
        let calls = [&self.contract_call, &self.contract_call_with_token, &self.token_sent];
        let gas = [
            &self.native_gas_paid,
            &self.native_gas_paid_with_token,
            &self.gas_paid,
            &self.gas_paid_with_token,
        ];
        let approvals = [&self.approved, &self.approved_with_mint, &self.executed];

        let selected: Vec<&String> = match kind {
            EventKind::ContractCalls => calls.to_vec(),
            EventKind::GasPayments => gas.to_vec(),
            EventKind::Approvals => approvals.to_vec(),
            EventKind::All => calls.iter().chain(gas.iter()).chain(approvals.iter()).copied().collect(),
        };
        selected.into_iter().cloned().collect()
    }
}

/// EVM chain reached over JSON-RPC
pub struct EvmChain {
    info: ChainInfo,
    client: Client,
    gateway_address: String,
    gas_service_address: String,
    signer_address: String,
    supports_batch: bool,
    confirmation_timeout: Duration,
    receipt_poll_interval: Duration,
    topics: Topics,
    next_request_id: AtomicU64,
}

impl EvmChain {
    pub fn new(config: &ChainConfig) -> Result<Self, ChainError> {
        let ChainSpecificConfig::Evm {
            gateway_address,
            gas_service_address,
            signer_address,
            native_symbol,
            supports_batch,
            confirmation_timeout_ms,
        } = &config.config
        else {
            return Err(ChainError::Unsupported(format!(
                "chain {} is not configured as an evm chain",
                config.chain_id
            )));
        };

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ChainError::Transport(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            info: ChainInfo {
                id: config.chain_id.clone(),
                kind: ChainKind::Evm,
                rpc_endpoint: config.rpc_endpoint.clone(),
                lcd_endpoint: None,
                native_denom: native_symbol.clone(),
                signer: Some(signer_address.to_lowercase()),
            },
            client,
            gateway_address: gateway_address.to_lowercase(),
            gas_service_address: gas_service_address.to_lowercase(),
            signer_address: signer_address.to_lowercase(),
            supports_batch: *supports_batch,
            confirmation_timeout: Duration::from_millis(*confirmation_timeout_ms),
            receipt_poll_interval: Duration::from_millis(500),
            topics: Topics::new(),
            next_request_id: AtomicU64::new(1),
        })
    }

    /// Override how often receipts are polled
    pub fn with_receipt_poll_interval(mut self, interval: Duration) -> Self {
        self.receipt_poll_interval = interval;
        self
    }

    async fn rpc<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<serde_json::Value>,
    ) -> Result<Option<T>, ChainError> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method: method.to_string(),
            params,
            id: self.next_request_id.fetch_add(1, Ordering::Relaxed),
        };

        let response = self
            .client
            .post(&self.info.rpc_endpoint)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ChainError::Rpc(format!(
                "{} returned http status {}",
                method,
                status.as_u16()
            )));
        }

        let body: JsonRpcResponse<T> = response.json().await?;
        if let Some(error) = body.error {
            // Nodes report failed eth_sendTransaction/eth_call as a revert message
            if error.message.to_lowercase().contains("revert") {
                return Err(ChainError::Reverted(error.message));
            }
            return Err(ChainError::Rpc(format!(
                "{} failed: {} (code: {})",
                method, error.message, error.code
            )));
        }
        Ok(body.result)
    }

    async fn rpc_required<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<serde_json::Value>,
    ) -> Result<T, ChainError> {
        self.rpc(method, params)
            .await?
            .ok_or_else(|| ChainError::Rpc(format!("{} returned no result", method)))
    }

    /// Raw logs from the gateway and gas service in `[from, to]`
    pub async fn get_logs(&self, kind: EventKind, from: u64, to: u64) -> Result<Vec<EvmLog>, ChainError> {
        let filter = serde_json::json!({
            "address": [self.gateway_address, self.gas_service_address],
            "topics": [self.topics.for_kind(kind)],
            "fromBlock": format!("0x{:x}", from),
            "toBlock": format!("0x{:x}", to),
        });
        let logs: Option<Vec<EvmLog>> = self.rpc("eth_getLogs", vec![filter]).await?;
        Ok(logs.unwrap_or_default())
    }

    /// Decode one log; `Ok(None)` for logs this relayer does not track
    pub fn decode_log(&self, log: &EvmLog) -> Result<Option<GatewayEvent>, ChainError> {
        if log.removed {
            return Ok(None);
        }
        let Some(topic0) = log.topics.first().map(|t| t.to_lowercase()) else {
            return Ok(None);
        };
        let emitter = log.address.to_lowercase();
        let from_gateway = emitter == self.gateway_address;
        let from_gas_service = emitter == self.gas_service_address;
        let t = &self.topics;

        let data = if from_gateway && (topic0 == t.contract_call || topic0 == t.contract_call_with_token) {
            let with_token = topic0 == t.contract_call_with_token;
            let sender = abi::topic_to_address(topic(log, 1)?)?;
            let payload_hash = topic(log, 2)?.to_lowercase();
            let mut params = vec![ParamType::String, ParamType::String, ParamType::Bytes];
            if with_token {
                params.extend([ParamType::String, ParamType::Uint]);
            }
            let mut tokens = abi::decode_hex_data(&params, &log.data)?.into_iter();
            let destination_chain = next_token(&mut tokens)?.into_string()?;
            let destination_address = next_token(&mut tokens)?.into_string()?;
            let payload = next_token(&mut tokens)?.into_bytes()?;
            let token = if with_token {
                Some(TokenAmount {
                    symbol: next_token(&mut tokens)?.into_string()?,
                    amount: next_token(&mut tokens)?.into_uint()?,
                })
            } else {
                None
            };
            GatewayEventData::ContractCall {
                sender,
                destination_chain,
                destination_address,
                payload_hash,
                payload,
                token,
            }
        } else if from_gateway && topic0 == t.token_sent {
            let sender = abi::topic_to_address(topic(log, 1)?)?;
            let params = [ParamType::String, ParamType::String, ParamType::String, ParamType::Uint];
            let mut tokens = abi::decode_hex_data(&params, &log.data)?.into_iter();
            GatewayEventData::TokenSent {
                sender,
                destination_chain: next_token(&mut tokens)?.into_string()?,
                destination_address: next_token(&mut tokens)?.into_string()?,
                token: TokenAmount {
                    symbol: next_token(&mut tokens)?.into_string()?,
                    amount: next_token(&mut tokens)?.into_uint()?,
                },
            }
        } else if from_gas_service
            && [&t.native_gas_paid, &t.native_gas_paid_with_token, &t.gas_paid, &t.gas_paid_with_token]
                .contains(&&topic0)
        {
            self.decode_gas_paid(log, &topic0)?
        } else if from_gateway && (topic0 == t.approved || topic0 == t.approved_with_mint) {
            let with_mint = topic0 == t.approved_with_mint;
            let command_id = CommandId::from_hex(topic(log, 1)?)?;
            let contract_address = abi::topic_to_address(topic(log, 2)?)?;
            let payload_hash = topic(log, 3)?.to_lowercase();
            let params = if with_mint {
                vec![
                    ParamType::String,
                    ParamType::String,
                    ParamType::String,
                    ParamType::Uint,
                    ParamType::FixedBytes32,
                    ParamType::Uint,
                ]
            } else {
                vec![ParamType::String, ParamType::String, ParamType::FixedBytes32, ParamType::Uint]
            };
            let mut tokens = abi::decode_hex_data(&params, &log.data)?.into_iter();
            GatewayEventData::ContractCallApproved {
                command_id,
                source_chain: next_token(&mut tokens)?.into_string()?,
                source_address: next_token(&mut tokens)?.into_string()?,
                contract_address,
                payload_hash,
                with_mint,
            }
        } else if from_gateway && topic0 == t.executed {
            GatewayEventData::Executed {
                command_id: CommandId::from_hex(topic(log, 1)?)?,
            }
        } else {
            return Ok(None);
        };

        Ok(Some(GatewayEvent {
            chain_id: self.info.id.clone(),
            tx_hash: log.transaction_hash.to_lowercase(),
            position: EventPosition {
                height: parse_hex_u64(&log.block_number)?,
                index: parse_hex_u64(&log.log_index)?,
            },
            data,
        }))
    }

    fn decode_gas_paid(&self, log: &EvmLog, topic0: &str) -> Result<GatewayEventData, ChainError> {
        let t = &self.topics;
        let source_address = abi::topic_to_address(topic(log, 1)?)?;
        let payload_hash = topic(log, 2)?.to_lowercase();

        let native = topic0 == t.native_gas_paid || topic0 == t.native_gas_paid_with_token;
        let for_token_call = topic0 == t.native_gas_paid_with_token || topic0 == t.gas_paid_with_token;

        let mut params = vec![ParamType::String, ParamType::String];
        if for_token_call {
            // symbol, amount of the carried token
            params.extend([ParamType::String, ParamType::Uint]);
        }
        if !native {
            params.push(ParamType::Address);
        }
        params.extend([ParamType::Uint, ParamType::Address]);

        let mut tokens = abi::decode_hex_data(&params, &log.data)?.into_iter();
        let destination_chain = next_token(&mut tokens)?.into_string()?;
        let destination_address = next_token(&mut tokens)?.into_string()?;
        if for_token_call {
            next_token(&mut tokens)?;
            next_token(&mut tokens)?;
        }
        let asset = if native {
            GasAsset::Native
        } else {
            GasAsset::Token(next_token(&mut tokens)?.into_address()?)
        };
        let amount = next_token(&mut tokens)?.into_uint()?;
        let refund_address = next_token(&mut tokens)?.into_address()?;

        Ok(GatewayEventData::GasPaid {
            source_address,
            destination_chain,
            destination_address,
            payload_hash,
            amount,
            asset,
            refund_address,
            for_token_call,
        })
    }

    /// Calldata approving `commands` on the gateway
    pub fn encode_approval(&self, commands: &[ApprovalCommand]) -> Result<Vec<u8>, ChainError> {
        if self.supports_batch {
            let mut ids = Vec::with_capacity(commands.len());
            let mut names = Vec::with_capacity(commands.len());
            let mut params = Vec::with_capacity(commands.len());
            for command in commands {
                ids.push(Token::FixedBytes32(*command.command_id.as_bytes()));
                names.push(Token::String(command.kind.as_str().to_string()));
                params.push(Token::Bytes(abi::encode(&approval_params(command)?)));
            }
            let input = abi::encode(&[Token::Array(ids), Token::Array(names), Token::Array(params)]);
            return Ok(abi::encode_call(GATEWAY_EXECUTE, &[Token::Bytes(input)]));
        }

        match commands {
            [command] => {
                let mut tokens = vec![Token::FixedBytes32(*command.command_id.as_bytes())];
                tokens.extend(approval_params(command)?);
                let signature = match command.kind {
                    CommandKind::ApproveContractCall => APPROVE_CONTRACT_CALL,
                    CommandKind::ApproveContractCallWithMint => APPROVE_CONTRACT_CALL_WITH_MINT,
                    CommandKind::MintToken => MINT_TOKEN,
                };
                Ok(abi::encode_call(signature, &tokens))
            }
            _ => Err(ChainError::Unsupported(format!(
                "gateway on {} does not accept batched approvals",
                self.info.id
            ))),
        }
    }

    /// Calldata invoking the destination application
    pub fn encode_execute(call: &ExecuteCall) -> Vec<u8> {
        let mut tokens = vec![
            Token::FixedBytes32(*call.command_id.as_bytes()),
            Token::String(call.source_chain.clone()),
            Token::String(call.source_address.clone()),
            Token::Bytes(call.payload.clone()),
        ];
        match &call.token {
            Some(token) => {
                tokens.push(Token::String(token.symbol.clone()));
                tokens.push(Token::Uint(token.amount));
                abi::encode_call(APP_EXECUTE_WITH_TOKEN, &tokens)
            }
            None => abi::encode_call(APP_EXECUTE, &tokens),
        }
    }

    /// Send from the unlocked signer and wait for the receipt
    async fn send_transaction(&self, to: &str, data: Vec<u8>) -> Result<TxOutcome, ChainError> {
        let tx = serde_json::json!({
            "from": self.signer_address,
            "to": to,
            "data": format!("0x{}", hex::encode(data)),
        });
        let tx_hash: String = self.rpc_required("eth_sendTransaction", vec![tx]).await?;
        debug!(chain = %self.info.id, tx_hash = %tx_hash, "transaction sent");
        self.wait_for_receipt(&tx_hash).await
    }

    async fn wait_for_receipt(&self, tx_hash: &str) -> Result<TxOutcome, ChainError> {
        let deadline = Instant::now() + self.confirmation_timeout;
        loop {
            let receipt: Option<EvmReceipt> = self
                .rpc("eth_getTransactionReceipt", vec![serde_json::json!(tx_hash)])
                .await?;

            if let Some(receipt) = receipt {
                let height = parse_hex_u64(&receipt.block_number)?;
                return match receipt.status.as_deref() {
                    Some("0x0") => Err(ChainError::Reverted(format!(
                        "transaction {} reverted in block {}",
                        tx_hash, height
                    ))),
                    _ => Ok(TxOutcome {
                        tx_hash: tx_hash.to_string(),
                        height,
                    }),
                };
            }

            if Instant::now() >= deadline {
                return Err(ChainError::Transport(format!(
                    "timed out waiting for receipt of {}",
                    tx_hash
                )));
            }
            sleep(self.receipt_poll_interval).await;
        }
    }
}

fn topic(log: &EvmLog, index: usize) -> Result<&str, ChainError> {
    log.topics
        .get(index)
        .map(String::as_str)
        .ok_or_else(|| ChainError::Decode(format!("log {} is missing topic {}", log.transaction_hash, index)))
}

fn next_token(tokens: &mut impl Iterator<Item = Token>) -> Result<Token, ChainError> {
    tokens
        .next()
        .ok_or_else(|| ChainError::Decode("log data has fewer fields than expected".to_string()))
}

/// `(sourceChain, sourceAddress, contractAddress, payloadHash[, symbol, amount])`,
/// or `(symbol, account, amount)` for a mint
fn approval_params(command: &ApprovalCommand) -> Result<Vec<Token>, ChainError> {
    if command.kind == CommandKind::MintToken {
        let token = command
            .token
            .as_ref()
            .ok_or_else(|| ChainError::Encode(format!("mint command {} carries no token", command.command_id)))?;
        return Ok(vec![
            Token::String(token.symbol.clone()),
            Token::Address(abi::parse_address(&command.contract_address)?),
            Token::Uint(token.amount),
        ]);
    }
    let mut tokens = vec![
        Token::String(command.source_chain.clone()),
        Token::String(command.source_address.clone()),
        Token::Address(abi::parse_address(&command.contract_address)?),
        Token::FixedBytes32(abi::parse_bytes32(&command.payload_hash)?),
    ];
    if let Some(token) = &command.token {
        tokens.push(Token::String(token.symbol.clone()));
        tokens.push(Token::Uint(token.amount));
    }
    Ok(tokens)
}

#[async_trait]
impl Chain for EvmChain {
    fn info(&self) -> &ChainInfo {
        &self.info
    }

    async fn latest_height(&self) -> Result<u64, ChainError> {
        let height: String = self.rpc_required("eth_blockNumber", vec![]).await?;
        parse_hex_u64(&height)
    }

    async fn gateway_events(
        &self,
        kind: EventKind,
        from: u64,
        to: u64,
    ) -> Result<Vec<GatewayEvent>, ChainError> {
        let logs = self.get_logs(kind, from, to).await?;
        let mut events = Vec::with_capacity(logs.len());
        for log in &logs {
            match self.decode_log(log) {
                Ok(Some(event)) if kind.matches(&event.data) => events.push(event),
                Ok(_) => {}
                // A malformed log will not decode on retry either
                Err(e) => warn!(
                    chain = %self.info.id,
                    tx_hash = %log.transaction_hash,
                    error = %e,
                    "skipping undecodable gateway log"
                ),
            }
        }
        events.sort_by_key(|e| e.position);
        Ok(events)
    }

    fn supports_batch_approval(&self) -> bool {
        self.supports_batch
    }

    async fn approve(&self, commands: &[ApprovalCommand]) -> Result<TxOutcome, ChainError> {
        let data = self.encode_approval(commands)?;
        let gateway = self.gateway_address.clone();
        self.send_transaction(&gateway, data).await
    }

    async fn execute(&self, call: &ExecuteCall) -> Result<TxOutcome, ChainError> {
        let data = Self::encode_execute(call);
        self.send_transaction(&call.contract_address, data).await
    }

    async fn health_check(&self) -> Result<(), ChainError> {
        let chain_id: String = self.rpc_required("eth_chainId", vec![]).await?;
        debug!(chain = %self.info.id, evm_chain_id = %chain_id, "evm health check ok");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_chain() -> EvmChain {
        let config = ChainConfig {
            chain_id: "Ethereum".to_string(),
            rpc_endpoint: "http://127.0.0.1:8545".to_string(),
            start_height: 0,
            config: ChainSpecificConfig::Evm {
                gateway_address: "0x1111111111111111111111111111111111111111".to_string(),
                gas_service_address: "0x2222222222222222222222222222222222222222".to_string(),
                signer_address: "0x3333333333333333333333333333333333333333".to_string(),
                native_symbol: "ETH".to_string(),
                supports_batch: false,
                confirmation_timeout_ms: 1_000,
            },
        };
        EvmChain::new(&config).unwrap()
    }

    fn padded_topic(addr: &str) -> String {
        format!("0x{:0>64}", addr.trim_start_matches("0x"))
    }

    #[test]
    fn test_decode_contract_call_log() {
        let chain = test_chain();
        let payload_hash = format!("0x{}", hex::encode(abi::keccak256(b"hello")));
        let log = EvmLog {
            address: "0x1111111111111111111111111111111111111111".to_string(),
            topics: vec![
                abi::event_topic(CONTRACT_CALL),
                padded_topic("0x4444444444444444444444444444444444444444"),
                payload_hash.clone(),
            ],
            data: format!(
                "0x{}",
                hex::encode(abi::encode(&[
                    Token::String("Avalanche".into()),
                    Token::String("0x5555555555555555555555555555555555555555".into()),
                    Token::Bytes(b"hello".to_vec()),
                ]))
            ),
            block_number: "0x10".to_string(),
            transaction_hash: "0xABCD".to_string(),
            log_index: "0x2".to_string(),
            removed: false,
        };

        let event = chain.decode_log(&log).unwrap().unwrap();
        assert_eq!(event.position, EventPosition { height: 16, index: 2 });
        assert_eq!(event.tx_hash, "0xabcd");
        match event.data {
            GatewayEventData::ContractCall { sender, destination_chain, payload, token, .. } => {
                assert_eq!(sender, "0x4444444444444444444444444444444444444444");
                assert_eq!(destination_chain, "Avalanche");
                assert_eq!(payload, b"hello".to_vec());
                assert!(token.is_none());
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_decode_native_gas_paid_log() {
        let chain = test_chain();
        let log = EvmLog {
            address: "0x2222222222222222222222222222222222222222".to_string(),
            topics: vec![
                abi::event_topic(NATIVE_GAS_PAID),
                padded_topic("0x4444444444444444444444444444444444444444"),
                format!("0x{}", "ab".repeat(32)),
            ],
            data: format!(
                "0x{}",
                hex::encode(abi::encode(&[
                    Token::String("Avalanche".into()),
                    Token::String("0x5555555555555555555555555555555555555555".into()),
                    Token::Uint(1_000_000),
                    Token::Address([0x44; 20]),
                ]))
            ),
            block_number: "0x10".to_string(),
            transaction_hash: "0xabcd".to_string(),
            log_index: "0x1".to_string(),
            removed: false,
        };

        match chain.decode_log(&log).unwrap().unwrap().data {
            GatewayEventData::GasPaid { amount, asset, refund_address, for_token_call, .. } => {
                assert_eq!(amount, 1_000_000);
                assert_eq!(asset, GasAsset::Native);
                assert_eq!(refund_address, "0x4444444444444444444444444444444444444444");
                assert!(!for_token_call);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_gas_log_from_wrong_contract_is_ignored() {
        let chain = test_chain();
        let log = EvmLog {
            address: "0x9999999999999999999999999999999999999999".to_string(),
            topics: vec![abi::event_topic(NATIVE_GAS_PAID)],
            data: "0x".to_string(),
            block_number: "0x1".to_string(),
            transaction_hash: "0x01".to_string(),
            log_index: "0x0".to_string(),
            removed: false,
        };
        assert!(chain.decode_log(&log).unwrap().is_none());
    }

    #[test]
    fn test_single_approval_encoding_without_batch_support() {
        let chain = test_chain();
        let command = ApprovalCommand {
            command_id: CommandId([7u8; 32]),
            kind: CommandKind::ApproveContractCall,
            source_chain: "Ethereum".into(),
            source_address: "0x4444444444444444444444444444444444444444".into(),
            contract_address: "0x5555555555555555555555555555555555555555".into(),
            payload_hash: format!("0x{}", "ab".repeat(32)),
            token: None,
        };

        let data = chain.encode_approval(std::slice::from_ref(&command)).unwrap();
        assert_eq!(&data[..4], &abi::selector(APPROVE_CONTRACT_CALL));
        assert_eq!(&data[4..36], &[7u8; 32]);

        let err = chain.encode_approval(&[command.clone(), command]).unwrap_err();
        assert!(matches!(err, ChainError::Unsupported(_)));
    }

    #[test]
    fn test_decode_token_sent_log() {
        let chain = test_chain();
        let log = EvmLog {
            address: "0x1111111111111111111111111111111111111111".to_string(),
            topics: vec![
                abi::event_topic(TOKEN_SENT),
                padded_topic("0x4444444444444444444444444444444444444444"),
            ],
            data: format!(
                "0x{}",
                hex::encode(abi::encode(&[
                    Token::String("Avalanche".into()),
                    Token::String("0x5555555555555555555555555555555555555555".into()),
                    Token::String("aUSDC".into()),
                    Token::Uint(1_000_000),
                ]))
            ),
            block_number: "0x11".to_string(),
            transaction_hash: "0xbeef".to_string(),
            log_index: "0x0".to_string(),
            removed: false,
        };

        let event = chain.decode_log(&log).unwrap().unwrap();
        assert!(EventKind::ContractCalls.matches(&event.data));
        assert!(event.call_key().is_none());
        match event.data {
            GatewayEventData::TokenSent { sender, destination_chain, destination_address, token } => {
                assert_eq!(sender, "0x4444444444444444444444444444444444444444");
                assert_eq!(destination_chain, "Avalanche");
                assert_eq!(destination_address, "0x5555555555555555555555555555555555555555");
                assert_eq!(token, TokenAmount { symbol: "aUSDC".into(), amount: 1_000_000 });
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_mint_command_encodes_symbol_account_amount() {
        let chain = test_chain();
        let command = ApprovalCommand {
            command_id: CommandId([9u8; 32]),
            kind: CommandKind::MintToken,
            source_chain: "Ethereum".into(),
            source_address: "0x4444444444444444444444444444444444444444".into(),
            contract_address: "0x5555555555555555555555555555555555555555".into(),
            payload_hash: format!("0x{}", "00".repeat(32)),
            token: Some(TokenAmount { symbol: "aUSDC".into(), amount: 42 }),
        };

        let data = chain.encode_approval(std::slice::from_ref(&command)).unwrap();
        assert_eq!(&data[..4], &abi::selector(MINT_TOKEN));
        let tokens = abi::decode(
            &[ParamType::FixedBytes32, ParamType::String, ParamType::Address, ParamType::Uint],
            &data[4..],
        )
        .unwrap();
        assert_eq!(tokens[1], Token::String("aUSDC".into()));
        assert_eq!(tokens[2], Token::Address([0x55; 20]));
        assert_eq!(tokens[3], Token::Uint(42));

        let unfunded = ApprovalCommand { token: None, ..command };
        assert!(matches!(
            chain.encode_approval(&[unfunded]),
            Err(ChainError::Encode(_))
        ));
    }
}
