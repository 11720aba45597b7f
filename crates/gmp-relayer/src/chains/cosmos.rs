// Cosmos chain implementation
// Source-side gateway events from Axelar typed events, plus the IBC endpoint
// used for packet and acknowledgement relay

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

use super::cosmos_tx::{
    acknowledgement_msg, recv_packet_msg, tx_hash, AccountInfo, CosmosSigner, GasPrice, MerkleProof,
    DEFAULT_GAS_LIMIT,
};
use super::{
    ApprovalCommand, CallKey, Chain, ChainInfo, ChainKind, ChannelEnd, ChannelState, EventKind,
    EventPosition, ExecuteCall, GasAsset, GatewayEvent, GatewayEventData, IbcEndpoint, IbcHeight,
    IbcPacket, PacketProof, TokenAmount, TxOutcome,
};
use crate::config::{cosmos_default_denom, ChainConfig, ChainSpecificConfig, ChannelOrdering};
use crate::error::ChainError;

pub const CONTRACT_CALL_SUBMITTED: &str = "axelar.axelarnet.v1beta1.ContractCallSubmitted";
pub const CONTRACT_CALL_WITH_TOKEN_SUBMITTED: &str = "axelar.axelarnet.v1beta1.ContractCallWithTokenSubmitted";
pub const FEE_PAID: &str = "axelar.axelarnet.v1beta1.FeePaid";

const PAGE_LIMIT: u32 = 1000;

/// Cosmos chain reached over Tendermint RPC and LCD
pub struct CosmosChain {
    info: ChainInfo,
    lcd_endpoint: String,
    gas_price: GasPrice,
    signer: Option<CosmosSigner>,
    client: Client,
    /// Serializes account-sequence use across submissions
    submit_lock: Mutex<()>,
    confirmation_timeout: Duration,
    poll_interval: Duration,
}

impl CosmosChain {
    /// Create a new Cosmos chain instance
    pub fn new(config: &ChainConfig) -> Result<Self, ChainError> {
        let ChainSpecificConfig::Cosmos {
            lcd_endpoint,
            denom,
            gas_price,
            signer_key,
            signer_address,
            ..
        } = &config.config
        else {
            return Err(ChainError::Unsupported(format!(
                "chain {} is not configured as a cosmos chain",
                config.chain_id
            )));
        };

        let signer = match (signer_key, signer_address) {
            (Some(key), Some(address)) => Some(CosmosSigner::from_hex(key, address)?),
            (None, None) => None,
            _ => {
                return Err(ChainError::Signing(format!(
                    "chain {} needs both signer_key and signer_address",
                    config.chain_id
                )))
            }
        };

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ChainError::Transport(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            info: ChainInfo {
                id: config.chain_id.clone(),
                kind: ChainKind::Cosmos,
                rpc_endpoint: config.rpc_endpoint.trim_end_matches('/').to_string(),
                lcd_endpoint: Some(lcd_endpoint.clone()),
                native_denom: denom
                    .clone()
                    .unwrap_or_else(|| cosmos_default_denom(&config.chain_id)),
                signer: signer.as_ref().map(|s| s.address().to_string()),
            },
            lcd_endpoint: lcd_endpoint.trim_end_matches('/').to_string(),
            gas_price: GasPrice::parse(gas_price)?,
            signer,
            client,
            submit_lock: Mutex::new(()),
            confirmation_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(500),
        })
    }

    /// Override how long and how often inclusion of a broadcast tx is polled
    pub fn with_confirmation(mut self, timeout: Duration, poll_interval: Duration) -> Self {
        self.confirmation_timeout = timeout;
        self.poll_interval = poll_interval;
        self
    }

    async fn get_json(&self, url: &str, query: &[(&str, String)]) -> Result<Value, ChainError> {
        let response = self.client.get(url).query(query).send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ChainError::NotFound(url.to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChainError::Rpc(format!("http status {}: {}", status.as_u16(), body)));
        }
        Ok(response.json().await?)
    }

    async fn lcd(&self, path: &str) -> Result<Value, ChainError> {
        self.get_json(&format!("{}{}", self.lcd_endpoint, path), &[]).await
    }

    /// Tendermint RPC over URI; string arguments must be double-quoted
    async fn rpc(&self, method: &str, params: &[(&str, String)]) -> Result<Value, ChainError> {
        let mut body = self
            .get_json(&format!("{}/{}", self.info.rpc_endpoint, method), params)
            .await?;
        if let Some(error) = body.get("error").filter(|e| !e.is_null()) {
            let message = error["data"]
                .as_str()
                .or_else(|| error["message"].as_str())
                .unwrap_or("unknown error");
            return Err(ChainError::Rpc(format!("{} failed: {}", method, message)));
        }
        Ok(body["result"].take())
    }

    /// Latest block height from Tendermint status
    pub async fn query_latest_height(&self) -> Result<u64, ChainError> {
        let status = self.rpc("status", &[]).await?;
        parse_u64(&status["sync_info"]["latest_block_height"], "latest_block_height")
    }

    /// Gateway events emitted in one block
    async fn block_events(&self, height: u64) -> Result<Vec<GatewayEvent>, ChainError> {
        let results = self.rpc("block_results", &[("height", height.to_string())]).await?;
        let tx_results = match results["txs_results"].as_array() {
            Some(txs) if !txs.is_empty() => txs.clone(),
            _ => return Ok(vec![]),
        };

        let block = self.rpc("block", &[("height", height.to_string())]).await?;
        let raw_txs = block["block"]["data"]["txs"].as_array().cloned().unwrap_or_default();

        let mut events = Vec::new();
        for (tx_index, tx_result) in tx_results.iter().enumerate() {
            if tx_result["code"].as_u64().unwrap_or(0) != 0 {
                continue;
            }
            let Some(raw) = raw_txs.get(tx_index).and_then(Value::as_str) else {
                continue;
            };
            let bytes = general_purpose::STANDARD
                .decode(raw)
                .map_err(|e| ChainError::Decode(format!("block {} tx {}: {}", height, tx_index, e)))?;
            let hash = tx_hash(&bytes);
            let tx_events = tx_result["events"].as_array().cloned().unwrap_or_default();
            events.extend(decode_tx_events(
                &self.info.id,
                &self.info.native_denom,
                height,
                tx_index as u64,
                &hash,
                &tx_events,
            ));
        }
        Ok(events)
    }

    async fn query_account(&self, address: &str) -> Result<AccountInfo, ChainError> {
        let result = self
            .lcd(&format!("/cosmos/auth/v1beta1/accounts/{}", address))
            .await?;
        let account = &result["account"];
        // Vesting and module accounts nest the base account
        let base = if account.get("base_account").is_some() {
            &account["base_account"]
        } else {
            account
        };
        Ok(AccountInfo {
            account_number: parse_u64(&base["account_number"], "account_number")?,
            sequence: parse_u64(&base["sequence"], "sequence").unwrap_or(0),
        })
    }

    /// Sign, broadcast and wait for inclusion
    async fn submit_msgs(&self, messages: Vec<prost_types::Any>) -> Result<TxOutcome, ChainError> {
        let signer = self.signer.as_ref().ok_or_else(|| {
            ChainError::Unsupported(format!("no signer configured for {}", self.info.id))
        })?;

        let _guard = self.submit_lock.lock().await;
        let account = self.query_account(signer.address()).await?;
        let tx_bytes = signer.build_tx(
            &self.info.id,
            account,
            messages,
            &self.gas_price,
            DEFAULT_GAS_LIMIT,
            "",
        )?;

        let response = self
            .client
            .post(format!("{}/cosmos/tx/v1beta1/txs", self.lcd_endpoint))
            .json(&json!({
                "tx_bytes": general_purpose::STANDARD.encode(&tx_bytes),
                "mode": "BROADCAST_MODE_SYNC"
            }))
            .send()
            .await?;
        let status = response.status();
        let result: Value = response.json().await?;
        if !status.is_success() {
            return Err(ChainError::Rpc(format!(
                "broadcast failed with http status {}: {}",
                status.as_u16(),
                result["message"].as_str().unwrap_or_default()
            )));
        }

        let tx_response = &result["tx_response"];
        let code = tx_response["code"].as_u64().unwrap_or(0);
        if code != 0 {
            return Err(ChainError::Rpc(format!(
                "broadcast rejected with code {}: {}",
                code,
                tx_response["raw_log"].as_str().unwrap_or("unknown error")
            )));
        }
        let hash = tx_response["txhash"]
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| tx_hash(&tx_bytes));

        debug!(chain = %self.info.id, tx_hash = %hash, "cosmos transaction broadcast");
        self.wait_for_tx(&hash).await
    }

    async fn wait_for_tx(&self, hash: &str) -> Result<TxOutcome, ChainError> {
        let deadline = Instant::now() + self.confirmation_timeout;
        loop {
            match self.lcd(&format!("/cosmos/tx/v1beta1/txs/{}", hash)).await {
                Ok(result) => {
                    let tx_response = &result["tx_response"];
                    let code = tx_response["code"].as_u64().unwrap_or(0);
                    if code != 0 {
                        return Err(ChainError::Reverted(format!(
                            "tx {} failed with code {}: {}",
                            hash,
                            code,
                            tx_response["raw_log"].as_str().unwrap_or_default()
                        )));
                    }
                    return Ok(TxOutcome {
                        tx_hash: hash.to_string(),
                        height: parse_u64(&tx_response["height"], "height")?,
                    });
                }
                Err(ChainError::NotFound(_)) => {}
                Err(ChainError::Rpc(msg)) if msg.contains("not found") => {}
                Err(e) => return Err(e),
            }

            if Instant::now() >= deadline {
                return Err(ChainError::Transport(format!("timed out waiting for tx {}", hash)));
            }
            sleep(self.poll_interval).await;
        }
    }

    /// First `event_type` event in a tx matched by `query` whose attributes satisfy `matches`
    async fn search_event(
        &self,
        query: String,
        event_type: &str,
        matches: impl Fn(&[(String, String)]) -> bool,
    ) -> Result<Vec<(String, String)>, ChainError> {
        let result = self
            .rpc(
                "tx_search",
                &[
                    ("query", format!("\"{}\"", query)),
                    ("per_page", "10".to_string()),
                ],
            )
            .await?;

        for tx in result["txs"].as_array().into_iter().flatten() {
            for event in tx["tx_result"]["events"].as_array().into_iter().flatten() {
                if event["type"].as_str() != Some(event_type) {
                    continue;
                }
                let attributes = parse_attributes(event);
                if matches(&attributes) {
                    return Ok(attributes);
                }
            }
        }
        Err(ChainError::NotFound(format!("no {} event for {}", event_type, query)))
    }

    async fn store_proof(&self, key: String) -> Result<PacketProof, ChainError> {
        let result = self
            .rpc(
                "abci_query",
                &[
                    ("path", "\"store/ibc/key\"".to_string()),
                    ("data", format!("0x{}", hex::encode(key.as_bytes()))),
                    ("prove", "true".to_string()),
                ],
            )
            .await?;
        let response = &result["response"];

        let code = response["code"].as_u64().unwrap_or(0);
        if code != 0 {
            return Err(ChainError::Rpc(format!(
                "abci_query {} failed with code {}: {}",
                key,
                code,
                response["log"].as_str().unwrap_or_default()
            )));
        }
        if response["value"].as_str().map_or(true, str::is_empty) {
            return Err(ChainError::NotFound(format!("no value stored at {}", key)));
        }

        let mut proofs = Vec::new();
        for op in response["proofOps"]["ops"].as_array().into_iter().flatten() {
            let data = op["data"].as_str().unwrap_or_default();
            proofs.push(
                general_purpose::STANDARD
                    .decode(data)
                    .map_err(|e| ChainError::Decode(format!("proof op for {}: {}", key, e)))?,
            );
        }
        if proofs.is_empty() {
            return Err(ChainError::Decode(format!("abci_query {} returned no proof", key)));
        }

        // Proofs at height h verify against the app hash committed in h + 1
        let query_height = parse_u64(&response["height"], "height")?;
        Ok(PacketProof {
            proof: prost::Message::encode_to_vec(&MerkleProof { proofs }),
            height: IbcHeight {
                revision_number: revision_number(&self.info.id),
                revision_height: query_height + 1,
            },
        })
    }

    fn channel_path(port_id: &str, channel_id: &str) -> String {
        format!("/ibc/core/channel/v1/channels/{}/ports/{}", channel_id, port_id)
    }

    fn sequence_list(sequences: &[u64]) -> String {
        sequences.iter().map(u64::to_string).collect::<Vec<_>>().join(",")
    }
}

/// Decode the Axelar gateway events of one transaction.
///
/// Fees carry no call fields. They are matched to the call with the same
/// `message_id`, or, lacking one, to a call in the same transaction
/// regardless of which event came first.
pub fn decode_tx_events(
    chain_id: &str,
    native_denom: &str,
    height: u64,
    tx_index: u64,
    tx_hash: &str,
    events: &[Value],
) -> Vec<GatewayEvent> {
    let position = |event_index: usize| EventPosition {
        height,
        index: (tx_index << 32) | event_index as u64,
    };
    let gateway_event = |event_index: usize, data: GatewayEventData| GatewayEvent {
        chain_id: chain_id.to_string(),
        tx_hash: tx_hash.to_lowercase(),
        position: position(event_index),
        data,
    };

    let mut decoded = Vec::new();
    // (event index, message id, key) of every call in the tx
    let mut calls: Vec<(usize, Option<String>, CallKey)> = Vec::new();
    let mut fees = Vec::new();

    for (event_index, event) in events.iter().enumerate() {
        let event_type = event["type"].as_str().unwrap_or_default();
        match event_type {
            CONTRACT_CALL_SUBMITTED | CONTRACT_CALL_WITH_TOKEN_SUBMITTED => {
                let attributes = parse_attributes(event);
                let Some(data) = contract_call_data(&attributes, event_type == CONTRACT_CALL_WITH_TOKEN_SUBMITTED) else {
                    debug!(chain = %chain_id, tx_hash = %tx_hash, "skipping malformed {}", event_type);
                    continue;
                };
                let event = gateway_event(event_index, data);
                if let Some(key) = event.call_key() {
                    calls.push((event_index, attr_string(&attributes, "message_id"), key));
                }
                decoded.push(event);
            }
            FEE_PAID => fees.push((event_index, parse_attributes(event))),
            _ => {}
        }
    }

    for (event_index, attributes) in fees {
        let Some(call) = fee_call(&calls, event_index, attr_string(&attributes, "message_id")) else {
            debug!(chain = %chain_id, tx_hash = %tx_hash, "fee paid without a matching contract call");
            continue;
        };
        if let Some(data) = fee_paid_data(&attributes, call, native_denom) {
            decoded.push(gateway_event(event_index, data));
        }
    }

    decoded.sort_by_key(|event| event.position);
    decoded
}

/// Call a fee pays for: same message id first, otherwise the nearest
/// preceding call, otherwise the first call after the fee
fn fee_call<'a>(
    calls: &'a [(usize, Option<String>, CallKey)],
    fee_index: usize,
    message_id: Option<String>,
) -> Option<&'a CallKey> {
    if let Some(id) = message_id {
        if let Some((_, _, key)) = calls.iter().find(|(_, call_id, _)| call_id.as_deref() == Some(id.as_str())) {
            return Some(key);
        }
        if calls.iter().any(|(_, call_id, _)| call_id.is_some()) {
            return None;
        }
    }
    calls
        .iter()
        .rev()
        .find(|(index, _, _)| *index < fee_index)
        .or_else(|| calls.iter().find(|(index, _, _)| *index > fee_index))
        .map(|(_, _, key)| key)
}

fn contract_call_data(attributes: &[(String, String)], with_token: bool) -> Option<GatewayEventData> {
    let payload = attr_bytes(attributes, "payload")?;
    let payload_hash = match attr_bytes(attributes, "payload_hash") {
        Some(hash) => format!("0x{}", hex::encode(hash)),
        None => format!("0x{}", hex::encode(super::abi::keccak256(&payload))),
    };
    let token = if with_token {
        let asset: Value = serde_json::from_str(attr(attributes, "asset")?).ok()?;
        Some(TokenAmount {
            symbol: asset["denom"].as_str()?.to_string(),
            amount: asset["amount"].as_str()?.parse().ok()?,
        })
    } else {
        None
    };

    Some(GatewayEventData::ContractCall {
        sender: attr_string(attributes, "sender")?,
        destination_chain: attr_string(attributes, "destination_chain")?,
        destination_address: attr_string(attributes, "contract_address")?,
        payload_hash,
        payload,
        token,
    })
}

fn fee_paid_data(attributes: &[(String, String)], call: &CallKey, native_denom: &str) -> Option<GatewayEventData> {
    let fee: Value = serde_json::from_str(attr(attributes, "fee")?).ok()?;
    let denom = fee["denom"].as_str()?;
    let amount: u128 = fee["amount"].as_str()?.parse().ok()?;
    let asset = if denom == native_denom {
        GasAsset::Native
    } else {
        GasAsset::Token(denom.to_string())
    };

    Some(GatewayEventData::GasPaid {
        source_address: call.sender.clone(),
        destination_chain: call.destination_chain.clone(),
        destination_address: call.destination_address.clone(),
        payload_hash: call.payload_hash.clone(),
        amount,
        asset,
        refund_address: attr_string(attributes, "refund_recipient").unwrap_or_else(|| call.sender.clone()),
        for_token_call: false,
    })
}

/// Event attributes as key/value pairs. Older Tendermint versions
/// base64-encode both; newer ones emit plain strings.
fn parse_attributes(event: &Value) -> Vec<(String, String)> {
    let raw: Vec<(String, String)> = event["attributes"]
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|attr| {
            Some((
                attr["key"].as_str()?.to_string(),
                attr["value"].as_str().unwrap_or_default().to_string(),
            ))
        })
        .collect();

    let looks_plain = raw
        .iter()
        .any(|(key, _)| key.contains('_') || key.starts_with("packet") || key == "sender" || key == "fee");
    if looks_plain {
        return raw;
    }

    let decode = |value: &str| {
        general_purpose::STANDARD
            .decode(value)
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
    };
    raw.iter()
        .map(|(key, value)| match (decode(key), decode(value)) {
            (Some(k), Some(v)) => (k, v),
            (Some(k), None) if value.is_empty() => (k, String::new()),
            _ => (key.clone(), value.clone()),
        })
        .collect()
}

fn attr<'a>(attributes: &'a [(String, String)], key: &str) -> Option<&'a str> {
    attributes
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

/// Typed-event attribute values are JSON encoded
fn attr_string(attributes: &[(String, String)], key: &str) -> Option<String> {
    let raw = attr(attributes, key)?;
    Some(serde_json::from_str::<String>(raw).unwrap_or_else(|_| raw.to_string()))
}

/// Bytes fields arrive base64 encoded (proto JSON) or as 0x hex
fn attr_bytes(attributes: &[(String, String)], key: &str) -> Option<Vec<u8>> {
    let value = attr_string(attributes, key)?;
    match value.strip_prefix("0x") {
        Some(hex_value) => hex::decode(hex_value).ok(),
        None => general_purpose::STANDARD.decode(&value).ok(),
    }
}

fn parse_u64(value: &Value, field: &str) -> Result<u64, ChainError> {
    match value {
        Value::String(s) => s
            .parse()
            .map_err(|e| ChainError::Decode(format!("{} {:?}: {}", field, s, e))),
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| ChainError::Decode(format!("{} is not a u64: {}", field, n))),
        other => Err(ChainError::Decode(format!("missing {} (got {})", field, other))),
    }
}

fn parse_sequences(values: &Value, field: &str) -> Result<Vec<u64>, ChainError> {
    let mut sequences = Vec::new();
    for value in values.as_array().into_iter().flatten() {
        let value = if value.is_object() { &value["sequence"] } else { value };
        sequences.push(parse_u64(value, field)?);
    }
    sequences.sort_unstable();
    Ok(sequences)
}

/// IBC revision number: the numeric suffix of `{name}-{number}` chain ids
pub fn revision_number(chain_id: &str) -> u64 {
    chain_id
        .rsplit_once('-')
        .and_then(|(_, suffix)| suffix.parse().ok())
        .unwrap_or(0)
}

fn parse_ibc_height(value: &str) -> IbcHeight {
    match value.split_once('-') {
        Some((number, height)) => IbcHeight {
            revision_number: number.parse().unwrap_or(0),
            revision_height: height.parse().unwrap_or(0),
        },
        None => IbcHeight {
            revision_number: 0,
            revision_height: value.parse().unwrap_or(0),
        },
    }
}

fn parse_channel(value: &Value) -> Option<ChannelEnd> {
    let state = match value["state"].as_str()? {
        "STATE_INIT" => ChannelState::Init,
        "STATE_TRYOPEN" => ChannelState::TryOpen,
        "STATE_OPEN" => ChannelState::Open,
        _ => ChannelState::Closed,
    };
    let ordering = ChannelOrdering::from_ibc(value["ordering"].as_str()?)?;
    let counterparty_channel_id = value["counterparty"]["channel_id"]
        .as_str()
        .filter(|id| !id.is_empty())
        .map(str::to_string);

    Some(ChannelEnd {
        port_id: value["port_id"].as_str()?.to_string(),
        channel_id: value["channel_id"].as_str()?.to_string(),
        state,
        ordering,
        counterparty_port_id: value["counterparty"]["port_id"].as_str()?.to_string(),
        counterparty_channel_id,
    })
}

#[async_trait]
impl Chain for CosmosChain {
    fn info(&self) -> &ChainInfo {
        &self.info
    }

    async fn latest_height(&self) -> Result<u64, ChainError> {
        self.query_latest_height().await
    }

    async fn gateway_events(
        &self,
        kind: EventKind,
        from: u64,
        to: u64,
    ) -> Result<Vec<GatewayEvent>, ChainError> {
        // Cosmos chains are never approval targets
        if kind == EventKind::Approvals {
            return Ok(vec![]);
        }
        let mut events = Vec::new();
        for height in from..=to {
            events.extend(
                self.block_events(height)
                    .await?
                    .into_iter()
                    .filter(|e| kind.matches(&e.data)),
            );
        }
        Ok(events)
    }

    async fn approve(&self, _commands: &[ApprovalCommand]) -> Result<TxOutcome, ChainError> {
        Err(ChainError::Unsupported(format!(
            "{} has no gateway accepting approvals",
            self.info.id
        )))
    }

    async fn execute(&self, call: &ExecuteCall) -> Result<TxOutcome, ChainError> {
        Err(ChainError::Unsupported(format!(
            "execution of {} on cosmos chain {}",
            call.command_id, self.info.id
        )))
    }

    async fn health_check(&self) -> Result<(), ChainError> {
        let height = self.query_latest_height().await?;
        debug!(chain = %self.info.id, height, "cosmos health check ok");
        Ok(())
    }
}

#[async_trait]
impl IbcEndpoint for CosmosChain {
    fn chain_id(&self) -> &str {
        &self.info.id
    }

    async fn latest_height(&self) -> Result<u64, ChainError> {
        self.query_latest_height().await
    }

    async fn query_channels(&self, port_id: &str) -> Result<Vec<ChannelEnd>, ChainError> {
        let result = self
            .lcd(&format!("/ibc/core/channel/v1/channels?pagination.limit={}", PAGE_LIMIT))
            .await?;
        Ok(result["channels"]
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(parse_channel)
            .filter(|channel| channel.port_id == port_id)
            .collect())
    }

    async fn open_channel(
        &self,
        port_id: &str,
        counterparty_chain_id: &str,
        _counterparty_port_id: &str,
        _ordering: ChannelOrdering,
    ) -> Result<ChannelEnd, ChainError> {
        info!(
            chain = %self.info.id,
            port = %port_id,
            counterparty = %counterparty_chain_id,
            "channel handshake must be completed by the chain operator"
        );
        Err(ChainError::Unsupported(format!(
            "opening channels on {} requires an external handshake",
            self.info.id
        )))
    }

    async fn packet_commitments(&self, port_id: &str, channel_id: &str) -> Result<Vec<u64>, ChainError> {
        let result = self
            .lcd(&format!(
                "{}/packet_commitments?pagination.limit={}",
                Self::channel_path(port_id, channel_id),
                PAGE_LIMIT
            ))
            .await?;
        parse_sequences(&result["commitments"], "commitment sequence")
    }

    async fn unreceived_packets(
        &self,
        port_id: &str,
        channel_id: &str,
        sequences: &[u64],
    ) -> Result<Vec<u64>, ChainError> {
        if sequences.is_empty() {
            return Ok(vec![]);
        }
        let result = self
            .lcd(&format!(
                "{}/packet_commitments/{}/unreceived_packets",
                Self::channel_path(port_id, channel_id),
                Self::sequence_list(sequences)
            ))
            .await?;
        parse_sequences(&result["sequences"], "unreceived packet")
    }

    async fn packet_acknowledgements(&self, port_id: &str, channel_id: &str) -> Result<Vec<u64>, ChainError> {
        let result = self
            .lcd(&format!(
                "{}/packet_acknowledgements?pagination.limit={}",
                Self::channel_path(port_id, channel_id),
                PAGE_LIMIT
            ))
            .await?;
        parse_sequences(&result["acknowledgements"], "acknowledgement sequence")
    }

    async fn unreceived_acks(
        &self,
        port_id: &str,
        channel_id: &str,
        sequences: &[u64],
    ) -> Result<Vec<u64>, ChainError> {
        if sequences.is_empty() {
            return Ok(vec![]);
        }
        let result = self
            .lcd(&format!(
                "{}/packet_commitments/{}/unreceived_acks",
                Self::channel_path(port_id, channel_id),
                Self::sequence_list(sequences)
            ))
            .await?;
        parse_sequences(&result["sequences"], "unreceived ack")
    }

    async fn next_sequence_recv(&self, port_id: &str, channel_id: &str) -> Result<u64, ChainError> {
        let result = self
            .lcd(&format!("{}/next_sequence", Self::channel_path(port_id, channel_id)))
            .await?;
        parse_u64(&result["next_sequence_receive"], "next_sequence_receive")
    }

    async fn sent_packet(&self, port_id: &str, channel_id: &str, sequence: u64) -> Result<IbcPacket, ChainError> {
        let query = format!(
            "send_packet.packet_src_port='{}' AND send_packet.packet_src_channel='{}' AND send_packet.packet_sequence='{}'",
            port_id, channel_id, sequence
        );
        let seq = sequence.to_string();
        let attributes = self
            .search_event(query, "send_packet", |attrs| {
                attr(attrs, "packet_sequence") == Some(seq.as_str())
                    && attr(attrs, "packet_src_channel") == Some(channel_id)
            })
            .await?;

        let data = hex::decode(attr(&attributes, "packet_data_hex").unwrap_or_default())
            .map_err(|e| ChainError::Decode(format!("packet {} data: {}", sequence, e)))?;
        let missing = |field: &str| ChainError::Decode(format!("send_packet {} missing {}", sequence, field));

        Ok(IbcPacket {
            sequence,
            source_port: port_id.to_string(),
            source_channel: channel_id.to_string(),
            destination_port: attr(&attributes, "packet_dst_port")
                .ok_or_else(|| missing("packet_dst_port"))?
                .to_string(),
            destination_channel: attr(&attributes, "packet_dst_channel")
                .ok_or_else(|| missing("packet_dst_channel"))?
                .to_string(),
            data,
            timeout_height: parse_ibc_height(attr(&attributes, "packet_timeout_height").unwrap_or("0-0")),
            timeout_timestamp: attr(&attributes, "packet_timeout_timestamp")
                .and_then(|t| t.parse().ok())
                .unwrap_or(0),
        })
    }

    async fn written_ack(&self, port_id: &str, channel_id: &str, sequence: u64) -> Result<Vec<u8>, ChainError> {
        let query = format!(
            "write_acknowledgement.packet_dst_port='{}' AND write_acknowledgement.packet_dst_channel='{}' AND write_acknowledgement.packet_sequence='{}'",
            port_id, channel_id, sequence
        );
        let seq = sequence.to_string();
        let attributes = self
            .search_event(query, "write_acknowledgement", |attrs| {
                attr(attrs, "packet_sequence") == Some(seq.as_str())
                    && attr(attrs, "packet_dst_channel") == Some(channel_id)
            })
            .await?;

        hex::decode(attr(&attributes, "packet_ack_hex").unwrap_or_default())
            .map_err(|e| ChainError::Decode(format!("ack {} data: {}", sequence, e)))
    }

    async fn commitment_proof(&self, port_id: &str, channel_id: &str, sequence: u64) -> Result<PacketProof, ChainError> {
        self.store_proof(format!(
            "commitments/ports/{}/channels/{}/sequences/{}",
            port_id, channel_id, sequence
        ))
        .await
    }

    async fn ack_proof(&self, port_id: &str, channel_id: &str, sequence: u64) -> Result<PacketProof, ChainError> {
        self.store_proof(format!(
            "acks/ports/{}/channels/{}/sequences/{}",
            port_id, channel_id, sequence
        ))
        .await
    }

    async fn submit_recv_packet(&self, packet: &IbcPacket, proof: &PacketProof) -> Result<TxOutcome, ChainError> {
        let signer = self.info.signer.clone().unwrap_or_default();
        self.submit_msgs(vec![recv_packet_msg(packet, proof, &signer)]).await
    }

    async fn submit_acknowledgement(
        &self,
        packet: &IbcPacket,
        acknowledgement: &[u8],
        proof: &PacketProof,
    ) -> Result<TxOutcome, ChainError> {
        let signer = self.info.signer.clone().unwrap_or_default();
        self.submit_msgs(vec![acknowledgement_msg(packet, acknowledgement, proof, &signer)])
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quoted(value: &str) -> String {
        serde_json::to_string(value).unwrap()
    }

    fn call_event(payload: &[u8]) -> Value {
        json!({
            "type": CONTRACT_CALL_SUBMITTED,
            "attributes": [
                {"key": "message_id", "value": quoted("0xabc-0")},
                {"key": "sender", "value": quoted("axelar1sender")},
                {"key": "source_chain", "value": quoted("Axelarnet")},
                {"key": "destination_chain", "value": quoted("Ethereum")},
                {"key": "contract_address", "value": quoted("0x5555555555555555555555555555555555555555")},
                {"key": "payload_hash", "value": quoted(&general_purpose::STANDARD.encode(super::super::abi::keccak256(payload)))},
                {"key": "payload", "value": quoted(&general_purpose::STANDARD.encode(payload))}
            ]
        })
    }

    #[test]
    fn test_decode_contract_call_and_fee_in_same_tx() {
        let events = vec![
            json!({"type": "message", "attributes": [{"key": "action", "value": "call_contract"}]}),
            call_event(b"hi"),
            json!({
                "type": FEE_PAID,
                "attributes": [
                    {"key": "message_id", "value": quoted("0xabc-0")},
                    {"key": "fee", "value": "{\"denom\":\"uaxl\",\"amount\":\"5000\"}"},
                    {"key": "refund_recipient", "value": quoted("axelar1refund")}
                ]
            }),
        ];

        let decoded = decode_tx_events("Axelarnet", "uaxl", 12, 1, "ABCDEF", &events);
        assert_eq!(decoded.len(), 2);

        let call = &decoded[0];
        assert_eq!(call.tx_hash, "abcdef");
        assert_eq!(call.position, EventPosition { height: 12, index: (1 << 32) | 1 });
        let key = call.call_key().unwrap();
        assert_eq!(key.sender, "axelar1sender");
        assert_eq!(key.destination_chain, "Ethereum");

        match &decoded[1].data {
            GatewayEventData::GasPaid { amount, asset, refund_address, .. } => {
                assert_eq!(*amount, 5000);
                assert_eq!(*asset, GasAsset::Native);
                assert_eq!(refund_address, "axelar1refund");
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(decoded[1].call_key(), Some(key));
    }

    fn fee_event(message_id: &str, amount: u64) -> Value {
        json!({
            "type": FEE_PAID,
            "attributes": [
                {"key": "message_id", "value": quoted(message_id)},
                {"key": "fee", "value": format!("{{\"denom\":\"uaxl\",\"amount\":\"{}\"}}", amount)}
            ]
        })
    }

    #[test]
    fn test_fee_emitted_before_its_call_is_kept() {
        let events = vec![fee_event("0xabc-0", 7), call_event(b"late call")];

        let decoded = decode_tx_events("Axelarnet", "uaxl", 3, 0, "AB", &events);
        assert_eq!(decoded.len(), 2);
        // Ordered by position: the fee came first
        match &decoded[0].data {
            GatewayEventData::GasPaid { amount, .. } => assert_eq!(*amount, 7),
            other => panic!("unexpected event {:?}", other),
        }
        assert!(matches!(decoded[1].data, GatewayEventData::ContractCall { .. }));
        assert_eq!(decoded[0].call_key(), decoded[1].call_key());
    }

    #[test]
    fn test_fee_with_unknown_message_id_is_skipped() {
        let events = vec![call_event(b"paid elsewhere"), fee_event("0xother-3", 7)];
        let decoded = decode_tx_events("Axelarnet", "uaxl", 3, 0, "AB", &events);
        assert_eq!(decoded.len(), 1);
        assert!(matches!(decoded[0].data, GatewayEventData::ContractCall { .. }));
    }

    #[test]
    fn test_fee_without_call_is_skipped() {
        let events = vec![json!({
            "type": FEE_PAID,
            "attributes": [{"key": "fee", "value": "{\"denom\":\"uaxl\",\"amount\":\"1\"}"}]
        })];
        assert!(decode_tx_events("Axelarnet", "uaxl", 1, 0, "AA", &events).is_empty());
    }

    #[test]
    fn test_base64_attributes_are_decoded() {
        let b64 = |s: &str| general_purpose::STANDARD.encode(s);
        let event = json!({
            "type": "send_packet",
            "attributes": [
                {"key": b64("packet_sequence"), "value": b64("4")},
                {"key": b64("packet_src_channel"), "value": b64("channel-0")}
            ]
        });
        let attributes = parse_attributes(&event);
        assert_eq!(attr(&attributes, "packet_sequence"), Some("4"));
        assert_eq!(attr(&attributes, "packet_src_channel"), Some("channel-0"));
    }

    #[test]
    fn test_height_and_revision_parsing() {
        assert_eq!(revision_number("axelar-testnet-1"), 1);
        assert_eq!(revision_number("wasm"), 0);
        assert_eq!(
            parse_ibc_height("2-1500"),
            IbcHeight { revision_number: 2, revision_height: 1500 }
        );
        assert_eq!(parse_sequences(&json!(["3", "1", "2"]), "seq").unwrap(), vec![1, 2, 3]);
        assert_eq!(
            parse_sequences(&json!([{"sequence": "9"}]), "seq").unwrap(),
            vec![9]
        );
    }

    #[test]
    fn test_parse_open_channel() {
        let channel = parse_channel(&json!({
            "state": "STATE_OPEN",
            "ordering": "ORDER_ORDERED",
            "counterparty": {"port_id": "wasm.contract", "channel_id": "channel-3"},
            "port_id": "transfer",
            "channel_id": "channel-0"
        }))
        .unwrap();
        assert_eq!(channel.state, ChannelState::Open);
        assert_eq!(channel.ordering, ChannelOrdering::Ordered);
        assert_eq!(channel.counterparty_channel_id.as_deref(), Some("channel-3"));
    }
}
