// Cosmos transaction building and signing for IBC packet relay
// Builds SIGN_MODE_DIRECT transactions carrying MsgRecvPacket / MsgAcknowledgement

use cosmos_sdk_proto::cosmos::base::v1beta1::Coin as ProtoCoin;
use cosmos_sdk_proto::cosmos::crypto::secp256k1::PubKey;
use cosmos_sdk_proto::cosmos::tx::signing::v1beta1::SignMode;
use cosmos_sdk_proto::cosmos::tx::v1beta1::mode_info::{Single, Sum};
use cosmos_sdk_proto::cosmos::tx::v1beta1::{AuthInfo, Fee, ModeInfo, SignDoc, SignerInfo, TxBody, TxRaw};
use prost::Message;
use sha2::{Digest, Sha256};

use super::{IbcHeight, IbcPacket, PacketProof};
use crate::error::ChainError;

pub const MSG_RECV_PACKET_TYPE_URL: &str = "/ibc.core.channel.v1.MsgRecvPacket";
pub const MSG_ACKNOWLEDGEMENT_TYPE_URL: &str = "/ibc.core.channel.v1.MsgAcknowledgement";
const SECP256K1_PUBKEY_TYPE_URL: &str = "/cosmos.crypto.secp256k1.PubKey";

/// Gas limit used for a single packet message
pub const DEFAULT_GAS_LIMIT: u64 = 400_000;

/// ibc.core.client.v1.Height
#[derive(Clone, PartialEq, Message)]
pub struct ProtoHeight {
    #[prost(uint64, tag = "1")]
    pub revision_number: u64,
    #[prost(uint64, tag = "2")]
    pub revision_height: u64,
}

/// ibc.core.channel.v1.Packet
#[derive(Clone, PartialEq, Message)]
pub struct ProtoPacket {
    #[prost(uint64, tag = "1")]
    pub sequence: u64,
    #[prost(string, tag = "2")]
    pub source_port: String,
    #[prost(string, tag = "3")]
    pub source_channel: String,
    #[prost(string, tag = "4")]
    pub destination_port: String,
    #[prost(string, tag = "5")]
    pub destination_channel: String,
    #[prost(bytes = "vec", tag = "6")]
    pub data: Vec<u8>,
    #[prost(message, optional, tag = "7")]
    pub timeout_height: Option<ProtoHeight>,
    #[prost(uint64, tag = "8")]
    pub timeout_timestamp: u64,
}

/// ibc.core.channel.v1.MsgRecvPacket
#[derive(Clone, PartialEq, Message)]
pub struct MsgRecvPacket {
    #[prost(message, optional, tag = "1")]
    pub packet: Option<ProtoPacket>,
    #[prost(bytes = "vec", tag = "2")]
    pub proof_commitment: Vec<u8>,
    #[prost(message, optional, tag = "3")]
    pub proof_height: Option<ProtoHeight>,
    #[prost(string, tag = "4")]
    pub signer: String,
}

/// ibc.core.channel.v1.MsgAcknowledgement
#[derive(Clone, PartialEq, Message)]
pub struct MsgAcknowledgement {
    #[prost(message, optional, tag = "1")]
    pub packet: Option<ProtoPacket>,
    #[prost(bytes = "vec", tag = "2")]
    pub acknowledgement: Vec<u8>,
    #[prost(bytes = "vec", tag = "3")]
    pub proof_acked: Vec<u8>,
    #[prost(message, optional, tag = "4")]
    pub proof_height: Option<ProtoHeight>,
    #[prost(string, tag = "5")]
    pub signer: String,
}

/// ibc.core.commitment.v1.MerkleProof; each entry is an encoded
/// ics23 CommitmentProof taken verbatim from an ABCI proof op
#[derive(Clone, PartialEq, Message)]
pub struct MerkleProof {
    #[prost(bytes = "vec", repeated, tag = "1")]
    pub proofs: Vec<Vec<u8>>,
}

impl From<IbcHeight> for ProtoHeight {
    fn from(height: IbcHeight) -> Self {
        Self {
            revision_number: height.revision_number,
            revision_height: height.revision_height,
        }
    }
}

impl From<&IbcPacket> for ProtoPacket {
    fn from(packet: &IbcPacket) -> Self {
        Self {
            sequence: packet.sequence,
            source_port: packet.source_port.clone(),
            source_channel: packet.source_channel.clone(),
            destination_port: packet.destination_port.clone(),
            destination_channel: packet.destination_channel.clone(),
            data: packet.data.clone(),
            timeout_height: Some(packet.timeout_height.into()),
            timeout_timestamp: packet.timeout_timestamp,
        }
    }
}

pub fn recv_packet_msg(packet: &IbcPacket, proof: &PacketProof, signer: &str) -> prost_types::Any {
    let msg = MsgRecvPacket {
        packet: Some(packet.into()),
        proof_commitment: proof.proof.clone(),
        proof_height: Some(proof.height.into()),
        signer: signer.to_string(),
    };
    prost_types::Any {
        type_url: MSG_RECV_PACKET_TYPE_URL.to_string(),
        value: msg.encode_to_vec(),
    }
}

pub fn acknowledgement_msg(
    packet: &IbcPacket,
    acknowledgement: &[u8],
    proof: &PacketProof,
    signer: &str,
) -> prost_types::Any {
    let msg = MsgAcknowledgement {
        packet: Some(packet.into()),
        acknowledgement: acknowledgement.to_vec(),
        proof_acked: proof.proof.clone(),
        proof_height: Some(proof.height.into()),
        signer: signer.to_string(),
    };
    prost_types::Any {
        type_url: MSG_ACKNOWLEDGEMENT_TYPE_URL.to_string(),
        value: msg.encode_to_vec(),
    }
}

/// Account number and sequence as reported by the auth module
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountInfo {
    pub account_number: u64,
    pub sequence: u64,
}

/// Fee price parsed from a config string such as `0.025uwasm`
#[derive(Debug, Clone, PartialEq)]
pub struct GasPrice {
    pub amount: f64,
    pub denom: String,
}

impl GasPrice {
    pub fn parse(value: &str) -> Result<Self, ChainError> {
        let split = value
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(|| ChainError::Signing(format!("gas price {} has no denom", value)))?;
        let (amount, denom) = value.split_at(split);
        let amount: f64 = amount
            .parse()
            .map_err(|e| ChainError::Signing(format!("gas price {}: {}", value, e)))?;
        Ok(Self {
            amount,
            denom: denom.to_string(),
        })
    }

    /// Fee for `gas_limit`, rounded up
    pub fn fee(&self, gas_limit: u64) -> ProtoCoin {
        let exact = self.amount * gas_limit as f64;
        // Absorb float noise before rounding up
        let amount = if (exact - exact.round()).abs() < 1e-6 {
            exact.round()
        } else {
            exact.ceil()
        };
        ProtoCoin {
            denom: self.denom.clone(),
            amount: (amount as u128).to_string(),
        }
    }
}

/// secp256k1 key that signs relay transactions
pub struct CosmosSigner {
    secret_key: secp256k1::SecretKey,
    public_key: Vec<u8>,
    address: String,
}

impl CosmosSigner {
    pub fn from_hex(private_key_hex: &str, address: &str) -> Result<Self, ChainError> {
        let key_bytes = hex::decode(private_key_hex.trim_start_matches("0x"))
            .map_err(|e| ChainError::Signing(format!("invalid private key hex: {}", e)))?;
        let secret_key = secp256k1::SecretKey::from_slice(&key_bytes)
            .map_err(|e| ChainError::Signing(format!("invalid private key: {}", e)))?;
        let secp = secp256k1::Secp256k1::new();
        let public_key = secp256k1::PublicKey::from_secret_key(&secp, &secret_key);

        Ok(Self {
            secret_key,
            // Compressed, 33 bytes
            public_key: public_key.serialize().to_vec(),
            address: address.to_string(),
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    /// Compact (r || s) signature over sha256 of the sign doc
    pub fn sign(&self, sign_doc: &[u8]) -> Result<Vec<u8>, ChainError> {
        let secp = secp256k1::Secp256k1::new();
        let hash = Sha256::digest(sign_doc);
        let message = secp256k1::Message::from_digest_slice(&hash)
            .map_err(|e| ChainError::Signing(format!("invalid message hash: {}", e)))?;
        let signature = secp.sign_ecdsa(&message, &self.secret_key);
        Ok(signature.serialize_compact().to_vec())
    }

    /// Build and sign a transaction, returning the encoded `TxRaw`
    pub fn build_tx(
        &self,
        chain_id: &str,
        account: AccountInfo,
        messages: Vec<prost_types::Any>,
        gas_price: &GasPrice,
        gas_limit: u64,
        memo: &str,
    ) -> Result<Vec<u8>, ChainError> {
        let body = TxBody {
            messages,
            memo: memo.to_string(),
            timeout_height: 0,
            extension_options: vec![],
            non_critical_extension_options: vec![],
        };

        let signer_info = SignerInfo {
            public_key: Some(prost_types::Any {
                type_url: SECP256K1_PUBKEY_TYPE_URL.to_string(),
                value: PubKey {
                    key: self.public_key.clone(),
                }
                .encode_to_vec(),
            }),
            mode_info: Some(ModeInfo {
                sum: Some(Sum::Single(Single {
                    mode: SignMode::Direct as i32,
                })),
            }),
            sequence: account.sequence,
        };

        let auth_info = AuthInfo {
            signer_infos: vec![signer_info],
            fee: Some(Fee {
                amount: vec![gas_price.fee(gas_limit)],
                gas_limit,
                payer: String::new(),
                granter: String::new(),
            }),
            tip: None,
        };

        let body_bytes = body.encode_to_vec();
        let auth_info_bytes = auth_info.encode_to_vec();
        let sign_doc = SignDoc {
            body_bytes: body_bytes.clone(),
            auth_info_bytes: auth_info_bytes.clone(),
            chain_id: chain_id.to_string(),
            account_number: account.account_number,
        };
        let signature = self.sign(&sign_doc.encode_to_vec())?;

        Ok(TxRaw {
            body_bytes,
            auth_info_bytes,
            signatures: vec![signature],
        }
        .encode_to_vec())
    }
}

/// Tendermint transaction hash: uppercase hex sha256 of the raw bytes
pub fn tx_hash(tx_bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(tx_bytes)).to_uppercase()
}
