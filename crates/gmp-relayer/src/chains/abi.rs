// Minimal Solidity ABI codec for the gateway surface: event topics, call
// selectors and head/tail encoding of the types the gateway uses.
use sha3::{Digest, Keccak256};

use crate::error::ChainError;

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

/// topic0 of an event, `0x`-prefixed
pub fn event_topic(signature: &str) -> String {
    format!("0x{}", hex::encode(keccak256(signature.as_bytes())))
}

/// First four bytes of the keccak of a function signature
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// ABI value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Address([u8; 20]),
    Uint(u128),
    FixedBytes32([u8; 32]),
    String(String),
    Bytes(Vec<u8>),
    Array(Vec<Token>),
}

/// ABI type used to drive decoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamType {
    Address,
    Uint,
    FixedBytes32,
    String,
    Bytes,
    Array(Box<ParamType>),
}

impl Token {
    fn is_dynamic(&self) -> bool {
        matches!(self, Token::String(_) | Token::Bytes(_) | Token::Array(_))
    }

    pub fn into_string(self) -> Result<String, ChainError> {
        match self {
            Token::String(s) => Ok(s),
            other => Err(ChainError::Decode(format!("expected string, got {:?}", other))),
        }
    }

    pub fn into_bytes(self) -> Result<Vec<u8>, ChainError> {
        match self {
            Token::Bytes(b) => Ok(b),
            other => Err(ChainError::Decode(format!("expected bytes, got {:?}", other))),
        }
    }

    pub fn into_uint(self) -> Result<u128, ChainError> {
        match self {
            Token::Uint(v) => Ok(v),
            other => Err(ChainError::Decode(format!("expected uint, got {:?}", other))),
        }
    }

    pub fn into_address(self) -> Result<String, ChainError> {
        match self {
            Token::Address(a) => Ok(format_address(&a)),
            other => Err(ChainError::Decode(format!("expected address, got {:?}", other))),
        }
    }

    pub fn into_fixed_bytes(self) -> Result<[u8; 32], ChainError> {
        match self {
            Token::FixedBytes32(b) => Ok(b),
            other => Err(ChainError::Decode(format!("expected bytes32, got {:?}", other))),
        }
    }
}

impl ParamType {
    fn is_dynamic(&self) -> bool {
        matches!(self, ParamType::String | ParamType::Bytes | ParamType::Array(_))
    }
}

/// Parse a 20-byte hex address
pub fn parse_address(addr: &str) -> Result<[u8; 20], ChainError> {
    let hex_clean = addr.strip_prefix("0x").unwrap_or(addr);
    // Left-pad so addresses with stripped leading zeros still decode
    let padded = format!("{:0>40}", hex_clean);
    let bytes = hex::decode(&padded).map_err(|e| ChainError::Decode(format!("address {}: {}", addr, e)))?;
    bytes
        .try_into()
        .map_err(|_| ChainError::Decode(format!("address {} is longer than 20 bytes", addr)))
}

pub fn format_address(addr: &[u8; 20]) -> String {
    format!("0x{}", hex::encode(addr))
}

/// Parse a `0x`-prefixed 32-byte hex value
pub fn parse_bytes32(value: &str) -> Result<[u8; 32], ChainError> {
    let hex_clean = value.strip_prefix("0x").unwrap_or(value);
    let padded = format!("{:0>64}", hex_clean);
    let bytes = hex::decode(&padded).map_err(|e| ChainError::Decode(format!("bytes32 {}: {}", value, e)))?;
    bytes
        .try_into()
        .map_err(|_| ChainError::Decode(format!("{} is longer than 32 bytes", value)))
}

/// Address held in an indexed topic (last 20 bytes)
pub fn topic_to_address(topic: &str) -> Result<String, ChainError> {
    let word = parse_bytes32(topic)?;
    let mut addr = [0u8; 20];
    addr.copy_from_slice(&word[12..]);
    Ok(format_address(&addr))
}

fn uint_word(value: u128) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[16..].copy_from_slice(&value.to_be_bytes());
    word
}

fn pad_right(data: &[u8]) -> Vec<u8> {
    let mut out = data.to_vec();
    let rem = out.len() % 32;
    if rem != 0 {
        out.resize(out.len() + 32 - rem, 0);
    }
    out
}

fn encode_tail(token: &Token) -> Vec<u8> {
    match token {
        Token::String(s) => {
            let mut out = uint_word(s.len() as u128).to_vec();
            out.extend(pad_right(s.as_bytes()));
            out
        }
        Token::Bytes(b) => {
            let mut out = uint_word(b.len() as u128).to_vec();
            out.extend(pad_right(b));
            out
        }
        Token::Array(items) => {
            let mut out = uint_word(items.len() as u128).to_vec();
            out.extend(encode(items));
            out
        }
        // Static tokens never reach the tail
        _ => Vec::new(),
    }
}

/// `abi.encode(tokens...)`
pub fn encode(tokens: &[Token]) -> Vec<u8> {
    let head_len = tokens.len() * 32;
    let mut head = Vec::with_capacity(head_len);
    let mut tail = Vec::new();

    for token in tokens {
        if token.is_dynamic() {
            head.extend_from_slice(&uint_word((head_len + tail.len()) as u128));
            tail.extend(encode_tail(token));
        } else {
            let word = match token {
                Token::Address(addr) => {
                    let mut word = [0u8; 32];
                    word[12..].copy_from_slice(addr);
                    word
                }
                Token::Uint(v) => uint_word(*v),
                Token::FixedBytes32(b) => *b,
                _ => [0u8; 32],
            };
            head.extend_from_slice(&word);
        }
    }

    head.extend(tail);
    head
}

/// Calldata for `signature(tokens...)`
pub fn encode_call(signature: &str, tokens: &[Token]) -> Vec<u8> {
    let mut data = selector(signature).to_vec();
    data.extend(encode(tokens));
    data
}

fn read_word(data: &[u8], offset: usize) -> Result<&[u8], ChainError> {
    offset
        .checked_add(32)
        .and_then(|end| data.get(offset..end))
        .ok_or_else(|| ChainError::Decode(format!("abi data too short: need word at {}", offset)))
}

fn read_usize(data: &[u8], offset: usize) -> Result<usize, ChainError> {
    let word = read_word(data, offset)?;
    if word[..24].iter().any(|b| *b != 0) {
        return Err(ChainError::Decode(format!("abi offset/length at {} out of range", offset)));
    }
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&word[24..]);
    Ok(u64::from_be_bytes(buf) as usize)
}

fn decode_static(param: &ParamType, word: &[u8]) -> Result<Token, ChainError> {
    match param {
        ParamType::Address => {
            let mut addr = [0u8; 20];
            addr.copy_from_slice(&word[12..]);
            Ok(Token::Address(addr))
        }
        ParamType::Uint => {
            if word[..16].iter().any(|b| *b != 0) {
                return Err(ChainError::Decode("uint256 value exceeds u128".to_string()));
            }
            let mut buf = [0u8; 16];
            buf.copy_from_slice(&word[16..]);
            Ok(Token::Uint(u128::from_be_bytes(buf)))
        }
        ParamType::FixedBytes32 => {
            let mut out = [0u8; 32];
            out.copy_from_slice(word);
            Ok(Token::FixedBytes32(out))
        }
        other => Err(ChainError::Decode(format!("{:?} is not a static type", other))),
    }
}

fn decode_dynamic(param: &ParamType, data: &[u8], offset: usize) -> Result<Token, ChainError> {
    let len = read_usize(data, offset)?;
    // read_usize already proved offset + 32 <= data.len()
    let start = offset + 32;
    match param {
        ParamType::String | ParamType::Bytes => {
            let raw = start
                .checked_add(len)
                .and_then(|end| data.get(start..end))
                .ok_or_else(|| ChainError::Decode(format!("abi bytes of length {} truncated", len)))?;
            if *param == ParamType::String {
                String::from_utf8(raw.to_vec())
                    .map(Token::String)
                    .map_err(|e| ChainError::Decode(format!("abi string is not utf-8: {}", e)))
            } else {
                Ok(Token::Bytes(raw.to_vec()))
            }
        }
        ParamType::Array(inner) => {
            let body = data
                .get(start..)
                .ok_or_else(|| ChainError::Decode("abi array truncated".to_string()))?;
            if len > body.len() / 32 {
                return Err(ChainError::Decode(format!("abi array of length {} truncated", len)));
            }
            let params = vec![(**inner).clone(); len];
            Ok(Token::Array(decode(&params, body)?))
        }
        other => Err(ChainError::Decode(format!("{:?} is not a dynamic type", other))),
    }
}

/// Decode `abi.encode(...)` output against `params`
pub fn decode(params: &[ParamType], data: &[u8]) -> Result<Vec<Token>, ChainError> {
    let mut tokens = Vec::with_capacity(params.len());
    for (i, param) in params.iter().enumerate() {
        let head_offset = i * 32;
        if param.is_dynamic() {
            let offset = read_usize(data, head_offset)?;
            tokens.push(decode_dynamic(param, data, offset)?);
        } else {
            tokens.push(decode_static(param, read_word(data, head_offset)?)?);
        }
    }
    Ok(tokens)
}

/// Decode a `0x`-prefixed hex data field
pub fn decode_hex_data(params: &[ParamType], data: &str) -> Result<Vec<Token>, ChainError> {
    let raw = hex::decode(data.strip_prefix("0x").unwrap_or(data))
        .map_err(|e| ChainError::Decode(format!("log data is not hex: {}", e)))?;
    decode(params, &raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_selectors_and_topics() {
        // transfer(address,uint256)
        assert_eq!(hex::encode(selector("transfer(address,uint256)")), "a9059cbb");
        // ERC-20 Transfer event
        assert_eq!(
            event_topic("Transfer(address,address,uint256)"),
            "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef"
        );
    }

    #[test]
    fn test_encode_string_and_uint_layout() {
        let encoded = encode(&[Token::String("abc".into()), Token::Uint(7)]);
        // head: offset(64), 7 ; tail: len(3), "abc" padded
        assert_eq!(encoded.len(), 32 * 4);
        assert_eq!(encoded[31], 64);
        assert_eq!(encoded[63], 7);
        assert_eq!(encoded[95], 3);
        assert_eq!(&encoded[96..99], b"abc");
        assert!(encoded[99..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_decode_contract_call_data() {
        let payload = vec![0xde, 0xad, 0xbe, 0xef];
        let data = encode(&[
            Token::String("Avalanche".into()),
            Token::String("0x5FbDB2315678afecb367f032d93F642f64180aa3".into()),
            Token::Bytes(payload.clone()),
        ]);
        let tokens = decode(&[ParamType::String, ParamType::String, ParamType::Bytes], &data).unwrap();
        assert_eq!(tokens[0], Token::String("Avalanche".into()));
        assert_eq!(tokens[2], Token::Bytes(payload));
    }

    #[test]
    fn test_decode_nested_arrays() {
        let data = encode(&[
            Token::Array(vec![Token::FixedBytes32([1u8; 32]), Token::FixedBytes32([2u8; 32])]),
            Token::Array(vec![Token::String("approveContractCall".into())]),
        ]);
        let tokens = decode(
            &[
                ParamType::Array(Box::new(ParamType::FixedBytes32)),
                ParamType::Array(Box::new(ParamType::String)),
            ],
            &data,
        )
        .unwrap();
        match &tokens[0] {
            Token::Array(items) => assert_eq!(items.len(), 2),
            other => panic!("unexpected token {:?}", other),
        }
        assert_eq!(
            tokens[1],
            Token::Array(vec![Token::String("approveContractCall".into())])
        );
    }

    #[test]
    fn test_truncated_data_is_an_error() {
        let data = encode(&[Token::String("hello".into())]);
        assert!(decode(&[ParamType::String], &data[..40]).is_err());
    }

    #[test]
    fn test_oversized_offsets_are_rejected() {
        // Head offset near usize::MAX
        let mut data = vec![0u8; 32];
        data[24..].copy_from_slice(&u64::MAX.to_be_bytes());
        assert!(matches!(decode(&[ParamType::Bytes], &data), Err(ChainError::Decode(_))));

        // Valid offset, length word near usize::MAX
        let mut data = encode(&[Token::Bytes(b"abc".to_vec())]);
        data[56..64].copy_from_slice(&(u64::MAX - 8).to_be_bytes());
        assert!(matches!(decode(&[ParamType::Bytes], &data), Err(ChainError::Decode(_))));
    }

    #[test]
    fn test_address_helpers() {
        let addr = parse_address("0x5FbDB2315678afecb367f032d93F642f64180aa3").unwrap();
        assert_eq!(format_address(&addr), "0x5fbdb2315678afecb367f032d93f642f64180aa3");
        let topic = "0x0000000000000000000000005fbdb2315678afecb367f032d93f642f64180aa3";
        assert_eq!(topic_to_address(topic).unwrap(), format_address(&addr));
    }
}
