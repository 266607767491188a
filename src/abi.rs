//! Call data encoding and result decoding
//!
//! Only the small slice of the contract ABI the engine needs: a 4-byte
//! selector optionally followed by one address word, and single-word
//! `uint256` return values.

use crate::error::AbiError;
use crate::types::Quantity;
use alloy_primitives::{Address, U256};
use std::fmt;

/// 4-byte function selector.
pub type Selector = [u8; 4];

/// `balanceOf(address)`
pub const BALANCE_OF: Selector = [0x70, 0xa0, 0x82, 0x31];
/// `totalSupply()`
pub const TOTAL_SUPPLY: Selector = [0x18, 0x16, 0x0d, 0xdd];
/// `earned(address)`
pub const EARNED: Selector = [0x00, 0x8c, 0xc2, 0x62];
/// `rewardRate()`
pub const REWARD_RATE: Selector = [0x7b, 0x0a, 0x47, 0xee];
/// `periodFinish()`
pub const PERIOD_FINISH: Selector = [0xeb, 0xe2, 0xb1, 0x2b];

const WORD: usize = 32;

/// Encoded `eth_call` input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallData(Vec<u8>);

impl CallData {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn selector(&self) -> Option<Selector> {
        let bytes = self.0.get(..4)?;
        let mut selector = [0u8; 4];
        selector.copy_from_slice(bytes);
        Some(selector)
    }

    /// The address argument, if the call carries exactly one address word.
    pub fn address_arg(&self) -> Result<Address, AbiError> {
        let word = self
            .0
            .get(4..4 + WORD)
            .ok_or_else(|| AbiError::InvalidAddress("call data has no argument word".into()))?;
        address_from_word(word)
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(&self.0))
    }
}

impl fmt::Display for CallData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Build call data from a selector and an optional address argument.
pub fn encode_call(selector: Selector, arg: Option<Address>) -> CallData {
    let mut data = Vec::with_capacity(4 + WORD);
    data.extend_from_slice(&selector);
    if let Some(addr) = arg {
        // left-pad the 20-byte address to a full word
        data.extend_from_slice(&[0u8; WORD - 20]);
        data.extend_from_slice(addr.as_slice());
    }
    CallData(data)
}

/// Build call data from a hex selector and a hex address.
pub fn encode_address_arg_call(selector_hex: &str, address: &str) -> Result<CallData, AbiError> {
    let selector = parse_selector(selector_hex)?;
    let addr = parse_address(address)?;
    Ok(encode_call(selector, Some(addr)))
}

/// Parse a 4-byte selector (with or without 0x prefix).
pub fn parse_selector(s: &str) -> Result<Selector, AbiError> {
    let s = s.trim();
    let raw = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(raw).map_err(|_| AbiError::InvalidSelector(s.to_string()))?;
    <Selector>::try_from(bytes.as_slice()).map_err(|_| AbiError::InvalidSelector(s.to_string()))
}

/// Parse an address from a hex string.
///
/// Accepts addresses with or without 0x prefix. Exactly 40 hex characters
/// are required; odd lengths are not padded.
pub fn parse_address(s: &str) -> Result<Address, AbiError> {
    let s = s.trim();
    let raw = s.strip_prefix("0x").unwrap_or(s);
    if raw.len() != 40 {
        return Err(AbiError::InvalidAddress(format!(
            "{} (expected 40 hex chars, got {})",
            s,
            raw.len()
        )));
    }
    let bytes = hex::decode(raw).map_err(|_| AbiError::InvalidAddress(s.to_string()))?;
    Ok(Address::from_slice(&bytes))
}

/// Decode a hex-encoded `uint256` result.
///
/// Empty, `null`, `0x` and non-hex input decode to zero: a node returning no
/// data for an uninitialized account reports a zero balance, not an error.
/// Results longer than one word use the first word.
pub fn decode_quantity(hex_str: &str) -> Quantity {
    let s = hex_str.trim();
    let s = s.strip_prefix("0x").unwrap_or(s);
    if s.is_empty() || s == "null" {
        return U256::ZERO;
    }
    if !s.bytes().all(|b| b.is_ascii_hexdigit()) {
        tracing::debug!("Non-hex call result treated as zero: {}", hex_str);
        return U256::ZERO;
    }
    let s = if s.len() > WORD * 2 { &s[..WORD * 2] } else { s };
    let s = pad_hex_string(s);
    match hex::decode(&s) {
        Ok(bytes) => U256::from_be_slice(&bytes),
        Err(_) => U256::ZERO,
    }
}

/// Decode an address from a 32-byte hex word (e.g. a padded call argument).
pub fn decode_address_word(hex_str: &str) -> Result<Address, AbiError> {
    let s = hex_str.trim();
    let raw = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(raw).map_err(|_| AbiError::InvalidAddress(s.to_string()))?;
    if bytes.len() != WORD {
        return Err(AbiError::InvalidAddress(format!(
            "word must be 32 bytes, got {}",
            bytes.len()
        )));
    }
    address_from_word(&bytes)
}

fn address_from_word(word: &[u8]) -> Result<Address, AbiError> {
    if word[..WORD - 20].iter().any(|b| *b != 0) {
        return Err(AbiError::InvalidAddress(format!(
            "0x{} has non-zero padding",
            hex::encode(word)
        )));
    }
    Ok(Address::from_slice(&word[WORD - 20..]))
}

/// Pad an odd-length hex string with a leading zero.
fn pad_hex_string(s: &str) -> String {
    if s.len() % 2 == 1 {
        format!("0{}", s)
    } else {
        s.to_string()
    }
}
