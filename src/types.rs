//! Primitive identifiers shared by the session, bridge and cache layers.

use std::fmt;
use std::str::FromStr;

use alloy_primitives::utils::format_units;
use alloy_primitives::{B256, U256};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ParseIdError {
    #[error("address `{0}` is not 0x followed by 40 hex digits")]
    Address(String),
    #[error("address `{0}` has mixed case but an invalid EIP-55 checksum")]
    Checksum(String),
    #[error("transaction hash `{0}` is not 0x followed by 64 hex digits")]
    TxHash(String),
    #[error("chain id `{0}` is neither decimal nor 0x-prefixed hex")]
    ChainId(String),
}

/// Account address as reported by the wallet.
///
/// Mixed-case input must carry a valid EIP-55 checksum; all-lowercase and
/// all-uppercase input is taken as is. Displays in checksummed form.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(alloy_primitives::Address);

impl Address {
    pub fn parse(value: impl AsRef<str>) -> Result<Self, ParseIdError> {
        let value = value.as_ref().trim();
        let digits = value
            .strip_prefix("0x")
            .filter(|digits| digits.len() == 40 && digits.bytes().all(|b| b.is_ascii_hexdigit()))
            .ok_or_else(|| ParseIdError::Address(value.to_string()))?;
        let address = alloy_primitives::Address::from_str(digits)
            .map_err(|_| ParseIdError::Address(value.to_string()))?;
        let mixed_case = digits.bytes().any(|b| b.is_ascii_lowercase())
            && digits.bytes().any(|b| b.is_ascii_uppercase());
        if mixed_case && address.to_checksum(None) != value {
            return Err(ParseIdError::Checksum(value.to_string()));
        }
        Ok(Self(address))
    }

    pub fn as_evm(&self) -> &alloy_primitives::Address {
        &self.0
    }

    /// Compares against a raw address string regardless of its casing.
    pub fn matches(&self, other: &str) -> bool {
        Address::parse(other.trim().to_ascii_lowercase()).is_ok_and(|other| other == *self)
    }

    /// Shortened form used in logs and headers, e.g. `0x1234...abcd`.
    pub fn masked(&self) -> String {
        let full = self.to_string();
        format!("{}...{}", &full[..6], &full[full.len() - 4..])
    }
}

impl From<alloy_primitives::Address> for Address {
    fn from(address: alloy_primitives::Address) -> Self {
        Self(address)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.to_checksum(None))
    }
}

impl FromStr for Address {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Address::parse(raw).map_err(serde::de::Error::custom)
    }
}

/// Numeric EVM chain identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChainId(pub u64);

impl ChainId {
    /// Parses either `0xba9304` or `12227332`.
    pub fn parse(value: &str) -> Result<Self, ParseIdError> {
        let value = value.trim();
        let parsed = match value.strip_prefix("0x") {
            Some(hex) => u64::from_str_radix(hex, 16),
            None => value.parse::<u64>(),
        };
        parsed
            .map(ChainId)
            .map_err(|_| ParseIdError::ChainId(value.to_string()))
    }

    /// Hex form expected by `wallet_switchEthereumChain`.
    pub fn to_hex(self) -> String {
        format!("0x{:x}", self.0)
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Transaction hash returned by the bridge once a call is accepted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TxHash(B256);

impl TxHash {
    pub fn parse(value: impl AsRef<str>) -> Result<Self, ParseIdError> {
        let value = value.as_ref().trim();
        value
            .strip_prefix("0x")
            .filter(|digits| digits.len() == 64)
            .and_then(|digits| B256::from_str(digits).ok())
            .map(Self)
            .ok_or_else(|| ParseIdError::TxHash(value.to_string()))
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(B256::from(bytes))
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl Serialize for TxHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TxHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        TxHash::parse(raw).map_err(serde::de::Error::custom)
    }
}

/// Opaque poll identifier chosen by the poll creator.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PollId(String);

impl PollId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Fresh random identifier for a new poll.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PollId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PollId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Renders a base-unit amount with `decimals` fractional digits, trimming
/// trailing zeros (`1500000000000000000`, 18 → `"1.5"`).
pub fn format_amount(amount: U256, decimals: u8) -> String {
    match format_units(amount, decimals) {
        Ok(formatted) if formatted.contains('.') => formatted
            .trim_end_matches('0')
            .trim_end_matches('.')
            .to_string(),
        Ok(formatted) => formatted,
        Err(_) => amount.to_string(),
    }
}
