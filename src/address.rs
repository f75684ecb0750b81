//! Twenty-byte identifiers for voters, booths, accumulators and tokens.
//!
//! Identifiers are RIPEMD-160 digests: of template code for booths, and of
//! `SHA-256(public key)` for operator keys.

use crate::error::{BallotError, Result};
use ripemd::{Digest as _, Ripemd160};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::Sha256;
use std::fmt;
use std::str::FromStr;

/// Byte width of an [`Address`].
pub const ADDRESS_LENGTH: usize = 20;

/// Content-derived or key-derived account identifier.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address(pub [u8; ADDRESS_LENGTH]);

impl Address {
    /// The all-zero address.
    pub const ZERO: Address = Address([0u8; ADDRESS_LENGTH]);

    /// RIPEMD-160 of `bytes`.
    pub fn ripemd160(bytes: &[u8]) -> Self {
        let mut out = [0u8; ADDRESS_LENGTH];
        out.copy_from_slice(&Ripemd160::digest(bytes));
        Address(out)
    }

    /// `RIPEMD-160(SHA-256(bytes))`, used to derive addresses from public keys.
    pub fn hash160(bytes: &[u8]) -> Self {
        let sha = Sha256::digest(bytes);
        Self::ripemd160(&sha)
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8; ADDRESS_LENGTH] {
        &self.0
    }

    /// Lowercase hex without the `0x` prefix.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parses `0x`-prefixed or bare hex; case-insensitive.
    pub fn from_hex(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        let body = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        let bytes = hex::decode(body)
            .map_err(|err| BallotError::Decode(format!("invalid address {input}: {err}")))?;
        if bytes.len() != ADDRESS_LENGTH {
            return Err(BallotError::Decode(format!(
                "address {input} has {} bytes, expected {ADDRESS_LENGTH}",
                bytes.len()
            )));
        }
        let mut out = [0u8; ADDRESS_LENGTH];
        out.copy_from_slice(&bytes);
        Ok(Address(out))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", self.to_hex())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address(0x{})", self.to_hex())
    }
}

impl FromStr for Address {
    type Err = BallotError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Address::from_hex(&text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_roundtrip_accepts_mixed_case() {
        let addr = Address::from_hex("0x7e897000E80787653C6A7a2D20174a4225d89753").unwrap();
        assert_eq!(addr.to_string(), "0x7e897000e80787653c6a7a2d20174a4225d89753");
        assert_eq!(Address::from_hex(&addr.to_hex()).unwrap(), addr);
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(Address::from_hex("0xdeadbeef").is_err());
    }

    #[test]
    fn ripemd160_of_empty_input() {
        assert_eq!(
            Address::ripemd160(b"").to_hex(),
            "9c1185a5c5e9fc54612808977ee8f548b2258d31"
        );
    }

    #[test]
    fn serde_uses_prefixed_hex() {
        let addr = Address([0xab; ADDRESS_LENGTH]);
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, format!("\"0x{}\"", "ab".repeat(20)));
        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);
    }
}
