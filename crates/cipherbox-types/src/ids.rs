//! Ledger identifiers: request ids, account addresses and transaction hashes.
//!
//! All identifiers render as `0x`-prefixed lowercase hex. Request ids are
//! 256-bit ledger integers; contracts and indexers emit them as JSON numbers,
//! hex strings or decimal strings, so deserialization accepts all three.

use std::fmt;
use std::str::FromStr;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_with::{DeserializeFromStr, SerializeDisplay};

use crate::TypesError;

/// Identifier of one decryption request (a 256-bit big-endian integer).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct RequestId(pub [u8; 32]);

impl RequestId {
    /// Build a request id from a small integer (left-padded big-endian).
    pub fn from_u64(value: u64) -> Self {
        Self::from_u128(u128::from(value))
    }

    /// Build a request id from a 128-bit integer (left-padded big-endian).
    pub fn from_u128(value: u128) -> Self {
        let mut bytes = [0u8; 32];
        bytes[16..].copy_from_slice(&value.to_be_bytes());
        Self(bytes)
    }

    /// The request id as a `u64`, if it fits.
    pub fn as_u64(&self) -> Option<u64> {
        if self.0[..24].iter().any(|b| *b != 0) {
            return None;
        }
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&self.0[24..]);
        Some(u64::from_be_bytes(buf))
    }

    /// Oracle handle: `0x` followed by exactly 64 hex digits.
    pub fn to_handle(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_handle())
    }
}

impl fmt::Debug for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_u64() {
            Some(n) => write!(f, "RequestId({n})"),
            None => write!(f, "RequestId({})", self.to_handle()),
        }
    }
}

impl FromStr for RequestId {
    type Err = TypesError;

    /// Parse `0x`-prefixed hex (up to 64 digits) or a decimal integer.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || TypesError::InvalidIdentifier {
            kind: "request id",
            value: s.to_string(),
        };

        let trimmed = s.trim();
        if let Some(digits) = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
        {
            if digits.is_empty() || digits.len() > 64 {
                return Err(invalid());
            }
            let padded = format!("{digits:0>64}");
            let decoded = hex::decode(padded).map_err(|_| invalid())?;
            let mut bytes = [0u8; 32];
            bytes.copy_from_slice(&decoded);
            return Ok(Self(bytes));
        }

        trimmed
            .parse::<u128>()
            .map(Self::from_u128)
            .map_err(|_| invalid())
    }
}

impl Serialize for RequestId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_handle())
    }
}

impl<'de> Deserialize<'de> for RequestId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct RequestIdVisitor;

        impl Visitor<'_> for RequestIdVisitor {
            type Value = RequestId;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a request id as an integer, hex string or decimal string")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<RequestId, E> {
                Ok(RequestId::from_u64(v))
            }

            fn visit_u128<E: de::Error>(self, v: u128) -> Result<RequestId, E> {
                Ok(RequestId::from_u128(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<RequestId, E> {
                u64::try_from(v)
                    .map(RequestId::from_u64)
                    .map_err(|_| E::custom("request id must not be negative"))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<RequestId, E> {
                v.parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_any(RequestIdVisitor)
    }
}

/// A 20-byte account or contract address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, SerializeDisplay, DeserializeFromStr)]
pub struct Address(pub [u8; 20]);

impl Address {
    /// The all-zero address.
    pub const ZERO: Address = Address([0u8; 20]);

    /// Short form used in log lines, e.g. `0x1234…abcd`.
    pub fn short(&self) -> String {
        let full = hex::encode(self.0);
        format!("0x{}…{}", &full[..4], &full[36..])
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({self})")
    }
}

impl FromStr for Address {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || TypesError::InvalidIdentifier {
            kind: "address",
            value: s.to_string(),
        };
        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .ok_or_else(invalid)?;
        if digits.len() != 40 {
            return Err(invalid());
        }
        let decoded = hex::decode(digits).map_err(|_| invalid())?;
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&decoded);
        Ok(Self(bytes))
    }
}

/// Hash of an accepted ledger transaction.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, SerializeDisplay, DeserializeFromStr)]
pub struct TxHash(pub [u8; 32]);

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxHash({self})")
    }
}

impl FromStr for TxHash {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || TypesError::InvalidIdentifier {
            kind: "tx hash",
            value: s.to_string(),
        };
        let digits = s.strip_prefix("0x").ok_or_else(invalid)?;
        let decoded = hex::decode(digits).map_err(|_| invalid())?;
        let bytes: [u8; 32] = decoded.try_into().map_err(|_| invalid())?;
        Ok(Self(bytes))
    }
}
