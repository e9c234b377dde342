// src/types.rs
//
// Shared primitive types: addresses, hashes, canonical integer encoding.
//

use std::fmt;
use std::str::FromStr;

use bech32::{FromBase32, ToBase32, Variant};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::error::CoreError;

pub type Hash32 = [u8; 32];

/// Human-readable part for bech32m-rendered account addresses.
pub const ADDRESS_HRP: &str = "anim";

pub const ADDRESS_LEN: usize = 20;

/// Hash arbitrary bytes with the configured content hash (BLAKE3).
pub fn content_hash(bytes: &[u8]) -> Hash32 {
    *blake3::hash(bytes).as_bytes()
}

/* ---------------------------------------------------------------------
   Address: 20-byte account payload, rendered bech32m
---------------------------------------------------------------------*/
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address(pub [u8; ADDRESS_LEN]);

impl Address {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CoreError> {
        if bytes.len() != ADDRESS_LEN {
            return Err(CoreError::InvalidArgument(format!(
                "address must be {ADDRESS_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        let mut out = [0u8; ADDRESS_LEN];
        out.copy_from_slice(bytes);
        Ok(Self(out))
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_LEN] {
        &self.0
    }

    /// Deterministic test/fixture address: the byte repeated twenty times.
    pub fn repeat(byte: u8) -> Self {
        Self([byte; ADDRESS_LEN])
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let encoded = bech32::encode(ADDRESS_HRP, self.0.to_base32(), Variant::Bech32m)
            .map_err(|_| fmt::Error)?;
        f.write_str(&encoded)
    }
}

impl FromStr for Address {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Accept bech32m first, 0x-hex as a convenience for tooling.
        if let Ok((hrp, data, variant)) = bech32::decode(s) {
            if hrp != ADDRESS_HRP || variant != Variant::Bech32m {
                return Err(CoreError::InvalidArgument(format!("bad address encoding: {s}")));
            }
            let bytes = Vec::<u8>::from_base32(&data)
                .map_err(|e| CoreError::InvalidArgument(format!("bad address payload: {e}")))?;
            return Self::from_bytes(&bytes);
        }
        let hexstr = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(hexstr)
            .map_err(|e| CoreError::InvalidArgument(format!("bad address hex: {e}")))?;
        Self::from_bytes(&bytes)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_string())
        } else {
            serializer.serialize_bytes(&self.0)
        }
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            s.parse().map_err(de::Error::custom)
        } else {
            let bytes = <Vec<u8>>::deserialize(deserializer)?;
            Address::from_bytes(&bytes).map_err(de::Error::custom)
        }
    }
}

/* ---------------------------------------------------------------------
   Canonical integer encoding
---------------------------------------------------------------------*/

/// Big-endian with leading zeros stripped; zero encodes as one zero byte.
pub fn canonical_uint(value: u128) -> Vec<u8> {
    let be = value.to_be_bytes();
    let first = be.iter().position(|&b| b != 0).unwrap_or(be.len() - 1);
    be[first..].to_vec()
}

/// Length-prefixed canonical uint, for unambiguous concatenation.
pub fn canonical_uint_framed(value: u128) -> Vec<u8> {
    let body = canonical_uint(value);
    let mut out = Vec::with_capacity(1 + body.len());
    out.push(body.len() as u8); // minimal encoding of u128 is at most 16 bytes
    out.extend_from_slice(&body);
    out
}

pub fn hex_0x(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

pub fn parse_hex_0x(s: &str) -> Result<Vec<u8>, CoreError> {
    let body = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(body).map_err(|e| CoreError::InvalidArgument(format!("bad hex: {e}")))
}

/* ---------------------------------------------------------------------
   Tests
---------------------------------------------------------------------*/
