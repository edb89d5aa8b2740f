//   Copyright 2024 The Bywise Community
//   SPDX-License-Identifier: BSD-3-Clause

use std::{
    fmt::{Display, Formatter},
    str::FromStr,
};

use blake2::{
    digest::{consts::U32, Digest},
    Blake2b,
};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::hash::Hash;

const PREFIX: &str = "BWS1";
const CHECKSUM_LEN: usize = 3;
/// `BWS1` + 2-char tag + 40 hex chars + 3-char checksum
const ADDRESS_LEN: usize = 4 + 2 + 40 + CHECKSUM_LEN;

pub const ADDRESS_TAG_WALLET: &str = "MU";
pub const ADDRESS_TAG_CONTRACT: &str = "CO";

/// A validated Bywise address.
///
/// The display form is `BWS1<tag><40 hex chars><checksum>`; the hex payload
/// decodes to the 20-byte key used by the fork-choice distance rule.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(String);

impl Address {
    pub fn zero() -> Self {
        Self::from_key160(ADDRESS_TAG_WALLET, [0u8; 20])
    }

    pub fn is_zero(&self) -> bool {
        self.key160() == [0u8; 20]
    }

    pub fn from_key160(tag: &str, key: [u8; 20]) -> Self {
        let key_hex = hex::encode(key);
        let checksum = checksum(tag, &key_hex);
        Self(format!("{}{}{}{}", PREFIX, tag, key_hex, checksum))
    }

    /// Derives a wallet address from raw ed25519 public key bytes.
    pub fn from_public_key(pk_bytes: &[u8; 32]) -> Self {
        let digest: [u8; 32] = Blake2b::<U32>::digest(pk_bytes).into();
        let mut key = [0u8; 20];
        key.copy_from_slice(&digest[12..]);
        Self::from_key160(ADDRESS_TAG_WALLET, key)
    }

    /// Derives a contract address from a seed hash (typically the deploying
    /// transaction's digest material).
    pub fn for_contract(seed: &Hash) -> Self {
        Self::from_key160(ADDRESS_TAG_CONTRACT, seed.low160())
    }

    pub fn parse(s: &str) -> Result<Self, AddressError> {
        if s.len() != ADDRESS_LEN {
            return Err(AddressError::InvalidLength(s.len()));
        }
        if !s.starts_with(PREFIX) {
            return Err(AddressError::InvalidPrefix);
        }
        let tag = &s[4..6];
        if !tag.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()) {
            return Err(AddressError::InvalidTag);
        }
        let key_hex = &s[6..6 + 40];
        if hex::decode(key_hex).is_err() || key_hex.chars().any(|c| c.is_ascii_uppercase()) {
            return Err(AddressError::InvalidHex);
        }
        let expected = checksum(tag, key_hex);
        if s[6 + 40..] != expected {
            return Err(AddressError::InvalidChecksum);
        }
        Ok(Self(s.to_string()))
    }

    pub fn tag(&self) -> &str {
        &self.0[4..6]
    }

    pub fn is_contract(&self) -> bool {
        self.tag() == ADDRESS_TAG_CONTRACT
    }

    /// The 20-byte key encoded in the address.
    pub fn key160(&self) -> [u8; 20] {
        let mut key = [0u8; 20];
        // Validated on construction, so the decode cannot fail.
        let bytes = hex::decode(&self.0[6..6 + 40]).expect("validated address");
        key.copy_from_slice(&bytes);
        key
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn checksum(tag: &str, key_hex: &str) -> String {
    let mut hasher = Blake2b::<U32>::new();
    hasher.update(tag.as_bytes());
    hasher.update(key_hex.as_bytes());
    let digest: [u8; 32] = hasher.finalize().into();
    hex::encode(digest)[..CHECKSUM_LEN].to_string()
}

#[derive(Debug, Error)]
pub enum AddressError {
    #[error("expected {ADDRESS_LEN} characters, got {0}")]
    InvalidLength(usize),
    #[error("address must start with {PREFIX}")]
    InvalidPrefix,
    #[error("invalid address tag")]
    InvalidTag,
    #[error("address payload is not lowercase hex")]
    InvalidHex,
    #[error("address checksum mismatch")]
    InvalidChecksum,
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Debug for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Address({})", self.0)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = <String as Deserialize>::deserialize(deserializer)?;
        Self::parse(&s).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_display() {
        let addr = Address::from_key160(ADDRESS_TAG_WALLET, [0xab; 20]);
        let parsed = Address::parse(addr.as_str()).unwrap();
        assert_eq!(parsed, addr);
        assert_eq!(parsed.key160(), [0xab; 20]);
        assert_eq!(parsed.tag(), "MU");
    }

    #[test]
    fn rejects_tampered_checksum() {
        let addr = Address::from_key160(ADDRESS_TAG_WALLET, [1u8; 20]);
        let mut s = addr.as_str().to_string();
        let last = s.pop().unwrap();
        s.push(if last == '0' { '1' } else { '0' });
        assert!(matches!(Address::parse(&s), Err(AddressError::InvalidChecksum)));
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(matches!(
            Address::parse("BWS1MU00"),
            Err(AddressError::InvalidLength(_))
        ));
    }

    #[test]
    fn contract_addresses_carry_their_tag() {
        let seed = Hash::from_bytes([7u8; 32]);
        let addr = Address::for_contract(&seed);
        assert!(addr.is_contract());
        assert_eq!(addr.key160(), seed.low160());
    }

    #[test]
    fn zero_address_is_stable() {
        assert!(Address::zero().is_zero());
        assert_eq!(Address::zero(), Address::zero());
    }
}
