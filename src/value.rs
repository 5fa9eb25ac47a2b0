//! Value types shared by the three trees
//!
//! `Fr` is a BabyJubJub scalar-field element; `U256` is used directly for
//! withdrawal hashes and nullifier keys. Both are opaque, fixed-size, and
//! compared only for equality outside of hashing, which is delegated to the
//! `Hasher` the caller supplies.

use std::fmt;
use std::str::FromStr;

pub use ruint::aliases::U256;
use serde::{Deserialize, Serialize};

/// The BabyJubJub scalar field order (Fr), ≈254 bits.
pub const FR_MODULUS: U256 = ruint::uint!(
    2736030358979909402780800718157159386076813972158567259200215660948447373041_U256
);

/// An element of the BabyJubJub scalar field, reduced modulo [`FR_MODULUS`].
///
/// Arithmetic beyond hashing is limited to equality and canonical encoding;
/// the field operations needed to combine two `Fr` values (the Merkle
/// `parent_of` step) are owned by the external `Hasher`, not by this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fr(U256);

impl Fr {
    pub const ZERO: Fr = Fr(U256::ZERO);

    /// Reduce `value` modulo the field order.
    pub fn new(value: U256) -> Self {
        Fr(value % FR_MODULUS)
    }

    pub fn as_u256(&self) -> U256 {
        self.0
    }

    /// Canonical base-10 encoding, matching the persisted representation.
    pub fn to_decimal(&self) -> String {
        self.0.to_string()
    }

    pub fn from_decimal(s: &str) -> Result<Self, ruint::ParseError> {
        Ok(Fr::new(U256::from_str_radix(s, 10)?))
    }
}

impl From<u64> for Fr {
    fn from(v: u64) -> Self {
        Fr::new(U256::from(v))
    }
}

impl From<U256> for Fr {
    fn from(v: U256) -> Self {
        Fr::new(v)
    }
}

impl fmt::Display for Fr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_decimal())
    }
}

impl FromStr for Fr {
    type Err = ruint::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Fr::from_decimal(s)
    }
}

impl Serialize for Fr {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_decimal())
    }
}

impl<'de> Deserialize<'de> for Fr {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Fr::from_decimal(&s).map_err(serde::de::Error::custom)
    }
}

/// Canonical `0x`-prefixed hex encoding for an opaque 256-bit hash such as a
/// withdrawal hash or nullifier key.
pub fn u256_to_hex(v: U256) -> String {
    format!("0x{:x}", v)
}

pub fn u256_from_hex(s: &str) -> Result<U256, ruint::ParseError> {
    U256::from_str_radix(s.trim_start_matches("0x"), 16)
}

/// Canonical string codec for a tree's value type, used when persisting
/// nodes to a cache or `Db` shared across trees of different value types.
pub trait ValueCodec: Copy {
    fn encode(&self) -> String;
    fn decode(s: &str) -> Self;
}

impl ValueCodec for Fr {
    fn encode(&self) -> String {
        self.to_decimal()
    }

    fn decode(s: &str) -> Self {
        Fr::from_decimal(s).unwrap_or(Fr::ZERO)
    }
}

impl ValueCodec for U256 {
    fn encode(&self) -> String {
        u256_to_hex(*self)
    }

    fn decode(s: &str) -> Self {
        u256_from_hex(s).unwrap_or(U256::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fr_reduces_modulo_field_order() {
        let over = Fr::new(FR_MODULUS + U256::from(5u64));
        assert_eq!(over, Fr::from(5u64));
    }

    #[test]
    fn fr_decimal_roundtrip() {
        let a = Fr::from(12345u64);
        let s = a.to_decimal();
        let b = Fr::from_decimal(&s).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn u256_hex_roundtrip() {
        let v = U256::from(0xdeadbeefu64);
        let hex = u256_to_hex(v);
        assert_eq!(hex, "0xdeadbeef");
        assert_eq!(u256_from_hex(&hex).unwrap(), v);
    }
}
