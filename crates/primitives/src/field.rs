//! BN254 scalar field helpers.
//!
//! Field elements travel as canonical decimal strings: in storage keys, in JSON
//! values and in tree dumps.

pub use ark_bn254::Fr;

use ark_ff::{BigInteger, PrimeField};
use num_bigint::BigUint;
use num_traits::ToPrimitive;
use thiserror::Error;

/// Errors when parsing field elements from text
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FieldError {
    #[error("Invalid decimal field element: {0:?}")]
    InvalidDecimal(String),
    #[error("Value {0} is not below the field modulus")]
    NotCanonical(String),
}

/// Convert a field element to its integer representative.
pub fn fr_to_biguint(f: &Fr) -> BigUint {
    BigUint::from_bytes_le(&f.into_bigint().to_bytes_le())
}

/// Reduce an arbitrary integer into the field.
pub fn fr_from_biguint(value: &BigUint) -> Fr {
    Fr::from_le_bytes_mod_order(&value.to_bytes_le())
}

/// Canonical decimal form of a field element.
pub fn fr_to_decimal(f: &Fr) -> String {
    fr_to_biguint(f).to_str_radix(10)
}

/// Parse a canonical decimal field element. Values at or above the modulus are rejected.
pub fn fr_from_decimal(s: &str) -> Result<Fr, FieldError> {
    let value = BigUint::parse_bytes(s.as_bytes(), 10)
        .ok_or_else(|| FieldError::InvalidDecimal(s.to_string()))?;
    if value >= modulus() {
        return Err(FieldError::NotCanonical(s.to_string()));
    }
    Ok(fr_from_biguint(&value))
}

/// Interpret a field element as a `u128`, if it fits.
pub fn fr_to_u128(f: &Fr) -> Option<u128> {
    fr_to_biguint(f).to_u128()
}

fn modulus() -> BigUint {
    BigUint::from_bytes_le(&Fr::MODULUS.to_bytes_le())
}

/// Serde adapter for a single `Fr` as a decimal string.
pub mod serde_fr {
    use serde::{de, Deserialize, Deserializer, Serializer};

    use super::{fr_from_decimal, fr_to_decimal, Fr};

    pub fn serialize<S: Serializer>(f: &Fr, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&fr_to_decimal(f))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Fr, D::Error> {
        let s = String::deserialize(d)?;
        fr_from_decimal(&s).map_err(de::Error::custom)
    }
}

/// Serde adapter for `Vec<Fr>` as a list of decimal strings.
pub mod serde_fr_vec {
    use serde::{de, Deserialize, Deserializer, Serializer};

    use super::{fr_from_decimal, fr_to_decimal, Fr};

    pub fn serialize<S: Serializer>(v: &[Fr], s: S) -> Result<S::Ok, S::Error> {
        s.collect_seq(v.iter().map(fr_to_decimal))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<Fr>, D::Error> {
        Vec::<String>::deserialize(d)?
            .iter()
            .map(|s| fr_from_decimal(s).map_err(de::Error::custom))
            .collect()
    }
}

/// Serde adapter for a `BigUint` as a decimal string.
pub mod serde_biguint {
    use num_bigint::BigUint;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &BigUint, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&v.to_str_radix(10))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<BigUint, D::Error> {
        let s = String::deserialize(d)?;
        BigUint::parse_bytes(s.as_bytes(), 10)
            .ok_or_else(|| de::Error::custom(format!("invalid decimal integer: {s:?}")))
    }
}
