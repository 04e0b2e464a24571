//! `#[serde(with = "serde_decimal")]` for `BigUint` fields: base-10 strings,
//! so stored key material stays readable and independent of limb size.

use num_bigint::BigUint;
use serde::{de, Deserialize, Deserializer, Serializer};

pub fn serialize<S: Serializer>(n: &BigUint, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&n.to_str_radix(10))
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BigUint, D::Error> {
    let s = String::deserialize(deserializer)?;
    BigUint::parse_bytes(s.as_bytes(), 10)
        .ok_or_else(|| de::Error::custom(format!("invalid decimal integer: {:?}", s)))
}
