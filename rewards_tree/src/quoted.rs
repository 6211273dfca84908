//! Like `#[serde(with = "...")]` helpers that store large integers as quoted
//! decimal strings, the format used by published rewards files.

use alloy::primitives::U256;
use serde::{de::Error as _, Deserialize as _, Deserializer, Serializer};

pub(crate) fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&value.to_string())
}

pub(crate) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
    let s = String::deserialize(deserializer)?;
    U256::from_str_radix(s.trim(), 10).map_err(D::Error::custom)
}
