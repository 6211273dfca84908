pub mod beacon;
pub mod bond_reduction;
pub mod claims;
pub mod config;
pub mod effective_stake;
pub mod env;
pub mod facade;
pub mod locator;
pub mod pool;
pub mod provider;
pub mod retry;
pub mod rewards;
pub mod state;
pub mod tracing;

#[cfg(test)]
pub(crate) mod testing;

/// Common information for the `--version` CLI flags.
pub fn version() -> String {
    let pkg_name = env!("CARGO_PKG_NAME");
    let pkg_version = env!("CARGO_PKG_VERSION");
    format!("{pkg_name} ({pkg_version})")
}

/// Like `#[serde(with = "...")]` helpers for integers that the beacon API and
/// the facade encode as quoted decimal strings. Plain JSON numbers are
/// accepted too.
mod quoted {
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrNumber {
        String(String),
        Number(u64),
    }

    pub mod u64 {
        use super::*;

        pub fn serialize<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
            serializer.serialize_str(&value.to_string())
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
            match StringOrNumber::deserialize(deserializer)? {
                StringOrNumber::String(s) => s.trim().parse().map_err(D::Error::custom),
                StringOrNumber::Number(n) => Ok(n),
            }
        }
    }

    pub mod u256 {
        use alloy::primitives::U256;

        use super::*;

        pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
            serializer.serialize_str(&value.to_string())
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
            match StringOrNumber::deserialize(deserializer)? {
                StringOrNumber::String(s) => {
                    let s = s.trim();
                    match s.strip_prefix("0x") {
                        Some(hex) => U256::from_str_radix(hex, 16),
                        None => U256::from_str_radix(s, 10),
                    }
                    .map_err(D::Error::custom)
                }
                StringOrNumber::Number(n) => Ok(U256::from(n)),
            }
        }
    }
}
