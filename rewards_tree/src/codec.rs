//! Canonical serialization and compression of rewards files.
//!
//! Published files are compressed with zstd at its highest level. Compression
//! at a fixed level is deterministic for a given input, which is what makes
//! the content identifier of a file reproducible by anyone who regenerates it.

use crate::file::RewardsFile;
use crate::RewardsTreeError;

/// Highest zstd compression level.
pub const MAX_COMPRESSION_LEVEL: i32 = 22;

/// File extension appended to compressed rewards files.
pub const COMPRESSED_EXTENSION: &str = ".zst";

/// Serializes a rewards file to its canonical JSON form.
pub fn serialize(file: &RewardsFile) -> Result<Vec<u8>, RewardsTreeError> {
    Ok(serde_json::to_vec(file)?)
}

/// Parses a rewards file, reporting the path of the offending field on
/// failure.
pub fn deserialize(bytes: &[u8]) -> Result<RewardsFile, RewardsTreeError> {
    let des = &mut serde_json::Deserializer::from_slice(bytes);
    Ok(serde_path_to_error::deserialize(des)?)
}

/// Compresses `bytes` with the maximum ratio configuration.
pub fn compress(bytes: &[u8]) -> Result<Vec<u8>, RewardsTreeError> {
    Ok(zstd::bulk::compress(bytes, MAX_COMPRESSION_LEVEL)?)
}

/// Decompresses bytes produced by [`compress`] or by any other zstd encoder.
pub fn decompress(bytes: &[u8]) -> Result<Vec<u8>, RewardsTreeError> {
    Ok(zstd::stream::decode_all(bytes)?)
}

/// Serializes and compresses a rewards file in one step.
pub fn encode(file: &RewardsFile) -> Result<Vec<u8>, RewardsTreeError> {
    compress(&serialize(file)?)
}

/// Decompresses and parses a rewards file in one step.
pub fn decode(bytes: &[u8]) -> Result<RewardsFile, RewardsTreeError> {
    deserialize(&decompress(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compression_round_trips_exact_bytes() {
        let input = br#"{"merkleRoot":"0x00","nodeRewards":{}}"#.repeat(50);
        let compressed = compress(&input).unwrap();
        assert!(compressed.len() < input.len());
        assert_eq!(decompress(&compressed).unwrap(), input);
    }

    #[test]
    fn compression_is_deterministic() {
        let input = b"the same bytes always compress the same way".repeat(10);
        assert_eq!(compress(&input).unwrap(), compress(&input).unwrap());
    }

    #[test]
    fn garbage_does_not_decompress() {
        assert!(matches!(
            decompress(b"definitely not zstd"),
            Err(RewardsTreeError::Codec(_))
        ));
    }

    #[test]
    fn malformed_json_reports_path() {
        let err = deserialize(br#"{"rewardsFileVersion":"one"}"#).unwrap_err();
        match err {
            RewardsTreeError::Malformed(e) => assert_eq!(e.path().to_string(), "rewardsFileVersion"),
            other => panic!("unexpected error {other:?}"),
        }
    }
}
