//! Content identifiers for compressed rewards files.
//!
//! The bytes are split into fixed-size chunks, each chunk becomes a raw leaf
//! addressed by its SHA-256 digest, and leaves are linked together by
//! `dag-pb` nodes carrying UnixFS file metadata until a single root remains.
//! Published files are wrapped in a directory with a single named entry, so
//! gateways serve them under `{cid}/{filename}`. Identifiers are CIDv1
//! rendered in lowercase base32 with the `b` multibase prefix, the same form
//! IPFS gateways accept.

use std::fmt;
use std::str::FromStr;

use data_encoding::BASE32_NOPAD;
use sha2::{Digest, Sha256};

use crate::RewardsTreeError;

/// Size of a leaf chunk.
pub const CHUNK_SIZE: usize = 256 * 1024;

/// Maximum number of links in one intermediate node.
pub const MAX_LINKS: usize = 174;

const CID_VERSION: u64 = 1;
const RAW_CODEC: u64 = 0x55;
const DAG_PB_CODEC: u64 = 0x70;
const SHA2_256: u64 = 0x12;
const DIGEST_LEN: u64 = 32;
const MULTIBASE_BASE32: char = 'b';

/// A CIDv1 with a SHA-256 multihash.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Cid {
    codec: u64,
    digest: [u8; 32],
}

impl Cid {
    fn raw(data: &[u8]) -> Self {
        Self {
            codec: RAW_CODEC,
            digest: Sha256::digest(data).into(),
        }
    }

    fn dag_pb(node: &[u8]) -> Self {
        Self {
            codec: DAG_PB_CODEC,
            digest: Sha256::digest(node).into(),
        }
    }

    /// Whether this identifier points at a raw leaf rather than a DAG node.
    pub const fn is_raw(&self) -> bool {
        self.codec == RAW_CODEC
    }

    /// Binary form: version, codec and multihash, each prefix as a varint.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(36);
        put_varint(&mut out, CID_VERSION);
        put_varint(&mut out, self.codec);
        put_varint(&mut out, SHA2_256);
        put_varint(&mut out, DIGEST_LEN);
        out.extend_from_slice(&self.digest);
        out
    }
}

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let encoded = BASE32_NOPAD.encode(&self.to_bytes()).to_ascii_lowercase();
        write!(f, "{MULTIBASE_BASE32}{encoded}")
    }
}

impl FromStr for Cid {
    type Err = RewardsTreeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || RewardsTreeError::InvalidCid(s.to_string());
        let body = s.strip_prefix(MULTIBASE_BASE32).ok_or_else(invalid)?;
        let bytes = BASE32_NOPAD
            .decode(body.to_ascii_uppercase().as_bytes())
            .map_err(|_| invalid())?;

        let mut rest = bytes.as_slice();
        let mut next = || take_varint(&mut rest).ok_or_else(invalid);
        let (version, codec, hash, len) = (next()?, next()?, next()?, next()?);
        if version != CID_VERSION
            || !matches!(codec, RAW_CODEC | DAG_PB_CODEC)
            || hash != SHA2_256
            || len != DIGEST_LEN
        {
            return Err(invalid());
        }
        let digest: [u8; 32] = rest.try_into().map_err(|_| invalid())?;
        Ok(Self { codec, digest })
    }
}

/// A node of the DAG while it is being built bottom-up.
struct Linked {
    cid: Cid,
    /// Size of the node plus everything below it.
    cumulative_size: u64,
    /// Number of file bytes below the node.
    file_size: u64,
}

/// Returns the root identifier of the DAG built over `data`.
///
/// Data that fits in one chunk is addressed directly by its raw leaf.
pub fn cid_for_bytes(data: &[u8]) -> Cid {
    file_root(data).cid
}

/// Returns the identifier of a directory whose only entry is `data`, named
/// `file_name`.
pub fn cid_for_file(data: &[u8], file_name: &str) -> Cid {
    let file = file_root(data);

    let mut link = Vec::new();
    put_bytes_field(&mut link, 1, &file.cid.to_bytes());
    put_bytes_field(&mut link, 2, file_name.as_bytes());
    put_varint_field(&mut link, 3, file.cumulative_size);

    // UnixFS `Data` message: Type = Directory.
    let mut unixfs = Vec::new();
    put_varint_field(&mut unixfs, 1, 1);

    let mut node = Vec::new();
    put_bytes_field(&mut node, 2, &link);
    put_bytes_field(&mut node, 1, &unixfs);
    Cid::dag_pb(&node)
}

fn file_root(data: &[u8]) -> Linked {
    let mut level: Vec<Linked> = if data.is_empty() {
        vec![leaf(data)]
    } else {
        data.chunks(CHUNK_SIZE).map(leaf).collect()
    };

    while level.len() > 1 {
        level = level.chunks(MAX_LINKS).map(parent).collect();
    }

    // Exactly one node is left.
    level.swap_remove(0)
}

fn leaf(chunk: &[u8]) -> Linked {
    Linked {
        cid: Cid::raw(chunk),
        cumulative_size: chunk.len() as u64,
        file_size: chunk.len() as u64,
    }
}

fn parent(children: &[Linked]) -> Linked {
    // UnixFS `Data` message: Type = File, filesize, blocksizes.
    let file_size = children.iter().map(|c| c.file_size).sum();
    let mut unixfs = Vec::new();
    put_varint_field(&mut unixfs, 1, 2);
    put_varint_field(&mut unixfs, 3, file_size);
    for child in children {
        put_varint_field(&mut unixfs, 4, child.file_size);
    }

    // `PBNode`: links first, then data.
    let mut node = Vec::new();
    for child in children {
        let mut link = Vec::new();
        put_bytes_field(&mut link, 1, &child.cid.to_bytes());
        put_bytes_field(&mut link, 2, &[]);
        put_varint_field(&mut link, 3, child.cumulative_size);
        put_bytes_field(&mut node, 2, &link);
    }
    put_bytes_field(&mut node, 1, &unixfs);

    Linked {
        cid: Cid::dag_pb(&node),
        cumulative_size: node.len() as u64 + children.iter().map(|c| c.cumulative_size).sum::<u64>(),
        file_size,
    }
}

fn put_varint(out: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        out.push((value as u8) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

fn take_varint(input: &mut &[u8]) -> Option<u64> {
    let mut value = 0u64;
    for shift in (0..64).step_by(7) {
        let (&byte, rest) = input.split_first()?;
        *input = rest;
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Some(value);
        }
    }
    None
}

fn put_varint_field(out: &mut Vec<u8>, field: u64, value: u64) {
    put_varint(out, field << 3);
    put_varint(out, value);
}

fn put_bytes_field(out: &mut Vec<u8>, field: u64, bytes: &[u8]) {
    put_varint(out, (field << 3) | 2);
    put_varint(out, bytes.len() as u64);
    out.extend_from_slice(bytes);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varint_round_trip() {
        for value in [0, 1, 127, 128, 300, u64::from(u32::MAX), u64::MAX] {
            let mut buf = Vec::new();
            put_varint(&mut buf, value);
            let mut slice = buf.as_slice();
            assert_eq!(take_varint(&mut slice), Some(value));
            assert!(slice.is_empty());
        }
    }

    #[test]
    fn small_input_is_a_raw_leaf() {
        let cid = cid_for_bytes(b"hello");
        assert!(cid.is_raw());
        assert!(cid.to_string().starts_with("bafkrei"));
    }

    #[test]
    fn large_input_is_a_dag_node() {
        let data = vec![7u8; CHUNK_SIZE * 2 + 1];
        let cid = cid_for_bytes(&data);
        assert!(!cid.is_raw());
        assert!(cid.to_string().starts_with("bafybei"));
    }

    #[test]
    fn directory_depends_on_entry_name() {
        let data = b"compressed rewards".repeat(100);
        let cid = cid_for_file(&data, "rp-rewards-mainnet-5.json.zst");
        assert!(!cid.is_raw());
        assert_eq!(cid, cid_for_file(&data, "rp-rewards-mainnet-5.json.zst"));
        assert_ne!(cid, cid_for_file(&data, "rp-rewards-mainnet-6.json.zst"));
        assert_ne!(cid, cid_for_bytes(&data));
        assert_ne!(cid, cid_for_file(&b"other bytes".repeat(100), "rp-rewards-mainnet-5.json.zst"));
    }

    #[test]
    fn string_form_parses_back() {
        let cid = cid_for_bytes(&vec![1u8; CHUNK_SIZE + 10]);
        assert_eq!(cid.to_string().parse::<Cid>().unwrap(), cid);
    }

    #[test]
    fn rejects_foreign_strings() {
        assert!("Qmabc".parse::<Cid>().is_err());
        assert!("b".parse::<Cid>().is_err());
        assert!("bafkreinotbase32!".parse::<Cid>().is_err());
    }
}
