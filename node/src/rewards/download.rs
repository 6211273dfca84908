use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};

use alloy::transports::http::reqwest;
use anyhow::Context as _;
use rewards_tree::{codec, RewardsFile};
use serde::Serialize;
use tracing::{info, warn};

use super::{ArtifactError, RewardsEvent};
use crate::config::{Network, RewardsConfig};

/// Fetches the raw bytes behind a URL.
pub trait ArtifactSource {
    fn fetch(&self, url: &str) -> impl Future<Output = anyhow::Result<Vec<u8>>> + Send;
}

#[derive(Clone, Debug, Default)]
pub struct HttpArtifactSource {
    client: reqwest::Client,
}

impl ArtifactSource for HttpArtifactSource {
    async fn fetch(&self, url: &str) -> anyhow::Result<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("error requesting {url}"))?
            .error_for_status()
            .with_context(|| format!("{url} did not serve the file"))?;
        Ok(response
            .bytes()
            .await
            .with_context(|| format!("error reading response from {url}"))?
            .to_vec())
    }
}

/// A download location. `template` may contain `{cid}`, `{network}` and
/// `{filename}` placeholders.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mirror {
    pub template: String,
    /// Whether the mirror serves the zstd-compressed file.
    pub compressed: bool,
}

impl Mirror {
    pub fn compressed(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            compressed: true,
        }
    }

    pub fn uncompressed(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            compressed: false,
        }
    }

    /// Mirrors in the order they are tried: the two IPFS gateways, then the
    /// per-network repository.
    pub fn from_config(cfg: &RewardsConfig) -> Vec<Self> {
        vec![
            Self::compressed(&cfg.primary_mirror),
            Self::compressed(&cfg.secondary_mirror),
            Self::uncompressed(&cfg.fallback_mirror),
        ]
    }

    pub fn url(&self, cid: &str, network: Network, file_name: &str) -> String {
        let file_name = if self.compressed {
            format!("{file_name}{}", codec::COMPRESSED_EXTENSION)
        } else {
            file_name.to_string()
        };
        self.template
            .replace("{cid}", cid)
            .replace("{network}", network.as_str())
            .replace("{filename}", &file_name)
    }
}

/// Name of the uncompressed rewards file of `interval` on `network`.
pub fn rewards_file_name(network: Network, interval: u64) -> String {
    format!("rp-rewards-{network}-{interval}.json")
}

/// The local directory of rewards files for one network. Files are kept
/// compressed.
#[derive(Clone, Debug)]
pub struct ArtifactStore {
    dir: PathBuf,
    network: Network,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>, network: Network) -> Self {
        Self {
            dir: dir.into(),
            network,
        }
    }

    pub fn network(&self) -> Network {
        self.network
    }

    /// Name of the uncompressed file of `interval`.
    pub fn file_name(&self, interval: u64) -> String {
        rewards_file_name(self.network, interval)
    }

    /// Where the compressed file of `interval` lives.
    pub fn path(&self, interval: u64) -> PathBuf {
        self.dir.join(format!(
            "{}{}",
            self.file_name(interval),
            codec::COMPRESSED_EXTENSION
        ))
    }

    /// Reads the stored file of `interval`, `None` if there is none.
    pub async fn load(&self, interval: u64) -> Result<Option<RewardsFile>, ArtifactError> {
        let path = self.path(interval);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(ArtifactError::Io { path, source }),
        };
        Ok(Some(codec::decode(&bytes)?))
    }

    /// Encodes and writes the file of `interval`.
    pub async fn save(&self, interval: u64, file: &RewardsFile) -> Result<PathBuf, ArtifactError> {
        self.save_compressed(interval, &codec::encode(file)?).await
    }

    /// Writes already compressed bytes as the file of `interval`. The file
    /// only appears under its final name once completely written.
    pub async fn save_compressed(&self, interval: u64, bytes: &[u8]) -> Result<PathBuf, ArtifactError> {
        let path = self.path(interval);
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| ArtifactError::Io { path, source }
        };

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(io_err(self.dir.as_path()))?;
        let partial = path.with_extension("zst.partial");
        tokio::fs::write(&partial, bytes)
            .await
            .map_err(io_err(partial.as_path()))?;
        tokio::fs::rename(&partial, &path)
            .await
            .map_err(io_err(path.as_path()))?;
        Ok(path)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FailureKind {
    /// The mirror could not be reached or did not serve the file.
    Transport,
    /// The bytes are not a (compressed) rewards file.
    Decode,
    /// The file does not match the root recorded on-chain.
    RootMismatch,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MirrorFailure {
    pub url: String,
    pub kind: FailureKind,
    pub reason: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum DownloadOutcome {
    Saved { path: PathBuf, url: String },
    /// No mirror served a valid file. Nothing was written.
    Unavailable { attempts: Vec<MirrorFailure> },
}

/// Downloads the file described by `event` from the first mirror that serves
/// a file matching the event's Merkle root and stores it.
///
/// The stored file holds the bytes as published, compressed if the mirror
/// served them uncompressed, including fields this crate does not model.
///
/// Mirror failures are collected into [`DownloadOutcome::Unavailable`];
/// only a failure to write the verified file is an error.
pub async fn download_rewards_file<S: ArtifactSource>(
    source: &S,
    store: &ArtifactStore,
    mirrors: &[Mirror],
    event: &RewardsEvent,
) -> Result<DownloadOutcome, ArtifactError> {
    let interval = event.index;
    let file_name = store.file_name(interval);
    let mut attempts = Vec::with_capacity(mirrors.len());

    for mirror in mirrors {
        let url = mirror.url(&event.merkle_tree_cid, store.network(), &file_name);
        match fetch_verified(source, mirror, &url, event).await {
            Ok(compressed) => {
                let path = store.save_compressed(interval, &compressed).await?;
                info!(interval, %url, path = %path.display(), "downloaded rewards file");
                return Ok(DownloadOutcome::Saved { path, url });
            }
            Err((kind, reason)) => {
                warn!(interval, %url, ?kind, %reason, "rewards file download failed");
                attempts.push(MirrorFailure { url, kind, reason });
            }
        }
    }
    Ok(DownloadOutcome::Unavailable { attempts })
}

/// Fetches `url` and checks it against `event`. Returns the file in its
/// compressed form.
async fn fetch_verified<S: ArtifactSource>(
    source: &S,
    mirror: &Mirror,
    url: &str,
    event: &RewardsEvent,
) -> Result<Vec<u8>, (FailureKind, String)> {
    let bytes = source
        .fetch(url)
        .await
        .map_err(|e| (FailureKind::Transport, format!("{e:#}")))?;
    let decode_err = |e: rewards_tree::RewardsTreeError| (FailureKind::Decode, e.to_string());
    let (json, compressed) = if mirror.compressed {
        (codec::decompress(&bytes).map_err(decode_err)?, bytes)
    } else {
        let compressed = codec::compress(&bytes).map_err(decode_err)?;
        (bytes, compressed)
    };

    let file = codec::deserialize(&json).map_err(decode_err)?;
    if file.index != event.index {
        return Err((
            FailureKind::Decode,
            format!("file is for interval {}", file.index),
        ));
    }
    file.verify_root(event.merkle_root)
        .map_err(|e| (FailureKind::RootMismatch, e.to_string()))?;
    Ok(compressed)
}
