use std::future::Future;
use std::num::NonZeroUsize;
use std::ops::Deref;
use std::sync::Arc;

use alloy::primitives::B256;
use alloy::rpc::types::{Block, BlockId, BlockTransactionsKind};
use alloy::{providers::Provider, transports::Transport};
use anyhow::Context;
use serde::Serialize;
use tokio::sync::{Mutex, Semaphore, SemaphorePermit};

const CACHE_SIZE: NonZeroUsize = match NonZeroUsize::new(1024) {
    Some(size) => size,
    None => panic!("cache size must be non-zero"),
};

/// The parts of an execution-layer header the engine needs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct BlockHeader {
    pub number: u64,
    pub timestamp: u64,
    pub hash: B256,
}

impl From<&Block> for BlockHeader {
    fn from(block: &Block) -> Self {
        Self {
            number: block.header.number,
            timestamp: block.header.timestamp,
            hash: block.header.hash,
        }
    }
}

/// `GetBlockHeader(number | latest)`.
pub trait HeaderProvider {
    fn header_by_number(
        &self,
        number: u64,
    ) -> impl Future<Output = anyhow::Result<BlockHeader>> + Send;

    fn latest_header(&self) -> impl Future<Output = anyhow::Result<BlockHeader>> + Send;
}

/// Wrapper around an alloy provider that bounds the number of requests in
/// flight and caches headers, which block searches revisit often.
pub struct CachedProvider<ProviderT, TransportT> {
    provider: Arc<ProviderT>,
    // The reqwest connection pool under alloy is unbounded, so parallel
    // requests are counted here.
    semaphore: Arc<Semaphore>,
    headers: Arc<Mutex<lru::LruCache<u64, BlockHeader>>>,
    _phantom: std::marker::PhantomData<TransportT>,
}

pub struct ProviderGuard<'a, ProviderT> {
    provider: Arc<ProviderT>,
    _permit: SemaphorePermit<'a>,
}

impl<ProviderT> Deref for ProviderGuard<'_, ProviderT> {
    type Target = Arc<ProviderT>;

    fn deref(&self) -> &Self::Target {
        &self.provider
    }
}

impl<ProviderT, TransportT> CachedProvider<ProviderT, TransportT>
where
    ProviderT: Provider<TransportT>,
    TransportT: Transport + Clone,
{
    pub fn new(provider: ProviderT, max_parallel_requests: usize) -> Self {
        Self {
            provider: provider.into(),
            semaphore: Arc::new(Semaphore::new(max_parallel_requests.max(1))),
            headers: Arc::new(Mutex::new(lru::LruCache::new(CACHE_SIZE))),
            _phantom: std::marker::PhantomData,
        }
    }

    /// Waits for a free request slot and hands out the inner provider.
    pub async fn get_provider(&self) -> anyhow::Result<ProviderGuard<ProviderT>> {
        Ok(ProviderGuard {
            provider: self.provider.clone(),
            _permit: self.semaphore.acquire().await?,
        })
    }

    async fn fetch_header(&self, id: BlockId) -> anyhow::Result<BlockHeader> {
        let block = self
            .get_provider()
            .await?
            .get_block(id, BlockTransactionsKind::Hashes)
            .await?
            .with_context(|| format!("block {id:?} does not exist"))?;
        let header = BlockHeader::from(&block);
        self.headers.lock().await.put(header.number, header);
        Ok(header)
    }
}

impl<ProviderT, TransportT> HeaderProvider for CachedProvider<ProviderT, TransportT>
where
    ProviderT: Provider<TransportT>,
    TransportT: Transport + Clone,
{
    async fn header_by_number(&self, number: u64) -> anyhow::Result<BlockHeader> {
        if let Some(header) = self.headers.lock().await.get(&number).copied() {
            return Ok(header);
        }
        self.fetch_header(BlockId::number(number))
            .await
            .with_context(|| format!("error getting execution block {number}"))
    }

    async fn latest_header(&self) -> anyhow::Result<BlockHeader> {
        self.fetch_header(BlockId::latest())
            .await
            .context("error getting latest execution block")
    }
}
