//! Passthrough (no caching) strategy
//!
//! Every read becomes a range request against the object store.

use async_trait::async_trait;
use bytes::Bytes;
use tracing::trace;

use super::{clamp, CacheStats, CacheType, RangeFetcher, ReadCache};
use crate::error::Result;

/// Cache that stores nothing
pub struct NoCache {
    size: u64,
    stats: CacheStats,
}

impl NoCache {
    pub fn new(_block_size: u64, size: u64) -> Self {
        Self {
            size,
            stats: CacheStats::default(),
        }
    }
}

#[async_trait]
impl ReadCache for NoCache {
    fn cache_type(&self) -> CacheType {
        CacheType::None
    }

    fn stats(&self) -> CacheStats {
        self.stats
    }

    async fn fetch(&mut self, fetcher: &dyn RangeFetcher, start: u64, end: u64) -> Result<Bytes> {
        let Some((start, end)) = clamp(start, end, self.size) else {
            return Ok(Bytes::new());
        };

        trace!("none cache: fetching {}..{}", start, end);
        self.stats.miss(end - start);
        self.stats.fetches += 1;
        fetcher.fetch(start, end).await
    }
}
