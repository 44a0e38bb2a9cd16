//! Whole-object strategy: one fetch of `[0, size)` on first use

use async_trait::async_trait;
use bytes::Bytes;
use tracing::trace;

use super::{clamp, CacheStats, CacheType, RangeFetcher, ReadCache};
use crate::error::Result;

pub struct AllBytesCache {
    size: u64,
    data: Option<Bytes>,
    stats: CacheStats,
}

impl AllBytesCache {
    pub fn new(_block_size: u64, size: u64) -> Self {
        Self {
            size,
            data: None,
            stats: CacheStats::default(),
        }
    }
}

#[async_trait]
impl ReadCache for AllBytesCache {
    fn cache_type(&self) -> CacheType {
        CacheType::All
    }

    fn stats(&self) -> CacheStats {
        self.stats
    }

    async fn fetch(&mut self, fetcher: &dyn RangeFetcher, start: u64, end: u64) -> Result<Bytes> {
        let Some((start, end)) = clamp(start, end, self.size) else {
            return Ok(Bytes::new());
        };

        let data = match &self.data {
            Some(data) => {
                self.stats.hit(end - start);
                data.clone()
            }
            None => {
                trace!("all cache: fetching whole object ({} bytes)", self.size);
                self.stats.miss(end - start);
                self.stats.fetches += 1;
                let data = fetcher.fetch(0, self.size).await?;
                self.data = Some(data.clone());
                data
            }
        };

        let end = (end as usize).min(data.len());
        let start = (start as usize).min(end);
        Ok(data.slice(start..end))
    }
}
