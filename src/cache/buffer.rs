//! Whole-buffer ("bytes") strategy
//!
//! Keeps one contiguous buffer. Requests adjacent to the buffer (within one
//! block) extend it in place instead of replacing it; requests elsewhere
//! replace it with `[start, end + block)`. Once the buffer spans several
//! blocks, whole blocks are dropped from the front so forward streaming does
//! not accumulate the entire object.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tracing::trace;

use super::{clamp, CacheStats, CacheType, RangeFetcher, ReadCache};
use crate::error::Result;

/// Contiguous, extendable byte buffer cache
pub struct BytesCache {
    block_size: u64,
    size: u64,
    /// Object offset of `buffer[0]`; `None` until the first fetch
    start: Option<u64>,
    buffer: Bytes,
    trim: bool,
    stats: CacheStats,
}

impl BytesCache {
    pub fn new(block_size: u64, size: u64) -> Self {
        Self {
            block_size,
            size,
            start: None,
            buffer: Bytes::new(),
            trim: true,
            stats: CacheStats::default(),
        }
    }

    /// Keep the whole buffer instead of dropping consumed blocks
    pub fn without_trim(mut self) -> Self {
        self.trim = false;
        self
    }

    fn bounds(&self) -> Option<(u64, u64)> {
        self.start
            .map(|start| (start, start + self.buffer.len() as u64))
    }

    async fn replace(&mut self, fetcher: &dyn RangeFetcher, start: u64, end: u64) -> Result<()> {
        trace!("bytes cache: replacing buffer with {}..{}", start, end);
        self.buffer = fetcher.fetch(start, end).await?;
        self.start = Some(start);
        self.stats.fetches += 1;
        Ok(())
    }

    fn join(front: &[u8], back: &[u8]) -> Bytes {
        let mut joined = BytesMut::with_capacity(front.len() + back.len());
        joined.extend_from_slice(front);
        joined.extend_from_slice(back);
        joined.freeze()
    }
}

#[async_trait]
impl ReadCache for BytesCache {
    fn cache_type(&self) -> CacheType {
        CacheType::Bytes
    }

    fn stats(&self) -> CacheStats {
        self.stats
    }

    async fn fetch(&mut self, fetcher: &dyn RangeFetcher, start: u64, end: u64) -> Result<Bytes> {
        let Some((start, end)) = clamp(start, end, self.size) else {
            return Ok(Bytes::new());
        };
        let len = end - start;

        if let Some((cached_start, cached_end)) = self.bounds() {
            if start >= cached_start && end <= cached_end {
                self.stats.hit(len);
                let offset = (start - cached_start) as usize;
                return Ok(self.buffer.slice(offset..offset + len as usize));
            }
        }

        self.stats.miss(len);
        let block_end = (end + self.block_size).min(self.size);

        match self.bounds() {
            Some((cached_start, cached_end)) if !(start < cached_start && end > cached_end) => {
                if start < cached_start {
                    // Ends inside the buffer: prepend unless the buffer is mostly unrelated
                    if cached_end - end > self.block_size {
                        self.replace(fetcher, start, block_end).await?;
                    } else {
                        trace!("bytes cache: prepending {}..{}", start, cached_start);
                        let front = fetcher.fetch(start, cached_start).await?;
                        self.stats.fetches += 1;
                        self.buffer = Self::join(&front, &self.buffer);
                        self.start = Some(start);
                    }
                } else if end - cached_end > self.block_size {
                    self.replace(fetcher, start, block_end).await?;
                } else {
                    trace!("bytes cache: appending {}..{}", cached_end, block_end);
                    let back = fetcher.fetch(cached_end, block_end).await?;
                    self.stats.fetches += 1;
                    self.buffer = Self::join(&self.buffer, &back);
                }
            }
            _ => self.replace(fetcher, start, block_end).await?,
        }

        let cached_start = self.start.unwrap_or(start);
        let offset = ((start - cached_start) as usize).min(self.buffer.len());
        let out_end = (offset + len as usize).min(self.buffer.len());
        let out = self.buffer.slice(offset..out_end);

        if self.trim {
            let blocks = self.buffer.len() as u64 / (self.block_size + 1);
            if blocks > 1 {
                let drop = (self.block_size * blocks) as usize;
                trace!("bytes cache: trimming {} bytes from front", drop);
                self.buffer = self.buffer.slice(drop..);
                self.start = Some(cached_start + drop as u64);
            }
        }

        Ok(out)
    }
}
