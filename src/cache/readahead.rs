//! Read-ahead strategy
//!
//! Keeps a single window of the object. A miss refills the window with the
//! requested range plus one block past its end, so forward sequential reads
//! mostly hit. The overlapping head of a partially cached request is reused.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tracing::trace;

use super::{clamp, CacheStats, CacheType, RangeFetcher, ReadCache};
use crate::error::Result;

/// Single-window read-ahead cache
pub struct ReadAheadCache {
    block_size: u64,
    size: u64,
    /// Window bounds, `[start, end)`
    start: u64,
    end: u64,
    window: Bytes,
    stats: CacheStats,
}

impl ReadAheadCache {
    pub fn new(block_size: u64, size: u64) -> Self {
        Self {
            block_size,
            size,
            start: 0,
            end: 0,
            window: Bytes::new(),
            stats: CacheStats::default(),
        }
    }
}

#[async_trait]
impl ReadCache for ReadAheadCache {
    fn cache_type(&self) -> CacheType {
        CacheType::ReadAhead
    }

    fn stats(&self) -> CacheStats {
        self.stats
    }

    async fn fetch(&mut self, fetcher: &dyn RangeFetcher, start: u64, end: u64) -> Result<Bytes> {
        let Some((start, end)) = clamp(start, end, self.size) else {
            return Ok(Bytes::new());
        };
        let len = end - start;

        if start >= self.start && end <= self.end {
            self.stats.hit(len);
            let offset = (start - self.start) as usize;
            return Ok(self.window.slice(offset..offset + len as usize));
        }

        self.stats.miss(len);

        let (head, fetch_from) = if self.start <= start && start < self.end {
            (self.window.slice((start - self.start) as usize..), self.end)
        } else {
            (Bytes::new(), start)
        };
        let fetch_to = (end + self.block_size).min(self.size);

        trace!(
            "readahead cache: miss {}..{}, fetching {}..{}",
            start,
            end,
            fetch_from,
            fetch_to
        );
        self.window = fetcher.fetch(fetch_from, fetch_to).await?;
        self.stats.fetches += 1;
        self.start = fetch_from;
        self.end = fetch_from + self.window.len() as u64;

        let tail_len = (len as usize - head.len()).min(self.window.len());
        if head.is_empty() {
            return Ok(self.window.slice(..tail_len));
        }

        let mut out = BytesMut::with_capacity(head.len() + tail_len);
        out.extend_from_slice(&head);
        out.extend_from_slice(&self.window[..tail_len]);
        Ok(out.freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::testing::VecFetcher;

    #[tokio::test]
    async fn test_small_sequential_reads_hit_window() {
        let fetcher = VecFetcher::new(10_000);
        let mut cache = ReadAheadCache::new(1000, 10_000);

        // First read fetches 0..1100, the next nine 100-byte reads hit.
        for i in 0..10u64 {
            let out = cache.fetch(&fetcher, i * 100, (i + 1) * 100).await.unwrap();
            assert_eq!(&out[..], fetcher.slice(i * 100, (i + 1) * 100));
        }

        assert_eq!(fetcher.calls(), 1);
        assert_eq!(cache.stats().hits, 9);
        assert_eq!(cache.stats().misses, 1);
    }

    #[tokio::test]
    async fn test_partial_hit_reuses_head() {
        let fetcher = VecFetcher::new(10_000);
        let mut cache = ReadAheadCache::new(100, 10_000);

        cache.fetch(&fetcher, 0, 100).await.unwrap(); // window 0..200
        let out = cache.fetch(&fetcher, 150, 400).await.unwrap();
        assert_eq!(&out[..], fetcher.slice(150, 400));

        // Only the part past the old window was requested: 200..500
        assert_eq!(fetcher.calls(), 2);
        assert_eq!(fetcher.bytes.load(std::sync::atomic::Ordering::SeqCst), 200 + 300);
    }

    #[tokio::test]
    async fn test_backwards_seek_refetches() {
        let fetcher = VecFetcher::new(1000);
        let mut cache = ReadAheadCache::new(50, 1000);

        cache.fetch(&fetcher, 500, 600).await.unwrap();
        let out = cache.fetch(&fetcher, 100, 200).await.unwrap();
        assert_eq!(&out[..], fetcher.slice(100, 200));
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_window_clamped_to_size() {
        let fetcher = VecFetcher::new(120);
        let mut cache = ReadAheadCache::new(1000, 120);

        let out = cache.fetch(&fetcher, 100, 500).await.unwrap();
        assert_eq!(&out[..], fetcher.slice(100, 120));
        assert_eq!(fetcher.bytes.load(std::sync::atomic::Ordering::SeqCst), 20);
    }
}
