//! Read caches for file handles
//!
//! A read handle never talks to the object store directly: every read goes
//! through one [`ReadCache`], which decides how much to fetch through the
//! handle's [`RangeFetcher`]. The strategy is picked by name when the handle is
//! opened and cannot change afterwards.

pub mod all;
pub mod buffer;
pub mod none;
pub mod readahead;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{OssfsError, Result};

pub use self::all::AllBytesCache;
pub use self::buffer::BytesCache;
pub use self::none::NoCache;
pub use self::readahead::ReadAheadCache;

/// Named read-cache strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheType {
    /// Every read is a range request
    None,
    /// One contiguous buffer that grows and trims as reads move forward
    Bytes,
    /// One window refilled with a block of read-ahead on every miss
    #[default]
    ReadAhead,
    /// Whole object fetched on first read
    All,
}

impl CacheType {
    /// Every registered strategy
    pub const ALL: [CacheType; 4] = [
        CacheType::None,
        CacheType::Bytes,
        CacheType::ReadAhead,
        CacheType::All,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            CacheType::None => "none",
            CacheType::Bytes => "bytes",
            CacheType::ReadAhead => "readahead",
            CacheType::All => "all",
        }
    }

    /// Build a cache for an object of `size` bytes
    pub fn build(self, block_size: u64, size: u64) -> Box<dyn ReadCache> {
        match self {
            CacheType::None => Box::new(NoCache::new(block_size, size)),
            CacheType::Bytes => Box::new(BytesCache::new(block_size, size)),
            CacheType::ReadAhead => Box::new(ReadAheadCache::new(block_size, size)),
            CacheType::All => Box::new(AllBytesCache::new(block_size, size)),
        }
    }
}

impl fmt::Display for CacheType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CacheType {
    type Err = OssfsError;

    fn from_str(s: &str) -> Result<Self> {
        CacheType::ALL
            .into_iter()
            .find(|t| t.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                OssfsError::InvalidArgument(format!(
                    "unknown cache type '{}' (expected one of: none, bytes, readahead, all)",
                    s
                ))
            })
    }
}

/// Source of object bytes for a cache: `[start, end)` of one object
#[async_trait]
pub trait RangeFetcher: Send + Sync {
    async fn fetch(&self, start: u64, end: u64) -> Result<Bytes>;
}

/// Counters kept by every cache
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Requests answered entirely from the cache
    pub hits: u64,
    /// Requests that needed the fetcher
    pub misses: u64,
    /// Calls made to the fetcher
    pub fetches: u64,
    /// Bytes asked for by callers
    pub requested_bytes: u64,
}

impl CacheStats {
    fn hit(&mut self, len: u64) {
        self.hits += 1;
        self.requested_bytes += len;
    }

    fn miss(&mut self, len: u64) {
        self.misses += 1;
        self.requested_bytes += len;
    }
}

/// A read-buffering policy for one open object
#[async_trait]
pub trait ReadCache: Send + Sync {
    /// Which registered strategy this is
    fn cache_type(&self) -> CacheType;

    /// Counters so far
    fn stats(&self) -> CacheStats;

    /// Return bytes `[start, end)`, clamped to the object size
    async fn fetch(&mut self, fetcher: &dyn RangeFetcher, start: u64, end: u64)
        -> Result<Bytes>;
}

/// Clamp a request to the object; `None` when nothing is left to read
fn clamp(start: u64, end: u64, size: u64) -> Option<(u64, u64)> {
    let end = end.min(size);
    if start >= size || start >= end {
        None
    } else {
        Some((start, end))
    }
}
