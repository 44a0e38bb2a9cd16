//! Directory listings cache
//!
//! Each filesystem instance keeps the listings it has fetched, keyed by the
//! stripped path that was listed (`""` for the bucket list). Entries expire
//! after the configured lifetime; writes through the instance invalidate the
//! written path and every parent above it.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::trace;

use crate::filesystem::ObjectInfo;
use crate::path;

#[derive(Debug, Clone)]
struct CachedListing {
    entries: Vec<ObjectInfo>,
    cached_at: Instant,
}

/// Listings cache for one filesystem instance
#[derive(Debug)]
pub struct DirCache {
    enabled: bool,
    expiry: Option<Duration>,
    listings: DashMap<String, CachedListing>,
}

impl DirCache {
    /// `expiry == None` keeps listings until they are invalidated
    pub fn new(enabled: bool, expiry: Option<Duration>) -> Self {
        Self {
            enabled,
            expiry,
            listings: DashMap::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Cached entries for `path`, if present and fresh
    pub fn get(&self, path: &str) -> Option<Vec<ObjectInfo>> {
        if !self.enabled {
            return None;
        }

        let entry = self.listings.get(path)?;
        if self
            .expiry
            .is_some_and(|expiry| entry.cached_at.elapsed() >= expiry)
        {
            drop(entry);
            self.listings.remove(path);
            trace!("dircache expired: {:?}", path);
            return None;
        }

        trace!("dircache hit: {:?}", path);
        Some(entry.entries.clone())
    }

    pub fn insert(&self, path: &str, entries: Vec<ObjectInfo>) {
        if !self.enabled {
            return;
        }
        self.listings.insert(
            path.to_string(),
            CachedListing {
                entries,
                cached_at: Instant::now(),
            },
        );
    }

    /// Drop the listing of `path` and of each of its ancestors, up to and
    /// including the bucket list
    pub fn invalidate(&self, path: &str) {
        let mut current = path::strip_protocol(path);
        loop {
            self.listings.remove(&current);
            if current.is_empty() {
                break;
            }
            current = path::parent(&current);
        }
    }

    /// Drop `path` and everything listed below it
    pub fn invalidate_tree(&self, path: &str) {
        let root = path::strip_protocol(path);
        let prefix = format!("{}/", root);
        self.listings
            .retain(|key, _| key != &root && !key.starts_with(&prefix));
        self.invalidate(&root);
    }

    pub fn clear(&self) {
        self.listings.clear();
    }

    pub fn len(&self) -> usize {
        self.listings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listings.is_empty()
    }
}
