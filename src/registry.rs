//! Process-wide instance registry
//!
//! Holds three things shared by every `OssFileSystem` in the process:
//!
//! - the instance cache, so equal configurations give the same instance,
//! - the client cache, so instances that differ only in filesystem options
//!   share one storage client (and one `memory://` store),
//! - the current instance.

use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::client::{self, ObjectClient};
use crate::config::{Fingerprint, OssConfig};
use crate::error::Result;
use crate::filesystem::OssFileSystem;

static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

/// The process-wide registry
pub fn registry() -> &'static Registry {
    &REGISTRY
}

pub struct Registry {
    instances: DashMap<Fingerprint, Arc<OssFileSystem>>,
    clients: DashMap<Fingerprint, Arc<dyn ObjectClient>>,
    current: RwLock<Option<Arc<OssFileSystem>>>,
}

impl Registry {
    fn new() -> Self {
        Self {
            instances: DashMap::new(),
            clients: DashMap::new(),
            current: RwLock::new(None),
        }
    }

    /// Cached instance for `fingerprint`, building it with `build` if absent
    ///
    /// The lookup and insert happen under the map's shard lock, so concurrent
    /// callers with the same fingerprint all get the same instance.
    pub fn instance<F>(&self, fingerprint: &Fingerprint, build: F) -> Arc<OssFileSystem>
    where
        F: FnOnce() -> OssFileSystem,
    {
        self.instances
            .entry(fingerprint.clone())
            .or_insert_with(|| {
                debug!("Caching new filesystem instance {}", fingerprint);
                Arc::new(build())
            })
            .clone()
    }

    pub fn get(&self, fingerprint: &Fingerprint) -> Option<Arc<OssFileSystem>> {
        self.instances.get(fingerprint).map(|fs| fs.clone())
    }

    /// Forget one cached instance; live references keep working
    pub fn invalidate(&self, fingerprint: &Fingerprint) -> bool {
        self.instances.remove(fingerprint).is_some()
    }

    /// Forget every cached instance and the current instance
    pub fn clear(&self) {
        info!("Clearing {} cached filesystem instances", self.instances.len());
        self.instances.clear();
        self.clear_current();
    }

    /// Number of cached instances
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Storage client for a normalized config
    ///
    /// Clients are built outside the map lock because building one is async.
    /// If two callers race, both build a client but only the first one stored
    /// is returned to anyone; the other is dropped.
    pub async fn client(&self, config: &OssConfig) -> Result<Arc<dyn ObjectClient>> {
        let fingerprint = config.connection_fingerprint();
        if let Some(client) = self.clients.get(&fingerprint) {
            return Ok(client.clone());
        }

        let built = client::connect(config).await?;
        let client = self
            .clients
            .entry(fingerprint.clone())
            .or_insert_with(|| {
                debug!("Caching new storage client {}", fingerprint);
                built
            })
            .clone();
        Ok(client)
    }

    /// Forget the client cached for a connection fingerprint
    pub fn invalidate_client(&self, fingerprint: &Fingerprint) -> bool {
        self.clients.remove(fingerprint).is_some()
    }

    /// Forget every cached client (and with it every `memory://` store)
    pub fn clear_clients(&self) {
        self.clients.clear();
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn current(&self) -> Option<Arc<OssFileSystem>> {
        self.current.read().clone()
    }

    pub fn set_current(&self, fs: &Arc<OssFileSystem>) {
        *self.current.write() = Some(fs.clone());
    }

    pub fn clear_current(&self) {
        *self.current.write() = None;
    }
}
