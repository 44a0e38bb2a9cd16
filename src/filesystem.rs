//! The OSS filesystem adapter
//!
//! [`OssFileSystem`] maps `bucket/key` paths onto an object store. Instances
//! are cheap to construct: the storage client is resolved on first use and
//! shared with every instance that has the same connection settings.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::cache::CacheType;
use crate::client::{ListEntry, ObjectClient, ObjectMeta};
use crate::config::{Fingerprint, OssConfig};
use crate::dircache::DirCache;
use crate::error::{OssfsError, Result};
use crate::file::{OpenMode, OssFile};
use crate::path;
use crate::registry::registry;

/// What a path refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    File,
    Directory,
    Bucket,
}

/// Details of one listing entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectInfo {
    /// `bucket/key` without a trailing slash
    pub name: String,
    pub size: u64,
    pub kind: ObjectKind,
    pub last_modified: Option<DateTime<Utc>>,
    pub etag: Option<String>,
}

impl ObjectInfo {
    fn file(bucket: &str, meta: ObjectMeta) -> Self {
        Self {
            name: path::join(bucket, &meta.key),
            size: meta.size,
            kind: ObjectKind::File,
            last_modified: meta.last_modified,
            etag: meta.etag,
        }
    }

    fn directory(name: String) -> Self {
        Self {
            name,
            size: 0,
            kind: ObjectKind::Directory,
            last_modified: None,
            etag: None,
        }
    }

    fn bucket(name: String) -> Self {
        Self {
            kind: ObjectKind::Bucket,
            ..Self::directory(name)
        }
    }

    pub fn is_file(&self) -> bool {
        self.kind == ObjectKind::File
    }

    /// Buckets count as directories
    pub fn is_dir(&self) -> bool {
        !self.is_file()
    }
}

/// Filesystem view of an OSS account
pub struct OssFileSystem {
    config: OssConfig,
    fingerprint: Fingerprint,
    client: OnceCell<Arc<dyn ObjectClient>>,
    dircache: Arc<DirCache>,
}

impl OssFileSystem {
    /// Get the filesystem for `config` and make it current
    ///
    /// The config is validated and normalized first. Equal configs give the
    /// same instance unless `skip_instance_cache` is set. No network I/O
    /// happens here.
    pub fn new(config: OssConfig) -> Result<Arc<Self>> {
        let config = config.normalize()?;
        let fingerprint = config.fingerprint();

        let fs = if config.skip_instance_cache {
            debug!("Building uncached filesystem for {}", config.endpoint);
            Arc::new(Self::detached(config))
        } else {
            registry().instance(&fingerprint, || Self::detached(config))
        };

        registry().set_current(&fs);
        Ok(fs)
    }

    /// Filesystem over an existing client, bypassing both registry caches
    ///
    /// The instance is not made current.
    pub fn from_client(config: OssConfig, client: Arc<dyn ObjectClient>) -> Result<Arc<Self>> {
        let fs = Self::detached(config.normalize()?);
        // A fresh cell cannot already be set
        let _ = fs.client.set(client);
        Ok(Arc::new(fs))
    }

    /// Instance outside the registry; `config` must already be normalized
    pub(crate) fn detached(config: OssConfig) -> Self {
        let fingerprint = config.fingerprint();
        let dircache = Arc::new(DirCache::new(
            config.use_listings_cache,
            config.listings_expiry_time,
        ));
        Self {
            config,
            fingerprint,
            client: OnceCell::new(),
            dircache,
        }
    }

    /// The most recently constructed or activated filesystem
    pub fn current() -> Option<Arc<Self>> {
        registry().current()
    }

    pub fn make_current(self: &Arc<Self>) {
        registry().set_current(self);
    }

    pub fn clear_current() {
        registry().clear_current();
    }

    pub fn config(&self) -> &OssConfig {
        &self.config
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub fn default_cache_type(&self) -> CacheType {
        self.config.default_cache_type
    }

    /// Storage client, resolved through the client cache on first use
    pub async fn client(&self) -> Result<&Arc<dyn ObjectClient>> {
        self.client
            .get_or_try_init(|| registry().client(&self.config))
            .await
    }

    /// Serialize the configuration to JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.config)?)
    }

    /// Rebuild a filesystem from [`to_json`](Self::to_json) output
    ///
    /// Goes through [`new`](Self::new), so in a process that already holds
    /// the instance the same instance comes back.
    pub fn from_json(json: &str) -> Result<Arc<Self>> {
        let config: OssConfig = serde_json::from_str(json)?;
        Self::new(config)
    }

    /// Drop cached listings for `path` (and its parents and children), or all
    pub fn invalidate_cache(&self, path: Option<&str>) {
        match path {
            Some(path) => self.dircache.invalidate_tree(path),
            None => self.dircache.clear(),
        }
    }

    // =========================================================================
    // Listing
    // =========================================================================

    /// Names under `path`, sorted
    ///
    /// `""` lists buckets. A file path lists as itself.
    pub async fn ls(&self, path: &str) -> Result<Vec<String>> {
        Ok(self
            .ls_detail(path)
            .await?
            .into_iter()
            .map(|info| info.name)
            .collect())
    }

    /// Entries under `path`, sorted by name
    pub async fn ls_detail(&self, path: &str) -> Result<Vec<ObjectInfo>> {
        let stripped = path::strip_protocol(path);
        let (bucket, key) = if stripped.is_empty() {
            (String::new(), String::new())
        } else {
            path::split_path(&stripped)?
        };
        // Listings are cached under the canonical `bucket/key` form
        let canonical = path::join(&bucket, &key);
        if let Some(entries) = self.dircache.get(&canonical) {
            return Ok(entries);
        }

        let client = self.client().await?;

        if bucket.is_empty() {
            debug!("ls: listing buckets");
            let mut entries: Vec<ObjectInfo> = client
                .list_buckets()
                .await?
                .into_iter()
                .map(ObjectInfo::bucket)
                .collect();
            entries.sort_by(|a, b| a.name.cmp(&b.name));
            self.dircache.insert("", entries.clone());
            return Ok(entries);
        }

        let prefix = path::dir_prefix(&key);
        debug!("ls: bucket={} prefix={}", bucket, prefix);

        let mut entries = Vec::new();
        let mut saw_marker = false;
        let mut listing = client.list(&bucket, &prefix, false);
        while let Some(entry) = listing.try_next().await? {
            match entry {
                ListEntry::Object(meta) if meta.key == prefix => saw_marker = true,
                ListEntry::Object(meta) => entries.push(ObjectInfo::file(&bucket, meta)),
                ListEntry::Prefix(p) => entries.push(ObjectInfo::directory(path::join(
                    &bucket,
                    p.trim_end_matches('/'),
                ))),
            }
        }

        if entries.is_empty() && !key.is_empty() && !saw_marker {
            return match client.head_object(&bucket, &key).await {
                Ok(meta) => Ok(vec![ObjectInfo::file(&bucket, meta)]),
                Err(OssfsError::NotFound(_)) => Err(OssfsError::NotFound(canonical)),
                Err(e) => Err(e),
            };
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        self.dircache.insert(&canonical, entries.clone());
        Ok(entries)
    }

    /// Every file below `path`, recursively, sorted
    pub async fn find(&self, path: &str) -> Result<Vec<String>> {
        let (bucket, key) = path::split_path(path)?;
        let client = self.client().await?;

        let mut names: Vec<String> = client
            .list(&bucket, &path::dir_prefix(&key), true)
            .try_filter_map(|entry| async move {
                Ok(match entry {
                    ListEntry::Object(meta) if !meta.key.ends_with('/') => Some(meta.key),
                    _ => None,
                })
            })
            .map_ok(|key| path::join(&bucket, &key))
            .try_collect()
            .await?;

        if names.is_empty() && !key.is_empty() {
            match client.head_object(&bucket, &key).await {
                Ok(_) => names.push(path::join(&bucket, &key)),
                Err(OssfsError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }

        names.sort();
        Ok(names)
    }

    // =========================================================================
    // Metadata
    // =========================================================================

    /// Details of one path
    pub async fn info(&self, path: &str) -> Result<ObjectInfo> {
        let stripped = path::strip_protocol(path);
        if stripped.is_empty() {
            return Ok(ObjectInfo::directory(String::new()));
        }

        let (bucket, key) = path::split_path(&stripped)?;
        let canonical = path::join(&bucket, &key);
        if let Some(siblings) = self.dircache.get(&path::parent(&canonical)) {
            if let Some(info) = siblings.into_iter().find(|info| info.name == canonical) {
                return Ok(info);
            }
        }

        let client = self.client().await?;

        if key.is_empty() {
            // Listing the bucket proves it exists without needing ListBuckets
            client.list(&bucket, "", false).try_next().await?;
            return Ok(ObjectInfo::bucket(bucket));
        }

        match client.head_object(&bucket, &key).await {
            Ok(meta) => return Ok(ObjectInfo::file(&bucket, meta)),
            Err(OssfsError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        let mut children = client.list(&bucket, &path::dir_prefix(&key), false);
        match children.try_next().await? {
            Some(_) => Ok(ObjectInfo::directory(path::join(&bucket, &key))),
            None => Err(OssfsError::NotFound(stripped)),
        }
    }

    pub async fn exists(&self, path: &str) -> Result<bool> {
        match self.info(path).await {
            Ok(_) => Ok(true),
            Err(OssfsError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn isfile(&self, path: &str) -> Result<bool> {
        match self.info(path).await {
            Ok(info) => Ok(info.is_file()),
            Err(OssfsError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn isdir(&self, path: &str) -> Result<bool> {
        match self.info(path).await {
            Ok(info) => Ok(info.is_dir()),
            Err(OssfsError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    // =========================================================================
    // Files
    // =========================================================================

    /// Open a file
    ///
    /// `cache_type` overrides the instance's default read cache for this
    /// handle only; it is ignored for write handles.
    pub async fn open(
        &self,
        path: &str,
        mode: OpenMode,
        cache_type: Option<CacheType>,
    ) -> Result<OssFile> {
        let (bucket, key) = self.file_path(path)?;
        let client = self.client().await?.clone();

        match mode {
            OpenMode::Read => {
                let meta = match client.head_object(&bucket, &key).await {
                    Ok(meta) => meta,
                    Err(OssfsError::NotFound(msg)) => {
                        if self.isdir(path).await? {
                            return Err(OssfsError::IsADirectory(path::join(&bucket, &key)));
                        }
                        return Err(OssfsError::NotFound(msg));
                    }
                    Err(e) => return Err(e),
                };
                let cache_type = cache_type.unwrap_or(self.config.default_cache_type);
                let cache = cache_type.build(self.config.default_block_size, meta.size);
                Ok(OssFile::reader(client, bucket, key, meta.size, cache))
            }
            OpenMode::Write => Ok(OssFile::writer(
                client,
                self.dircache.clone(),
                bucket,
                key,
                self.config.default_block_size,
            )),
        }
    }

    /// Whole object
    pub async fn cat(&self, path: &str) -> Result<Bytes> {
        let (bucket, key) = self.file_path(path)?;
        self.client().await?.get_object(&bucket, &key).await
    }

    /// Bytes `[start, end)` of an object, clamped to its size
    pub async fn cat_range(&self, path: &str, start: u64, end: u64) -> Result<Bytes> {
        let (bucket, key) = self.file_path(path)?;
        let client = self.client().await?;
        let size = client.head_object(&bucket, &key).await?.size;
        let end = end.min(size);
        if start >= end {
            return Ok(Bytes::new());
        }
        client.get_range(&bucket, &key, start, end).await
    }

    /// Write a whole object in one request
    pub async fn pipe(&self, path: &str, data: impl Into<Bytes>) -> Result<()> {
        let (bucket, key) = self.file_path(path)?;
        self.client()
            .await?
            .put_object(&bucket, &key, data.into())
            .await?;
        self.dircache.invalidate(&path::join(&bucket, &key));
        Ok(())
    }

    /// Create an empty object
    pub async fn touch(&self, path: &str) -> Result<()> {
        self.pipe(path, Bytes::new()).await
    }

    /// Server-side copy of one object
    pub async fn copy(&self, src: &str, dst: &str) -> Result<()> {
        let (src_bucket, src_key) = self.file_path(src)?;
        let (dst_bucket, dst_key) = self.file_path(dst)?;
        debug!("copy {}/{} -> {}/{}", src_bucket, src_key, dst_bucket, dst_key);
        self.client()
            .await?
            .copy_object(&src_bucket, &src_key, &dst_bucket, &dst_key)
            .await?;
        self.dircache.invalidate(&path::join(&dst_bucket, &dst_key));
        Ok(())
    }

    /// Create a bucket (for a bucket-only path) or a directory marker
    pub async fn mkdir(&self, path: &str) -> Result<()> {
        let (bucket, key) = path::split_path(path)?;
        let client = self.client().await?;
        if key.is_empty() {
            info!("Creating bucket {}", bucket);
            client.create_bucket(&bucket).await?;
            self.dircache.invalidate("");
        } else {
            client
                .put_object(&bucket, &path::dir_prefix(&key), Bytes::new())
                .await?;
            self.dircache.invalidate(&path::join(&bucket, &key));
        }
        Ok(())
    }

    /// Delete one object
    pub async fn rm_file(&self, path: &str) -> Result<()> {
        let (bucket, key) = self.file_path(path)?;
        debug!("rm {}/{}", bucket, key);
        self.client().await?.delete_object(&bucket, &key).await?;
        self.dircache.invalidate(&path::join(&bucket, &key));
        Ok(())
    }

    /// Delete a file, or with `recursive` everything below a directory
    ///
    /// Removing a bucket path empties the bucket but keeps the bucket.
    pub async fn rm(&self, path: &str, recursive: bool) -> Result<()> {
        let info = self.info(path).await?;
        if info.is_file() {
            return self.rm_file(path).await;
        }
        if !recursive {
            return Err(OssfsError::IsADirectory(format!(
                "{} (use recursive removal)",
                info.name
            )));
        }

        let (bucket, key) = path::split_path(path)?;
        let client = self.client().await?;
        let keys: Vec<String> = client
            .list(&bucket, &path::dir_prefix(&key), true)
            .try_filter_map(|entry| async move {
                Ok(match entry {
                    ListEntry::Object(meta) => Some(meta.key),
                    ListEntry::Prefix(_) => None,
                })
            })
            .try_collect()
            .await?;

        debug!("rm -r {}: {} objects", info.name, keys.len());
        for key in &keys {
            client.delete_object(&bucket, key).await?;
        }
        self.dircache.invalidate_tree(&info.name);
        Ok(())
    }

    /// `(bucket, key)` of a path that must name an object
    fn file_path(&self, path: &str) -> Result<(String, String)> {
        let (bucket, key) = path::split_path(path)?;
        if key.is_empty() {
            return Err(OssfsError::IsADirectory(bucket));
        }
        Ok((bucket, key))
    }
}

impl fmt::Debug for OssFileSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OssFileSystem")
            .field("endpoint", &self.config.endpoint)
            .field("fingerprint", &self.fingerprint)
            .field("connected", &self.client.initialized())
            .finish()
    }
}

/// Serializes the configuration only; no connection state is written
impl Serialize for OssFileSystem {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.config.serialize(serializer)
    }
}

/// Rebuilds an instance outside the instance cache; its client is resolved
/// lazily through the client cache like any other instance's
impl<'de> Deserialize<'de> for OssFileSystem {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let config = OssConfig::deserialize(deserializer)?;
        let config = config.normalize().map_err(serde::de::Error::custom)?;
        Ok(Self::detached(config))
    }
}
