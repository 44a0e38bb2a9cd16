//! In-process object store
//!
//! Backs `memory://` endpoints. Every filesystem whose config resolves to the
//! same client (see the registry) shares one store, which is what makes it
//! useful for tests and local pipelines: writes through one instance are
//! visible through the others. Contents live only as long as the client.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use tracing::{debug, trace};

use super::{CompletedPart, ListEntry, ListStream, ObjectClient, ObjectMeta};
use crate::error::{OssfsError, Result};

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    last_modified: DateTime<Utc>,
    etag: String,
}

impl StoredObject {
    fn new(data: Bytes) -> Self {
        let etag = format!("{:x}", Sha256::digest(&data))[..32].to_string();
        Self {
            data,
            last_modified: Utc::now(),
            etag,
        }
    }

    fn meta(&self, key: &str) -> ObjectMeta {
        ObjectMeta {
            key: key.to_string(),
            size: self.data.len() as u64,
            last_modified: Some(self.last_modified),
            etag: Some(self.etag.clone()),
        }
    }
}

#[derive(Debug)]
struct PendingUpload {
    bucket: String,
    key: String,
    parts: BTreeMap<i32, Bytes>,
}

/// Request counters, mostly for asserting cache behavior
#[derive(Debug, Default)]
pub struct RequestCounters {
    pub list: AtomicU64,
    pub head: AtomicU64,
    pub get: AtomicU64,
    pub put: AtomicU64,
}

impl RequestCounters {
    pub fn list(&self) -> u64 {
        self.list.load(Ordering::SeqCst)
    }

    pub fn head(&self) -> u64 {
        self.head.load(Ordering::SeqCst)
    }

    pub fn get(&self) -> u64 {
        self.get.load(Ordering::SeqCst)
    }

    pub fn put(&self) -> u64 {
        self.put.load(Ordering::SeqCst)
    }
}

type Bucket = BTreeMap<String, StoredObject>;

/// Object store held in process memory
pub struct MemoryClient {
    name: String,
    buckets: RwLock<BTreeMap<String, Bucket>>,
    uploads: DashMap<String, PendingUpload>,
    next_upload_id: AtomicU64,
    min_part_size: u64,
    requests: RequestCounters,
    failing_part_uploads: AtomicU64,
}

impl MemoryClient {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            buckets: RwLock::new(BTreeMap::new()),
            uploads: DashMap::new(),
            next_upload_id: AtomicU64::new(1),
            min_part_size: 1,
            requests: RequestCounters::default(),
            failing_part_uploads: AtomicU64::new(0),
        }
    }

    /// Require non-final multipart parts to be at least this large
    pub fn with_min_part_size(mut self, min_part_size: u64) -> Self {
        self.min_part_size = min_part_size;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn requests(&self) -> &RequestCounters {
        &self.requests
    }

    /// Make the next `count` part uploads fail with a backend error
    pub fn fail_part_uploads(&self, count: u64) {
        self.failing_part_uploads.store(count, Ordering::SeqCst);
    }

    /// Number of multipart uploads started but neither completed nor aborted
    pub fn pending_uploads(&self) -> usize {
        self.uploads.len()
    }

    fn no_such_bucket(bucket: &str) -> OssfsError {
        OssfsError::NotFound(format!("No such bucket: {}", bucket))
    }

    fn no_such_key(bucket: &str, key: &str) -> OssfsError {
        OssfsError::NotFound(format!("No such key: {}/{}", bucket, key))
    }

    fn store(&self, bucket: &str, key: &str, data: Bytes) -> Result<()> {
        let mut buckets = self.buckets.write();
        let objects = buckets
            .get_mut(bucket)
            .ok_or_else(|| Self::no_such_bucket(bucket))?;
        objects.insert(key.to_string(), StoredObject::new(data));
        Ok(())
    }

    fn load(&self, bucket: &str, key: &str) -> Result<StoredObject> {
        let buckets = self.buckets.read();
        let objects = buckets
            .get(bucket)
            .ok_or_else(|| Self::no_such_bucket(bucket))?;
        objects
            .get(key)
            .cloned()
            .ok_or_else(|| Self::no_such_key(bucket, key))
    }

    fn upload(&self, upload_id: &str, bucket: &str, key: &str) -> Result<()> {
        match self.uploads.get(upload_id) {
            Some(upload) if upload.bucket == bucket && upload.key == key => Ok(()),
            _ => Err(OssfsError::NotFound(format!(
                "No such upload: {} for {}/{}",
                upload_id, bucket, key
            ))),
        }
    }
}

#[async_trait]
impl ObjectClient for MemoryClient {
    fn min_part_size(&self) -> u64 {
        self.min_part_size
    }

    async fn list_buckets(&self) -> Result<Vec<String>> {
        self.requests.list.fetch_add(1, Ordering::SeqCst);
        Ok(self.buckets.read().keys().cloned().collect())
    }

    async fn create_bucket(&self, bucket: &str) -> Result<()> {
        debug!("memory '{}': create bucket {}", self.name, bucket);
        self.buckets
            .write()
            .entry(bucket.to_string())
            .or_default();
        Ok(())
    }

    fn list(&self, bucket: &str, prefix: &str, recursive: bool) -> ListStream {
        self.requests.list.fetch_add(1, Ordering::SeqCst);
        trace!(
            "memory '{}': list bucket={} prefix={} recursive={}",
            self.name,
            bucket,
            prefix,
            recursive
        );

        let buckets = self.buckets.read();
        let entries: Vec<Result<ListEntry>> = match buckets.get(bucket) {
            None => vec![Err(Self::no_such_bucket(bucket))],
            Some(objects) => {
                let mut files = Vec::new();
                let mut prefixes = BTreeSet::new();

                for (key, object) in objects.range(prefix.to_string()..) {
                    let Some(rest) = key.strip_prefix(prefix) else {
                        break;
                    };
                    match rest.find('/') {
                        Some(pos) if !recursive => {
                            prefixes.insert(format!("{}{}", prefix, &rest[..=pos]));
                        }
                        _ => files.push(object.meta(key)),
                    }
                }

                files
                    .into_iter()
                    .map(|meta| Ok(ListEntry::Object(meta)))
                    .chain(prefixes.into_iter().map(|p| Ok(ListEntry::Prefix(p))))
                    .collect()
            }
        };

        Box::pin(futures::stream::iter(entries))
    }

    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectMeta> {
        self.requests.head.fetch_add(1, Ordering::SeqCst);
        Ok(self.load(bucket, key)?.meta(key))
    }

    async fn get_range(&self, bucket: &str, key: &str, start: u64, end: u64) -> Result<Bytes> {
        self.requests.get.fetch_add(1, Ordering::SeqCst);
        let object = self.load(bucket, key)?;
        let len = object.data.len() as u64;
        let end = end.min(len);
        let start = start.min(end);
        Ok(object.data.slice(start as usize..end as usize))
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes> {
        self.requests.get.fetch_add(1, Ordering::SeqCst);
        Ok(self.load(bucket, key)?.data)
    }

    async fn put_object(&self, bucket: &str, key: &str, data: Bytes) -> Result<()> {
        self.requests.put.fetch_add(1, Ordering::SeqCst);
        debug!(
            "memory '{}': put {}/{} ({} bytes)",
            self.name,
            bucket,
            key,
            data.len()
        );
        self.store(bucket, key, data)
    }

    async fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> Result<()> {
        let object = self.load(src_bucket, src_key)?;
        self.store(dst_bucket, dst_key, object.data)
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        let mut buckets = self.buckets.write();
        let objects = buckets
            .get_mut(bucket)
            .ok_or_else(|| Self::no_such_bucket(bucket))?;
        objects.remove(key);
        Ok(())
    }

    async fn create_multipart_upload(&self, bucket: &str, key: &str) -> Result<String> {
        if !self.buckets.read().contains_key(bucket) {
            return Err(Self::no_such_bucket(bucket));
        }
        let upload_id = format!(
            "{}-{}",
            self.name,
            self.next_upload_id.fetch_add(1, Ordering::SeqCst)
        );
        self.uploads.insert(
            upload_id.clone(),
            PendingUpload {
                bucket: bucket.to_string(),
                key: key.to_string(),
                parts: BTreeMap::new(),
            },
        );
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        data: Bytes,
    ) -> Result<CompletedPart> {
        self.upload(upload_id, bucket, key)?;
        self.requests.put.fetch_add(1, Ordering::SeqCst);
        if self
            .failing_part_uploads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(OssfsError::Backend(format!(
                "part {} of upload {} rejected",
                part_number, upload_id
            )));
        }
        let etag = StoredObject::new(data.clone()).etag;
        if let Some(mut upload) = self.uploads.get_mut(upload_id) {
            upload.parts.insert(part_number, data);
        }
        Ok(CompletedPart { part_number, etag })
    }

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> Result<()> {
        self.upload(upload_id, bucket, key)?;

        let mut assembled = BytesMut::new();
        {
            let upload = self
                .uploads
                .get(upload_id)
                .ok_or_else(|| Self::no_such_key(bucket, key))?;
            let last = parts.len().saturating_sub(1);
            for (i, part) in parts.iter().enumerate() {
                let data = upload.parts.get(&part.part_number).ok_or_else(|| {
                    OssfsError::Backend(format!(
                        "InvalidPart: part {} was never uploaded",
                        part.part_number
                    ))
                })?;
                if i < last && (data.len() as u64) < self.min_part_size {
                    return Err(OssfsError::Backend(format!(
                        "EntityTooSmall: part {} is {} bytes",
                        part.part_number,
                        data.len()
                    )));
                }
                assembled.extend_from_slice(data);
            }
        }

        self.uploads.remove(upload_id);
        self.store(bucket, key, assembled.freeze())
    }

    async fn abort_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<()> {
        self.upload(upload_id, bucket, key)?;
        self.uploads.remove(upload_id);
        Ok(())
    }
}
