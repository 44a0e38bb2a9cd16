pub mod memory;
pub mod s3;

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::Stream;
use tracing::info;

use crate::config::{Endpoint, OssConfig};
use crate::error::Result;

pub use self::memory::MemoryClient;
pub use self::s3::S3Client;

/// Smallest non-final multipart part accepted by OSS and S3 (5 MiB)
pub const DEFAULT_MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

/// Object metadata from HEAD or listing calls
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    /// Object key within its bucket
    pub key: String,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
    pub etag: Option<String>,
}

/// One item of a listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListEntry {
    Object(ObjectMeta),
    /// Common prefix (a "directory"), including its trailing `/`
    Prefix(String),
}

/// A part accepted by `upload_part`, needed to complete the upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_number: i32,
    pub etag: String,
}

/// Stream type for object listings
pub type ListStream = Pin<Box<dyn Stream<Item = Result<ListEntry>> + Send>>;

/// Object storage backend
///
/// Clients are stateless with respect to the filesystem: every call names its
/// bucket and key. Missing buckets and keys are reported as `NotFound`; every
/// other backend failure is passed through as `Backend`.
#[async_trait]
pub trait ObjectClient: Send + Sync {
    /// Minimum size of a non-final multipart part
    fn min_part_size(&self) -> u64 {
        DEFAULT_MIN_PART_SIZE
    }

    /// Names of all buckets visible to the credentials
    async fn list_buckets(&self) -> Result<Vec<String>>;

    /// Create a bucket
    async fn create_bucket(&self, bucket: &str) -> Result<()>;

    /// List keys under `prefix`
    ///
    /// With `recursive == false` keys are grouped at the next `/` and returned
    /// as `ListEntry::Prefix`.
    fn list(&self, bucket: &str, prefix: &str, recursive: bool) -> ListStream;

    /// Metadata of one object
    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectMeta>;

    /// Bytes `[start, end)` of an object
    async fn get_range(&self, bucket: &str, key: &str, start: u64, end: u64) -> Result<Bytes>;

    /// Whole object
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes>;

    /// Create or replace an object
    async fn put_object(&self, bucket: &str, key: &str, data: Bytes) -> Result<()>;

    /// Server-side copy
    async fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> Result<()>;

    /// Delete an object; deleting a missing key is not an error
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()>;

    /// Start a multipart upload, returning its upload id
    async fn create_multipart_upload(&self, bucket: &str, key: &str) -> Result<String>;

    /// Upload one part (numbered from 1)
    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        data: Bytes,
    ) -> Result<CompletedPart>;

    /// Assemble the uploaded parts into the final object
    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> Result<()>;

    /// Discard an unfinished multipart upload
    async fn abort_multipart_upload(&self, bucket: &str, key: &str, upload_id: &str)
        -> Result<()>;
}

/// Build the client a normalized config points at
pub async fn connect(config: &OssConfig) -> Result<Arc<dyn ObjectClient>> {
    match config.parse_endpoint()? {
        Endpoint::Memory { name } => {
            info!("Using in-memory object store '{}'", name);
            Ok(Arc::new(MemoryClient::new(name)))
        }
        Endpoint::Remote { url, .. } => {
            info!("Connecting to {}", url);
            Ok(Arc::new(S3Client::new(config).await?))
        }
    }
}
