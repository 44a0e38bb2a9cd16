//! File handles
//!
//! An [`OssFile`] is bound to one object and opened either for reading or for
//! writing. Read handles go through the read cache chosen at open time. Write
//! handles buffer data and switch to a multipart upload once the buffer holds
//! a full part; nothing is visible remotely until [`OssFile::close`].

use std::fmt;
use std::io::SeekFrom;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tracing::{debug, error, trace, warn};

use crate::cache::{CacheStats, CacheType, RangeFetcher, ReadCache};
use crate::client::{CompletedPart, ObjectClient};
use crate::dircache::DirCache;
use crate::error::{OssfsError, Result};
use crate::path;

/// How a handle was opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    Write,
}

impl OpenMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpenMode::Read => "rb",
            OpenMode::Write => "wb",
        }
    }
}

impl fmt::Display for OpenMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OpenMode {
    type Err = OssfsError;

    /// Accepts `r`, `rb`, `w` and `wb`
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "r" | "rb" => Ok(OpenMode::Read),
            "w" | "wb" => Ok(OpenMode::Write),
            other => Err(OssfsError::InvalidMode(format!(
                "unsupported open mode '{}' (expected rb or wb)",
                other
            ))),
        }
    }
}

/// Range requests against one object
struct ObjectFetcher {
    client: Arc<dyn ObjectClient>,
    bucket: String,
    key: String,
}

#[async_trait]
impl RangeFetcher for ObjectFetcher {
    async fn fetch(&self, start: u64, end: u64) -> Result<Bytes> {
        trace!("fetch {}/{} [{}, {})", self.bucket, self.key, start, end);
        self.client
            .get_range(&self.bucket, &self.key, start, end)
            .await
    }
}

struct Reader {
    fetcher: ObjectFetcher,
    cache: Box<dyn ReadCache>,
    pos: u64,
    size: u64,
}

struct Writer {
    client: Arc<dyn ObjectClient>,
    dircache: Arc<DirCache>,
    part_size: usize,
    buffer: BytesMut,
    upload_id: Option<String>,
    parts: Vec<CompletedPart>,
    written: u64,
    /// Set once a part upload fails; the handle can then only be aborted
    failed: Option<String>,
}

enum Handle {
    Reader(Reader),
    Writer(Writer),
}

/// Open file on object storage
pub struct OssFile {
    bucket: String,
    key: String,
    closed: bool,
    handle: Handle,
}

impl OssFile {
    pub(crate) fn reader(
        client: Arc<dyn ObjectClient>,
        bucket: String,
        key: String,
        size: u64,
        cache: Box<dyn ReadCache>,
    ) -> Self {
        debug!(
            "open {}/{} for reading ({} bytes, cache={})",
            bucket,
            key,
            size,
            cache.cache_type()
        );
        Self {
            handle: Handle::Reader(Reader {
                fetcher: ObjectFetcher {
                    client,
                    bucket: bucket.clone(),
                    key: key.clone(),
                },
                cache,
                pos: 0,
                size,
            }),
            bucket,
            key,
            closed: false,
        }
    }

    pub(crate) fn writer(
        client: Arc<dyn ObjectClient>,
        dircache: Arc<DirCache>,
        bucket: String,
        key: String,
        block_size: u64,
    ) -> Self {
        let part_size = block_size.max(client.min_part_size()) as usize;
        debug!(
            "open {}/{} for writing (part size {})",
            bucket, key, part_size
        );
        Self {
            handle: Handle::Writer(Writer {
                client,
                dircache,
                part_size,
                buffer: BytesMut::new(),
                upload_id: None,
                parts: Vec::new(),
                written: 0,
                failed: None,
            }),
            bucket,
            key,
            closed: false,
        }
    }

    /// `bucket/key` this handle is bound to
    pub fn path(&self) -> String {
        path::join(&self.bucket, &self.key)
    }

    pub fn mode(&self) -> OpenMode {
        match self.handle {
            Handle::Reader(_) => OpenMode::Read,
            Handle::Writer(_) => OpenMode::Write,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Object size for read handles, bytes written so far for write handles
    pub fn size(&self) -> u64 {
        match &self.handle {
            Handle::Reader(r) => r.size,
            Handle::Writer(w) => w.written,
        }
    }

    /// Read cache strategy, fixed at open; `None` for write handles
    pub fn cache_type(&self) -> Option<CacheType> {
        match &self.handle {
            Handle::Reader(r) => Some(r.cache.cache_type()),
            Handle::Writer(_) => None,
        }
    }

    pub fn cache_stats(&self) -> Option<CacheStats> {
        match &self.handle {
            Handle::Reader(r) => Some(r.cache.stats()),
            Handle::Writer(_) => None,
        }
    }

    /// Number of multipart parts sent so far
    pub fn parts_uploaded(&self) -> usize {
        match &self.handle {
            Handle::Reader(_) => 0,
            Handle::Writer(w) => w.parts.len(),
        }
    }

    fn reader_mut(&mut self) -> Result<&mut Reader> {
        if self.closed {
            return Err(OssfsError::Closed);
        }
        match &mut self.handle {
            Handle::Reader(r) => Ok(r),
            Handle::Writer(_) => Err(OssfsError::InvalidMode(
                "file not open for reading".to_string(),
            )),
        }
    }

    fn writer_mut(&mut self) -> Result<&mut Writer> {
        if self.closed {
            return Err(OssfsError::Closed);
        }
        match &mut self.handle {
            Handle::Writer(w) => Ok(w),
            Handle::Reader(_) => Err(OssfsError::InvalidMode(
                "file not open for writing".to_string(),
            )),
        }
    }

    /// Read exactly `n` bytes
    ///
    /// Fails with `ReadPastEnd` (and leaves the position unchanged) when fewer
    /// than `n` bytes remain.
    pub async fn read(&mut self, n: usize) -> Result<Bytes> {
        let reader = self.reader_mut()?;
        let available = reader.size.saturating_sub(reader.pos);
        if n as u64 > available {
            return Err(OssfsError::ReadPastEnd {
                requested: n as u64,
                available,
            });
        }
        reader.read(n as u64).await
    }

    /// Read up to `n` bytes; returns fewer at the end of the object
    pub async fn read_some(&mut self, n: usize) -> Result<Bytes> {
        let reader = self.reader_mut()?;
        let n = (n as u64).min(reader.size.saturating_sub(reader.pos));
        reader.read(n).await
    }

    /// Read from the current position to the end of the object
    pub async fn read_to_end(&mut self) -> Result<Bytes> {
        let reader = self.reader_mut()?;
        let n = reader.size.saturating_sub(reader.pos);
        reader.read(n).await
    }

    /// Move the read position; positions past the end are allowed
    ///
    /// Write handles only accept seeks that land on the current position.
    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        if self.closed {
            return Err(OssfsError::Closed);
        }
        let (current, end) = match &self.handle {
            Handle::Reader(r) => (r.pos, r.size),
            Handle::Writer(w) => (w.written, w.written),
        };

        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(delta) => current.checked_add_signed(delta),
            SeekFrom::End(delta) => end.checked_add_signed(delta),
        }
        .ok_or_else(|| {
            OssfsError::InvalidArgument(format!("invalid seek to {:?} from {}", pos, current))
        })?;

        match &mut self.handle {
            Handle::Reader(r) => r.pos = target,
            Handle::Writer(_) if target != current => {
                return Err(OssfsError::InvalidMode(
                    "write handles cannot seek".to_string(),
                ))
            }
            Handle::Writer(_) => {}
        }
        Ok(target)
    }

    /// Current position
    pub fn tell(&self) -> u64 {
        match &self.handle {
            Handle::Reader(r) => r.pos,
            Handle::Writer(w) => w.written,
        }
    }

    /// Buffer `data`, sending full parts as they accumulate
    ///
    /// If sending a part fails the handle stops accepting data, and `close`
    /// aborts the upload instead of committing a partial object.
    pub async fn write(&mut self, data: &[u8]) -> Result<usize> {
        let (bucket, key) = (self.bucket.clone(), self.key.clone());
        let writer = self.writer_mut()?;
        writer.check(&bucket, &key)?;
        writer.buffer.extend_from_slice(data);
        writer.written += data.len() as u64;
        writer.upload_full_parts(&bucket, &key).await?;
        Ok(data.len())
    }

    /// Send any full parts; the tail stays buffered until close
    pub async fn flush(&mut self) -> Result<()> {
        if self.closed {
            return Err(OssfsError::Closed);
        }
        let (bucket, key) = (self.bucket.clone(), self.key.clone());
        if let Handle::Writer(writer) = &mut self.handle {
            writer.check(&bucket, &key)?;
            writer.upload_full_parts(&bucket, &key).await?;
        }
        Ok(())
    }

    /// Finish the handle
    ///
    /// For write handles this commits the object: the buffered tail is sent
    /// and the multipart upload completed, or the whole buffer is stored with
    /// one PUT if it never reached a full part. A failed commit aborts the
    /// multipart upload, and so does closing a handle whose earlier part
    /// upload failed. The handle is closed afterwards either way, and closing
    /// twice is a no-op.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let (bucket, key) = (self.bucket.clone(), self.key.clone());
        match &mut self.handle {
            Handle::Reader(reader) => {
                trace!("close {}/{}: {:?}", bucket, key, reader.cache.stats());
                Ok(())
            }
            Handle::Writer(writer) => {
                let result = match writer.check(&bucket, &key) {
                    Ok(()) => writer.commit(&bucket, &key).await,
                    Err(e) => Err(e),
                };
                writer.dircache.invalidate(&path::join(&bucket, &key));
                if let Err(e) = &result {
                    error!("Failed to commit {}/{}: {}", bucket, key, e);
                    writer.abort(&bucket, &key).await;
                }
                result
            }
        }
    }
}

impl Reader {
    async fn read(&mut self, n: u64) -> Result<Bytes> {
        if n == 0 || self.pos >= self.size {
            return Ok(Bytes::new());
        }
        let data = self
            .cache
            .fetch(&self.fetcher, self.pos, self.pos + n)
            .await?;
        self.pos += data.len() as u64;
        Ok(data)
    }
}

impl Writer {
    fn check(&self, bucket: &str, key: &str) -> Result<()> {
        match &self.failed {
            Some(reason) => Err(OssfsError::Backend(format!(
                "upload of {}/{} abandoned after a failed part: {}",
                bucket, key, reason
            ))),
            None => Ok(()),
        }
    }

    async fn upload_full_parts(&mut self, bucket: &str, key: &str) -> Result<()> {
        while self.buffer.len() >= self.part_size {
            // Bytes leave the buffer only once the part is accepted
            let chunk = Bytes::copy_from_slice(&self.buffer[..self.part_size]);
            if let Err(e) = self.upload_part(bucket, key, chunk).await {
                self.failed = Some(e.to_string());
                return Err(e);
            }
            let _ = self.buffer.split_to(self.part_size);
        }
        Ok(())
    }

    async fn upload_part(&mut self, bucket: &str, key: &str, data: Bytes) -> Result<()> {
        let upload_id = match &self.upload_id {
            Some(id) => id.clone(),
            None => {
                let id = self.client.create_multipart_upload(bucket, key).await?;
                debug!("Started multipart upload {} for {}/{}", id, bucket, key);
                self.upload_id = Some(id.clone());
                id
            }
        };

        let part_number = self.parts.len() as i32 + 1;
        let part = self
            .client
            .upload_part(bucket, key, &upload_id, part_number, data)
            .await?;
        self.parts.push(part);
        Ok(())
    }

    async fn commit(&mut self, bucket: &str, key: &str) -> Result<()> {
        let tail = self.buffer.split().freeze();

        let Some(upload_id) = self.upload_id.clone() else {
            return self.client.put_object(bucket, key, tail).await;
        };

        if !tail.is_empty() {
            self.upload_part(bucket, key, tail).await?;
        }
        let parts = std::mem::take(&mut self.parts);
        debug!(
            "Completing multipart upload {} for {}/{} ({} parts)",
            upload_id,
            bucket,
            key,
            parts.len()
        );
        self.client
            .complete_multipart_upload(bucket, key, &upload_id, parts)
            .await?;
        self.upload_id = None;
        Ok(())
    }

    async fn abort(&mut self, bucket: &str, key: &str) {
        if let Some(upload_id) = self.upload_id.take() {
            if let Err(e) = self
                .client
                .abort_multipart_upload(bucket, key, &upload_id)
                .await
            {
                warn!(
                    "Failed to abort multipart upload {} for {}/{}: {}",
                    upload_id, bucket, key, e
                );
            }
        }
    }
}

impl Drop for OssFile {
    fn drop(&mut self) {
        if !self.closed && self.mode() == OpenMode::Write {
            warn!(
                "Write handle for {}/{} dropped without close; data was not committed",
                self.bucket, self.key
            );
        }
    }
}

impl fmt::Debug for OssFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OssFile")
            .field("path", &self.path())
            .field("mode", &self.mode())
            .field("closed", &self.closed)
            .field("pos", &self.tell())
            .finish()
    }
}
