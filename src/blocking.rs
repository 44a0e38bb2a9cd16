//! Synchronous API
//!
//! Wraps the async filesystem for callers without a runtime. Every call runs
//! on the crate's shared IO runtime and blocks the calling
//! thread until it finishes. Any number of threads may call in at
//! once.
//!
//! Do not use this module from inside an async runtime: calls made there fail
//! with `InvalidArgument` instead of deadlocking.

use std::future::Future;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tokio::runtime::Handle;
use tracing::{error, warn};

use crate::cache::{CacheStats, CacheType};
use crate::config::{Fingerprint, OssConfig};
use crate::error::{OssfsError, Result};
use crate::file::{OpenMode, OssFile};
use crate::filesystem::{ObjectInfo, OssFileSystem as AsyncFileSystem};
use crate::runtime::io_runtime;

/// Run `future` to completion on the IO runtime
fn block_on<F: Future>(future: F) -> Result<F::Output> {
    if Handle::try_current().is_ok() {
        return Err(OssfsError::InvalidArgument(
            "blocking ossfs API called from inside an async runtime".to_string(),
        ));
    }
    Ok(io_runtime()?.block_on(future))
}

/// Blocking handle to an [`AsyncFileSystem`]
#[derive(Debug, Clone)]
pub struct OssFileSystem {
    inner: Arc<AsyncFileSystem>,
}

impl OssFileSystem {
    /// See [`AsyncFileSystem::new`]
    pub fn new(config: OssConfig) -> Result<Self> {
        Ok(Self {
            inner: AsyncFileSystem::new(config)?,
        })
    }

    pub fn from_async(inner: Arc<AsyncFileSystem>) -> Self {
        Self { inner }
    }

    /// The current filesystem, if any
    pub fn current() -> Option<Self> {
        AsyncFileSystem::current().map(Self::from_async)
    }

    pub fn make_current(&self) {
        self.inner.make_current();
    }

    /// The async filesystem behind this handle
    pub fn as_async(&self) -> &Arc<AsyncFileSystem> {
        &self.inner
    }

    pub fn config(&self) -> &OssConfig {
        self.inner.config()
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        self.inner.fingerprint()
    }

    pub fn to_json(&self) -> Result<String> {
        self.inner.to_json()
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(Self {
            inner: AsyncFileSystem::from_json(json)?,
        })
    }

    pub fn invalidate_cache(&self, path: Option<&str>) {
        self.inner.invalidate_cache(path)
    }

    pub fn ls(&self, path: &str) -> Result<Vec<String>> {
        block_on(self.inner.ls(path))?
    }

    pub fn ls_detail(&self, path: &str) -> Result<Vec<ObjectInfo>> {
        block_on(self.inner.ls_detail(path))?
    }

    pub fn find(&self, path: &str) -> Result<Vec<String>> {
        block_on(self.inner.find(path))?
    }

    pub fn info(&self, path: &str) -> Result<ObjectInfo> {
        block_on(self.inner.info(path))?
    }

    pub fn exists(&self, path: &str) -> Result<bool> {
        block_on(self.inner.exists(path))?
    }

    pub fn isfile(&self, path: &str) -> Result<bool> {
        block_on(self.inner.isfile(path))?
    }

    pub fn isdir(&self, path: &str) -> Result<bool> {
        block_on(self.inner.isdir(path))?
    }

    /// Open a file; `mode` is `rb`/`r` or `wb`/`w`
    pub fn open(&self, path: &str, mode: &str, cache_type: Option<CacheType>) -> Result<File> {
        let mode: OpenMode = mode.parse()?;
        let inner = block_on(self.inner.open(path, mode, cache_type))??;
        Ok(File { inner })
    }

    pub fn cat(&self, path: &str) -> Result<Bytes> {
        block_on(self.inner.cat(path))?
    }

    pub fn cat_range(&self, path: &str, start: u64, end: u64) -> Result<Bytes> {
        block_on(self.inner.cat_range(path, start, end))?
    }

    pub fn pipe(&self, path: &str, data: impl Into<Bytes>) -> Result<()> {
        block_on(self.inner.pipe(path, data))?
    }

    pub fn touch(&self, path: &str) -> Result<()> {
        block_on(self.inner.touch(path))?
    }

    pub fn copy(&self, src: &str, dst: &str) -> Result<()> {
        block_on(self.inner.copy(src, dst))?
    }

    pub fn mkdir(&self, path: &str) -> Result<()> {
        block_on(self.inner.mkdir(path))?
    }

    pub fn rm_file(&self, path: &str) -> Result<()> {
        block_on(self.inner.rm_file(path))?
    }

    pub fn rm(&self, path: &str, recursive: bool) -> Result<()> {
        block_on(self.inner.rm(path, recursive))?
    }
}

impl Serialize for OssFileSystem {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.inner.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for OssFileSystem {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        Ok(Self {
            inner: Arc::new(AsyncFileSystem::deserialize(deserializer)?),
        })
    }
}

/// Blocking file handle
///
/// Implements `std::io::{Read, Write, Seek}`. Dropping an open handle closes
/// it, which commits pending writes; failures at that point are only logged,
/// so call [`File::close`] to see them.
#[derive(Debug)]
pub struct File {
    inner: OssFile,
}

impl File {
    pub fn path(&self) -> String {
        self.inner.path()
    }

    pub fn mode(&self) -> OpenMode {
        self.inner.mode()
    }

    pub fn size(&self) -> u64 {
        self.inner.size()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    pub fn cache_type(&self) -> Option<CacheType> {
        self.inner.cache_type()
    }

    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.inner.cache_stats()
    }

    /// Read exactly `n` bytes; fails with `ReadPastEnd` if fewer remain
    pub fn read_exact_bytes(&mut self, n: usize) -> Result<Bytes> {
        block_on(self.inner.read(n))?
    }

    /// Read the rest of the object
    pub fn read_all(&mut self) -> Result<Bytes> {
        block_on(self.inner.read_to_end())?
    }

    pub fn tell(&self) -> u64 {
        self.inner.tell()
    }

    pub fn close(&mut self) -> Result<()> {
        block_on(self.inner.close())?
    }
}

impl Read for File {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let data = block_on(self.inner.read_some(buf.len()))??;
        buf[..data.len()].copy_from_slice(&data);
        Ok(data.len())
    }
}

impl Write for File {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(block_on(self.inner.write(buf))??)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(block_on(self.inner.flush())??)
    }
}

impl Seek for File {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        Ok(self.inner.seek(pos)?)
    }
}

impl Drop for File {
    fn drop(&mut self) {
        if self.inner.is_closed() {
            return;
        }
        if Handle::try_current().is_ok() {
            warn!(
                "Cannot close {} from inside an async runtime; dropping it unclosed",
                self.inner.path()
            );
            return;
        }
        if let Err(e) = self.close() {
            error!("Failed to close {} on drop: {}", self.inner.path(), e);
        }
    }
}
