//! ossfs: a filesystem interface over Alibaba Cloud OSS
//!
//! Buckets and objects on OSS (reached through its S3-compatible API) are
//! exposed as `bucket/key` paths with directory-style listings and file
//! handles whose reads go through a pluggable read cache.
//!
//! # Architecture
//!
//! - **Filesystem**: [`OssFileSystem`] implements the operations (`ls`,
//!   `open`, `info`, `cat`, `rm`, ...). Instances are keyed by a fingerprint
//!   of their configuration and cached process-wide; the most recently built
//!   one is the *current* instance.
//! - **Clients**: storage backends implementing [`client::ObjectClient`]: OSS
//!   via `aws-sdk-s3`, or an in-process store for `memory://` endpoints.
//!   Clients are shared by every instance with the same connection settings.
//! - **Read caches**: per-handle strategies selected by [`CacheType`]
//!   (`none`, `bytes`, `readahead`, `all`).
//! - **Blocking API**: [`blocking`] wraps everything for synchronous callers,
//!   with `std::io` traits on file handles.
//!
//! # Example
//!
//! ```no_run
//! use ossfs::{CacheType, OpenMode, OssConfig, OssFileSystem};
//!
//! # async fn example() -> ossfs::Result<()> {
//! let config = OssConfig::new("https://oss-cn-hangzhou.aliyuncs.com")
//!     .with_credentials("<access-key-id>", "<access-key-secret>")
//!     .with_default_cache_type(CacheType::Bytes);
//! let fs = OssFileSystem::new(config)?;
//!
//! let mut file = fs.open("my-bucket/data/a", OpenMode::Write, None).await?;
//! file.write(b"hello").await?;
//! file.close().await?;
//!
//! println!("{:?}", fs.ls("my-bucket/data").await?);
//! # Ok(())
//! # }
//! ```

pub mod blocking;
pub mod cache;
pub mod client;
pub mod config;
pub mod dircache;
pub mod env;
pub mod error;
pub mod file;
pub mod filesystem;
pub mod logging;
pub mod path;
pub mod registry;
mod runtime;

pub use cache::CacheType;
pub use config::{Config, OssConfig};
pub use error::{OssfsError, Result};
pub use file::{OpenMode, OssFile};
pub use filesystem::{ObjectInfo, ObjectKind, OssFileSystem};
