//! Current instance tracking
//!
//! Kept in its own test binary: the current instance is process-wide state.

use std::sync::Arc;

use anyhow::Result;
use ossfs::registry::registry;
use ossfs::OssFileSystem;
use ossfs_e2e::{minio, run};

#[test]
fn test_current() -> Result<()> {
    run(async {
        let server = minio().await;
        let bucket = server.create_bucket("ossfs-current").await?;

        registry().clear();
        assert!(OssFileSystem::current().is_none());

        let fs = OssFileSystem::new(server.oss_config())?;
        assert!(Arc::ptr_eq(&OssFileSystem::current().unwrap(), &fs));

        let other = OssFileSystem::new(server.oss_config().with_block_size(1024 * 1024))?;
        assert!(Arc::ptr_eq(&OssFileSystem::current().unwrap(), &other));

        fs.make_current();
        let current = OssFileSystem::current().unwrap();
        current.touch(&bucket.path("a")).await?;
        assert_eq!(fs.ls(bucket.name()).await?, vec![bucket.path("a")]);

        bucket.cleanup().await
    })
}
