//! Filesystem operations against MinIO
//!
//! Each test owns a fresh bucket and removes it when done.

use anyhow::Result;
use ossfs::{CacheType, Config, ObjectKind, OpenMode, OssConfig, OssFileSystem};
use ossfs_e2e::{minio, random_bytes, run};
use test_case::test_case;

const MIB: usize = 1024 * 1024;

async fn write(fs: &OssFileSystem, path: &str, data: &[u8]) -> Result<()> {
    let mut file = fs.open(path, OpenMode::Write, None).await?;
    for chunk in data.chunks(MIB) {
        file.write(chunk).await?;
    }
    file.close().await?;
    Ok(())
}

#[test_case(CacheType::None ; "none")]
#[test_case(CacheType::Bytes ; "bytes")]
#[test_case(CacheType::ReadAhead ; "readahead")]
#[test_case(CacheType::All ; "all")]
fn test_default_cache_type(cache_type: CacheType) -> Result<()> {
    run(async {
        let server = minio().await;
        let bucket = server.create_bucket("ossfs-default-cache").await?;
        let fs = OssFileSystem::new(server.oss_config().with_default_cache_type(cache_type))?;

        let path = bucket.path("tmp/test/a");
        let data = random_bytes(10 * MIB);
        write(&fs, &path, &data).await?;

        let mut file = fs.open(&path, OpenMode::Read, None).await?;
        assert_eq!(file.cache_type(), Some(cache_type));
        assert!(file.read(data.len()).await?[..] == data[..]);
        file.close().await?;

        bucket.cleanup().await
    })
}

#[test_case(CacheType::None ; "none")]
#[test_case(CacheType::Bytes ; "bytes")]
#[test_case(CacheType::ReadAhead ; "readahead")]
#[test_case(CacheType::All ; "all")]
fn test_cache_type(cache_type: CacheType) -> Result<()> {
    run(async {
        let server = minio().await;
        let bucket = server.create_bucket("ossfs-cache").await?;
        let fs = OssFileSystem::new(server.oss_config())?;

        let path = bucket.path("tmp/test/a");
        let data = random_bytes(10 * MIB);
        write(&fs, &path, &data).await?;

        let mut file = fs.open(&path, OpenMode::Read, Some(cache_type)).await?;
        assert_eq!(file.cache_type(), Some(cache_type));
        assert!(file.read(data.len()).await?[..] == data[..]);
        assert!(file.read(1).await.is_err());

        bucket.cleanup().await
    })
}

#[test]
fn test_multipart_upload_lands_on_close() -> Result<()> {
    run(async {
        let server = minio().await;
        let bucket = server.create_bucket("ossfs-multipart").await?;
        let fs = OssFileSystem::new(server.oss_config())?;

        let data = random_bytes(12 * MIB + 3);
        let mut file = fs.open(&bucket.path("big"), OpenMode::Write, None).await?;
        file.write(&data).await?;
        assert_eq!(file.parts_uploaded(), 2);
        assert!(bucket.keys().await?.is_empty());

        file.close().await?;
        assert_eq!(bucket.get("big").await?, data);

        bucket.cleanup().await
    })
}

#[test]
fn test_multiple_objects() -> Result<()> {
    run(async {
        let server = minio().await;
        let bucket = server.create_bucket("ossfs-multiple").await?;

        let first = OssFileSystem::new(server.oss_config())?;
        first.touch(&bucket.path("tmp/test/a")).await?;
        first.touch(&bucket.path("tmp/test/b")).await?;

        let second = OssFileSystem::new(server.oss_config().with_skip_instance_cache(true))?;
        let dir = bucket.path("tmp/test");
        assert_eq!(first.ls(&dir).await?, second.ls(&dir).await?);
        assert_eq!(first.ls(&dir).await?.len(), 2);

        bucket.cleanup().await
    })
}

#[test]
fn test_serialize_round_trip() -> Result<()> {
    run(async {
        let server = minio().await;
        let bucket = server.create_bucket("ossfs-pickle").await?;
        let fs = OssFileSystem::new(server.oss_config())?;
        fs.touch(&bucket.path("tmp/test/a")).await?;

        let dir = bucket.path("tmp/test");
        let expected = fs.ls(&dir).await?;

        let restored = OssFileSystem::from_json(&fs.to_json()?)?;
        assert_eq!(restored.ls(&dir).await?, expected);
        let again = OssFileSystem::from_json(&restored.to_json()?)?;
        assert_eq!(again.ls(&dir).await?, expected);

        bucket.cleanup().await
    })
}

#[test]
fn test_listing_and_metadata() -> Result<()> {
    run(async {
        let server = minio().await;
        let bucket = server.create_bucket("ossfs-listing").await?;
        let fs = OssFileSystem::new(server.oss_config())?;

        fs.pipe(&bucket.path("a"), &b"12345"[..]).await?;
        fs.touch(&bucket.path("dir/b")).await?;
        fs.touch(&bucket.path("dir/sub/c")).await?;
        fs.mkdir(&bucket.path("empty")).await?;

        assert_eq!(
            fs.ls(bucket.name()).await?,
            vec![bucket.path("a"), bucket.path("dir"), bucket.path("empty")]
        );
        assert!(fs.ls(&bucket.path("empty")).await?.is_empty());
        assert!(fs.ls("").await?.contains(&bucket.name().to_string()));

        let info = fs.info(&bucket.path("a")).await?;
        assert_eq!((info.kind, info.size), (ObjectKind::File, 5));
        assert_eq!(fs.info(&bucket.path("dir")).await?.kind, ObjectKind::Directory);
        assert_eq!(fs.info(bucket.name()).await?.kind, ObjectKind::Bucket);
        assert!(!fs.exists(&bucket.path("missing")).await?);

        assert_eq!(
            fs.find(&bucket.path("dir")).await?,
            vec![bucket.path("dir/b"), bucket.path("dir/sub/c")]
        );

        fs.copy(&bucket.path("a"), &bucket.path("dir/a-copy")).await?;
        assert_eq!(&fs.cat(&bucket.path("dir/a-copy")).await?[..], b"12345");
        assert_eq!(&fs.cat_range(&bucket.path("a"), 1, 3).await?[..], b"23");

        fs.rm(&bucket.path("dir"), true).await?;
        assert!(!fs.exists(&bucket.path("dir")).await?);

        bucket.cleanup().await
    })
}

#[test]
fn test_config_file() -> Result<()> {
    use std::io::Write;

    run(async {
        let server = minio().await;
        let bucket = server.create_bucket("ossfs-config").await?;

        std::env::set_var("OSSFS_E2E_SECRET", server.secret_key());
        let mut file = tempfile::NamedTempFile::new()?;
        write!(
            file,
            "logging:\n  level: debug\noss:\n  endpoint: {}\n  key: {}\n  secret: ${{OSSFS_E2E_SECRET}}\n  region: us-east-1\n  force_path_style: true\n  default_cache_type: bytes\n",
            server.endpoint(),
            server.access_key()
        )?;

        let config = Config::from_file(file.path())?;
        let fs = OssFileSystem::new(config.oss)?;
        assert_eq!(fs.default_cache_type(), CacheType::Bytes);
        fs.touch(&bucket.path("from-yaml")).await?;
        assert_eq!(bucket.keys().await?, vec!["from-yaml".to_string()]);

        // Same connection settings as the builder API, so the same client
        let direct: OssConfig = server.oss_config();
        assert_eq!(
            fs.config().connection_fingerprint(),
            direct.normalize()?.connection_fingerprint()
        );

        bucket.cleanup().await
    })
}
