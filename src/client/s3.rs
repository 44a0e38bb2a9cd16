//! OSS client over the S3-compatible API
//!
//! OSS speaks the S3 protocol, so this is a thin layer over `aws-sdk-s3`. It
//! also works against MinIO and other S3-compatible servers when
//! `force_path_style` is set.
//!
//! The SDK client is built on, and every request runs on, the crate's IO
//! runtime. Its connection pool therefore stays usable when a caller's own
//! runtime shuts down, which matters because clients are cached process-wide.

use async_stream::try_stream;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::ProvideErrorMetadata;
use aws_sdk_s3::operation::get_object::builders::GetObjectFluentBuilder;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart as S3CompletedPart};
use aws_sdk_s3::Client;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::runtime::Handle;
use tracing::{debug, trace};

use super::{CompletedPart, ListEntry, ListStream, ObjectClient, ObjectMeta};
use crate::config::{OssConfig, FALLBACK_REGION};
use crate::error::{OssfsError, Result};
use crate::runtime::{drive, io_handle};

/// Error codes that mean the bucket or key does not exist
const NOT_FOUND_CODES: [&str; 3] = ["NoSuchKey", "NoSuchBucket", "NotFound"];

/// Client for OSS and S3-compatible object stores
pub struct S3Client {
    client: Client,
    handle: Handle,
}

impl S3Client {
    /// Build a client from a normalized config
    ///
    /// Static credentials from the config take precedence; without them the
    /// default AWS provider chain (environment, profile, instance metadata) is
    /// used.
    pub async fn new(config: &OssConfig) -> Result<Self> {
        let handle = io_handle()?;
        let client = drive(&handle, Self::build(config.clone())).await?;
        Ok(Self { client, handle })
    }

    async fn build(config: OssConfig) -> Client {
        let region = config
            .region
            .clone()
            .unwrap_or_else(|| FALLBACK_REGION.to_string());

        let mut sdk_config_builder =
            aws_config::defaults(BehaviorVersion::latest()).region(Region::new(region));

        if let (Some(key), Some(secret)) = (&config.key, &config.secret) {
            let credentials = Credentials::new(
                key.clone(),
                secret.clone(),
                config.token.clone(),
                None,
                "ossfs-config",
            );
            sdk_config_builder = sdk_config_builder.credentials_provider(credentials);
        }

        let sdk_config = sdk_config_builder.load().await;

        let mut s3_config_builder = aws_sdk_s3::config::Builder::from(&sdk_config)
            .endpoint_url(&config.endpoint);

        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        Client::from_conf(s3_config_builder.build())
    }

    /// Wrap an already configured SDK client
    pub fn from_client(client: Client) -> Result<Self> {
        Ok(Self {
            client,
            handle: io_handle()?,
        })
    }

    /// Send a GetObject request and collect its body on the IO runtime
    async fn get(&self, request: GetObjectFluentBuilder, bucket: &str, key: &str) -> Result<Bytes> {
        let result = drive(&self.handle, request.send()).await?.map_err(|e| {
            let service_error = e.into_service_error();
            if service_error.is_no_such_key() {
                OssfsError::NotFound(target(bucket, key))
            } else {
                classify("GetObject", &target(bucket, key), service_error)
            }
        })?;

        let body = drive(&self.handle, result.body.collect())
            .await?
            .map_err(|e| OssfsError::Backend(format!("S3 read body error: {}", e)))?;

        Ok(body.into_bytes())
    }
}

/// Map a service error to `NotFound` or `Backend`
fn classify<E>(operation: &str, target: &str, err: E) -> OssfsError
where
    E: ProvideErrorMetadata + std::fmt::Display,
{
    match err.code() {
        Some(code) if NOT_FOUND_CODES.contains(&code) => {
            OssfsError::NotFound(format!("{}: {}", target, code))
        }
        _ => OssfsError::Backend(format!("S3 {} error for '{}': {}", operation, target, err)),
    }
}

fn to_chrono(dt: &aws_sdk_s3::primitives::DateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(dt.secs(), dt.subsec_nanos())
}

fn target(bucket: &str, key: &str) -> String {
    format!("{}/{}", bucket, key)
}

#[async_trait]
impl ObjectClient for S3Client {
    async fn list_buckets(&self) -> Result<Vec<String>> {
        trace!("list_buckets");
        let request = self.client.list_buckets();
        let output = drive(&self.handle, request.send())
            .await?
            .map_err(|e| classify("ListBuckets", "", e.into_service_error()))?;

        Ok(output
            .buckets()
            .iter()
            .filter_map(|b| b.name().map(str::to_string))
            .collect())
    }

    async fn create_bucket(&self, bucket: &str) -> Result<()> {
        debug!("create_bucket: {}", bucket);
        let request = self.client.create_bucket().bucket(bucket);
        drive(&self.handle, request.send())
            .await?
            .map_err(|e| classify("CreateBucket", bucket, e.into_service_error()))?;
        Ok(())
    }

    fn list(&self, bucket: &str, prefix: &str, recursive: bool) -> ListStream {
        let client = self.client.clone();
        let handle = self.handle.clone();
        let bucket = bucket.to_string();
        let prefix = prefix.to_string();

        Box::pin(try_stream! {
            let mut continuation_token: Option<String> = None;

            loop {
                let mut request = client
                    .list_objects_v2()
                    .bucket(&bucket)
                    .prefix(&prefix);

                if !recursive {
                    request = request.delimiter("/");
                }

                if let Some(token) = continuation_token.take() {
                    request = request.continuation_token(token);
                }

                trace!("list: bucket={} prefix={} recursive={}", bucket, prefix, recursive);
                let result = drive(&handle, request.send()).await?.map_err(|e| {
                    classify("ListObjectsV2", &target(&bucket, &prefix), e.into_service_error())
                })?;

                for obj in result.contents() {
                    if let Some(key) = obj.key() {
                        yield ListEntry::Object(ObjectMeta {
                            key: key.to_string(),
                            size: obj.size().unwrap_or(0).max(0) as u64,
                            last_modified: obj.last_modified().and_then(to_chrono),
                            etag: obj.e_tag().map(str::to_string),
                        });
                    }
                }

                for common_prefix in result.common_prefixes() {
                    if let Some(p) = common_prefix.prefix() {
                        yield ListEntry::Prefix(p.to_string());
                    }
                }

                if result.is_truncated().unwrap_or(false) {
                    continuation_token = result.next_continuation_token().map(|s| s.to_string());
                } else {
                    break;
                }
            }
        })
    }

    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectMeta> {
        trace!("head_object: {}/{}", bucket, key);
        let request = self.client.head_object().bucket(bucket).key(key);
        let output = drive(&self.handle, request.send()).await?.map_err(|e| {
            let service_error = e.into_service_error();
            if service_error.is_not_found() {
                OssfsError::NotFound(target(bucket, key))
            } else {
                classify("HeadObject", &target(bucket, key), service_error)
            }
        })?;

        Ok(ObjectMeta {
            key: key.to_string(),
            size: output.content_length().unwrap_or(0).max(0) as u64,
            last_modified: output.last_modified().and_then(to_chrono),
            etag: output.e_tag().map(str::to_string),
        })
    }

    async fn get_range(&self, bucket: &str, key: &str, start: u64, end: u64) -> Result<Bytes> {
        if start >= end {
            return Ok(Bytes::new());
        }
        trace!("get_range: {}/{} [{}, {})", bucket, key, start, end);

        let range = format!("bytes={}-{}", start, end - 1);
        let request = self.client.get_object().bucket(bucket).key(key).range(range);
        self.get(request, bucket, key).await
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes> {
        trace!("get_object: {}/{}", bucket, key);
        let request = self.client.get_object().bucket(bucket).key(key);
        self.get(request, bucket, key).await
    }

    async fn put_object(&self, bucket: &str, key: &str, data: Bytes) -> Result<()> {
        debug!("put_object: {}/{} ({} bytes)", bucket, key, data.len());
        let request = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(data));
        drive(&self.handle, request.send())
            .await?
            .map_err(|e| classify("PutObject", &target(bucket, key), e.into_service_error()))?;
        Ok(())
    }

    async fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> Result<()> {
        debug!(
            "copy_object: {}/{} -> {}/{}",
            src_bucket, src_key, dst_bucket, dst_key
        );
        let request = self
            .client
            .copy_object()
            .bucket(dst_bucket)
            .key(dst_key)
            .copy_source(target(src_bucket, src_key));
        drive(&self.handle, request.send()).await?.map_err(|e| {
            classify("CopyObject", &target(src_bucket, src_key), e.into_service_error())
        })?;
        Ok(())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        debug!("delete_object: {}/{}", bucket, key);
        let request = self.client.delete_object().bucket(bucket).key(key);
        drive(&self.handle, request.send())
            .await?
            .map_err(|e| classify("DeleteObject", &target(bucket, key), e.into_service_error()))?;
        Ok(())
    }

    async fn create_multipart_upload(&self, bucket: &str, key: &str) -> Result<String> {
        debug!("create_multipart_upload: {}/{}", bucket, key);
        let request = self.client.create_multipart_upload().bucket(bucket).key(key);
        let output = drive(&self.handle, request.send()).await?.map_err(|e| {
            classify(
                "CreateMultipartUpload",
                &target(bucket, key),
                e.into_service_error(),
            )
        })?;

        output.upload_id().map(str::to_string).ok_or_else(|| {
            OssfsError::Backend(format!(
                "S3 CreateMultipartUpload returned no upload id for '{}'",
                target(bucket, key)
            ))
        })
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        data: Bytes,
    ) -> Result<CompletedPart> {
        debug!(
            "upload_part: {}/{} part={} ({} bytes)",
            bucket,
            key,
            part_number,
            data.len()
        );
        let request = self
            .client
            .upload_part()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(ByteStream::from(data));
        let output = drive(&self.handle, request.send())
            .await?
            .map_err(|e| classify("UploadPart", &target(bucket, key), e.into_service_error()))?;

        let etag = output.e_tag().map(str::to_string).ok_or_else(|| {
            OssfsError::Backend(format!(
                "S3 UploadPart returned no ETag for part {} of '{}'",
                part_number,
                target(bucket, key)
            ))
        })?;

        Ok(CompletedPart { part_number, etag })
    }

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> Result<()> {
        debug!(
            "complete_multipart_upload: {}/{} ({} parts)",
            bucket,
            key,
            parts.len()
        );
        let parts = parts
            .into_iter()
            .map(|part| {
                S3CompletedPart::builder()
                    .part_number(part.part_number)
                    .e_tag(part.etag)
                    .build()
            })
            .collect();

        let request = self
            .client
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            );
        drive(&self.handle, request.send()).await?.map_err(|e| {
            classify(
                "CompleteMultipartUpload",
                &target(bucket, key),
                e.into_service_error(),
            )
        })?;
        Ok(())
    }

    async fn abort_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<()> {
        debug!("abort_multipart_upload: {}/{}", bucket, key);
        let request = self
            .client
            .abort_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id);
        drive(&self.handle, request.send()).await?.map_err(|e| {
            classify(
                "AbortMultipartUpload",
                &target(bucket, key),
                e.into_service_error(),
            )
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::thread;

    use tokio::runtime::Builder;

    use crate::config::OssConfig;
    use crate::filesystem::OssFileSystem;
    use crate::registry::testing::serial;

    const LIST_BUCKETS: &str = concat!(
        r#"<?xml version="1.0" encoding="UTF-8"?>"#,
        r#"<ListAllMyBucketsResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">"#,
        "<Owner><ID>owner</ID><DisplayName>owner</DisplayName></Owner>",
        "<Buckets><Bucket><Name>alpha</Name>",
        "<CreationDate>2024-01-01T00:00:00.000Z</CreationDate></Bucket></Buckets>",
        "</ListAllMyBucketsResult>"
    );

    /// Keep-alive HTTP server answering every request with one bucket
    fn serve_bucket_listing() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            for stream in listener.incoming() {
                match stream {
                    Ok(stream) => {
                        thread::spawn(move || respond(stream));
                    }
                    Err(_) => break,
                }
            }
        });
        format!("http://{}", addr)
    }

    fn respond(mut stream: TcpStream) {
        let mut pending = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = match stream.read(&mut buf) {
                Ok(0) | Err(_) => return,
                Ok(n) => n,
            };
            pending.extend_from_slice(&buf[..n]);
            while let Some(end) = pending.windows(4).position(|w| w == b"\r\n\r\n") {
                pending.drain(..end + 4);
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/xml\r\nContent-Length: {}\r\n\r\n{}",
                    LIST_BUCKETS.len(),
                    LIST_BUCKETS
                );
                if stream.write_all(response.as_bytes()).is_err() {
                    return;
                }
            }
        }
    }

    #[test]
    fn test_cached_client_outlives_caller_runtime() {
        let _guard = serial();
        let config = OssConfig::new(serve_bucket_listing())
            .with_credentials("id", "secret")
            .with_force_path_style(true)
            .with_listings_cache(false, None)
            .with_skip_instance_cache(true);

        // The client gets built and cached while this runtime is alive
        let first = Builder::new_current_thread().enable_all().build().unwrap();
        let listed = first
            .block_on(async { OssFileSystem::new(config.clone())?.ls("").await })
            .unwrap();
        assert_eq!(listed, vec!["alpha"]);
        drop(first);

        let second = Builder::new_current_thread().enable_all().build().unwrap();
        let again = second
            .block_on(async { OssFileSystem::new(config.clone())?.ls("").await })
            .unwrap();
        assert_eq!(again, listed);
        drop(second);

        let fs = crate::blocking::OssFileSystem::new(config).unwrap();
        assert_eq!(fs.ls("").unwrap(), listed);
        OssFileSystem::clear_current();
    }
}
