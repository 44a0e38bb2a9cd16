//! MinIO server for e2e tests
//!
//! MinIO speaks the same S3-compatible protocol ossfs uses against OSS, so the
//! suite runs unchanged against either. A container is started through the
//! Docker API unless `MINIO_ENDPOINT` points at a running server.

use std::collections::HashMap;
use std::env;
use std::time::Duration;

use anyhow::{Context, Result};
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::Client as S3Client;
use bollard::container::{Config, CreateContainerOptions, StartContainerOptions};
use bollard::image::CreateImageOptions;
use bollard::models::{HostConfig, PortBinding};
use bollard::Docker;
use futures::StreamExt;
use ossfs::OssConfig;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use uuid::Uuid;

const MINIO_IMAGE: &str = "minio/minio:latest";
const MINIO_CONTAINER_NAME: &str = "ossfs-e2e-minio";
const DEFAULT_ACCESS_KEY: &str = "minioadmin";
const DEFAULT_SECRET_KEY: &str = "minioadmin";
const DEFAULT_PORT: u16 = 9000;
const READY_ATTEMPTS: u32 = 30;

/// A reachable MinIO server
pub struct MinioServer {
    endpoint: String,
    access_key: String,
    secret_key: String,
    s3_client: S3Client,
}

impl MinioServer {
    /// Connect to `MINIO_ENDPOINT`, or start (or reuse) a local container
    ///
    /// `MINIO_ACCESS_KEY` / `MINIO_SECRET_KEY` override the default
    /// `minioadmin` credentials. Containers are left running so later runs
    /// start quickly.
    pub async fn start() -> Result<Self> {
        let access_key =
            env::var("MINIO_ACCESS_KEY").unwrap_or_else(|_| DEFAULT_ACCESS_KEY.to_string());
        let secret_key =
            env::var("MINIO_SECRET_KEY").unwrap_or_else(|_| DEFAULT_SECRET_KEY.to_string());

        let endpoint = match env::var("MINIO_ENDPOINT") {
            Ok(endpoint) => {
                info!("Using existing MinIO at {}", endpoint);
                endpoint
            }
            Err(_) => Self::ensure_container(&access_key, &secret_key).await?,
        };

        let credentials = Credentials::new(&access_key, &secret_key, None, None, "ossfs-e2e");
        let config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("us-east-1"))
            .endpoint_url(&endpoint)
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();
        let s3_client = S3Client::from_conf(config);

        Self::wait_until_ready(&s3_client).await?;

        Ok(Self {
            endpoint,
            access_key,
            secret_key,
            s3_client,
        })
    }

    async fn ensure_container(access_key: &str, secret_key: &str) -> Result<String> {
        let docker = Docker::connect_with_local_defaults()
            .context("Failed to connect to Docker. Is Docker running?")?;

        let containers = docker
            .list_containers::<String>(None)
            .await
            .context("Failed to list containers")?;
        let existing = containers.iter().find(|c| {
            c.names
                .as_ref()
                .is_some_and(|names| names.iter().any(|n| n.contains(MINIO_CONTAINER_NAME)))
        });

        if let Some(container) = existing {
            let id = container.id.clone().unwrap_or_default();
            let running = docker
                .inspect_container(&id, None)
                .await?
                .state
                .and_then(|s| s.running)
                .unwrap_or(false);
            if !running {
                info!("Starting stopped MinIO container {}", id);
                docker
                    .start_container(&id, None::<StartContainerOptions<String>>)
                    .await?;
            }
            return Ok(format!("http://localhost:{}", DEFAULT_PORT));
        }

        info!("Pulling {}", MINIO_IMAGE);
        let mut pull = docker.create_image(
            Some(CreateImageOptions {
                from_image: MINIO_IMAGE,
                ..Default::default()
            }),
            None,
            None,
        );
        while let Some(progress) = pull.next().await {
            if let Err(e) = progress {
                warn!("Image pull warning: {}", e);
            }
        }

        let port_bindings = HashMap::from([(
            "9000/tcp".to_string(),
            Some(vec![PortBinding {
                host_ip: Some("0.0.0.0".to_string()),
                host_port: Some(DEFAULT_PORT.to_string()),
            }]),
        )]);
        let root_user = format!("MINIO_ROOT_USER={}", access_key);
        let root_password = format!("MINIO_ROOT_PASSWORD={}", secret_key);

        let container = docker
            .create_container(
                Some(CreateContainerOptions {
                    name: MINIO_CONTAINER_NAME,
                    platform: None,
                }),
                Config {
                    image: Some(MINIO_IMAGE),
                    env: Some(vec![root_user.as_str(), root_password.as_str()]),
                    cmd: Some(vec!["server", "/data"]),
                    host_config: Some(HostConfig {
                        port_bindings: Some(port_bindings),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
            )
            .await
            .context("Failed to create MinIO container")?;

        docker
            .start_container(&container.id, None::<StartContainerOptions<String>>)
            .await
            .context("Failed to start MinIO container")?;
        info!("MinIO container started: {}", container.id);

        Ok(format!("http://localhost:{}", DEFAULT_PORT))
    }

    async fn wait_until_ready(client: &S3Client) -> Result<()> {
        for attempt in 1..=READY_ATTEMPTS {
            match client.list_buckets().send().await {
                Ok(_) => return Ok(()),
                Err(e) if attempt == READY_ATTEMPTS => {
                    return Err(anyhow::anyhow!(
                        "MinIO not ready after {} attempts: {}",
                        READY_ATTEMPTS,
                        e
                    ))
                }
                Err(e) => {
                    debug!("MinIO not ready yet (attempt {}): {}", attempt, e);
                    sleep(Duration::from_secs(1)).await;
                }
            }
        }
        Ok(())
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn access_key(&self) -> &str {
        &self.access_key
    }

    pub fn secret_key(&self) -> &str {
        &self.secret_key
    }

    /// ossfs configuration pointing at this server
    pub fn oss_config(&self) -> OssConfig {
        OssConfig::new(&self.endpoint)
            .with_credentials(&self.access_key, &self.secret_key)
            .with_region("us-east-1")
            .with_force_path_style(true)
    }

    /// Create an empty bucket with a unique name
    pub async fn create_bucket(&self, prefix: &str) -> Result<TestBucket> {
        let name = format!("{}-{}", prefix, Uuid::new_v4());
        self.s3_client
            .create_bucket()
            .bucket(&name)
            .send()
            .await
            .context("Failed to create test bucket")?;
        debug!("Created test bucket {}", name);

        Ok(TestBucket {
            name,
            s3_client: self.s3_client.clone(),
        })
    }
}

/// A bucket owned by one test, inspected with a plain S3 client
pub struct TestBucket {
    name: String,
    s3_client: S3Client,
}

impl TestBucket {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// `bucket/rel`
    pub fn path(&self, rel: &str) -> String {
        format!("{}/{}", self.name, rel.trim_start_matches('/'))
    }

    /// Every key in the bucket
    pub async fn keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut pages = self
            .s3_client
            .list_objects_v2()
            .bucket(&self.name)
            .into_paginator()
            .send();
        while let Some(page) = pages.next().await {
            let page = page.context("Failed to list test bucket")?;
            keys.extend(page.contents().iter().filter_map(|o| o.key().map(str::to_string)));
        }
        Ok(keys)
    }

    /// Object content read without going through ossfs
    pub async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let response = self
            .s3_client
            .get_object()
            .bucket(&self.name)
            .key(key)
            .send()
            .await
            .with_context(|| format!("Failed to get {}", key))?;
        Ok(response.body.collect().await?.into_bytes().to_vec())
    }

    /// Delete every object, then the bucket
    pub async fn cleanup(self) -> Result<()> {
        for key in self.keys().await? {
            self.s3_client
                .delete_object()
                .bucket(&self.name)
                .key(&key)
                .send()
                .await
                .with_context(|| format!("Failed to delete {}", key))?;
        }
        self.s3_client
            .delete_bucket()
            .bucket(&self.name)
            .send()
            .await
            .context("Failed to delete test bucket")?;
        Ok(())
    }
}
