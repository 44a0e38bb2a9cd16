//! Configuration parsing and structures

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::cache::CacheType;
use crate::env::substitute_env_vars;

/// Default block size for reads and multipart writes (5 MiB)
pub const DEFAULT_BLOCK_SIZE: u64 = 5 * 1024 * 1024;

/// Region used for request signing when none can be derived from the endpoint
pub const FALLBACK_REGION: &str = "us-east-1";

static OSS_HOST_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:[a-z0-9-]+\.)?(oss-[a-z0-9-]+?)(?:-internal)?\.aliyuncs\.com$")
        .expect("valid OSS host pattern")
});

// =============================================================================
// File config
// =============================================================================

/// Top-level configuration file layout
///
/// ```yaml
/// logging:
///   level: debug
/// oss:
///   endpoint: https://oss-cn-hangzhou.aliyuncs.com
///   key: ${OSS_ACCESS_KEY_ID}
///   secret: ${OSS_SECRET_ACCESS_KEY}
///   default_cache_type: readahead
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Connection and filesystem options
    pub oss: OssConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(path.to_path_buf(), e.to_string()))?;

        Self::from_str(&content)
    }

    /// Parse configuration from a YAML string, expanding `${VAR}` references first
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let content = substitute_env_vars(content)?;
        let config: Config =
            serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.oss.validate()?;
        Ok(config)
    }
}

// =============================================================================
// OSS config
// =============================================================================

/// Options for one `OssFileSystem`
///
/// Two filesystems built from equal (normalized) configs share an instance and
/// a storage client.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OssConfig {
    /// `https://oss-cn-hangzhou.aliyuncs.com`, a bare host, or `memory://<name>`
    pub endpoint: String,

    /// AccessKey ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    /// AccessKey secret
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,

    /// STS security token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Signing region; derived from `oss-<region>.aliyuncs.com` hosts when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    /// Path-style addressing (MinIO and other S3-compatible test servers)
    #[serde(default)]
    pub force_path_style: bool,

    /// Read cache used by `open` when the caller does not pick one
    #[serde(default)]
    pub default_cache_type: CacheType,

    /// Read-ahead / multipart block size in bytes
    #[serde(default = "default_block_size")]
    pub default_block_size: u64,

    /// Cache directory listings per instance
    #[serde(default = "default_true")]
    pub use_listings_cache: bool,

    /// Lifetime of cached listings (e.g. "30s"); unset means until invalidated
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub listings_expiry_time: Option<Duration>,

    /// Always build a fresh instance instead of reusing a cached one
    #[serde(default)]
    pub skip_instance_cache: bool,
}

fn default_block_size() -> u64 {
    DEFAULT_BLOCK_SIZE
}

fn default_true() -> bool {
    true
}

impl fmt::Debug for OssConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OssConfig")
            .field("endpoint", &self.endpoint)
            .field("key", &self.key)
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("region", &self.region)
            .field("force_path_style", &self.force_path_style)
            .field("default_cache_type", &self.default_cache_type)
            .field("default_block_size", &self.default_block_size)
            .field("use_listings_cache", &self.use_listings_cache)
            .field("listings_expiry_time", &self.listings_expiry_time)
            .field("skip_instance_cache", &self.skip_instance_cache)
            .finish()
    }
}

/// Where an endpoint points
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// OSS (or another S3-compatible service) over HTTP(S)
    Remote { url: String, host: String },
    /// Process-local object store shared by every client with the same name
    Memory { name: String },
}

impl OssConfig {
    /// Config for `endpoint` with every other option at its default
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            key: None,
            secret: None,
            token: None,
            region: None,
            force_path_style: false,
            default_cache_type: CacheType::default(),
            default_block_size: DEFAULT_BLOCK_SIZE,
            use_listings_cache: true,
            listings_expiry_time: None,
            skip_instance_cache: false,
        }
    }

    pub fn with_credentials(mut self, key: impl Into<String>, secret: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self.secret = Some(secret.into());
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_force_path_style(mut self, force_path_style: bool) -> Self {
        self.force_path_style = force_path_style;
        self
    }

    pub fn with_default_cache_type(mut self, cache_type: CacheType) -> Self {
        self.default_cache_type = cache_type;
        self
    }

    pub fn with_block_size(mut self, block_size: u64) -> Self {
        self.default_block_size = block_size;
        self
    }

    pub fn with_listings_cache(mut self, enabled: bool, expiry: Option<Duration>) -> Self {
        self.use_listings_cache = enabled;
        self.listings_expiry_time = expiry;
        self
    }

    pub fn with_skip_instance_cache(mut self, skip: bool) -> Self {
        self.skip_instance_cache = skip;
        self
    }

    /// Parse the endpoint; bare hosts are treated as `https://`
    pub fn parse_endpoint(&self) -> Result<Endpoint, ConfigError> {
        let raw = self.endpoint.trim();
        if raw.is_empty() {
            return Err(ConfigError::ValidationError(
                "endpoint cannot be empty".to_string(),
            ));
        }
        if raw.chars().any(char::is_whitespace) {
            return Err(ConfigError::ValidationError(format!(
                "endpoint contains whitespace: {:?}",
                self.endpoint
            )));
        }

        let (scheme, rest) = match raw.split_once("://") {
            Some((scheme, rest)) => (scheme.to_ascii_lowercase(), rest),
            None => ("https".to_string(), raw),
        };

        match scheme.as_str() {
            "memory" => {
                let name = rest.trim_matches('/');
                Ok(Endpoint::Memory {
                    name: if name.is_empty() {
                        "default".to_string()
                    } else {
                        name.to_string()
                    },
                })
            }
            "http" | "https" => {
                let host = rest.split('/').next().unwrap_or_default();
                if host.is_empty() || host.starts_with(':') {
                    return Err(ConfigError::ValidationError(format!(
                        "endpoint has no host: {:?}",
                        self.endpoint
                    )));
                }
                Ok(Endpoint::Remote {
                    url: format!("{}://{}", scheme, host),
                    host: host.to_ascii_lowercase(),
                })
            }
            other => Err(ConfigError::ValidationError(format!(
                "unsupported endpoint scheme '{}' in {:?}",
                other, self.endpoint
            ))),
        }
    }

    /// Check endpoint, credentials and sizes without touching the network
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.parse_endpoint()?;

        match (&self.key, &self.secret) {
            (Some(_), None) => {
                return Err(ConfigError::ValidationError(
                    "access key given without a secret".to_string(),
                ))
            }
            (None, Some(_)) => {
                return Err(ConfigError::ValidationError(
                    "secret given without an access key".to_string(),
                ))
            }
            (Some(key), Some(secret)) => {
                if key.trim().is_empty() || secret.trim().is_empty() {
                    return Err(ConfigError::ValidationError(
                        "access key and secret cannot be empty".to_string(),
                    ));
                }
            }
            (None, None) => {}
        }

        if self.token.is_some() && self.key.is_none() {
            return Err(ConfigError::ValidationError(
                "security token given without an access key".to_string(),
            ));
        }

        if self.default_block_size == 0 {
            return Err(ConfigError::ValidationError(
                "default_block_size must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Validate and rewrite into canonical form: `scheme://host` endpoint and
    /// an explicit signing region for remote endpoints.
    pub fn normalize(mut self) -> Result<Self, ConfigError> {
        self.validate()?;
        match self.parse_endpoint()? {
            Endpoint::Memory { name } => {
                self.endpoint = format!("memory://{}", name);
            }
            Endpoint::Remote { url, host } => {
                if self.region.is_none() {
                    self.region = Some(region_from_host(&host));
                }
                self.endpoint = url;
            }
        }
        Ok(self)
    }

    /// Fingerprint of the whole configuration (instance identity)
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(self)
    }

    /// Fingerprint of the fields that determine the storage client
    pub fn connection_fingerprint(&self) -> Fingerprint {
        #[derive(Serialize)]
        struct ConnectionKey<'a> {
            endpoint: &'a str,
            key: Option<&'a str>,
            secret: Option<&'a str>,
            token: Option<&'a str>,
            region: Option<&'a str>,
            force_path_style: bool,
        }

        Fingerprint::of(&ConnectionKey {
            endpoint: &self.endpoint,
            key: self.key.as_deref(),
            secret: self.secret.as_deref(),
            token: self.token.as_deref(),
            region: self.region.as_deref(),
            force_path_style: self.force_path_style,
        })
    }
}

/// Signing region for an OSS host, e.g. `oss-cn-hangzhou.aliyuncs.com` -> `oss-cn-hangzhou`
pub fn region_from_host(host: &str) -> String {
    let host = host.split(':').next().unwrap_or(host);
    OSS_HOST_PATTERN
        .captures(host)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| FALLBACK_REGION.to_string())
}

/// Stable identity of a configuration: hex SHA-256 of its JSON encoding
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    fn of<T: Serialize>(value: &T) -> Self {
        // Struct fields serialize in declaration order, so the encoding is canonical.
        // Fingerprinted types hold only strings, numbers and enums, which always encode.
        let encoded =
            serde_json::to_vec(value).expect("fingerprint keys are always JSON-encodable");
        Fingerprint(format!("{:x}", Sha256::digest(&encoded)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    ReadError(PathBuf, String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}
