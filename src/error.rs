use std::io;
use thiserror::Error;

use crate::config::ConfigError;

/// Main error type for ossfs operations
#[derive(Error, Debug)]
pub enum OssfsError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Path not found: {0}")]
    NotFound(String),

    #[error("Is a directory: {0}")]
    IsADirectory(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("I/O operation on closed file")]
    Closed,

    #[error("Read past end of file: requested {requested} bytes, {available} available")]
    ReadPastEnd { requested: u64, available: u64 },

    #[error("Invalid mode: {0}")]
    InvalidMode(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl OssfsError {
    /// Map the error onto the closest `std::io::ErrorKind`
    pub fn kind(&self) -> io::ErrorKind {
        match self {
            OssfsError::Config(_) => io::ErrorKind::InvalidInput,
            OssfsError::NotFound(_) => io::ErrorKind::NotFound,
            OssfsError::IsADirectory(_) => io::ErrorKind::InvalidInput,
            OssfsError::InvalidPath(_) => io::ErrorKind::InvalidInput,
            OssfsError::Backend(_) => io::ErrorKind::Other,
            OssfsError::Closed => io::ErrorKind::BrokenPipe,
            OssfsError::ReadPastEnd { .. } => io::ErrorKind::UnexpectedEof,
            OssfsError::InvalidMode(_) => io::ErrorKind::Unsupported,
            OssfsError::InvalidArgument(_) => io::ErrorKind::InvalidInput,
            OssfsError::Io(e) => e.kind(),
            OssfsError::Serialization(_) => io::ErrorKind::InvalidData,
        }
    }
}

impl From<ConfigError> for OssfsError {
    fn from(e: ConfigError) -> Self {
        OssfsError::Config(e.to_string())
    }
}

impl From<serde_json::Error> for OssfsError {
    fn from(e: serde_json::Error) -> Self {
        OssfsError::Serialization(e.to_string())
    }
}

impl From<OssfsError> for io::Error {
    fn from(e: OssfsError) -> Self {
        match e {
            OssfsError::Io(inner) => inner,
            other => io::Error::new(other.kind(), other),
        }
    }
}

/// Result type alias for ossfs operations
pub type Result<T> = std::result::Result<T, OssfsError>;
