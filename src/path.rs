//! `bucket/key` addressing
//!
//! Paths handed to the filesystem look like `bucket/dir/file`, optionally
//! prefixed with `oss://`. Leading and trailing slashes are ignored; an empty
//! path is the root above all buckets.

use crate::error::{OssfsError, Result};

/// URL scheme accepted in front of paths
pub const PROTOCOL: &str = "oss://";

/// Remove the protocol and surrounding slashes
pub fn strip_protocol(path: &str) -> String {
    let path = path.trim();
    let path = path.strip_prefix(PROTOCOL).unwrap_or(path);
    path.trim_matches('/').to_string()
}

/// Split a path into `(bucket, key)`; the key is empty for a bucket root
pub fn split_path(path: &str) -> Result<(String, String)> {
    let path = strip_protocol(path);
    if path.is_empty() {
        return Err(OssfsError::InvalidPath(
            "path must start with a bucket name".to_string(),
        ));
    }

    let (bucket, key) = match path.split_once('/') {
        Some((bucket, key)) => (bucket, key.trim_start_matches('/')),
        None => (path.as_str(), ""),
    };

    if key.split('/').any(|part| part == "." || part == "..") {
        return Err(OssfsError::InvalidPath(format!(
            "relative components are not allowed: {}",
            path
        )));
    }

    Ok((bucket.to_string(), key.to_string()))
}

/// Inverse of `split_path`
pub fn join(bucket: &str, key: &str) -> String {
    let key = key.trim_matches('/');
    if key.is_empty() {
        bucket.to_string()
    } else {
        format!("{}/{}", bucket, key)
    }
}

/// Parent of a stripped path; the parent of a bucket is the root (`""`)
pub fn parent(path: &str) -> String {
    let path = strip_protocol(path);
    match path.rsplit_once('/') {
        Some((parent, _)) => parent.to_string(),
        None => String::new(),
    }
}

/// Key prefix used to list the children of `key`
pub fn dir_prefix(key: &str) -> String {
    if key.is_empty() {
        String::new()
    } else {
        format!("{}/", key.trim_end_matches('/'))
    }
}
