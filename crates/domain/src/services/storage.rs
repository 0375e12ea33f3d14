//! Object storage abstraction for export artifacts.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Invalid object key: {0}")]
    InvalidKey(String),

    #[error("Failed to write object: {0}")]
    Io(String),

    #[error("Upload rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Storage request failed: {0}")]
    Transport(String),
}

/// Stores bytes at a key and returns a retrievable URL.
///
/// A successful return means the object is durable.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str)
        -> Result<String, StorageError>;
}

/// Rejects keys that are empty, absolute, or escape their prefix.
pub fn validate_object_key(key: &str) -> Result<(), StorageError> {
    if key.is_empty() || key.starts_with('/') || key.contains('\\') {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    if key
        .split('/')
        .any(|segment| segment.is_empty() || segment == "." || segment == "..")
    {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Joins a base URL and an object key with exactly one slash.
pub fn public_object_url(base_url: &str, key: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_object_key() {
        assert!(validate_object_key("exports/u1/product_2024_01_15_10_30_00.xlsx").is_ok());
        assert!(validate_object_key("").is_err());
        assert!(validate_object_key("/etc/passwd").is_err());
        assert!(validate_object_key("exports/../secrets").is_err());
        assert!(validate_object_key("exports//x").is_err());
        assert!(validate_object_key("exports\\x").is_err());
    }

    #[test]
    fn test_public_object_url() {
        assert_eq!(
            public_object_url("https://cdn.example.com/", "exports/a.xlsx"),
            "https://cdn.example.com/exports/a.xlsx"
        );
        assert_eq!(
            public_object_url("https://cdn.example.com", "exports/a.xlsx"),
            "https://cdn.example.com/exports/a.xlsx"
        );
    }
}
