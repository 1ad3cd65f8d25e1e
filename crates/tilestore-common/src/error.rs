//! Error types for the tiled raster store.

use std::fmt;

use thiserror::Error;

/// Result type alias using StoreError.
pub type StoreResult<T> = Result<T, StoreError>;

/// Primary error type for store operations.
///
/// Every variant carries the key, path or datasource it concerns so callers
/// (typically distributed workers with their own retry policy) can branch on
/// [`StoreError::kind`] instead of parsing messages.
#[derive(Debug, Error)]
pub enum StoreError {
    // === Catalog / Access Errors ===
    #[error("unknown datasource alias '{alias}' in path {path}")]
    UnknownDatasource { alias: String, path: String },

    #[error("action '{action}' is not permitted for datasource '{datasource}'")]
    Authority { datasource: String, action: String },

    #[error("invalid logical path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("not found: {key}")]
    NotFound { key: String },

    #[error("already exists: {path}")]
    AlreadyExists { path: String },

    #[error("catalog error for {key}: {message}")]
    Catalog { key: String, message: String },

    // === Raster Errors ===
    #[error("invalid region for {path}: {message}")]
    InvalidRegion { path: String, message: String },

    #[error("band {path} is read-only")]
    ReadOnly { path: String },

    #[error("band {path} does not support this operation: {reason}")]
    UnsupportedBand { path: String, reason: String },

    #[error("invalid pixel buffer: {0}")]
    InvalidBuffer(String),

    // === Concurrency Errors ===
    #[error("tile lock {key} is held by another writer")]
    LockContended { key: String },

    // === Backend / Collaborator Errors ===
    #[error("storage backend error for {key}: {message}")]
    BackendIo { key: String, message: String },

    #[error("codec error for {key}: {message}")]
    Codec { key: String, message: String },

    #[error("reprojection error: {0}")]
    Reprojection(String),

    // === Configuration Errors ===
    #[error("configuration error: {0}")]
    Config(String),
}

/// Stable discriminant of a [`StoreError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    UnknownDatasource,
    Authority,
    InvalidPath,
    NotFound,
    AlreadyExists,
    Catalog,
    InvalidRegion,
    ReadOnly,
    UnsupportedBand,
    InvalidBuffer,
    LockContended,
    BackendIo,
    Codec,
    Reprojection,
    Config,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl StoreError {
    pub fn unknown_datasource(alias: impl Into<String>, path: impl Into<String>) -> Self {
        Self::UnknownDatasource {
            alias: alias.into(),
            path: path.into(),
        }
    }

    pub fn authority(datasource: impl Into<String>, action: impl fmt::Display) -> Self {
        Self::Authority {
            datasource: datasource.into(),
            action: action.to_string(),
        }
    }

    pub fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    pub fn catalog(key: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Catalog {
            key: key.into(),
            message: message.to_string(),
        }
    }

    pub fn invalid_region(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidRegion {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn unsupported_band(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::UnsupportedBand {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn backend(key: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::BackendIo {
            key: key.into(),
            message: message.to_string(),
        }
    }

    pub fn codec(key: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Codec {
            key: key.into(),
            message: message.to_string(),
        }
    }

    /// Attach `path` to a region error raised without one.
    pub fn for_path(self, path: impl fmt::Display) -> Self {
        match self {
            StoreError::InvalidRegion { path: p, message } if p.is_empty() => {
                StoreError::InvalidRegion {
                    path: path.to_string(),
                    message,
                }
            }
            other => other,
        }
    }

    /// Get the kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::UnknownDatasource { .. } => ErrorKind::UnknownDatasource,
            StoreError::Authority { .. } => ErrorKind::Authority,
            StoreError::InvalidPath { .. } => ErrorKind::InvalidPath,
            StoreError::NotFound { .. } => ErrorKind::NotFound,
            StoreError::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            StoreError::Catalog { .. } => ErrorKind::Catalog,
            StoreError::InvalidRegion { .. } => ErrorKind::InvalidRegion,
            StoreError::ReadOnly { .. } => ErrorKind::ReadOnly,
            StoreError::UnsupportedBand { .. } => ErrorKind::UnsupportedBand,
            StoreError::InvalidBuffer(_) => ErrorKind::InvalidBuffer,
            StoreError::LockContended { .. } => ErrorKind::LockContended,
            StoreError::BackendIo { .. } => ErrorKind::BackendIo,
            StoreError::Codec { .. } => ErrorKind::Codec,
            StoreError::Reprojection(_) => ErrorKind::Reprojection,
            StoreError::Config(_) => ErrorKind::Config,
        }
    }

    /// Whether the caller may retry the same operation unchanged.
    ///
    /// The store itself never retries.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::LockContended { .. })
    }

    /// The key or path this error concerns, when it has one.
    pub fn subject(&self) -> Option<&str> {
        match self {
            StoreError::UnknownDatasource { path, .. }
            | StoreError::InvalidPath { path, .. }
            | StoreError::AlreadyExists { path }
            | StoreError::InvalidRegion { path, .. }
            | StoreError::ReadOnly { path }
            | StoreError::UnsupportedBand { path, .. } => Some(path),
            StoreError::NotFound { key }
            | StoreError::Catalog { key, .. }
            | StoreError::LockContended { key }
            | StoreError::BackendIo { key, .. }
            | StoreError::Codec { key, .. } => Some(key),
            StoreError::Authority { datasource, .. } => Some(datasource),
            StoreError::InvalidBuffer(_) | StoreError::Reprojection(_) | StoreError::Config(_) => {
                None
            }
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Config(err.to_string())
    }
}

impl From<serde_yaml::Error> for StoreError {
    fn from(err: serde_yaml::Error) -> Self {
        StoreError::Config(format!("YAML error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_lock_contention_is_retryable() {
        assert!(StoreError::LockContended { key: "a/0_0.tile.lock".into() }.is_retryable());
        assert!(!StoreError::not_found("a/0_0.tile").is_retryable());
        assert!(!StoreError::backend("a/0_0.tile", "timeout").is_retryable());
    }

    #[test]
    fn test_kind_and_subject() {
        let err = StoreError::unknown_datasource("nope", "/store/nope/x");
        assert_eq!(err.kind(), ErrorKind::UnknownDatasource);
        assert_eq!(err.subject(), Some("/store/nope/x"));

        let err = StoreError::authority("landsat", "delete");
        assert_eq!(err.kind(), ErrorKind::Authority);
        assert!(err.to_string().contains("delete"));
    }
}
