//! Error kinds surfaced by the package manager.
//!
//! Most functions return `anyhow::Result`; these typed errors travel inside
//! it and can be recovered with `downcast_ref`.

use std::path::PathBuf;
use thiserror::Error;

/// A string did not match the version grammar.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid version: {0:?}")]
pub struct VersionError(pub String);

/// Metadata failed validation, or could not be inferred.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MetadataError {
    #[error("metadata has an invalid version: {0:?}")]
    InvalidVersion(String),
    #[error("metadata has no presets")]
    NoPresets,
    #[error("metadata has no default preset")]
    NoDefaultPreset,
    #[error("no legacy metadata for branch {0:?}")]
    UnsupportedBranch(String),
    #[error("no legacy metadata for version {0}")]
    UnsupportedVersion(String),
}

/// Failures of package catalog and lifecycle operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PackageError {
    #[error("package {0} not found")]
    PackageNotFound(String),
    #[error("package {0} failed to download from every source")]
    DownloadFailed(String),
    #[error("package {0} could not be unpacked from any cached source")]
    UnpackFailed(String),
    #[error("no entrypoint found in {0}")]
    EntrypointNotFound(PathBuf),
}

/// Failures to take the cross-process lock.
#[derive(Debug, Error)]
pub enum LockError {
    #[error("lock file {0} is already held")]
    LockFileLocked(PathBuf),
    #[error("could not acquire lock file {path}: {source:#}")]
    LockNotAcquired {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
}
