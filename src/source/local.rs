//! Local directory source.
//!
//! A directory of `<version>.tar.gz` files, e.g. a mirror or a shared
//! network drive. The file's modification time stands in for the publish
//! date.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::debug;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use tokio_util::sync::CancellationToken;

use crate::cache::PackageCache;
use crate::error::PackageError;
use crate::runtime::Runtime;
use crate::version::Version;

use super::{Source, SourceKind, SourcePackage};

const ARCHIVE_SUFFIX: &str = ".tar.gz";

/// Hex digits of the path digest kept in a cache directory name.
const CACHE_KEY_DIGITS: usize = 16;

pub struct LocalSource<R: Runtime> {
    runtime: Arc<R>,
    dir: PathBuf,
    cache: PackageCache<R>,
    index: RwLock<BTreeMap<Version, SourcePackage>>,
}

impl<R: Runtime> LocalSource<R> {
    /// Creates a source reading from `dir`. Copies are cached under
    /// `<cache_root>/local/<dir name>-<path digest>`, so two directories with
    /// the same name never share a cache.
    pub fn new(runtime: Arc<R>, dir: PathBuf, cache_root: &Path) -> Self {
        let cache_dir = cache_root.join("local").join(cache_key(&dir));
        let cache = PackageCache::new(runtime.clone(), cache_dir);
        Self {
            runtime,
            dir,
            cache,
            index: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        self.cache.dir()
    }

    fn scan(&self) -> Result<BTreeMap<Version, SourcePackage>> {
        let mut found = BTreeMap::new();
        let entries = self
            .runtime
            .read_dir(&self.dir)
            .with_context(|| format!("Failed to scan package directory {:?}", self.dir))?;

        for path in entries {
            let Some(version) = archive_version(&path) else {
                continue;
            };
            if self.runtime.is_dir(&path) {
                continue;
            }
            let modified = self.runtime.modified(&path)?;
            found.insert(
                version.clone(),
                SourcePackage {
                    version,
                    published_at: DateTime::<Utc>::from(modified),
                    locator: path.display().to_string(),
                },
            );
        }
        Ok(found)
    }
}

/// Cache directory name for `dir`: its file name, for readability, and a
/// digest of its absolute path, for uniqueness.
fn cache_key(dir: &Path) -> String {
    let absolute: PathBuf = std::path::absolute(dir)
        .unwrap_or_else(|_| dir.to_path_buf())
        .components()
        .collect();
    let digest = format!("{:x}", Sha256::digest(absolute.to_string_lossy().as_bytes()));
    let name = absolute
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "root".to_string());
    format!("{}-{}", name, &digest[..CACHE_KEY_DIGITS])
}

/// Version encoded in an archive file name, if it is one.
fn archive_version(path: &Path) -> Option<Version> {
    let name = path.file_name()?.to_str()?;
    name.strip_suffix(ARCHIVE_SUFFIX)?.parse().ok()
}

#[async_trait]
impl<R: Runtime + 'static> Source for LocalSource<R> {
    fn kind(&self) -> SourceKind {
        SourceKind::Local
    }

    fn name(&self) -> String {
        self.dir.display().to_string()
    }

    #[tracing::instrument(skip(self, cancel))]
    async fn update(&self, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            anyhow::bail!("Operation cancelled");
        }
        let found = self.scan()?;
        debug!("{:?}: found {} packages", self.dir, found.len());
        *self.index.write().unwrap_or_else(PoisonError::into_inner) = found;
        Ok(())
    }

    fn list_packages(&self) -> Vec<SourcePackage> {
        let index = self.index.read().unwrap_or_else(PoisonError::into_inner);
        index.values().cloned().collect()
    }

    fn get_package(&self, version: &Version) -> Result<SourcePackage> {
        let index = self.index.read().unwrap_or_else(PoisonError::into_inner);
        index
            .get(version)
            .cloned()
            .ok_or_else(|| PackageError::PackageNotFound(version.to_string()).into())
    }

    #[tracing::instrument(skip(self, cancel))]
    async fn download(&self, version: &Version, cancel: &CancellationToken) -> Result<()> {
        if self.is_cached(version) {
            return Ok(());
        }
        let package = self.get_package(version)?;
        if cancel.is_cancelled() {
            anyhow::bail!("Operation cancelled");
        }

        let runtime = self.runtime.as_ref();
        self.cache
            .store(version, |partial| async move {
                runtime.copy(Path::new(&package.locator), &partial)?;
                Ok(())
            })
            .await
            .with_context(|| format!("Failed to copy {} from {:?}", version, self.dir))
    }

    async fn unpack(
        &self,
        version: &Version,
        destination: &Path,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if !self.is_cached(version) {
            self.download(version, cancel).await?;
        }
        self.cache.unpack(version, destination, cancel).await
    }

    fn purge(&self, version: &Version) -> Result<()> {
        self.cache.purge(version)
    }

    fn is_cached(&self, version: &Version) -> bool {
        self.cache.contains(version)
    }
}
