//! On-disk package cache shared by the source implementations.
//!
//! Each source owns one cache directory holding `<version>.tar.gz` files.
//! Writes go to a `.part` file first and are renamed into place, so an
//! interrupted download never looks cached.

use anyhow::{Context, Result};
use log::debug;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::archive::extract_tar_gz;
use crate::runtime::Runtime;
use crate::version::Version;

pub struct PackageCache<R: Runtime> {
    runtime: Arc<R>,
    dir: PathBuf,
}

impl<R: Runtime> PackageCache<R> {
    pub fn new(runtime: Arc<R>, dir: PathBuf) -> Self {
        Self { runtime, dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    pub fn archive_path(&self, version: &Version) -> PathBuf {
        self.dir.join(format!("{}.tar.gz", version))
    }

    fn partial_path(&self, version: &Version) -> PathBuf {
        self.dir.join(format!("{}.tar.gz.part", version))
    }

    pub fn contains(&self, version: &Version) -> bool {
        self.runtime.exists(&self.archive_path(version))
    }

    /// Fills the cache entry for `version` by running `fill` against a
    /// temporary path, then moves the result into place.
    pub async fn store<F, Fut>(&self, version: &Version, fill: F) -> Result<()>
    where
        F: FnOnce(PathBuf) -> Fut,
        Fut: std::future::Future<Output = Result<()>>,
    {
        self.runtime
            .create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create cache directory {:?}", self.dir))?;

        let partial = self.partial_path(version);
        if let Err(e) = fill(partial.clone()).await {
            if self.runtime.exists(&partial) {
                let _ = self.runtime.remove_file(&partial);
            }
            return Err(e);
        }

        self.runtime.rename(&partial, &self.archive_path(version))?;
        debug!("Cached {} at {:?}", version, self.archive_path(version));
        Ok(())
    }

    /// Extracts the cached archive into `destination` on the blocking pool.
    pub async fn unpack(
        &self,
        version: &Version,
        destination: &Path,
        cancel: &CancellationToken,
    ) -> Result<()>
    where
        R: 'static,
    {
        let runtime = self.runtime.clone();
        let archive = self.archive_path(version);
        let destination = destination.to_path_buf();
        let cancel = cancel.clone();
        tokio::task::spawn_blocking(move || {
            extract_tar_gz(runtime.as_ref(), &archive, &destination, &cancel)
        })
        .await
        .context("Extraction task failed")?
    }

    /// Removes the cached archive. A missing archive is not an error.
    pub fn purge(&self, version: &Version) -> Result<()> {
        let path = self.archive_path(version);
        if self.runtime.exists(&path) {
            debug!("Purging {:?}", path);
            self.runtime.remove_file(&path)?;
        }
        Ok(())
    }
}
