//! Aggregated package catalog and per-version lifecycle.
//!
//! [`PackageManager`] merges the catalogs of its sources into one index
//! keyed by version and drives download, unpack, install, configure and
//! purge for a single version at a time. Batch work lives in
//! [`crate::installer`].

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::PackageError;
use crate::legacy::infer_metadata;
use crate::metadata::METADATA_FILENAME;
use crate::runtime::{Runtime, io_error_kind};
use crate::source::{Source, source_identifier};
use crate::version::Version;

/// Script whose directory is the root of an installed generator.
pub const ENTRYPOINT: &str = "OoTRandomizer.py";

/// Helper binaries that ship inside generator packages and must be executable.
const HELPER_BINARIES: &[&str] = &[
    "Compress/Compress",
    "Compress/Compress.exe",
    "Decompress/Decompress",
    "Decompress/Decompress.exe",
    "bin/Compress/Compress",
    "bin/Compress/Compress.exe",
    "bin/Decompress/Decompress",
    "bin/Decompress/Decompress.exe",
];

const EXECUTABLE_MODE: u32 = 0o755;

/// One version in the aggregated catalog.
#[derive(Clone)]
pub struct PackageInfo {
    pub version: Version,
    /// Earliest publish time reported by any source.
    pub published_at: DateTime<Utc>,
    /// Contributing sources in registration order.
    pub sources: Vec<Arc<dyn Source>>,
    pub install_dir: PathBuf,
}

impl fmt::Debug for PackageInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sources: Vec<String> = self
            .sources
            .iter()
            .map(|s| source_identifier(s.as_ref()))
            .collect();
        f.debug_struct("PackageInfo")
            .field("version", &self.version)
            .field("published_at", &self.published_at)
            .field("sources", &sources)
            .field("install_dir", &self.install_dir)
            .finish()
    }
}

impl PackageInfo {
    /// Installed means both the metadata file and the entrypoint are present.
    pub fn is_installed<R: Runtime + ?Sized>(&self, runtime: &R) -> bool {
        runtime.exists(&self.install_dir.join(METADATA_FILENAME))
            && runtime.exists(&self.install_dir.join(ENTRYPOINT))
    }
}

pub struct PackageManager<R: Runtime> {
    runtime: Arc<R>,
    install_dir: PathBuf,
    sources: Vec<Arc<dyn Source>>,
    index: BTreeMap<Version, PackageInfo>,
}

impl<R: Runtime> PackageManager<R> {
    /// Creates a manager installing generators under `install_dir/<version>`.
    pub fn new(runtime: Arc<R>, install_dir: PathBuf) -> Self {
        Self {
            runtime,
            install_dir,
            sources: Vec::new(),
            index: BTreeMap::new(),
        }
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    pub fn install_dir(&self) -> &Path {
        &self.install_dir
    }

    /// Registers a source. Registration order is fallback order.
    pub fn add_source(&mut self, source: Arc<dyn Source>) {
        self.sources.push(source);
    }

    pub fn sources(&self) -> &[Arc<dyn Source>] {
        &self.sources
    }

    fn package_dir(&self, version: &Version) -> PathBuf {
        self.install_dir.join(version.to_string())
    }

    /// Refreshes every source and merges their catalogs. A failing source
    /// is logged and skipped; this never fails.
    #[tracing::instrument(skip(self, cancel))]
    pub async fn update(&mut self, cancel: &CancellationToken) {
        let sources = self.sources.clone();
        for source in sources {
            let id = source_identifier(source.as_ref());
            if let Err(e) = source.update(cancel).await {
                warn!("Failed to update source {}: {:#}", id, e);
                continue;
            }

            let packages = source.list_packages();
            debug!("Source {} lists {} packages", id, packages.len());
            for package in packages {
                match self.index.get_mut(&package.version) {
                    Some(info) => {
                        let known = info
                            .sources
                            .iter()
                            .any(|s| source_identifier(s.as_ref()) == id);
                        if !known {
                            info.sources.push(source.clone());
                        }
                        info.published_at = info.published_at.min(package.published_at);
                    }
                    None => {
                        let install_dir = self.package_dir(&package.version);
                        self.index.insert(
                            package.version.clone(),
                            PackageInfo {
                                version: package.version,
                                published_at: package.published_at,
                                sources: vec![source.clone()],
                                install_dir,
                            },
                        );
                    }
                }
            }
        }
    }

    pub fn get_package(&self, version: &Version) -> Result<&PackageInfo, PackageError> {
        self.index
            .get(version)
            .ok_or_else(|| PackageError::PackageNotFound(version.to_string()))
    }

    pub fn has_package(&self, version: &Version) -> bool {
        self.index.contains_key(version)
    }

    /// Every known package, most recently published first.
    pub fn available_packages(&self) -> Vec<&PackageInfo> {
        let mut packages: Vec<&PackageInfo> = self.index.values().collect();
        packages.sort_by(|a, b| b.published_at.cmp(&a.published_at));
        packages
    }

    pub fn is_installed(&self, version: &Version) -> bool {
        self.index
            .get(version)
            .is_some_and(|info| info.is_installed(self.runtime.as_ref()))
    }

    /// True if any contributing source has the artifact cached.
    pub fn is_cached(&self, version: &Version) -> bool {
        self.index
            .get(version)
            .is_some_and(|info| info.sources.iter().any(|s| s.is_cached(version)))
    }

    /// Downloads from the first contributing source that succeeds.
    #[tracing::instrument(skip(self, cancel))]
    pub async fn download(&self, version: &Version, cancel: &CancellationToken) -> Result<()> {
        let info = self.get_package(version)?;
        for source in &info.sources {
            match source.download(version, cancel).await {
                Ok(()) => return Ok(()),
                Err(e) => warn!(
                    "Download of {} from {} failed: {:#}",
                    version,
                    source_identifier(source.as_ref()),
                    e
                ),
            }
        }
        Err(PackageError::DownloadFailed(version.to_string()).into())
    }

    /// Unpacks from the first source that has the artifact cached and
    /// extracts it successfully.
    #[tracing::instrument(skip(self, cancel))]
    pub async fn unpack(
        &self,
        version: &Version,
        destination: &Path,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let info = self.get_package(version)?;
        for source in info.sources.iter().filter(|s| s.is_cached(version)) {
            match source.unpack(version, destination, cancel).await {
                Ok(()) => return Ok(()),
                Err(e) => warn!(
                    "Unpacking {} from {} failed: {:#}",
                    version,
                    source_identifier(source.as_ref()),
                    e
                ),
            }
        }
        Err(PackageError::UnpackFailed(version.to_string()).into())
    }

    /// Copies the directory holding the entrypoint found under `source_dir`
    /// into the version's install directory.
    #[tracing::instrument(skip(self))]
    pub fn install(&self, version: &Version, source_dir: &Path) -> Result<()> {
        let info = self.get_package(version)?;
        let runtime = self.runtime.as_ref();

        let entrypoint = find_entrypoint(runtime, source_dir)?
            .ok_or_else(|| PackageError::EntrypointNotFound(source_dir.to_path_buf()))?;
        let root = entrypoint
            .parent()
            .ok_or_else(|| PackageError::EntrypointNotFound(source_dir.to_path_buf()))?;

        debug!("Installing {:?} into {:?}", root, info.install_dir);
        copy_dir_all(runtime, root, &info.install_dir)
            .with_context(|| format!("Failed to install {} into {:?}", version, info.install_dir))
    }

    /// Writes inferred metadata for packages that ship without it and marks
    /// the bundled helper binaries executable.
    #[tracing::instrument(skip(self))]
    pub fn configure(&self, version: &Version) -> Result<()> {
        let info = self.get_package(version)?;
        let runtime = self.runtime.as_ref();

        let metadata_path = info.install_dir.join(METADATA_FILENAME);
        if !runtime.exists(&metadata_path) {
            match infer_metadata(version) {
                Ok(metadata) => {
                    info!("Writing inferred metadata for {}", version);
                    metadata.save(runtime, &metadata_path)?;
                }
                Err(e) => debug!("No metadata for {}: {}", version, e),
            }
        }

        // Packages ship only some of the helpers; a missing one is skipped.
        for binary in HELPER_BINARIES {
            let path = info.install_dir.join(binary);
            match runtime.set_permissions(&path, EXECUTABLE_MODE) {
                Ok(()) => {}
                Err(e) if io_error_kind(&e) == Some(io::ErrorKind::NotFound) => continue,
                Err(e) => {
                    return Err(e.context(format!("Failed to make {:?} executable", path)));
                }
            }
        }
        Ok(())
    }

    /// Purges the artifact from every contributing source, stopping at the
    /// first failure.
    #[tracing::instrument(skip(self))]
    pub fn purge(&self, version: &Version) -> Result<()> {
        let info = self.get_package(version)?;
        for source in &info.sources {
            source.purge(version).with_context(|| {
                format!(
                    "Failed to purge {} from {}",
                    version,
                    source_identifier(source.as_ref())
                )
            })?;
        }
        Ok(())
    }
}

/// Depth-first search for [`ENTRYPOINT`]; entries are visited in sorted
/// order and the first match wins.
fn find_entrypoint<R: Runtime + ?Sized>(runtime: &R, dir: &Path) -> Result<Option<PathBuf>> {
    for path in runtime.read_dir(dir)? {
        if runtime.is_dir(&path) {
            if let Some(found) = find_entrypoint(runtime, &path)? {
                return Ok(Some(found));
            }
        } else if path.file_name().is_some_and(|name| name == ENTRYPOINT) {
            return Ok(Some(path));
        }
    }
    Ok(None)
}

fn copy_dir_all<R: Runtime + ?Sized>(runtime: &R, from: &Path, to: &Path) -> Result<()> {
    runtime.create_dir_all(to)?;
    for path in runtime.read_dir(from)? {
        let Some(name) = path.file_name() else {
            continue;
        };
        let target = to.join(name);
        if runtime.is_dir(&path) {
            copy_dir_all(runtime, &path, &target)?;
        } else {
            runtime.copy(&path, &target)?;
        }
    }
    Ok(())
}
