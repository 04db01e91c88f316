//! Batch installation on top of [`PackageManager`].
//!
//! Candidates are selected, already-installed versions are dropped, and the
//! remainder is installed concurrently. Each candidate runs the full
//! download, unpack, install, configure pipeline on its own; a failure only
//! affects that candidate and is recorded in the returned [`InstallReport`].

use anyhow::{Context, Result, anyhow};
use log::{debug, warn};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::manager::PackageManager;
use crate::runtime::Runtime;
use crate::version::Version;

/// Default number of generators installed at the same time.
pub const DEFAULT_CONCURRENCY: usize = 4;

const TEMP_DIR_PREFIX: &str = "TriforceBlitz";

/// Branches to consider when installing everything. Empty means all.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Whitelist(Vec<String>);

impl Whitelist {
    pub fn new(branches: Vec<String>) -> Self {
        Self(branches)
    }

    pub fn includes(&self, branch: &str) -> bool {
        self.0.is_empty() || self.0.iter().any(|b| b == branch)
    }
}

impl<S: Into<String>> FromIterator<S> for Whitelist {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

#[derive(Debug)]
pub enum InstallOutcome {
    Installed,
    Failed(anyhow::Error),
}

impl InstallOutcome {
    pub fn is_installed(&self) -> bool {
        matches!(self, InstallOutcome::Installed)
    }
}

/// Result of a batch install.
#[derive(Debug, Default)]
pub struct InstallReport {
    /// Versions that were attempted, in selection order.
    pub candidates: Vec<Version>,
    pub outcomes: BTreeMap<Version, InstallOutcome>,
}

impl InstallReport {
    pub fn installed(&self) -> Vec<&Version> {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| outcome.is_installed())
            .map(|(version, _)| version)
            .collect()
    }

    pub fn failed(&self) -> Vec<(&Version, &anyhow::Error)> {
        self.outcomes
            .iter()
            .filter_map(|(version, outcome)| match outcome {
                InstallOutcome::Failed(e) => Some((version, e)),
                InstallOutcome::Installed => None,
            })
            .collect()
    }

    pub fn is_success(&self) -> bool {
        self.outcomes.values().all(InstallOutcome::is_installed)
    }
}

pub struct Installer<R: Runtime> {
    manager: Arc<PackageManager<R>>,
    cache_packages: bool,
    concurrency: usize,
    cancel: CancellationToken,
}

impl<R: Runtime + 'static> Installer<R> {
    pub fn new(manager: Arc<PackageManager<R>>) -> Self {
        Self {
            manager,
            cache_packages: true,
            concurrency: DEFAULT_CONCURRENCY,
            cancel: CancellationToken::new(),
        }
    }

    /// Whether downloaded archives stay in the cache after installing.
    pub fn with_cache_packages(mut self, cache_packages: bool) -> Self {
        self.cache_packages = cache_packages;
        self
    }

    /// Maximum simultaneous installs; `0` starts every candidate at once.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Installs the given versions. Fails with `PackageNotFound` before
    /// touching anything if any version is unknown.
    #[tracing::instrument(skip(self))]
    pub async fn install(&self, versions: &[Version]) -> Result<InstallReport> {
        let candidates = self.collect(versions)?;
        let outcomes = self.parallel_install(&candidates).await;
        Ok(InstallReport {
            candidates,
            outcomes,
        })
    }

    /// Installs every available package on a whitelisted branch that is not
    /// installed yet.
    #[tracing::instrument(skip(self))]
    pub async fn install_all(&self, whitelist: &Whitelist) -> Result<InstallReport> {
        let runtime = self.manager.runtime();
        let versions: Vec<Version> = self
            .manager
            .available_packages()
            .into_iter()
            .filter(|p| !p.is_installed(runtime) && whitelist.includes(&p.version.branch))
            .map(|p| p.version.clone())
            .collect();
        debug!("{} packages selected for installation", versions.len());
        self.install(&versions).await
    }

    fn collect(&self, versions: &[Version]) -> Result<Vec<Version>> {
        let runtime = self.manager.runtime();
        let mut seen = HashSet::new();
        let mut candidates = Vec::new();
        for version in versions {
            let package = self.manager.get_package(version)?;
            if !seen.insert(version) {
                continue;
            }
            if package.is_installed(runtime) {
                println!("Generator {} is already installed", version);
                continue;
            }
            candidates.push(version.clone());
        }
        Ok(candidates)
    }

    async fn parallel_install(&self, candidates: &[Version]) -> BTreeMap<Version, InstallOutcome> {
        let semaphore = (self.concurrency > 0).then(|| Arc::new(Semaphore::new(self.concurrency)));
        let mut join_set = JoinSet::new();

        for version in candidates.iter().cloned() {
            let manager = self.manager.clone();
            let semaphore = semaphore.clone();
            let cancel = self.cancel.clone();
            let cache_packages = self.cache_packages;

            join_set.spawn(async move {
                let _permit = match &semaphore {
                    Some(semaphore) => match semaphore.clone().acquire_owned().await {
                        Ok(permit) => Some(permit),
                        Err(_) => return (version, Err(anyhow!("Install queue closed"))),
                    },
                    None => None,
                };
                let result = install_one(&manager, &version, cache_packages, &cancel).await;
                (version, result)
            });
        }

        let mut outcomes = BTreeMap::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((version, Ok(()))) => {
                    outcomes.insert(version, InstallOutcome::Installed);
                }
                Ok((version, Err(e))) => {
                    println!("Failed to install generator {}: {:#}", version, e);
                    outcomes.insert(version, InstallOutcome::Failed(e));
                }
                Err(e) => warn!("Install task did not complete: {}", e),
            }
        }

        for version in candidates {
            outcomes
                .entry(version.clone())
                .or_insert_with(|| InstallOutcome::Failed(anyhow!("Install task did not complete")));
        }
        outcomes
    }
}

/// Full pipeline for a single version. Copying and configuring run on the
/// blocking pool.
async fn install_one<R: Runtime + 'static>(
    manager: &Arc<PackageManager<R>>,
    version: &Version,
    cache_packages: bool,
    cancel: &CancellationToken,
) -> Result<()> {
    println!("Selecting generator {}", version);
    if manager.is_cached(version) {
        println!("Using cached package {}", version);
    } else {
        println!("Downloading package {}", version);
        manager.download(version, cancel).await?;
    }

    let temp_dir = tempfile::Builder::new()
        .prefix(TEMP_DIR_PREFIX)
        .tempdir()
        .context("Failed to create temporary directory")?;

    println!("Unpacking package {}", version);
    manager.unpack(version, temp_dir.path(), cancel).await?;

    if !cache_packages {
        println!("Removing package {} from cache", version);
        if let Err(e) = manager.purge(version) {
            println!("Error removing package {} from cache: {:#}", version, e);
        }
    }

    let blocking = manager.clone();
    let unpacked = temp_dir.path().to_path_buf();
    let target = version.clone();
    tokio::task::spawn_blocking(move || {
        println!("Installing generator {}", target);
        blocking.install(&target, &unpacked)?;

        println!("Configuring generator {}", target);
        blocking.configure(&target)
    })
    .await
    .context("Install task failed")??;

    println!("Installed generator {}", version);
    Ok(())
}
