//! Package sources.
//!
//! A [`Source`] is a catalog of generator packages plus the means to fetch,
//! cache, unpack and purge them. The package manager aggregates any number
//! of sources; which ones are used is decided by configuration through
//! [`SourceSpec`].

mod github;
mod local;

use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::http::HttpClient;
use crate::runtime::Runtime;
use crate::version::Version;

pub use github::{DEFAULT_API_URL, GitHubSource};
pub use local::LocalSource;

/// Repository identifier (owner/repo format).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepoId {
    pub owner: String,
    pub repo: String,
}

impl fmt::Display for RepoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

impl FromStr for RepoId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((owner, repo)) if !owner.is_empty() && !repo.is_empty() && !repo.contains('/') => {
                Ok(RepoId {
                    owner: owner.to_string(),
                    repo: repo.to_string(),
                })
            }
            _ => bail!("Invalid repository {:?}. Expected 'owner/repo'.", s),
        }
    }
}

/// Source kind identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    GitHub,
    Local,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::GitHub => write!(f, "github"),
            SourceKind::Local => write!(f, "local"),
        }
    }
}

impl FromStr for SourceKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "github" => Ok(SourceKind::GitHub),
            "local" => Ok(SourceKind::Local),
            _ => bail!("Unknown source kind: {}. Expected github or local.", s),
        }
    }
}

/// One package as reported by a single source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePackage {
    pub version: Version,
    pub published_at: DateTime<Utc>,
    /// Where the source fetches the artifact from (URL or file path).
    pub locator: String,
}

/// A catalog and artifact provider.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Source: Send + Sync {
    fn kind(&self) -> SourceKind;

    /// Name unique among sources of the same kind.
    fn name(&self) -> String;

    /// Refresh the catalog. A failure leaves the previous catalog intact.
    async fn update(&self, cancel: &CancellationToken) -> Result<()>;

    /// Every package in the catalog. Entries that are not generator
    /// versions never appear here.
    fn list_packages(&self) -> Vec<SourcePackage>;

    fn get_package(&self, version: &Version) -> Result<SourcePackage>;

    /// Fetch the artifact into this source's cache. Succeeds immediately if
    /// it is already cached.
    async fn download(&self, version: &Version, cancel: &CancellationToken) -> Result<()>;

    /// Extract the artifact into `destination`, downloading it first if needed.
    async fn unpack(
        &self,
        version: &Version,
        destination: &Path,
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// Delete the cached artifact, if any.
    fn purge(&self, version: &Version) -> Result<()>;

    fn is_cached(&self, version: &Version) -> bool;
}

/// Stable `kind:name` key for a source.
pub fn source_identifier(source: &dyn Source) -> String {
    format!("{}:{}", source.kind(), source.name())
}

/// Runs `fut`, failing early if `cancel` fires first.
pub(crate) async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        _ = cancel.cancelled() => bail!("Operation cancelled"),
        result = fut => result,
    }
}

/// Configured source, written `github:OWNER/REPO` or `local:PATH`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSpec {
    GitHub(RepoId),
    Local(PathBuf),
}

impl FromStr for SourceSpec {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((kind, rest)) = s.split_once(':') else {
            bail!("Invalid source {:?}. Expected 'github:OWNER/REPO' or 'local:PATH'.", s);
        };
        if rest.is_empty() {
            bail!("Source {:?} is missing its location", s);
        }
        match kind.parse::<SourceKind>()? {
            SourceKind::GitHub => Ok(SourceSpec::GitHub(rest.parse()?)),
            SourceKind::Local => Ok(SourceSpec::Local(PathBuf::from(rest))),
        }
    }
}

impl fmt::Display for SourceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceSpec::GitHub(repo) => write!(f, "github:{}", repo),
            SourceSpec::Local(path) => write!(f, "local:{}", path.display()),
        }
    }
}

impl SourceSpec {
    /// Builds the configured source. Caches live under `cache_root`.
    pub fn build<R: Runtime + 'static>(
        &self,
        runtime: Arc<R>,
        http_client: &HttpClient,
        api_url: &str,
        cache_root: &Path,
    ) -> Arc<dyn Source> {
        match self {
            SourceSpec::GitHub(repo) => Arc::new(GitHubSource::new(
                runtime,
                http_client.clone(),
                api_url,
                repo.clone(),
                cache_root,
            )),
            SourceSpec::Local(dir) => Arc::new(LocalSource::new(runtime, dir.clone(), cache_root)),
        }
    }
}
