//! Paths, credentials and sources, resolved from flags and the environment.

use anyhow::Result;
use log::debug;
use std::path::PathBuf;
use std::sync::Arc;

use crate::http::HttpClient;
use crate::lockfile::LOCK_FILENAME;
use crate::manager::PackageManager;
use crate::runtime::Runtime;
use crate::source::{DEFAULT_API_URL, SourceSpec};

pub const ENV_GENERATORS_DIR: &str = "TRIFORCEBLITZ_GENERATORS_DIR";
pub const ENV_PACKAGE_CACHE_DIR: &str = "TRIFORCEBLITZ_PACKAGE_CACHE_DIR";
pub const ENV_LOCK_FILE: &str = "TRIFORCEBLITZ_LOCK_FILE";
pub const ENV_GITHUB_TOKEN: &str = "GITHUB_TOKEN";

/// Source used when none is configured.
pub const DEFAULT_SOURCE: &str = "github:Elagatua/OoT-Randomizer";

const APP_DIR: &str = "triforceblitz";

/// Values given on the command line. They win over the environment.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub generators_dir: Option<PathBuf>,
    pub cache_dir: Option<PathBuf>,
    pub lock_file: Option<PathBuf>,
    pub api_url: Option<String>,
    pub sources: Vec<SourceSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    /// Generators are installed into `<generators_dir>/<version>`.
    pub generators_dir: PathBuf,
    /// Root of every source's package cache.
    pub cache_dir: PathBuf,
    pub lock_file: PathBuf,
}

impl Paths {
    /// Resolves each path from its override, then its environment variable,
    /// then the user cache directory. The lock file defaults to living in
    /// the package cache directory.
    pub fn resolve<R: Runtime + ?Sized>(runtime: &R, overrides: &Overrides) -> Self {
        let generators_dir = overrides
            .generators_dir
            .clone()
            .or_else(|| env_path(runtime, ENV_GENERATORS_DIR))
            .unwrap_or_else(|| default_dir(runtime, "generators"));
        let cache_dir = overrides
            .cache_dir
            .clone()
            .or_else(|| env_path(runtime, ENV_PACKAGE_CACHE_DIR))
            .unwrap_or_else(|| default_dir(runtime, "packages"));
        let lock_file = overrides
            .lock_file
            .clone()
            .or_else(|| env_path(runtime, ENV_LOCK_FILE))
            .unwrap_or_else(|| cache_dir.join(LOCK_FILENAME));

        Self {
            generators_dir,
            cache_dir,
            lock_file,
        }
    }
}

/// Empty values count as unset.
fn env_path<R: Runtime + ?Sized>(runtime: &R, key: &str) -> Option<PathBuf> {
    runtime
        .env_var(key)
        .ok()
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

fn default_dir<R: Runtime + ?Sized>(runtime: &R, name: &str) -> PathBuf {
    match runtime.cache_dir() {
        Some(dir) => dir.join(APP_DIR).join(name),
        None => PathBuf::from(name),
    }
}

pub struct Config<R: Runtime> {
    pub runtime: Arc<R>,
    pub paths: Paths,
    pub http_client: HttpClient,
    pub api_url: String,
    pub sources: Vec<SourceSpec>,
}

impl<R: Runtime + 'static> Config<R> {
    pub fn new(runtime: Arc<R>, overrides: Overrides) -> Result<Self> {
        let paths = Paths::resolve(runtime.as_ref(), &overrides);
        debug!("Resolved paths: {:?}", paths);

        let token = runtime
            .env_var(ENV_GITHUB_TOKEN)
            .ok()
            .filter(|t| !t.is_empty());
        if let Some(token) = &token {
            debug!("Using {} for authentication: {}", ENV_GITHUB_TOKEN, mask(token));
        }
        let http_client = HttpClient::build(token.as_deref())?;

        let sources = if overrides.sources.is_empty() {
            vec![DEFAULT_SOURCE.parse()?]
        } else {
            overrides.sources
        };

        Ok(Self {
            runtime,
            paths,
            http_client,
            api_url: overrides
                .api_url
                .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            sources,
        })
    }

    /// A package manager with every configured source registered in order.
    /// The catalog is empty until `update` is called.
    pub fn package_manager(&self) -> PackageManager<R> {
        let mut manager =
            PackageManager::new(self.runtime.clone(), self.paths.generators_dir.clone());
        for spec in &self.sources {
            manager.add_source(spec.build(
                self.runtime.clone(),
                &self.http_client,
                &self.api_url,
                &self.paths.cache_dir,
            ));
        }
        manager
    }
}

fn mask(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= 12 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}*********{}", head, tail)
}
