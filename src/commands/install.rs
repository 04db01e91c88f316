use anyhow::Result;
use log::debug;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::{
    installer::{DEFAULT_CONCURRENCY, InstallReport, Installer, Whitelist},
    manager::PackageManager,
    runtime::Runtime,
    version::Version,
};

#[derive(Debug, Clone)]
pub struct InstallOptions {
    /// Explicit versions. When empty, everything on `branches` is installed.
    pub versions: Vec<Version>,
    pub branches: Vec<String>,
    pub no_cache: bool,
    pub jobs: usize,
}

impl Default for InstallOptions {
    fn default() -> Self {
        Self {
            versions: Vec::new(),
            branches: vec!["blitz".to_string()],
            no_cache: false,
            jobs: DEFAULT_CONCURRENCY,
        }
    }
}

/// Install the requested generators. Returns `false` if anything failed.
#[tracing::instrument(skip(manager, cancel))]
pub async fn install<R: Runtime + 'static>(
    manager: Arc<PackageManager<R>>,
    options: &InstallOptions,
    cancel: CancellationToken,
) -> Result<bool> {
    let installer = Installer::new(manager)
        .with_cache_packages(!options.no_cache)
        .with_concurrency(options.jobs)
        .with_cancellation(cancel);

    let result = if options.versions.is_empty() {
        let whitelist: Whitelist = options
            .branches
            .iter()
            .map(|b| b.trim())
            .filter(|b| !b.is_empty())
            .collect();
        debug!("Installing all packages on {:?}", whitelist);
        installer.install_all(&whitelist).await
    } else {
        installer.install(&options.versions).await
    };

    match result {
        Ok(report) => Ok(summarize(&report)),
        Err(e) => {
            println!("Installation failed: {:#}", e);
            Ok(false)
        }
    }
}

fn summarize(report: &InstallReport) -> bool {
    if report.candidates.is_empty() {
        println!("Nothing to install");
    }
    let failed = report.failed().len();
    if failed > 0 {
        debug!(
            "{} of {} generator(s) failed to install",
            failed,
            report.candidates.len()
        );
    }
    failed == 0
}
