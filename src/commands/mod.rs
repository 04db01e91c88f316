use anyhow::{Context, Result};
use log::debug;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::{
    config::Config,
    error::LockError,
    lockfile::LockFile,
    runtime::Runtime,
};

mod install;
mod list;

pub use install::{InstallOptions, install};
pub use list::list;

/// What to do once the packages are locked and the catalog is fresh.
#[derive(Debug, Clone)]
pub enum Action {
    List,
    Install(InstallOptions),
}

/// Prepares the package directories, takes the lock, refreshes the catalog
/// and runs `action`. Returns `false` when the action did not fully succeed.
#[tracing::instrument(skip(config, cancel))]
pub async fn run<R: Runtime + 'static>(
    config: Config<R>,
    action: Action,
    cancel: CancellationToken,
) -> Result<bool> {
    let runtime = config.runtime.as_ref();
    runtime
        .create_dir_all(&config.paths.generators_dir)
        .with_context(|| {
            format!(
                "Cannot create generator directory {:?}",
                config.paths.generators_dir
            )
        })?;
    runtime
        .create_dir_all(&config.paths.cache_dir)
        .with_context(|| {
            format!(
                "Cannot create package cache directory {:?}",
                config.paths.cache_dir
            )
        })?;

    let lock = LockFile::new(config.runtime.clone(), config.paths.lock_file.clone());
    let guard = match lock.acquire_guard() {
        Ok(guard) => guard,
        Err(e) => {
            debug!("{}", e);
            match e {
                LockError::LockFileLocked(_) => {
                    println!("Packages are locked, is another instance running?")
                }
                LockError::LockNotAcquired { .. } => {
                    println!("Could not acquire lock, do you have the right permissions?")
                }
            }
            return Ok(false);
        }
    };

    let mut manager = config.package_manager();
    manager.update(&cancel).await;
    let manager = Arc::new(manager);

    let success = match action {
        Action::List => {
            list(&manager)?;
            true
        }
        Action::Install(options) => install(manager, &options, cancel).await?,
    };

    guard.release()?;
    Ok(success)
}
