use anyhow::{Context, Result, bail};
use flate2::read::GzDecoder;
use log::{debug, warn};
use std::path::{Component, Path, PathBuf};
use tar::{Archive, EntryType};
use tokio_util::sync::CancellationToken;

use crate::runtime::Runtime;

/// Extracts a `.tar.gz` archive into `extract_to`, creating it if needed.
///
/// Only directories and regular files are written; links, devices and
/// extension headers are skipped. Entries that would land outside
/// `extract_to` are skipped as well. Cancellation is checked before each
/// entry.
#[tracing::instrument(skip(runtime, cancel))]
pub fn extract_tar_gz<R: Runtime + ?Sized>(
    runtime: &R,
    archive_path: &Path,
    extract_to: &Path,
    cancel: &CancellationToken,
) -> Result<()> {
    debug!("Extracting {:?} to {:?}...", archive_path, extract_to);

    let file = runtime
        .open(archive_path)
        .with_context(|| format!("Failed to open archive at {:?}", archive_path))?;
    let mut archive = Archive::new(GzDecoder::new(file));

    runtime.create_dir_all(extract_to)?;

    let entries = archive
        .entries()
        .with_context(|| format!("Failed to read archive {:?}", archive_path))?;

    for entry in entries {
        if cancel.is_cancelled() {
            bail!("Extraction of {:?} was cancelled", archive_path);
        }

        let mut entry = entry.context("Failed to read archive entry")?;
        let entry_path = entry.path().context("Archive entry has an invalid path")?;
        let Some(relative) = enclosed_path(&entry_path) else {
            warn!("Skipping archive entry outside destination: {:?}", entry_path);
            continue;
        };
        let target = extract_to.join(&relative);

        match entry.header().entry_type() {
            EntryType::Directory => {
                runtime.create_dir_all(&target)?;
            }
            EntryType::Regular | EntryType::Continuous => {
                if let Some(parent) = target.parent() {
                    runtime.create_dir_all(parent)?;
                }
                let mut dest = runtime.create_file(&target)?;
                std::io::copy(&mut entry, &mut dest)
                    .with_context(|| format!("Failed to extract file {:?}", target))?;
            }
            other => {
                debug!("Skipping {:?} entry {:?}", other, relative);
            }
        }
    }

    Ok(())
}

/// Normalizes an entry path, refusing absolute paths and `..` escapes.
fn enclosed_path(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if out.as_os_str().is_empty() {
        None
    } else {
        Some(out)
    }
}
