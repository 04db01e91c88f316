use anyhow::Result;
use chrono::SecondsFormat;
use log::debug;
use std::io::Write;

use crate::{
    generators::{InstalledGenerators, scan_installed},
    manager::PackageManager,
    runtime::Runtime,
};

/// Print every available generator, newest first, followed by the presets
/// of the generators found on disk.
#[tracing::instrument(skip(manager))]
pub fn list<R: Runtime>(manager: &PackageManager<R>) -> Result<()> {
    let installed = scan_installed(manager.runtime(), manager.install_dir())?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    write_table(manager, &mut out)?;
    write_installed(&installed, &mut out)
}

fn write_table<R: Runtime, W: Write>(manager: &PackageManager<R>, out: &mut W) -> Result<()> {
    let packages = manager.available_packages();
    debug!("Listing {} package(s)", packages.len());

    writeln!(out, "{:<25} {:<37} {:<20}", "Version", "Installed", "Published at")?;
    for info in packages {
        writeln!(
            out,
            "{:<25.25} {:<37.37} {:<20.20}",
            info.version.to_string(),
            info.is_installed(manager.runtime()).to_string(),
            info.published_at.to_rfc3339_opts(SecondsFormat::Secs, true)
        )?;
    }
    Ok(())
}

fn write_installed<W: Write>(installed: &InstalledGenerators, out: &mut W) -> Result<()> {
    if installed.is_empty() {
        return Ok(());
    }

    writeln!(out)?;
    writeln!(out, "{:<25} {}", "Generator", "Presets")?;
    for generator in &installed.generators {
        writeln!(
            out,
            "{:<25.25} {}",
            generator.version.to_string(),
            generator.preset_ids().join(", ")
        )?;
    }
    for invalid in &installed.invalid {
        let name = invalid
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| invalid.path.display().to_string());
        writeln!(
            out,
            "{:<25.25} skipped: {}",
            name,
            invalid.error.root_cause()
        )?;
    }
    Ok(())
}
