//! Discovery of installed generators.
//!
//! The generators directory is walked for metadata files. A directory that
//! holds one is a generator and is not descended into. Generators whose
//! metadata cannot be loaded, fails validation, or names an unparsable
//! version are skipped with a warning and reported separately.

use anyhow::{Context, Result};
use log::{debug, warn};
use std::path::{Path, PathBuf};

use crate::metadata::{METADATA_FILENAME, Metadata};
use crate::runtime::Runtime;
use crate::version::Version;

#[derive(Debug, Clone)]
pub struct InstalledGenerator {
    pub version: Version,
    /// Directory holding the metadata file.
    pub path: PathBuf,
    pub metadata: Metadata,
}

impl InstalledGenerator {
    /// Preset ids, highest ordinal first, unranked presets last by id.
    pub fn preset_ids(&self) -> Vec<&str> {
        let mut presets: Vec<(&String, i32)> = self
            .metadata
            .presets
            .iter()
            .map(|(id, preset)| (id, preset.ordinal))
            .collect();
        presets.sort_by(|(a_id, a), (b_id, b)| match (*a, *b) {
            (0, 0) => a_id.cmp(b_id),
            (0, _) => std::cmp::Ordering::Greater,
            (_, 0) => std::cmp::Ordering::Less,
            (a, b) => b.cmp(&a).then_with(|| a_id.cmp(b_id)),
        });
        presets.into_iter().map(|(id, _)| id.as_str()).collect()
    }
}

/// A generator directory whose metadata was rejected.
#[derive(Debug)]
pub struct InvalidGenerator {
    pub path: PathBuf,
    pub error: anyhow::Error,
}

#[derive(Debug, Default)]
pub struct InstalledGenerators {
    /// Valid generators in walk order.
    pub generators: Vec<InstalledGenerator>,
    pub invalid: Vec<InvalidGenerator>,
}

impl InstalledGenerators {
    pub fn get(&self, version: &Version) -> Option<&InstalledGenerator> {
        self.generators.iter().find(|g| &g.version == version)
    }

    pub fn is_empty(&self) -> bool {
        self.generators.is_empty() && self.invalid.is_empty()
    }
}

/// Walks `root` for installed generators. Fails only if a directory cannot
/// be listed.
#[tracing::instrument(skip(runtime))]
pub fn scan_installed<R: Runtime + ?Sized>(
    runtime: &R,
    root: &Path,
) -> Result<InstalledGenerators> {
    let mut found = InstalledGenerators::default();
    walk(runtime, root, &mut found)
        .with_context(|| format!("Failed to scan generators in {:?}", root))?;
    debug!(
        "Found {} generator(s), {} invalid",
        found.generators.len(),
        found.invalid.len()
    );
    Ok(found)
}

fn walk<R: Runtime + ?Sized>(
    runtime: &R,
    dir: &Path,
    found: &mut InstalledGenerators,
) -> Result<()> {
    let metadata_path = dir.join(METADATA_FILENAME);
    if runtime.exists(&metadata_path) && !runtime.is_dir(&metadata_path) {
        match load(runtime, dir, &metadata_path) {
            Ok(generator) => found.generators.push(generator),
            Err(error) => {
                warn!("Skipping generator in {:?}: {:#}", dir, error);
                found.invalid.push(InvalidGenerator {
                    path: dir.to_path_buf(),
                    error,
                });
            }
        }
        return Ok(());
    }

    for path in runtime.read_dir(dir)? {
        if runtime.is_dir(&path) {
            walk(runtime, &path, found)?;
        }
    }
    Ok(())
}

fn load<R: Runtime + ?Sized>(
    runtime: &R,
    dir: &Path,
    metadata_path: &Path,
) -> Result<InstalledGenerator> {
    let metadata = Metadata::load(runtime, metadata_path)?;
    let version = metadata.version.parse()?;
    Ok(InstalledGenerator {
        version,
        path: dir.to_path_buf(),
        metadata,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MetadataError;
    use crate::runtime::{MockRuntime, RealRuntime};
    use std::fs;
    use tempfile::tempdir;

    fn version(s: &str) -> Version {
        s.parse().unwrap()
    }

    fn write_metadata(dir: &Path, json: &str) {
        fs::create_dir_all(dir).unwrap();
        fs::write(dir.join(METADATA_FILENAME), json).unwrap();
    }

    fn metadata_json(version: &str) -> String {
        format!(
            r#"{{
                "version": "{}",
                "presets": {{
                    "default": {{ "preset": "Triforce Blitz S3" }},
                    "triforce-blitz-s2": {{ "preset": "Triforce Blitz S2", "ordinal": 200 }},
                    "triforce-blitz-s3": {{ "preset": "Triforce Blitz S3", "ordinal": 300 }}
                }}
            }}"#,
            version
        )
    }

    #[test]
    fn test_scan_finds_valid_generators() {
        let root = tempdir().unwrap();
        write_metadata(
            &root.path().join("7.1.0-blitz-0.43"),
            &metadata_json("7.1.0-blitz-0.43"),
        );
        write_metadata(
            &root.path().join("nested/8.0.0-blitz-1.2"),
            &metadata_json("8.0.0-blitz-1.2"),
        );
        fs::write(root.path().join("notes.txt"), b"").unwrap();

        let found = scan_installed(&RealRuntime, root.path()).unwrap();

        assert!(found.invalid.is_empty());
        let versions: Vec<&Version> = found.generators.iter().map(|g| &g.version).collect();
        assert_eq!(
            versions,
            vec![&version("7.1.0-blitz-0.43"), &version("8.0.0-blitz-1.2")]
        );
        let nested = found.get(&version("8.0.0-blitz-1.2")).unwrap();
        assert_eq!(nested.path, root.path().join("nested/8.0.0-blitz-1.2"));
        assert_eq!(
            nested.preset_ids(),
            vec!["triforce-blitz-s3", "triforce-blitz-s2", "default"]
        );
        assert!(found.get(&version("7.1.0-blitz-0.44")).is_none());
    }

    #[test]
    fn test_scan_does_not_descend_into_generators() {
        let root = tempdir().unwrap();
        let outer = root.path().join("7.1.0-blitz-0.43");
        write_metadata(&outer, &metadata_json("7.1.0-blitz-0.43"));
        write_metadata(&outer.join("data/copy"), &metadata_json("7.1.0-blitz-0.44"));

        let found = scan_installed(&RealRuntime, root.path()).unwrap();
        assert_eq!(found.generators.len(), 1);
        assert_eq!(found.generators[0].version, version("7.1.0-blitz-0.43"));
    }

    #[test]
    fn test_scan_reports_invalid_metadata() {
        let root = tempdir().unwrap();
        write_metadata(&root.path().join("a-broken-json"), "{ not json");
        write_metadata(
            &root.path().join("b-no-default"),
            r#"{"version": "7.1.0-blitz-0.43", "presets": {"s2": {"preset": "S2"}}}"#,
        );
        write_metadata(
            &root.path().join("c-bad-version"),
            r#"{"version": "latest", "presets": {"default": {"preset": "S2"}}}"#,
        );
        write_metadata(
            &root.path().join("d-good"),
            &metadata_json("7.1.0-blitz-0.55"),
        );

        let found = scan_installed(&RealRuntime, root.path()).unwrap();

        assert_eq!(found.generators.len(), 1);
        assert_eq!(found.generators[0].version, version("7.1.0-blitz-0.55"));
        let invalid: Vec<PathBuf> = found.invalid.iter().map(|g| g.path.clone()).collect();
        assert_eq!(
            invalid,
            vec![
                root.path().join("a-broken-json"),
                root.path().join("b-no-default"),
                root.path().join("c-bad-version"),
            ]
        );
        assert_eq!(
            found.invalid[1].error.downcast_ref::<MetadataError>(),
            Some(&MetadataError::NoDefaultPreset)
        );
    }

    #[test]
    fn test_scan_empty_directory() {
        let root = tempdir().unwrap();
        let found = scan_installed(&RealRuntime, root.path()).unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn test_scan_fails_when_listing_fails() {
        let mut runtime = MockRuntime::new();
        runtime.expect_exists().return_const(false);
        runtime
            .expect_read_dir()
            .returning(|_| Err(anyhow::anyhow!("permission denied")));

        let err = scan_installed(&runtime, Path::new("/generators")).unwrap_err();
        assert!(format!("{:#}", err).contains("permission denied"));
    }
}
