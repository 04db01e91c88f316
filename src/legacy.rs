//! Metadata for Triforce Blitz releases that predate shipped metadata files.
//!
//! Only the `blitz` branch up to `blitz-0.59` is covered. Later releases ship
//! their own `.generator-metadata.json`.

use crate::error::MetadataError;
use crate::metadata::{DEFAULT_PRESET, Metadata, Preset};
use crate::version::Version;

const LEGACY_BRANCH: &str = "blitz";

struct LegacyTable {
    /// Exclusive upper bound of the branch minor range.
    below: u32,
    prerelease: bool,
    presets: &'static [(&'static str, &'static str, i32)],
}

// Sorted by `below`; each range starts where the previous one ends.
const LEGACY_TABLES: &[LegacyTable] = &[
    // blitz-0.0 .. blitz-0.19
    LegacyTable {
        below: 20,
        prerelease: true,
        presets: &[(DEFAULT_PRESET, "Triforce Blitz", 0)],
    },
    // blitz-0.20 .. blitz-0.39
    LegacyTable {
        below: 40,
        prerelease: false,
        presets: &[
            (DEFAULT_PRESET, "Triforce Blitz", 0),
            ("triforce-blitz-s1", "Triforce Blitz", 100),
        ],
    },
    // blitz-0.40 .. blitz-0.42
    LegacyTable {
        below: 43,
        prerelease: false,
        presets: &[
            (DEFAULT_PRESET, "Triforce Blitz S2", 0),
            ("triforce-blitz-s2", "Triforce Blitz S2", 200),
        ],
    },
    // blitz-0.43
    LegacyTable {
        below: 44,
        prerelease: false,
        presets: &[
            (DEFAULT_PRESET, "Triforce Blitz S2", 0),
            ("triforce-blitz-s2-jabus-revenge", "Triforce Blitz S2", 201),
        ],
    },
    // blitz-0.44 .. blitz-0.59
    LegacyTable {
        below: 60,
        prerelease: false,
        presets: &[
            (DEFAULT_PRESET, "Triforce Blitz S3", 0),
            ("triforce-blitz-s3", "Triforce Blitz S3", 300),
        ],
    },
];

/// Builds the metadata a legacy release would have shipped.
///
/// Fails for any branch other than `blitz` and for versions from
/// `blitz-0.60` onward.
pub fn infer_metadata(version: &Version) -> Result<Metadata, MetadataError> {
    if version.branch != LEGACY_BRANCH {
        return Err(MetadataError::UnsupportedBranch(version.branch.clone()));
    }
    if version.branch_major > 0 {
        return Err(MetadataError::UnsupportedVersion(version.to_string()));
    }

    let table = LEGACY_TABLES
        .iter()
        .find(|t| version.branch_minor < t.below)
        .ok_or_else(|| MetadataError::UnsupportedVersion(version.to_string()))?;

    Ok(Metadata {
        version: version.to_string(),
        prerelease: table.prerelease,
        presets: table
            .presets
            .iter()
            .map(|(id, value, ordinal)| (id.to_string(), Preset::new(value, *ordinal)))
            .collect(),
    })
}
