//! Generator metadata files.
//!
//! Every installed generator carries a `.generator-metadata.json` describing
//! its presets. Newer packages ship the file; older ones get one synthesized
//! by [`crate::legacy`].

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::MetadataError;
use crate::runtime::Runtime;
use crate::version::Version;

/// File name of the metadata file inside an install directory.
pub const METADATA_FILENAME: &str = ".generator-metadata.json";

/// Id of the preset every metadata file must define.
pub const DEFAULT_PRESET: &str = "default";

/// A named settings preset offered by a generator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preset {
    #[serde(rename = "preset")]
    pub value: String,
    /// Display ranking; zero means unranked.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub ordinal: i32,
}

impl Preset {
    pub fn new(value: &str, ordinal: i32) -> Self {
        Self {
            value: value.to_string(),
            ordinal,
        }
    }
}

fn is_zero(n: &i32) -> bool {
    *n == 0
}

fn is_false(b: &bool) -> bool {
    !*b
}

pub type PresetMap = BTreeMap<String, Preset>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub version: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub prerelease: bool,
    pub presets: PresetMap,
}

impl Metadata {
    /// Checks the version first, then that presets exist, then that the
    /// default preset is among them.
    pub fn validate(&self) -> Result<(), MetadataError> {
        if !Version::is_valid(&self.version) {
            return Err(MetadataError::InvalidVersion(self.version.clone()));
        }
        if self.presets.is_empty() {
            return Err(MetadataError::NoPresets);
        }
        self.default_preset()?;
        Ok(())
    }

    pub fn default_preset(&self) -> Result<&Preset, MetadataError> {
        self.presets
            .get(DEFAULT_PRESET)
            .ok_or(MetadataError::NoDefaultPreset)
    }

    /// Parses and validates a metadata document.
    pub fn from_json(json: &str) -> Result<Self> {
        let metadata: Metadata =
            serde_json::from_str(json).context("Failed to parse metadata JSON")?;
        metadata.validate()?;
        Ok(metadata)
    }

    #[tracing::instrument(skip(runtime))]
    pub fn load<R: Runtime + ?Sized>(runtime: &R, path: &Path) -> Result<Self> {
        let content = runtime.read_to_string(path)?;
        Self::from_json(&content).with_context(|| format!("Invalid metadata in {:?}", path))
    }

    #[tracing::instrument(skip(self, runtime))]
    pub fn save<R: Runtime + ?Sized>(&self, runtime: &R, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        runtime.write(path, json.as_bytes())
    }
}
