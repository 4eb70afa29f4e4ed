//! Volume file discovery per specimen, bin level, and processing variant.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::constants::naming::{BIN_MARKER_PREFIX, DECONVOLVED_MARKER, DENOISED_MARKER};
use crate::errors::IndexError;
use crate::transport::fs::{EntryKind, file_name_str, sorted_entries};
use crate::types::SpecimenToken;

/// Post-processing variant of a tomogram volume.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeVariant {
    /// Unfiltered acquisition: carries neither variant marker.
    Raw,
    /// Denoised volume.
    Denoised,
    /// Deconvolved volume.
    Deconvolved,
}

/// Substring markers that identify filtered variants in file names.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantMarkers {
    /// Marker embedded in denoised volume names.
    pub denoised: String,
    /// Marker embedded in deconvolved volume names.
    pub deconvolved: String,
}

impl Default for VariantMarkers {
    fn default() -> Self {
        Self {
            denoised: DENOISED_MARKER.to_string(),
            deconvolved: DECONVOLVED_MARKER.to_string(),
        }
    }
}

impl VariantMarkers {
    /// Markers for the denoised and deconvolved variants.
    pub fn new(denoised: impl Into<String>, deconvolved: impl Into<String>) -> Self {
        Self {
            denoised: denoised.into(),
            deconvolved: deconvolved.into(),
        }
    }

    /// True if `name` is an instance of `variant` under these markers.
    pub fn matches(&self, name: &str, variant: VolumeVariant) -> bool {
        let denoised = name.contains(self.denoised.as_str());
        let deconvolved = name.contains(self.deconvolved.as_str());
        match variant {
            VolumeVariant::Raw => !denoised && !deconvolved,
            VolumeVariant::Denoised => denoised && !deconvolved,
            VolumeVariant::Deconvolved => deconvolved && !denoised,
        }
    }
}

/// True if `name` embeds `bin<level>` not followed by another digit.
pub fn has_bin_marker(name: &str, bin_level: u32) -> bool {
    let marker = format!("{BIN_MARKER_PREFIX}{bin_level}");
    name.match_indices(marker.as_str()).any(|(start, _)| {
        !name[start + marker.len()..]
            .chars()
            .next()
            .is_some_and(|ch| ch.is_ascii_digit())
    })
}

/// Resolves volume paths inside a tree of `<root>/<specimen>/` directories.
#[derive(Clone, Debug)]
pub struct PathResolver {
    root: PathBuf,
    markers: VariantMarkers,
}

impl PathResolver {
    /// Create a resolver over `root` with default variant markers.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            markers: VariantMarkers::default(),
        }
    }

    /// Override the variant markers.
    pub fn with_markers(mut self, markers: VariantMarkers) -> Self {
        self.markers = markers;
        self
    }

    /// Root directory holding one folder per specimen.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of `specimen`.
    pub fn specimen_dir(&self, specimen: &str) -> PathBuf {
        self.root.join(specimen)
    }

    /// First file (by name) in the specimen directory matching `bin_level` and `variant`.
    ///
    /// `Ok(None)` means the variant is simply not present for this specimen.
    pub fn resolve_tomogram_path(
        &self,
        specimen: &str,
        bin_level: u32,
        variant: VolumeVariant,
    ) -> Result<Option<PathBuf>, IndexError> {
        let dir = self.specimen_dir(specimen);
        if !dir.is_dir() {
            return Err(IndexError::MissingDirectory {
                specimen: specimen.to_string(),
                path: dir,
            });
        }
        let found = sorted_entries(&dir, EntryKind::File)?
            .into_iter()
            .find(|path| {
                file_name_str(path).is_some_and(|name| {
                    has_bin_marker(name, bin_level) && self.markers.matches(name, variant)
                })
            });
        match &found {
            Some(path) => debug!(
                specimen,
                bin_level,
                ?variant,
                path = %path.display(),
                "resolved tomogram"
            ),
            None => debug!(specimen, bin_level, ?variant, "no tomogram for variant"),
        }
        Ok(found)
    }

    /// True if every specimen in `specimens` has a `variant` file at `bin_level`.
    pub fn variant_available_for_all(
        &self,
        specimens: &[SpecimenToken],
        bin_level: u32,
        variant: VolumeVariant,
    ) -> Result<bool, IndexError> {
        for specimen in specimens {
            if self
                .resolve_tomogram_path(specimen, bin_level, variant)?
                .is_none()
            {
                return Ok(false);
            }
        }
        Ok(true)
    }
}
