use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::constants::rejoin::DEFAULT_TABLE_NAME;
use crate::constants::splits::DEFAULT_SEED;
use crate::data::DistanceTarget;
use crate::errors::IndexError;
use crate::resolve::VariantMarkers;
use crate::splits::{OverridePolicy, SplitLabel, SplitOverrides, SplitRatios};

/// Controls how a specimen tree is indexed into a record table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Bin level of the working volumes (`tomoPath`, variant paths).
    pub bin_level: u32,
    /// Bin level of the denoised reference volume (`tomoBin4Path`).
    pub reference_bin_level: u32,
    /// Pixel spacing at bin 1, written to every row.
    pub pixel_spacing: f64,
    /// Unbinned z offset; `None` omits the column.
    pub unbinned_offset_z: Option<f64>,
    /// Ground-truth output directory recorded in `gtPath`.
    ///
    /// Indexing only records the path;
    /// [`SpecimenIndexer::export_ground_truth`](crate::indexer::SpecimenIndexer::export_ground_truth)
    /// fills it with `<specimen>/as_xml/*.xml` copies of the annotations.
    pub ground_truth_dir: PathBuf,
    /// Substrings that identify filtered volume variants.
    pub markers: VariantMarkers,
    /// Request the `tomoPathDenoised` column (kept only if every specimen has one).
    pub include_denoised: bool,
    /// Request the `tomoPathDeconvolved` column (kept only if every specimen has one).
    pub include_deconvolved: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            bin_level: 4,
            reference_bin_level: 4,
            pixel_spacing: 14.08,
            unbinned_offset_z: Some(0.0),
            ground_truth_dir: PathBuf::from("gt_coords"),
            markers: VariantMarkers::default(),
            include_denoised: true,
            include_deconvolved: true,
        }
    }
}

impl IndexConfig {
    /// Set the working bin level.
    pub fn with_bin_level(mut self, bin_level: u32) -> Self {
        self.bin_level = bin_level;
        self
    }

    /// Set the reference bin level.
    pub fn with_reference_bin_level(mut self, bin_level: u32) -> Self {
        self.reference_bin_level = bin_level;
        self
    }

    /// Set the bin-1 pixel spacing.
    pub fn with_pixel_spacing(mut self, pixel_spacing: f64) -> Self {
        self.pixel_spacing = pixel_spacing;
        self
    }

    /// Set or clear the unbinned z offset.
    pub fn with_unbinned_offset_z(mut self, offset: Option<f64>) -> Self {
        self.unbinned_offset_z = offset;
        self
    }

    /// Set the ground-truth directory.
    pub fn with_ground_truth_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.ground_truth_dir = dir.into();
        self
    }

    /// Set the variant markers.
    pub fn with_markers(mut self, markers: VariantMarkers) -> Self {
        self.markers = markers;
        self
    }

    /// Request or suppress the optional variant columns.
    pub fn with_variants(mut self, denoised: bool, deconvolved: bool) -> Self {
        self.include_denoised = denoised;
        self.include_deconvolved = deconvolved;
        self
    }
}

/// Split assignment settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitConfig {
    /// Percentages for train/validation/test.
    pub ratios: SplitRatios,
    /// Seed for the split RNG.
    pub seed: u64,
    /// Treatment of override keys that match no row.
    pub policy: OverridePolicy,
    /// Explicit per-record assignments.
    pub overrides: SplitOverrides,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            ratios: SplitRatios::default(),
            seed: DEFAULT_SEED,
            policy: OverridePolicy::default(),
            overrides: SplitOverrides::default(),
        }
    }
}

/// Subvolume aggregation settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    /// Label channels, in output order.
    pub targets: Vec<DistanceTarget>,
    /// Only aggregate subvolumes at this bin level.
    pub bin_level: Option<u32>,
    /// Cap applied to every label value.
    pub max_distance: Option<f32>,
    /// Rescale each feature vector to `[0, 1]`.
    pub normalize: bool,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            targets: vec![
                DistanceTarget::Merged(vec!["PSII".into(), "UK".into()]),
                DistanceTarget::from("b6f"),
            ],
            bin_level: None,
            max_distance: Some(7.0),
            normalize: false,
        }
    }
}

impl AggregationConfig {
    /// Aggregate exactly these targets.
    pub fn with_targets<I, T>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<DistanceTarget>,
    {
        self.targets = targets.into_iter().map(Into::into).collect();
        self
    }

    /// Restrict to one bin level.
    pub fn with_bin_level(mut self, bin_level: Option<u32>) -> Self {
        self.bin_level = bin_level;
        self
    }

    /// Set or clear the label cap.
    pub fn with_max_distance(mut self, max_distance: Option<f32>) -> Self {
        self.max_distance = max_distance;
        self
    }

    /// Enable per-sample min-max feature normalization.
    pub fn with_normalize(mut self, normalize: bool) -> Self {
        self.normalize = normalize;
        self
    }
}

/// Prediction rejoin and export settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RejoinConfig {
    /// Label/prediction channels, in the order the predictor emits them.
    pub targets: Vec<DistanceTarget>,
    /// Factor applied to positions before export.
    pub bin_factor: f32,
    /// Directory receiving per-group CSVs and the consolidated table.
    pub out_dir: PathBuf,
    /// File name of the consolidated table inside `out_dir`.
    pub table_name: String,
}

impl Default for RejoinConfig {
    fn default() -> Self {
        Self {
            targets: AggregationConfig::default().targets,
            bin_factor: 4.0,
            out_dir: PathBuf::from("heatmaps"),
            table_name: DEFAULT_TABLE_NAME.to_string(),
        }
    }
}

impl RejoinConfig {
    /// Rejoin into `out_dir` using `targets`.
    pub fn new(out_dir: impl Into<PathBuf>, targets: Vec<DistanceTarget>) -> Self {
        Self {
            targets,
            out_dir: out_dir.into(),
            ..Self::default()
        }
    }

    /// Set the position scaling factor.
    pub fn with_bin_factor(mut self, bin_factor: f32) -> Self {
        self.bin_factor = bin_factor;
        self
    }

    /// Set the consolidated table file name.
    pub fn with_table_name(mut self, table_name: impl Into<String>) -> Self {
        self.table_name = table_name.into();
        self
    }

    /// Path of the consolidated table.
    pub fn table_path(&self) -> PathBuf {
        self.out_dir.join(&self.table_name)
    }
}

/// Top-level pipeline configuration, loadable from JSON.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Indexing settings.
    pub index: IndexConfig,
    /// Split assignment settings.
    pub splits: SplitConfig,
    /// Aggregation settings.
    pub aggregation: AggregationConfig,
    /// Split whose records are sent to the predictor.
    pub inference_split: SplitLabel,
    /// Samples per predictor call.
    pub batch_size: usize,
    /// Rejoin settings.
    pub rejoin: RejoinConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            index: IndexConfig::default(),
            splits: SplitConfig::default(),
            aggregation: AggregationConfig::default(),
            inference_split: SplitLabel::Test,
            batch_size: 512,
            rejoin: RejoinConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Parse a configuration from JSON text; absent fields take defaults.
    pub fn from_json_str(text: &str) -> Result<Self, IndexError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, IndexError> {
        Self::from_json_str(&fs::read_to_string(path)?)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<(), IndexError> {
        self.splits.ratios.validated()?;
        if self.batch_size == 0 {
            return Err(IndexError::Configuration(
                "batch_size must be greater than zero".to_string(),
            ));
        }
        if self.aggregation.targets.is_empty() {
            return Err(IndexError::Configuration(
                "at least one distance target is required".to_string(),
            ));
        }
        if self.aggregation.targets != self.rejoin.targets {
            return Err(IndexError::Configuration(
                "aggregation and rejoin targets differ".to_string(),
            ));
        }
        if self.rejoin.table_name.is_empty() {
            return Err(IndexError::Configuration(
                "rejoin table_name must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::RecordKey;

    #[test]
    fn defaults_follow_pipeline_settings() {
        let config = PipelineConfig::default();
        assert_eq!(config.index.bin_level, 4);
        assert_eq!(config.index.pixel_spacing, 14.08);
        assert_eq!(config.splits.ratios, SplitRatios::new(80, 20, 0));
        assert_eq!(config.splits.policy, OverridePolicy::StrictTest);
        assert_eq!(config.aggregation.max_distance, Some(7.0));
        assert_eq!(config.aggregation.targets[0].channel_name(), "PSII_UK");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_json_fills_in_defaults() {
        let config = PipelineConfig::from_json_str(
            r#"{
                "index": {"bin_level": 2, "unbinned_offset_z": null},
                "splits": {
                    "ratios": {"train": 70, "validation": 20, "test": 10},
                    "policy": "lenient",
                    "overrides": {"test": {"Tomo_17": [["S1_", "M2"]]}}
                },
                "batch_size": 128
            }"#,
        )
        .unwrap();
        assert_eq!(config.index.bin_level, 2);
        assert_eq!(config.index.reference_bin_level, 4);
        assert_eq!(config.index.unbinned_offset_z, None);
        assert_eq!(config.splits.policy, OverridePolicy::Lenient);
        assert_eq!(config.splits.seed, DEFAULT_SEED);
        assert_eq!(
            config.splits.overrides.keys_for(SplitLabel::Test),
            vec![RecordKey::new("Tomo_17", "S1_", "M2")]
        );
        assert_eq!(config.batch_size, 128);
        assert_eq!(config.inference_split, SplitLabel::Test);
    }

    #[test]
    fn invalid_ratios_are_rejected_on_load() {
        let err = PipelineConfig::from_json_str(
            r#"{"splits": {"ratios": {"train": 80, "validation": 10, "test": 5}}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, IndexError::InvalidRatio { .. }));

        let err = PipelineConfig::from_json_str(
            r#"{"splits": {"ratios": {"train": 4294967295, "validation": 101, "test": 0}}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, IndexError::InvalidRatio { .. }));
    }

    #[test]
    fn mismatched_targets_are_rejected() {
        let err = PipelineConfig::from_json_str(r#"{"aggregation": {"targets": ["PSII"]}}"#)
            .unwrap_err();
        assert!(matches!(err, IndexError::Configuration(_)));

        let config = PipelineConfig::from_json_str(
            r#"{"aggregation": {"targets": ["PSII"]}, "rejoin": {"targets": ["PSII"]}}"#,
        )
        .unwrap();
        assert_eq!(config.rejoin.table_path(), PathBuf::from("heatmaps/predictions.star"));
    }
}
