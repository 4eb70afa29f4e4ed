//! Joins per-membrane subvolume data with split labels into flat training arrays.

use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, warn};

use crate::config::AggregationConfig;
use crate::data::DistanceTarget;
use crate::errors::IndexError;
use crate::splits::{SplitLabel, split_labels};
use crate::table::RecordTable;
use crate::types::{MembraneToken, SpecimenToken, StackToken};

/// Address of one membrane's subvolumes in a store.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubvolumeKey {
    /// Specimen token.
    pub specimen: SpecimenToken,
    /// Bin level the subvolumes were extracted at.
    pub bin_level: u32,
    /// Stack token.
    pub stack: StackToken,
    /// Membrane token.
    pub membrane: MembraneToken,
}

impl SubvolumeKey {
    /// Build a key.
    pub fn new(
        specimen: impl Into<SpecimenToken>,
        bin_level: u32,
        stack: impl Into<StackToken>,
        membrane: impl Into<MembraneToken>,
    ) -> Self {
        Self {
            specimen: specimen.into(),
            bin_level,
            stack: stack.into(),
            membrane: membrane.into(),
        }
    }
}

/// Numeric data for every sample point of one membrane.
///
/// `features` is row-major with `feature_len` values per sample; every other
/// array carries one entry per sample.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SubvolumeBatch {
    /// Flattened subvolume length per sample.
    pub feature_len: usize,
    /// Row-major subvolume values.
    pub features: Vec<f32>,
    /// Sample positions.
    pub positions: Vec<[f32; 3]>,
    /// Membrane normals.
    pub normals: Vec<[f32; 3]>,
    /// Euler angles.
    pub angles: Vec<[f32; 3]>,
    /// Distance channels keyed by store name (`dist_PSII`).
    pub distances: BTreeMap<String, Vec<f32>>,
}

impl SubvolumeBatch {
    /// Number of samples.
    pub fn rows(&self) -> usize {
        self.positions.len()
    }

    /// Add or replace a distance channel for `target`.
    pub fn with_distances(mut self, target: &DistanceTarget, values: Vec<f32>) -> Self {
        self.distances.insert(target.store_channel(), values);
        self
    }

    fn validate(&self, key: &SubvolumeKey) -> Result<usize, IndexError> {
        let rows = self.rows();
        let shape_error = |what: &str, found: usize, expected: usize| {
            IndexError::integrity(format!(
                "subvolume batch {}/{}/{} at bin {} has {found} {what}, expected {expected}",
                key.specimen, key.stack, key.membrane, key.bin_level
            ))
        };
        if rows > 0 && self.feature_len == 0 {
            return Err(shape_error("values per feature row", 0, 1));
        }
        if self.features.len() != rows * self.feature_len {
            return Err(shape_error("feature values", self.features.len(), rows * self.feature_len));
        }
        if self.normals.len() != rows {
            return Err(shape_error("normals", self.normals.len(), rows));
        }
        if self.angles.len() != rows {
            return Err(shape_error("angles", self.angles.len(), rows));
        }
        for (channel, values) in &self.distances {
            if values.len() != rows {
                return Err(shape_error(channel.as_str(), values.len(), rows));
            }
        }
        Ok(rows)
    }
}

/// Read access to extracted subvolumes.
pub trait SubvolumeStore: Send + Sync {
    /// Every key held by the store, in any order.
    fn keys(&self) -> Result<Vec<SubvolumeKey>, IndexError>;

    /// Data for `key`, or `None` if the store has no such key.
    fn get(&self, key: &SubvolumeKey) -> Result<Option<SubvolumeBatch>, IndexError>;
}

/// Store backed by a hash map; handy for tests and small runs.
#[derive(Clone, Debug, Default)]
pub struct InMemorySubvolumeStore {
    batches: HashMap<SubvolumeKey, SubvolumeBatch>,
}

impl InMemorySubvolumeStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a batch.
    pub fn insert(&mut self, key: SubvolumeKey, batch: SubvolumeBatch) {
        self.batches.insert(key, batch);
    }

    /// Builder form of [`InMemorySubvolumeStore::insert`].
    pub fn with(mut self, key: SubvolumeKey, batch: SubvolumeBatch) -> Self {
        self.insert(key, batch);
        self
    }
}

impl SubvolumeStore for InMemorySubvolumeStore {
    fn keys(&self) -> Result<Vec<SubvolumeKey>, IndexError> {
        Ok(self.batches.keys().cloned().collect())
    }

    fn get(&self, key: &SubvolumeKey) -> Result<Option<SubvolumeBatch>, IndexError> {
        Ok(self.batches.get(key).cloned())
    }
}

/// Flat arrays for one split, with per-sample provenance.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TrainingSet {
    /// Split the samples were drawn from.
    pub split: Option<SplitLabel>,
    /// Label channels, in column order of `labels`.
    pub targets: Vec<DistanceTarget>,
    /// Values per feature row.
    pub feature_len: usize,
    /// Values per label row (`targets.len()`).
    pub label_width: usize,
    /// Row-major features.
    pub features: Vec<f32>,
    /// Row-major labels.
    pub labels: Vec<f32>,
    /// Sample positions.
    pub positions: Vec<[f32; 3]>,
    /// Membrane normals.
    pub normals: Vec<[f32; 3]>,
    /// Euler angles.
    pub angles: Vec<[f32; 3]>,
    /// Specimen token per sample.
    pub specimens: Vec<SpecimenToken>,
    /// Stack token per sample.
    pub stacks: Vec<StackToken>,
    /// Membrane token per sample.
    pub membranes: Vec<MembraneToken>,
}

impl TrainingSet {
    /// Number of samples.
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// True if no sample was aggregated.
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Features of sample `idx`.
    pub fn feature_row(&self, idx: usize) -> Option<&[f32]> {
        let start = idx.checked_mul(self.feature_len)?;
        self.features.get(start..start + self.feature_len)
    }

    /// Labels of sample `idx`.
    pub fn label_row(&self, idx: usize) -> Option<&[f32]> {
        let start = idx.checked_mul(self.label_width)?;
        self.labels.get(start..start + self.label_width)
    }
}

/// Collect every stored subvolume whose record carries `split`.
///
/// Keys are visited in sorted order, so the output is deterministic for a
/// given store content.
pub fn aggregate(
    table: &RecordTable,
    store: &dyn SubvolumeStore,
    split: SplitLabel,
    config: &AggregationConfig,
) -> Result<TrainingSet, IndexError> {
    if config.targets.is_empty() {
        return Err(IndexError::Configuration(
            "aggregation needs at least one distance target".to_string(),
        ));
    }
    let row_labels = split_labels(table)?;
    let channels: Vec<String> = config
        .targets
        .iter()
        .map(DistanceTarget::store_channel)
        .collect();

    let mut keys = store.keys()?;
    keys.sort();

    let mut set = TrainingSet {
        split: Some(split),
        targets: config.targets.clone(),
        label_width: config.targets.len(),
        ..TrainingSet::default()
    };
    let mut feature_len: Option<usize> = None;

    for key in keys {
        if config.bin_level.is_some_and(|bin| bin != key.bin_level) {
            continue;
        }
        let row = match table.require_row_index(&key.specimen, &key.membrane, Some(&key.stack)) {
            Ok(row) => row,
            Err(IndexError::KeyNotFound { .. }) => {
                warn!(
                    specimen = %key.specimen,
                    stack = %key.stack,
                    membrane = %key.membrane,
                    "stored subvolumes have no record; skipped"
                );
                continue;
            }
            Err(err) => return Err(err),
        };
        if row_labels[row] != split {
            continue;
        }

        let batch = store.get(&key)?.ok_or_else(|| {
            IndexError::integrity(format!(
                "store listed {}/{}/{} but returned no data",
                key.specimen, key.stack, key.membrane
            ))
        })?;
        let rows = batch.validate(&key)?;
        if rows == 0 {
            continue;
        }
        match feature_len {
            None => feature_len = Some(batch.feature_len),
            Some(expected) if expected != batch.feature_len => {
                return Err(IndexError::integrity(format!(
                    "feature length {} for {}/{}/{} differs from {expected}",
                    batch.feature_len, key.specimen, key.stack, key.membrane
                )));
            }
            Some(_) => {}
        }

        let columns = channels
            .iter()
            .map(|channel| {
                batch.distances.get(channel).ok_or_else(|| {
                    IndexError::integrity(format!(
                        "channel '{channel}' missing for {}/{}/{}",
                        key.specimen, key.stack, key.membrane
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        for idx in 0..rows {
            for column in &columns {
                let value = column[idx];
                set.labels.push(match config.max_distance {
                    Some(cap) => value.min(cap),
                    None => value,
                });
            }
        }

        if config.normalize {
            for sample in batch.features.chunks(batch.feature_len) {
                set.features.extend(min_max_scaled(sample));
            }
        } else {
            set.features.extend_from_slice(&batch.features);
        }
        set.positions.extend_from_slice(&batch.positions);
        set.normals.extend_from_slice(&batch.normals);
        set.angles.extend_from_slice(&batch.angles);
        set.specimens.extend(std::iter::repeat_n(key.specimen.clone(), rows));
        set.stacks.extend(std::iter::repeat_n(key.stack.clone(), rows));
        set.membranes.extend(std::iter::repeat_n(key.membrane.clone(), rows));
        debug!(
            specimen = %key.specimen,
            stack = %key.stack,
            membrane = %key.membrane,
            rows,
            "aggregated subvolumes"
        );
    }

    set.feature_len = feature_len.unwrap_or(0);
    info!(split = %split, samples = set.len(), feature_len = set.feature_len, "aggregated split");
    Ok(set)
}

/// Rescale to `[0, 1]`; a constant sample maps to zeros.
fn min_max_scaled(sample: &[f32]) -> impl Iterator<Item = f32> + '_ {
    let (min, max) = sample
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &value| {
            (lo.min(value), hi.max(value))
        });
    let range = max - min;
    sample.iter().map(move |&value| {
        if range > 0.0 {
            (value - min) / range
        } else {
            0.0
        }
    })
}
