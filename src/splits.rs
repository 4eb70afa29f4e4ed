use rand::Rng;
use rand::seq::index::sample;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use tracing::{info, warn};

use crate::constants::columns::{DATA_SPLIT, MEMBRANE, SPECIMEN, STACK};
use crate::constants::splits::{ALL_SPLITS, RATIO_TOTAL};
use crate::data::RecordKey;
use crate::errors::IndexError;
use crate::table::RecordTable;
use crate::types::{MembraneToken, SpecimenToken, StackToken};

/// Logical dataset partitions.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum SplitLabel {
    /// Training split.
    #[serde(rename = "train")]
    Train,
    /// Validation split.
    #[serde(rename = "val")]
    Validation,
    /// Test split.
    #[serde(rename = "test")]
    Test,
}

impl SplitLabel {
    /// Value stored in the `dataSplit` column.
    pub const fn as_str(self) -> &'static str {
        match self {
            SplitLabel::Train => "train",
            SplitLabel::Validation => "val",
            SplitLabel::Test => "test",
        }
    }
}

impl fmt::Display for SplitLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SplitLabel {
    type Err = IndexError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        ALL_SPLITS
            .into_iter()
            .find(|label| label.as_str() == value)
            .ok_or_else(|| IndexError::integrity(format!("unknown split label '{value}'")))
    }
}

/// Percentage split for train/validation/test assignment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitRatios {
    /// Percent assigned to train.
    pub train: u32,
    /// Percent assigned to validation.
    pub validation: u32,
    /// Percent assigned to test.
    pub test: u32,
}

impl Default for SplitRatios {
    fn default() -> Self {
        Self {
            train: 80,
            validation: 20,
            test: 0,
        }
    }
}

impl SplitRatios {
    /// Build ratios from three percentages.
    pub const fn new(train: u32, validation: u32, test: u32) -> Self {
        Self {
            train,
            validation,
            test,
        }
    }

    /// Validate that the percentages sum to 100.
    pub fn validated(self) -> Result<Self, IndexError> {
        let total = self
            .train
            .checked_add(self.validation)
            .and_then(|sum| sum.checked_add(self.test));
        if total != Some(RATIO_TOTAL) {
            return Err(IndexError::InvalidRatio {
                train: self.train,
                validation: self.validation,
                test: self.test,
            });
        }
        Ok(self)
    }
}

/// How missing override rows are treated.
///
/// `StrictTest` keeps train/validation overrides best-effort while a missing
/// test override aborts the run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverridePolicy {
    /// Every missing override row is skipped with a warning.
    Lenient,
    /// Missing test override rows are fatal; train/validation are skipped.
    #[default]
    StrictTest,
    /// Every missing override row is fatal.
    Strict,
}

impl OverridePolicy {
    fn missing_is_fatal(self, label: SplitLabel) -> bool {
        match self {
            OverridePolicy::Lenient => false,
            OverridePolicy::StrictTest => label == SplitLabel::Test,
            OverridePolicy::Strict => true,
        }
    }
}

/// Explicit per-record split assignments, keyed by specimen.
///
/// JSON shape: `{"train": {"Tomo_1": [["S1", "M7"]]}, "val": {...}, "test": {...}}`
/// where each pair is `[stack, membrane]`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitOverrides {
    /// Records forced into train.
    pub train: BTreeMap<SpecimenToken, Vec<(StackToken, MembraneToken)>>,
    /// Records forced into validation.
    pub val: BTreeMap<SpecimenToken, Vec<(StackToken, MembraneToken)>>,
    /// Records forced into test.
    pub test: BTreeMap<SpecimenToken, Vec<(StackToken, MembraneToken)>>,
}

impl SplitOverrides {
    /// Parse overrides from JSON text.
    pub fn from_json_str(text: &str) -> Result<Self, IndexError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Load overrides from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, IndexError> {
        Self::from_json_str(&fs::read_to_string(path)?)
    }

    /// Add an override for `key`.
    pub fn insert(&mut self, label: SplitLabel, key: RecordKey) {
        self.entries_mut(label)
            .entry(key.specimen)
            .or_default()
            .push((key.stack, key.membrane));
    }

    /// Builder form of [`SplitOverrides::insert`].
    pub fn with(mut self, label: SplitLabel, key: RecordKey) -> Self {
        self.insert(label, key);
        self
    }

    /// Override keys for `label`, ordered by specimen then listing order.
    pub fn keys_for(&self, label: SplitLabel) -> Vec<RecordKey> {
        self.entries(label)
            .iter()
            .flat_map(|(specimen, pairs)| {
                pairs
                    .iter()
                    .map(move |(stack, membrane)| RecordKey::new(specimen, stack, membrane))
            })
            .collect()
    }

    /// True if no overrides are configured.
    pub fn is_empty(&self) -> bool {
        self.train.is_empty() && self.val.is_empty() && self.test.is_empty()
    }

    fn entries(&self, label: SplitLabel) -> &BTreeMap<SpecimenToken, Vec<(StackToken, MembraneToken)>> {
        match label {
            SplitLabel::Train => &self.train,
            SplitLabel::Validation => &self.val,
            SplitLabel::Test => &self.test,
        }
    }

    fn entries_mut(
        &mut self,
        label: SplitLabel,
    ) -> &mut BTreeMap<SpecimenToken, Vec<(StackToken, MembraneToken)>> {
        match label {
            SplitLabel::Train => &mut self.train,
            SplitLabel::Validation => &mut self.val,
            SplitLabel::Test => &mut self.test,
        }
    }
}

/// Result of one split assignment pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SplitSummary {
    /// Rows labeled train.
    pub train: usize,
    /// Rows labeled validation.
    pub validation: usize,
    /// Rows labeled test.
    pub test: usize,
    /// Validation was assigned by whole specimens.
    pub specimen_level_validation: bool,
    /// Test was assigned by whole specimens.
    pub specimen_level_test: bool,
    /// Override keys that matched no row and were skipped.
    pub skipped_overrides: Vec<RecordKey>,
}

impl SplitSummary {
    /// Row count for `label`.
    pub fn count(&self, label: SplitLabel) -> usize {
        match label {
            SplitLabel::Train => self.train,
            SplitLabel::Validation => self.validation,
            SplitLabel::Test => self.test,
        }
    }
}

/// Assigns partition labels to the rows of a record table.
#[derive(Clone, Copy, Debug)]
pub struct SplitAssigner {
    ratios: SplitRatios,
    policy: OverridePolicy,
}

impl SplitAssigner {
    /// Create an assigner; fails with `InvalidRatio` unless `ratios` sum to 100.
    pub fn new(ratios: SplitRatios) -> Result<Self, IndexError> {
        Ok(Self {
            ratios: ratios.validated()?,
            policy: OverridePolicy::default(),
        })
    }

    /// Override how missing override rows are treated.
    pub fn with_policy(mut self, policy: OverridePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Configured ratios.
    pub fn ratios(&self) -> SplitRatios {
        self.ratios
    }

    /// Label every row of `table` and write the `dataSplit` column.
    ///
    /// Overrides are applied first and are never reassigned by the random
    /// stages. Validation and test are drawn as whole specimens when there are
    /// enough specimens for the ratio, and as individual rows otherwise.
    pub fn assign<R: Rng + ?Sized>(
        &self,
        table: &mut RecordTable,
        overrides: &SplitOverrides,
        rng: &mut R,
    ) -> Result<SplitSummary, IndexError> {
        let specimens = table.require(SPECIMEN)?;
        table.require(STACK)?;
        table.require(MEMBRANE)?;

        let mut labels: Vec<Option<SplitLabel>> = vec![None; table.len()];
        let mut summary = SplitSummary::default();

        for label in ALL_SPLITS {
            for key in overrides.keys_for(label) {
                match table.find_row_index(&key.specimen, &key.membrane, Some(&key.stack)) {
                    Some(idx) => labels[idx] = Some(label),
                    None if self.policy.missing_is_fatal(label) => {
                        return Err(IndexError::integrity(format!(
                            "{label} override {key} matches no record"
                        )));
                    }
                    None => {
                        warn!(split = %label, key = %key, "override matches no record; skipped");
                        summary.skipped_overrides.push(key);
                    }
                }
            }
        }

        let distinct: Vec<&str> = specimens
            .iter()
            .map(String::as_str)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut val_specimens: BTreeSet<&str> = BTreeSet::new();
        if specimen_level_eligible(distinct.len(), self.ratios.validation) {
            let take = floor_percent(self.ratios.validation, distinct.len());
            val_specimens = sample(rng, distinct.len(), take)
                .into_iter()
                .map(|idx| distinct[idx])
                .collect();
            mark_specimens(&mut labels, specimens, &val_specimens, SplitLabel::Validation);
            summary.specimen_level_validation = true;
        }

        if specimen_level_eligible(distinct.len(), self.ratios.test) {
            let remaining: Vec<&str> = distinct
                .iter()
                .copied()
                .filter(|specimen| !val_specimens.contains(specimen))
                .collect();
            let take = floor_percent(self.ratios.test, distinct.len()).min(remaining.len());
            let test_specimens: BTreeSet<&str> = sample(rng, remaining.len(), take)
                .into_iter()
                .map(|idx| remaining[idx])
                .collect();
            mark_specimens(&mut labels, specimens, &test_specimens, SplitLabel::Test);
            summary.specimen_level_test = true;
        }

        if !summary.specimen_level_validation {
            mark_random_rows(&mut labels, self.ratios.validation, SplitLabel::Validation, rng);
        }
        if !summary.specimen_level_test {
            mark_random_rows(&mut labels, self.ratios.test, SplitLabel::Test, rng);
        }

        let column: Vec<String> = labels
            .into_iter()
            .map(|label| {
                let label = label.unwrap_or(SplitLabel::Train);
                match label {
                    SplitLabel::Train => summary.train += 1,
                    SplitLabel::Validation => summary.validation += 1,
                    SplitLabel::Test => summary.test += 1,
                }
                label.as_str().to_string()
            })
            .collect();
        table.set(DATA_SPLIT, column)?;

        info!(
            train = summary.train,
            validation = summary.validation,
            test = summary.test,
            specimen_level_validation = summary.specimen_level_validation,
            specimen_level_test = summary.specimen_level_test,
            skipped_overrides = summary.skipped_overrides.len(),
            "assigned data splits"
        );
        Ok(summary)
    }
}

/// Validate `ratios`, then label every row of `table` (see [`SplitAssigner::assign`]).
pub fn assign_splits<R: Rng + ?Sized>(
    table: &mut RecordTable,
    overrides: &SplitOverrides,
    ratios: SplitRatios,
    policy: OverridePolicy,
    rng: &mut R,
) -> Result<SplitSummary, IndexError> {
    SplitAssigner::new(ratios)?
        .with_policy(policy)
        .assign(table, overrides, rng)
}

/// Parse the `dataSplit` column into labels.
pub fn split_labels(table: &RecordTable) -> Result<Vec<SplitLabel>, IndexError> {
    table
        .require(DATA_SPLIT)?
        .iter()
        .map(|value| value.parse())
        .collect()
}

/// Whole-specimen assignment needs `specimens >= 100 / percent`.
fn specimen_level_eligible(specimens: usize, percent: u32) -> bool {
    percent > 0 && specimens * percent as usize >= RATIO_TOTAL as usize
}

fn floor_percent(percent: u32, total: usize) -> usize {
    percent as usize * total / RATIO_TOTAL as usize
}

fn mark_specimens(
    labels: &mut [Option<SplitLabel>],
    specimens: &[String],
    chosen: &BTreeSet<&str>,
    label: SplitLabel,
) {
    for (slot, specimen) in labels.iter_mut().zip(specimens) {
        if slot.is_none() && chosen.contains(specimen.as_str()) {
            *slot = Some(label);
        }
    }
}

fn mark_random_rows<R: Rng + ?Sized>(
    labels: &mut [Option<SplitLabel>],
    percent: u32,
    label: SplitLabel,
    rng: &mut R,
) {
    let pool: Vec<usize> = labels
        .iter()
        .enumerate()
        .filter_map(|(idx, slot)| slot.is_none().then_some(idx))
        .collect();
    let take = floor_percent(percent, pool.len());
    if take == 0 {
        return;
    }
    for pick in sample(rng, pool.len(), take) {
        labels[pool[pick]] = Some(label);
    }
}
