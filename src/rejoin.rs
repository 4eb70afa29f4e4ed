//! Regroups predictions per membrane, exports CSV artifacts and a provenance table.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::RejoinConfig;
use crate::constants::columns::HEATMAP_PATH;
use crate::constants::rejoin::{
    HEATMAP_SUFFIX, LABEL_PREFIX, ORIENTATION_HEADERS, POSITION_HEADERS, PREDICTION_PREFIX,
};
use crate::data::DistanceTarget;
use crate::errors::IndexError;
use crate::inference::PredictionSample;
use crate::table::RecordTable;
use crate::transport::fs::write_atomic;

/// Post-export hook invoked once per written CSV (mesh/visualization conversion).
pub trait ArtifactExporter {
    /// Derive further artifacts from `csv_path`.
    fn export(&self, csv_path: &Path) -> Result<(), IndexError>;
}

/// Output of a rejoin pass.
#[derive(Clone, Debug)]
pub struct RejoinReport {
    /// Consolidated table: one source row per group plus `heatmapDir`.
    pub table: RecordTable,
    /// Where the consolidated table was written.
    pub table_path: PathBuf,
    /// CSV artifacts, in table row order.
    pub artifacts: Vec<PathBuf>,
}

/// Header of the per-group CSV for `targets`.
pub fn csv_header(targets: &[DistanceTarget]) -> Vec<String> {
    let mut header: Vec<String> = POSITION_HEADERS.iter().map(|name| name.to_string()).collect();
    header.extend(
        targets
            .iter()
            .map(|target| format!("{LABEL_PREFIX}{}", target.channel_name())),
    );
    header.extend(
        targets
            .iter()
            .map(|target| format!("{PREDICTION_PREFIX}{}", target.channel_name())),
    );
    header.extend(ORIENTATION_HEADERS.iter().map(|name| name.to_string()));
    header
}

/// File name of the artifact for one specimen/stack/membrane group.
pub fn artifact_file_name(specimen: &str, stack: &str, membrane: &str) -> String {
    format!("{specimen}_{stack}_{membrane}{HEATMAP_SUFFIX}")
}

type Groups<'a> = BTreeMap<&'a str, BTreeMap<(&'a str, &'a str), Vec<&'a PredictionSample>>>;

/// Write one CSV per `(specimen, stack, membrane)` group and a consolidated table.
///
/// Every group must map to a row of `source` (matched with its stack token);
/// all lookups and width checks happen before anything is written.
pub fn rejoin(
    samples: &[PredictionSample],
    source: &RecordTable,
    config: &RejoinConfig,
    exporter: Option<&dyn ArtifactExporter>,
) -> Result<RejoinReport, IndexError> {
    let width = config.targets.len();
    for sample in samples {
        if sample.label.len() != width || sample.prediction.len() != width {
            return Err(IndexError::integrity(format!(
                "sample of {}/{}/{} has {} labels and {} predictions, expected {width} of each",
                sample.specimen,
                sample.stack,
                sample.membrane,
                sample.label.len(),
                sample.prediction.len()
            )));
        }
    }

    let mut groups: Groups<'_> = BTreeMap::new();
    for sample in samples {
        groups
            .entry(sample.specimen.as_str())
            .or_default()
            .entry((sample.stack.as_str(), sample.membrane.as_str()))
            .or_default()
            .push(sample);
    }

    let mut table = RecordTable::with_columns(source.column_names());
    let mut artifacts = Vec::new();
    let mut pending = Vec::new();
    for (specimen, members) in &groups {
        for ((stack, membrane), rows) in members {
            let row = match source.require_row_index(specimen, membrane, Some(*stack)) {
                Ok(row) => row,
                Err(IndexError::KeyNotFound { .. }) => {
                    return Err(IndexError::integrity(format!(
                        "prediction for {specimen}/{stack}/{membrane} has no source record"
                    )));
                }
                Err(err) => return Err(err),
            };
            table.push_row_from(source, row)?;
            let path = config
                .out_dir
                .join(artifact_file_name(specimen, stack, membrane));
            artifacts.push(path.clone());
            pending.push((path, rows));
        }
    }
    let heatmap_cells = artifacts
        .iter()
        .map(|path| path.display().to_string())
        .collect();
    table.set(HEATMAP_PATH, heatmap_cells)?;

    let header = csv_header(&config.targets);
    for (path, rows) in &pending {
        write_group_csv(path, &header, rows, config.bin_factor)?;
        debug!(path = %path.display(), rows = rows.len(), "wrote prediction artifact");
        if let Some(exporter) = exporter {
            exporter.export(path)?;
        }
    }

    let table_path = config.table_path();
    table.write(&table_path)?;
    info!(
        groups = artifacts.len(),
        samples = samples.len(),
        table = %table_path.display(),
        "rejoined predictions"
    );
    Ok(RejoinReport {
        table,
        table_path,
        artifacts,
    })
}

fn write_group_csv(
    path: &Path,
    header: &[String],
    rows: &[&PredictionSample],
    bin_factor: f32,
) -> Result<(), IndexError> {
    write_atomic(path, |out: &mut dyn Write| {
        let mut writer = csv::WriterBuilder::new()
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(out);
        writer.write_record(header)?;
        for sample in rows {
            let record: Vec<String> = sample
                .position
                .iter()
                .map(|value| value * bin_factor)
                .chain(sample.label.iter().copied())
                .chain(sample.prediction.iter().copied())
                .chain(sample.normal.iter().copied())
                .chain(sample.angle.iter().copied())
                .map(|value| value.to_string())
                .collect();
            writer.write_record(&record)?;
        }
        writer.flush()?;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::columns::{MEMBRANE, SEG_PATH, SPECIMEN, STACK};
    use std::cell::RefCell;
    use std::fs;
    use tempfile::tempdir;

    fn source() -> RecordTable {
        let mut table = RecordTable::new();
        for (specimen, stack, membrane) in [
            ("Tomo_1", "S1", "M1"),
            ("Tomo_1", "S2", "M1"),
            ("Tomo_2", "S1", "M4"),
        ] {
            table
                .push_row([
                    (SPECIMEN, specimen.to_string()),
                    (STACK, stack.to_string()),
                    (MEMBRANE, membrane.to_string()),
                    (SEG_PATH, format!("/segs/{specimen}_{stack}_{membrane}.mrc")),
                ])
                .unwrap();
        }
        table
    }

    fn sample(specimen: &str, stack: &str, membrane: &str, x: f32) -> PredictionSample {
        PredictionSample {
            specimen: specimen.into(),
            stack: stack.into(),
            membrane: membrane.into(),
            position: [x, 1.0, 2.0],
            normal: [0.0, 0.0, 1.0],
            angle: [10.0, 20.0, 30.0],
            label: vec![1.0, 2.0],
            prediction: vec![1.5, 2.5],
        }
    }

    fn targets() -> Vec<DistanceTarget> {
        vec![
            DistanceTarget::Merged(vec!["PSII".into(), "UK".into()]),
            DistanceTarget::from("b6f"),
        ]
    }

    #[derive(Default)]
    struct RecordingExporter {
        seen: RefCell<Vec<PathBuf>>,
    }

    impl ArtifactExporter for RecordingExporter {
        fn export(&self, csv_path: &Path) -> Result<(), IndexError> {
            self.seen.borrow_mut().push(csv_path.to_path_buf());
            Ok(())
        }
    }

    #[test]
    fn header_lists_labels_then_predictions() {
        assert_eq!(
            csv_header(&targets()).join(","),
            "posX,posY,posZ,labelDist_PSII_UK,labelDist_b6f,predDist_PSII_UK,predDist_b6f,\
             normalX,normalY,normalZ,anglePhi,angleTheta,anglePsi"
        );
    }

    #[test]
    fn writes_sorted_groups_with_provenance() {
        let temp = tempdir().unwrap();
        let config = RejoinConfig::new(temp.path(), targets()).with_bin_factor(4.0);
        let samples = vec![
            sample("Tomo_2", "S1", "M4", 5.0),
            sample("Tomo_1", "S2", "M1", 1.0),
            sample("Tomo_1", "S1", "M1", 2.0),
            sample("Tomo_1", "S2", "M1", 3.0),
        ];
        let exporter = RecordingExporter::default();
        let report = rejoin(&samples, &source(), &config, Some(&exporter)).unwrap();

        let expected = [
            temp.path().join("Tomo_1_S1_M1_heatmap.csv"),
            temp.path().join("Tomo_1_S2_M1_heatmap.csv"),
            temp.path().join("Tomo_2_S1_M4_heatmap.csv"),
        ];
        assert_eq!(report.artifacts, expected);
        assert_eq!(*exporter.seen.borrow(), expected);

        let written = RecordTable::read(&report.table_path).unwrap();
        assert_eq!(written, report.table);
        assert_eq!(written.get(STACK).unwrap(), &["S1", "S2", "S1"]);
        assert_eq!(
            written.value(SEG_PATH, 1),
            Some("/segs/Tomo_1_S2_M1.mrc")
        );
        assert_eq!(
            written.value(HEATMAP_PATH, 2).map(PathBuf::from),
            Some(expected[2].clone())
        );

        let csv_text = fs::read_to_string(&expected[1]).unwrap();
        let lines: Vec<&str> = csv_text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1], "4,4,8,1,2,1.5,2.5,0,0,1,10,20,30");
        assert_eq!(lines[2], "12,4,8,1,2,1.5,2.5,0,0,1,10,20,30");
    }

    #[test]
    fn prediction_without_source_row_aborts_before_writing() {
        let temp = tempdir().unwrap();
        let config = RejoinConfig::new(temp.path().join("out"), targets());
        let samples = vec![
            sample("Tomo_1", "S1", "M1", 0.0),
            sample("Tomo_1", "S3", "M1", 0.0),
        ];
        let err = rejoin(&samples, &source(), &config, None).unwrap_err();
        assert!(matches!(err, IndexError::DataIntegrity { .. }));
        assert!(!temp.path().join("out").exists());
    }

    #[test]
    fn width_mismatch_is_rejected() {
        let temp = tempdir().unwrap();
        let config = RejoinConfig::new(temp.path(), vec![DistanceTarget::from("PSII")]);
        let err = rejoin(&[sample("Tomo_1", "S1", "M1", 0.0)], &source(), &config, None)
            .unwrap_err();
        assert!(matches!(err, IndexError::DataIntegrity { .. }));
    }

    #[test]
    fn exporter_failure_propagates() {
        struct Failing;
        impl ArtifactExporter for Failing {
            fn export(&self, _: &Path) -> Result<(), IndexError> {
                Err(IndexError::Configuration("converter unavailable".into()))
            }
        }
        let temp = tempdir().unwrap();
        let config = RejoinConfig::new(temp.path(), targets());
        let err = rejoin(
            &[sample("Tomo_1", "S1", "M1", 0.0)],
            &source(),
            &config,
            Some(&Failing),
        )
        .unwrap_err();
        assert!(matches!(err, IndexError::Configuration(_)));
    }
}
