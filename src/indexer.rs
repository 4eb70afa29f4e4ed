//! Builds the initial record table from a tree of specimen directories.
//!
//! Expected layout, one directory per specimen under the root:
//!
//! ```text
//! <root>/Tomo_17/
//!     t17_bin4.mrc                  raw volume at bin 4
//!     t17_bin4_denoised.mrc         optional filtered variants
//!     membranes/T17_S1_M3.mrc       one segmentation per membrane
//!     positions/T17_S1_M3.xml       optional annotations
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::IndexConfig;
use crate::constants::columns::{
    GT_PATH, MEMBRANE, PIXEL_SPACING, SEG_PATH, SPECIMEN, STACK, TOMO_BIN, TOMO_PATH,
    TOMO_PATH_DECONVOLVED, TOMO_PATH_DENOISED, TOMO_REFERENCE_BIN_PATH, UNBINNED_OFFSET_Z,
};
use crate::constants::naming::{
    ANNOTATION_EXT, GROUND_TRUTH_XML_DIR, MEMBRANES_DIR_MARKER, NO_POSITIONS_DIR_MARKER,
    POSITIONS_DIR_MARKER, SEGMENTATION_EXT,
};
use crate::data::MembraneKey;
use crate::errors::IndexError;
use crate::naming::membrane_key_from_path;
use crate::reconcile::{AnnotationCoverage, Reconciliation, reconcile};
use crate::resolve::{PathResolver, VolumeVariant};
use crate::table::RecordTable;
use crate::transport::fs::{
    EntryKind, file_name_str, has_extension, sorted_entries, write_atomic,
};
use crate::types::SpecimenToken;

/// Per-specimen outcome of indexing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpecimenSummary {
    /// Specimen token.
    pub specimen: SpecimenToken,
    /// Rows emitted (one per membrane).
    pub membranes: usize,
    /// Membranes with a surviving annotation.
    pub annotated: usize,
    /// Annotations dropped for lack of a segmentation.
    pub dropped_annotations: usize,
    /// Whether a positions folder was found.
    pub has_positions: bool,
    /// Annotation coverage.
    pub coverage: AnnotationCoverage,
}

/// Table built by [`SpecimenIndexer::build_table`] plus per-specimen diagnostics.
#[derive(Clone, Debug)]
pub struct IndexReport {
    /// One row per discovered membrane.
    pub table: RecordTable,
    /// Summaries in specimen order.
    pub specimens: Vec<SpecimenSummary>,
}

struct SpecimenScan {
    specimen: SpecimenToken,
    has_positions: bool,
    reconciliation: Reconciliation,
    segmentation_paths: BTreeMap<MembraneKey, PathBuf>,
}

/// Walks a specimen tree and emits one record per segmented membrane.
#[derive(Clone, Debug)]
pub struct SpecimenIndexer {
    resolver: PathResolver,
    config: IndexConfig,
}

impl SpecimenIndexer {
    /// Create an indexer over `root`.
    pub fn new(root: impl Into<PathBuf>, config: IndexConfig) -> Self {
        let resolver = PathResolver::new(root).with_markers(config.markers.clone());
        Self { resolver, config }
    }

    /// Indexer configuration.
    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// Specimen tokens: the names of the root's subdirectories, sorted.
    pub fn specimens(&self) -> Result<Vec<SpecimenToken>, IndexError> {
        Ok(sorted_entries(self.resolver.root(), EntryKind::Directory)?
            .iter()
            .filter_map(|path| file_name_str(path).map(str::to_string))
            .collect())
    }

    /// Index every specimen under the root into one table.
    pub fn build_table(&self) -> Result<IndexReport, IndexError> {
        let specimens = self.specimens()?;
        let scans = specimens
            .iter()
            .map(|specimen| self.scan_specimen(specimen))
            .collect::<Result<Vec<_>, _>>()?;

        let bin = self.config.bin_level;
        let with_reference = self.resolver.variant_available_for_all(
            &specimens,
            self.config.reference_bin_level,
            VolumeVariant::Denoised,
        )?;
        let with_denoised = self.optional_variant(
            self.config.include_denoised,
            &specimens,
            VolumeVariant::Denoised,
        )?;
        let with_deconvolved = self.optional_variant(
            self.config.include_deconvolved,
            &specimens,
            VolumeVariant::Deconvolved,
        )?;
        if !with_reference {
            warn!(
                reference_bin_level = self.config.reference_bin_level,
                "reference volume missing for some specimen; column omitted"
            );
        }

        let mut table = RecordTable::new();
        let mut summaries = Vec::with_capacity(scans.len());
        for scan in &scans {
            let specimen = scan.specimen.as_str();
            let tomo_path = self
                .resolver
                .resolve_tomogram_path(specimen, bin, VolumeVariant::Raw)?
                .ok_or_else(|| {
                    IndexError::integrity(format!(
                        "specimen '{specimen}' has no raw volume at bin {bin}"
                    ))
                })?;
            let reference_path = if with_reference {
                self.resolver.resolve_tomogram_path(
                    specimen,
                    self.config.reference_bin_level,
                    VolumeVariant::Denoised,
                )?
            } else {
                None
            };
            let denoised_path = if with_denoised {
                self.resolver
                    .resolve_tomogram_path(specimen, bin, VolumeVariant::Denoised)?
            } else {
                None
            };
            let deconvolved_path = if with_deconvolved {
                self.resolver
                    .resolve_tomogram_path(specimen, bin, VolumeVariant::Deconvolved)?
            } else {
                None
            };

            for key in &scan.reconciliation.membranes {
                let seg_path = scan.segmentation_paths.get(key).ok_or_else(|| {
                    IndexError::integrity(format!(
                        "specimen '{specimen}' lost the segmentation path for {key}"
                    ))
                })?;
                let mut row: Vec<(&str, String)> = vec![
                    (SPECIMEN, specimen.to_string()),
                    (TOMO_PATH, path_cell(&tomo_path)),
                    (MEMBRANE, key.membrane.clone()),
                    (SEG_PATH, path_cell(seg_path)),
                    (TOMO_BIN, bin.to_string()),
                ];
                if let Some(path) = &reference_path {
                    row.push((TOMO_REFERENCE_BIN_PATH, path_cell(path)));
                }
                row.push((GT_PATH, path_cell(&self.config.ground_truth_dir)));
                row.push((PIXEL_SPACING, self.config.pixel_spacing.to_string()));
                row.push((STACK, key.stack.clone()));
                if let Some(offset) = self.config.unbinned_offset_z {
                    row.push((UNBINNED_OFFSET_Z, offset.to_string()));
                }
                if let Some(path) = &deconvolved_path {
                    row.push((TOMO_PATH_DECONVOLVED, path_cell(path)));
                }
                if let Some(path) = &denoised_path {
                    row.push((TOMO_PATH_DENOISED, path_cell(path)));
                }
                table.push_row(row)?;
            }

            summaries.push(SpecimenSummary {
                specimen: scan.specimen.clone(),
                membranes: scan.reconciliation.membranes.len(),
                annotated: scan.reconciliation.annotated.len(),
                dropped_annotations: scan.reconciliation.dropped_annotations.len(),
                has_positions: scan.has_positions,
                coverage: scan.reconciliation.coverage(),
            });
        }

        info!(
            root = %self.resolver.root().display(),
            specimens = summaries.len(),
            records = table.len(),
            "indexed specimen tree"
        );
        Ok(IndexReport {
            table,
            specimens: summaries,
        })
    }

    /// Copy every specimen's annotation files to
    /// `<ground_truth_dir>/<specimen>/as_xml/`, returning the written paths.
    ///
    /// Specimens without a positions folder are skipped.
    pub fn export_ground_truth(&self) -> Result<Vec<PathBuf>, IndexError> {
        let mut written = Vec::new();
        for specimen in self.specimens()? {
            let subdirs =
                sorted_entries(&self.resolver.specimen_dir(&specimen), EntryKind::Directory)?;
            let Some(positions_dir) = find_positions_dir(&subdirs) else {
                continue;
            };
            let out_dir = self
                .config
                .ground_truth_dir
                .join(&specimen)
                .join(GROUND_TRUTH_XML_DIR);
            for source in sorted_entries(positions_dir, EntryKind::File)? {
                if !has_extension(&source, ANNOTATION_EXT) {
                    continue;
                }
                let Some(name) = source.file_name() else {
                    continue;
                };
                let target = out_dir.join(name);
                let bytes = fs::read(&source)?;
                write_atomic(&target, |out: &mut dyn Write| {
                    out.write_all(&bytes)?;
                    Ok(())
                })?;
                written.push(target);
            }
            debug!(specimen = %specimen, out_dir = %out_dir.display(), "exported ground truth");
        }
        info!(
            files = written.len(),
            out_dir = %self.config.ground_truth_dir.display(),
            "exported ground-truth annotations"
        );
        Ok(written)
    }

    fn optional_variant(
        &self,
        requested: bool,
        specimens: &[SpecimenToken],
        variant: VolumeVariant,
    ) -> Result<bool, IndexError> {
        if !requested {
            return Ok(false);
        }
        let available =
            self.resolver
                .variant_available_for_all(specimens, self.config.bin_level, variant)?;
        if !available {
            debug!(?variant, "variant not present for every specimen; column omitted");
        }
        Ok(available)
    }

    fn scan_specimen(&self, specimen: &str) -> Result<SpecimenScan, IndexError> {
        let dir = self.resolver.specimen_dir(specimen);
        let subdirs = sorted_entries(&dir, EntryKind::Directory)?;

        let membranes_dir = subdirs
            .iter()
            .find(|path| file_name_str(path).is_some_and(|name| name.contains(MEMBRANES_DIR_MARKER)))
            .ok_or_else(|| IndexError::MissingDirectory {
                specimen: specimen.to_string(),
                path: dir.join(MEMBRANES_DIR_MARKER),
            })?;
        let positions_dir = find_positions_dir(&subdirs);

        let mut segmentation_paths: BTreeMap<MembraneKey, PathBuf> = BTreeMap::new();
        for (key, path) in keyed_files(specimen, membranes_dir, SEGMENTATION_EXT)? {
            segmentation_paths.entry(key).or_insert(path);
        }

        let annotations: Vec<MembraneKey> = match positions_dir {
            Some(dir) => keyed_files(specimen, dir, ANNOTATION_EXT)?
                .into_iter()
                .map(|(key, _)| key)
                .collect(),
            None => {
                warn!(specimen, "no positions folder; specimen is usable for inference only");
                Vec::new()
            }
        };

        let reconciliation = reconcile(
            specimen,
            segmentation_paths.keys().cloned(),
            annotations,
        )?;
        if reconciliation.membranes.is_empty() {
            warn!(specimen, "no segmentations found");
        }
        Ok(SpecimenScan {
            specimen: specimen.to_string(),
            has_positions: positions_dir.is_some(),
            reconciliation,
            segmentation_paths,
        })
    }
}

fn find_positions_dir(subdirs: &[PathBuf]) -> Option<&PathBuf> {
    subdirs.iter().find(|path| {
        file_name_str(path).is_some_and(|name| {
            name.contains(POSITIONS_DIR_MARKER) && !name.contains(NO_POSITIONS_DIR_MARKER)
        })
    })
}

/// Files in `dir` with extension `ext` whose names carry membrane and stack tokens.
fn keyed_files(
    specimen: &str,
    dir: &Path,
    ext: &str,
) -> Result<Vec<(MembraneKey, PathBuf)>, IndexError> {
    let mut keyed = Vec::new();
    for path in sorted_entries(dir, EntryKind::File)? {
        if !has_extension(&path, ext) {
            continue;
        }
        match membrane_key_from_path(&path) {
            Some(key) => keyed.push((key, path)),
            None => warn!(
                specimen,
                path = %path.display(),
                "file name carries no membrane/stack tokens; skipped"
            ),
        }
    }
    Ok(keyed)
}

fn path_cell(path: &Path) -> String {
    path.display().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"").unwrap();
    }

    fn make_specimen(root: &Path, name: &str, files: &[&str]) {
        fs::create_dir_all(root.join(name)).unwrap();
        for file in files {
            touch(&root.join(name).join(file));
        }
    }

    #[test]
    fn indexes_membranes_with_reconciled_annotations() {
        let temp = tempdir().unwrap();
        let root = temp.path();
        make_specimen(
            root,
            "Tomo_1",
            &[
                "t1_bin4.mrc",
                "t1_bin4_denoised.mrc",
                "membranes/T1_S1_M1.mrc",
                "membranes/T1_S1_M2.mrc",
                "membranes/notes.txt",
                "positions/T1_S1_M1.xml",
                "positions/T1_S1_M3.xml",
            ],
        );
        make_specimen(
            root,
            "Tomo_2",
            &[
                "t2_bin4.mrc",
                "t2_bin4_denoised.mrc",
                "t2_bin4_dimi_.mrc",
                "membranes/T2_S2_M5.mrc",
            ],
        );

        let config = IndexConfig::default().with_ground_truth_dir("/project/gt");
        let report = SpecimenIndexer::new(root, config).build_table().unwrap();
        let table = &report.table;

        assert_eq!(table.len(), 3);
        assert_eq!(
            table.column_names().collect::<Vec<_>>(),
            vec![
                SPECIMEN,
                TOMO_PATH,
                MEMBRANE,
                SEG_PATH,
                TOMO_BIN,
                TOMO_REFERENCE_BIN_PATH,
                GT_PATH,
                PIXEL_SPACING,
                STACK,
                UNBINNED_OFFSET_Z,
                TOMO_PATH_DENOISED,
            ]
        );
        assert_eq!(table.get(SPECIMEN).unwrap(), &["Tomo_1", "Tomo_1", "Tomo_2"]);
        assert_eq!(table.get(MEMBRANE).unwrap(), &["M1", "M2", "M5"]);
        assert_eq!(table.get(STACK).unwrap(), &["S1_", "S1_", "S2_"]);
        assert_eq!(table.value(PIXEL_SPACING, 0), Some("14.08"));
        assert_eq!(table.value(GT_PATH, 2), Some("/project/gt"));
        assert_eq!(
            table.value(SEG_PATH, 1).map(PathBuf::from),
            Some(root.join("Tomo_1/membranes/T1_S1_M2.mrc"))
        );
        assert_eq!(
            table.value(TOMO_PATH, 2).map(PathBuf::from),
            Some(root.join("Tomo_2/t2_bin4.mrc"))
        );

        let first = &report.specimens[0];
        assert_eq!(first.annotated, 1);
        assert_eq!(first.dropped_annotations, 1);
        assert_eq!(first.coverage, AnnotationCoverage::Partial);
        let second = &report.specimens[1];
        assert!(!second.has_positions);
        assert_eq!(second.coverage, AnnotationCoverage::None);
    }

    #[test]
    fn missing_membranes_folder_is_fatal() {
        let temp = tempdir().unwrap();
        make_specimen(temp.path(), "Tomo_1", &["t1_bin4.mrc", "positions/T1_S1_M1.xml"]);
        let err = SpecimenIndexer::new(temp.path(), IndexConfig::default())
            .build_table()
            .unwrap_err();
        assert!(matches!(err, IndexError::MissingDirectory { ref specimen, .. } if specimen == "Tomo_1"));
    }

    #[test]
    fn missing_raw_volume_is_fatal() {
        let temp = tempdir().unwrap();
        make_specimen(temp.path(), "Tomo_1", &["t1_bin2.mrc", "membranes/T1_S1_M1.mrc"]);
        let err = SpecimenIndexer::new(temp.path(), IndexConfig::default())
            .build_table()
            .unwrap_err();
        assert!(matches!(err, IndexError::DataIntegrity { .. }));
    }

    #[test]
    fn all_no_positions_folder_is_not_an_annotation_source() {
        let temp = tempdir().unwrap();
        make_specimen(
            temp.path(),
            "Tomo_1",
            &[
                "t1_bin4.mrc",
                "membranes/T1_S1_M1.mrc",
                "all_no_positions/T1_S1_M1.xml",
            ],
        );
        let config = IndexConfig::default()
            .with_unbinned_offset_z(None)
            .with_variants(false, false);
        let report = SpecimenIndexer::new(temp.path(), config)
            .build_table()
            .unwrap();
        assert!(!report.specimens[0].has_positions);
        assert!(!report.table.has_column(UNBINNED_OFFSET_Z));
        assert!(!report.table.has_column(TOMO_REFERENCE_BIN_PATH));
    }

    #[test]
    fn export_ground_truth_copies_annotations_per_specimen() {
        let temp = tempdir().unwrap();
        let root = temp.path().join("tomograms");
        let gt = temp.path().join("gt_coords");
        make_specimen(
            &root,
            "Tomo_1",
            &[
                "t1_bin4.mrc",
                "membranes/T1_S1_M1.mrc",
                "positions/T1_S1_M1.xml",
                "positions/T1_S1_M3.xml",
                "positions/readme.txt",
            ],
        );
        fs::write(root.join("Tomo_1/positions/T1_S1_M1.xml"), b"<particles/>").unwrap();
        make_specimen(
            &root,
            "Tomo_2",
            &["t2_bin4.mrc", "membranes/T2_S1_M1.mrc", "all_no_positions/T2_S1_M1.xml"],
        );

        let indexer = SpecimenIndexer::new(&root, IndexConfig::default().with_ground_truth_dir(&gt));
        let written = indexer.export_ground_truth().unwrap();
        assert_eq!(
            written,
            vec![
                gt.join("Tomo_1/as_xml/T1_S1_M1.xml"),
                gt.join("Tomo_1/as_xml/T1_S1_M3.xml"),
            ]
        );
        assert_eq!(fs::read(&written[0]).unwrap(), b"<particles/>");
        assert!(!gt.join("Tomo_2").exists());

        let table = indexer.build_table().unwrap().table;
        assert_eq!(table.value(GT_PATH, 0), Some(gt.display().to_string().as_str()));
    }

    #[test]
    fn duplicate_segmentations_use_first_file_by_name() {
        let temp = tempdir().unwrap();
        make_specimen(
            temp.path(),
            "Tomo_1",
            &[
                "t1_bin4.mrc",
                "membranes/b_S1_M1.mrc",
                "membranes/a_S1_M1.mrc",
            ],
        );
        let report = SpecimenIndexer::new(temp.path(), IndexConfig::default())
            .build_table()
            .unwrap();
        assert_eq!(report.table.len(), 1);
        assert!(report.table.value(SEG_PATH, 0).unwrap().ends_with("a_S1_M1.mrc"));
    }
}
