#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

/// Subvolume stores and training-array aggregation.
pub mod aggregate;
/// Indexing, split, aggregation, and rejoin configuration.
pub mod config;
/// Centralized constants: column names, file format, naming markers.
pub mod constants;
/// Record keys and distance targets.
pub mod data;
/// Record table fusion.
pub mod fuse;
/// Specimen tree indexing.
pub mod indexer;
/// Predictor boundary and batched inference.
pub mod inference;
/// Tracing subscriber setup.
pub mod logging;
/// Filename token extraction.
pub mod naming;
/// Segmentation/annotation reconciliation.
pub mod reconcile;
/// Prediction regrouping and export.
pub mod rejoin;
/// Volume path resolution.
pub mod resolve;
/// Train/validation/test assignment.
pub mod splits;
/// Columnar record table and its file format.
pub mod table;
/// Filesystem helpers (sorted listing, atomic writes).
pub mod transport;
/// Shared type aliases.
pub mod types;

mod errors;

pub use aggregate::{
    InMemorySubvolumeStore, SubvolumeBatch, SubvolumeKey, SubvolumeStore, TrainingSet, aggregate,
};
pub use config::{AggregationConfig, IndexConfig, PipelineConfig, RejoinConfig, SplitConfig};
pub use data::{DistanceTarget, MembraneKey, RecordKey};
pub use errors::IndexError;
pub use fuse::{FusedTable, SchemaDrop, fuse};
pub use indexer::{IndexReport, SpecimenIndexer, SpecimenSummary};
pub use inference::{PredictionSample, Predictor, predict_in_batches};
pub use logging::init_tracing;
pub use reconcile::{AnnotationCoverage, Reconciliation, reconcile};
pub use rejoin::{ArtifactExporter, RejoinReport, rejoin};
pub use resolve::{PathResolver, VariantMarkers, VolumeVariant};
pub use splits::{
    OverridePolicy, SplitAssigner, SplitLabel, SplitOverrides, SplitRatios, SplitSummary,
    assign_splits, split_labels,
};
pub use table::RecordTable;
pub use types::{CellValue, ColumnName, MembraneToken, ParticleClass, SpecimenToken, StackToken};
