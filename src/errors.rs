use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::types::{ColumnName, MembraneToken, SpecimenToken, StackToken};

/// Error type for indexing, table IO, split assignment, and rejoin failures.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("specimen '{specimen}' is missing required directory '{}'", path.display())]
    MissingDirectory {
        specimen: SpecimenToken,
        path: PathBuf,
    },
    #[error("data integrity violation: {details}")]
    DataIntegrity { details: String },
    #[error("split ratios must sum to 100 (got {train}/{validation}/{test})")]
    InvalidRatio {
        train: u32,
        validation: u32,
        test: u32,
    },
    #[error("no row for specimen '{specimen}', stack '{}', membrane '{membrane}'", stack.as_deref().unwrap_or("*"))]
    KeyNotFound {
        specimen: SpecimenToken,
        stack: Option<StackToken>,
        membrane: MembraneToken,
    },
    #[error("table has no column '{0}'")]
    ColumnMissing(ColumnName),
    #[error("column '{column}' has length {found}, expected {expected}")]
    ColumnLength {
        column: ColumnName,
        expected: usize,
        found: usize,
    },
    #[error("malformed table '{}' at line {line}: {details}", path.display())]
    MalformedTable {
        path: PathBuf,
        line: usize,
        details: String,
    },
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
}

impl IndexError {
    pub(crate) fn integrity(details: impl Into<String>) -> Self {
        IndexError::DataIntegrity {
            details: details.into(),
        }
    }
}
