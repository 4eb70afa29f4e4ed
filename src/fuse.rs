//! Fusion of several record tables into one.

use tracing::warn;

use crate::errors::IndexError;
use crate::table::RecordTable;
use crate::types::ColumnName;

/// A column that did not survive fusion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SchemaDrop {
    /// Name of the dropped column.
    pub column: ColumnName,
    /// Index of the input table at which the column was found to be non-shared.
    pub table_index: usize,
}

/// Fused table plus the columns narrowed away along the way.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FusedTable {
    /// Rows of every input, restricted to the shared columns.
    pub table: RecordTable,
    /// Columns dropped because some input lacked them.
    pub dropped: Vec<SchemaDrop>,
}

/// Concatenate `tables` row-wise on the intersection of their columns.
///
/// Column order follows the first table. Each drop is reported once, at the
/// first input table where the column turned out not to be shared.
pub fn fuse(tables: &[RecordTable]) -> Result<FusedTable, IndexError> {
    let Some((first, rest)) = tables.split_first() else {
        return Err(IndexError::Configuration(
            "cannot fuse an empty list of tables".to_string(),
        ));
    };

    let mut fused = first.clone();
    let mut dropped = Vec::new();
    for (offset, incoming) in rest.iter().enumerate() {
        let table_index = offset + 1;

        let missing: Vec<ColumnName> = fused
            .column_names()
            .filter(|name| !incoming.has_column(name))
            .map(str::to_string)
            .collect();
        for column in missing {
            fused.remove_column(&column);
            dropped.push(SchemaDrop {
                column,
                table_index,
            });
        }
        for column in incoming.column_names() {
            if !fused.has_column(column) && !dropped.iter().any(|drop| drop.column == column) {
                dropped.push(SchemaDrop {
                    column: column.to_string(),
                    table_index,
                });
            }
        }

        if fused.column_count() > 0 {
            fused.append_rows(incoming)?;
        }
    }

    for drop in &dropped {
        warn!(
            column = %drop.column,
            table_index = drop.table_index,
            "column is not shared by every table; dropped from fused table"
        );
    }
    fused.check_invariants()?;
    Ok(FusedTable {
        table: fused,
        dropped,
    })
}
