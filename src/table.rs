//! Ordered columnar record table and its textual file format.
//!
//! A `RecordTable` maps column names to equally long value sequences; row `i`
//! across all columns is one logical record. Every mutating method validates
//! lengths before touching any column, so the equal-length invariant holds
//! after any call, successful or not.

use indexmap::IndexMap;
use std::fs;
use std::io::Write;
use std::path::Path;

use crate::constants::columns::{MEMBRANE, SPECIMEN, STACK};
use crate::constants::table::{
    COLUMN_SIGIL, DATA_BLOCK, EMPTY_CELL, LOOP_MARKER, VALUE_DELIMITER,
};
use crate::errors::IndexError;
use crate::transport::fs::write_atomic;
use crate::types::{CellValue, ColumnName};

/// Ordered columnar table of textual values.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RecordTable {
    columns: IndexMap<ColumnName, Vec<CellValue>>,
    rows: usize,
}

impl RecordTable {
    /// Create an empty table with no columns.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty table with the given columns, in order.
    pub fn with_columns<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<ColumnName>,
    {
        let columns = names
            .into_iter()
            .map(|name| (name.into(), Vec::new()))
            .collect();
        Self { columns, rows: 0 }
    }

    /// Build a table from `(name, values)` pairs; all value lists must have equal length.
    pub fn from_columns<I, S>(columns: I) -> Result<Self, IndexError>
    where
        I: IntoIterator<Item = (S, Vec<CellValue>)>,
        S: Into<ColumnName>,
    {
        let mut table = Self::new();
        for (name, values) in columns {
            table.set(name, values)?;
        }
        Ok(table)
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows
    }

    /// True if the table holds no rows.
    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    /// Number of columns.
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Column names in table order.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    /// True if the table has a column named `name`.
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    /// Values of column `name`, if present.
    pub fn get(&self, name: &str) -> Option<&[CellValue]> {
        self.columns.get(name).map(Vec::as_slice)
    }

    /// Values of column `name`, failing when it is absent.
    pub fn require(&self, name: &str) -> Result<&[CellValue], IndexError> {
        self.get(name)
            .ok_or_else(|| IndexError::ColumnMissing(name.to_string()))
    }

    /// Single cell value at (`name`, `row`).
    pub fn value(&self, name: &str, row: usize) -> Option<&str> {
        self.columns
            .get(name)
            .and_then(|values| values.get(row))
            .map(String::as_str)
    }

    /// Insert or replace column `name`.
    ///
    /// A replaced column keeps its position; a new column is appended. The
    /// first column of an empty-schema table defines the row count.
    pub fn set(
        &mut self,
        name: impl Into<ColumnName>,
        values: Vec<CellValue>,
    ) -> Result<(), IndexError> {
        let name = name.into();
        let defines_rows = self.columns.is_empty()
            || (self.columns.len() == 1 && self.columns.contains_key(&name));
        if !defines_rows && values.len() != self.rows {
            return Err(IndexError::ColumnLength {
                column: name,
                expected: self.rows,
                found: values.len(),
            });
        }
        self.rows = values.len();
        self.columns.insert(name, values);
        Ok(())
    }

    /// Remove column `name`, preserving the order of the remaining columns.
    pub fn remove_column(&mut self, name: &str) -> Option<Vec<CellValue>> {
        let removed = self.columns.shift_remove(name);
        if self.columns.is_empty() {
            self.rows = 0;
        }
        removed
    }

    /// Append one row given as `(column, value)` pairs.
    ///
    /// On a table without columns the pairs define the schema. Otherwise the
    /// pairs must name every existing column exactly once (in any order).
    pub fn push_row<I, K, V>(&mut self, row: I) -> Result<(), IndexError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<ColumnName>,
        V: Into<CellValue>,
    {
        let mut incoming: IndexMap<ColumnName, CellValue> = IndexMap::new();
        for (key, value) in row {
            let key = key.into();
            if incoming.insert(key.clone(), value.into()).is_some() {
                return Err(IndexError::Configuration(format!(
                    "row names column '{key}' more than once"
                )));
            }
        }
        if self.columns.is_empty() {
            for (key, value) in incoming {
                self.columns.insert(key, vec![value]);
            }
            self.rows = 1;
            return Ok(());
        }
        if let Some(name) = self.column_names().find(|name| !incoming.contains_key(*name)) {
            return Err(IndexError::ColumnMissing(name.to_string()));
        }
        if let Some(extra) = incoming.keys().find(|key| !self.columns.contains_key(*key)) {
            return Err(IndexError::Configuration(format!(
                "row names unknown column '{extra}'"
            )));
        }
        for (name, values) in self.columns.iter_mut() {
            if let Some(value) = incoming.shift_remove(name) {
                values.push(value);
            }
        }
        self.rows += 1;
        Ok(())
    }

    /// Append row `row` of `source`, projected onto this table's columns.
    ///
    /// A table without columns adopts the source schema first.
    pub fn push_row_from(&mut self, source: &RecordTable, row: usize) -> Result<(), IndexError> {
        if row >= source.len() {
            return Err(IndexError::Configuration(format!(
                "row {row} out of range for table with {} rows",
                source.len()
            )));
        }
        if self.columns.is_empty() {
            for name in source.column_names() {
                self.columns.insert(name.to_string(), Vec::new());
            }
        }
        let mut values = Vec::with_capacity(self.columns.len());
        for name in self.columns.keys() {
            let value = source
                .value(name, row)
                .ok_or_else(|| IndexError::ColumnMissing(name.clone()))?;
            values.push(value.to_string());
        }
        for (column, value) in self.columns.values_mut().zip(values) {
            column.push(value);
        }
        self.rows += 1;
        Ok(())
    }

    /// Append every row of `other`, projected onto this table's columns.
    pub fn append_rows(&mut self, other: &RecordTable) -> Result<(), IndexError> {
        if let Some(name) = self.column_names().find(|name| !other.has_column(name)) {
            return Err(IndexError::ColumnMissing(name.to_string()));
        }
        for (name, values) in self.columns.iter_mut() {
            if let Some(incoming) = other.get(name) {
                values.extend_from_slice(incoming);
            }
        }
        self.rows += other.len();
        Ok(())
    }

    /// Advisory lookup of the first row matching specimen and membrane (and stack, if given).
    ///
    /// Returns `None` when nothing matches or the key columns are absent.
    pub fn find_row_index(
        &self,
        specimen: &str,
        membrane: &str,
        stack: Option<&str>,
    ) -> Option<usize> {
        let specimens = self.get(SPECIMEN)?;
        let membranes = self.get(MEMBRANE)?;
        let stacks = match stack {
            Some(_) => Some(self.get(STACK)?),
            None => None,
        };
        (0..self.rows).find(|&idx| {
            specimens[idx] == specimen
                && membranes[idx] == membrane
                && match (stack, stacks) {
                    (Some(stack), Some(stacks)) => stacks[idx] == stack,
                    _ => true,
                }
        })
    }

    /// Required lookup; fails with `KeyNotFound` when no row matches.
    pub fn require_row_index(
        &self,
        specimen: &str,
        membrane: &str,
        stack: Option<&str>,
    ) -> Result<usize, IndexError> {
        self.require(SPECIMEN)?;
        self.require(MEMBRANE)?;
        if stack.is_some() {
            self.require(STACK)?;
        }
        self.find_row_index(specimen, membrane, stack)
            .ok_or_else(|| IndexError::KeyNotFound {
                specimen: specimen.to_string(),
                stack: stack.map(str::to_string),
                membrane: membrane.to_string(),
            })
    }

    /// Verify that every column has exactly `len()` values.
    pub fn check_invariants(&self) -> Result<(), IndexError> {
        for (name, values) in &self.columns {
            if values.len() != self.rows {
                return Err(IndexError::ColumnLength {
                    column: name.clone(),
                    expected: self.rows,
                    found: values.len(),
                });
            }
        }
        Ok(())
    }

    /// Read a table file.
    pub fn read(path: impl AsRef<Path>) -> Result<Self, IndexError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        Self::parse(&text, path)
    }

    /// Write the table atomically to `path`.
    pub fn write(&self, path: impl AsRef<Path>) -> Result<(), IndexError> {
        let rendered = self.render()?;
        write_atomic(path.as_ref(), |out: &mut dyn Write| {
            out.write_all(rendered.as_bytes())?;
            Ok(())
        })
    }

    /// Parse table text; `path` is only used in error reports.
    pub fn parse(text: &str, path: &Path) -> Result<Self, IndexError> {
        let malformed = |line: usize, details: String| IndexError::MalformedTable {
            path: path.to_path_buf(),
            line,
            details,
        };
        let mut names: Vec<ColumnName> = Vec::new();
        let mut values: Vec<Vec<CellValue>> = Vec::new();
        let mut in_rows = false;
        for (idx, raw) in text.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw.strip_suffix('\r').unwrap_or(raw);
            if line.trim().is_empty() {
                continue;
            }
            if !in_rows {
                let trimmed = line.trim();
                if trimmed == DATA_BLOCK || trimmed == LOOP_MARKER {
                    continue;
                }
                if let Some(header) = trimmed.strip_prefix(COLUMN_SIGIL) {
                    let name = header.split_whitespace().next().unwrap_or_default();
                    if name.is_empty() {
                        return Err(malformed(line_no, "empty column name".into()));
                    }
                    if names.iter().any(|existing| existing == name) {
                        return Err(malformed(line_no, format!("duplicate column '{name}'")));
                    }
                    names.push(name.to_string());
                    values.push(Vec::new());
                    continue;
                }
                if names.is_empty() {
                    return Err(malformed(line_no, "row before column header".into()));
                }
                in_rows = true;
            }
            let cells: Vec<&str> = line.split(VALUE_DELIMITER).collect();
            if cells.len() != names.len() {
                return Err(malformed(
                    line_no,
                    format!("expected {} values, found {}", names.len(), cells.len()),
                ));
            }
            for (column, cell) in values.iter_mut().zip(cells) {
                column.push(decode_cell(cell));
            }
        }
        Self::from_columns(names.into_iter().zip(values))
    }

    /// Render the table in its on-disk format.
    ///
    /// Fails with `DataIntegrity` for any value that would not read back
    /// unchanged: delimiters or line breaks, a literal `""`, a row made only
    /// of whitespace, or a leading value that looks like a header or marker.
    pub fn render(&self) -> Result<String, IndexError> {
        self.check_invariants()?;
        let mut out = format!("{DATA_BLOCK}\n\n{LOOP_MARKER}\n");
        for (idx, name) in self.columns.keys().enumerate() {
            if name.is_empty() || name.contains(char::is_whitespace) {
                return Err(IndexError::Configuration(format!(
                    "column name '{name}' cannot be written"
                )));
            }
            out.push_str(&format!("{COLUMN_SIGIL}{name} #{}\n", idx + 1));
        }
        for row in 0..self.rows {
            let mut line = String::new();
            for (position, (name, values)) in self.columns.iter().enumerate() {
                let cell = &values[row];
                if let Some(problem) = unwritable_cell(cell, position == 0) {
                    return Err(IndexError::integrity(format!(
                        "value in column '{name}' row {row} {problem}"
                    )));
                }
                if position > 0 {
                    line.push(VALUE_DELIMITER);
                }
                line.push_str(encode_cell(cell));
            }
            if line.trim().is_empty() {
                return Err(IndexError::integrity(format!(
                    "row {row} holds only whitespace"
                )));
            }
            out.push_str(&line);
            out.push('\n');
        }
        Ok(out)
    }
}

/// Why `cell` cannot be written, if it cannot.
fn unwritable_cell(cell: &str, leading: bool) -> Option<&'static str> {
    if cell.contains(VALUE_DELIMITER) || cell.contains('\n') || cell.contains('\r') {
        return Some("contains a delimiter");
    }
    if cell == EMPTY_CELL {
        return Some("is the empty-cell marker");
    }
    if leading {
        let trimmed = cell.trim();
        if trimmed.starts_with(COLUMN_SIGIL) || trimmed == DATA_BLOCK || trimmed == LOOP_MARKER {
            return Some("would read back as a header line");
        }
    }
    None
}

fn encode_cell(cell: &str) -> &str {
    if cell.is_empty() { EMPTY_CELL } else { cell }
}

fn decode_cell(cell: &str) -> CellValue {
    if cell == EMPTY_CELL {
        CellValue::new()
    } else {
        cell.to_string()
    }
}
