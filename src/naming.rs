//! Filename token rules for segmentation and annotation files.
//!
//! A token starts right after its marker character and runs until the next
//! marker, `_`, or the extension dot: `T17_S1_M3.mrc` yields stack `S1_`
//! (stack tokens only stop at a marker) and membrane `M3`.

use std::path::Path;

use crate::constants::naming::{MEMBRANE_MARKER, STACK_MARKER};
use crate::data::MembraneKey;
use crate::transport::fs::file_name_str;

/// Extract the `(membrane, stack)` key from a file name, if both markers are present.
pub fn membrane_key_from_file_name(name: &str) -> Option<MembraneKey> {
    let membrane = token_after(name, MEMBRANE_MARKER, &[MEMBRANE_MARKER, '.', '_'])?;
    let stack = token_after(name, STACK_MARKER, &[STACK_MARKER, MEMBRANE_MARKER])?;
    Some(MembraneKey::new(membrane, stack))
}

/// Path variant of [`membrane_key_from_file_name`].
pub fn membrane_key_from_path(path: &Path) -> Option<MembraneKey> {
    file_name_str(path).and_then(membrane_key_from_file_name)
}

fn token_after(name: &str, marker: char, terminators: &[char]) -> Option<String> {
    let (_, rest) = name.split_once(marker)?;
    let end = rest.find(terminators).unwrap_or(rest.len());
    let body = &rest[..end];
    if body.is_empty() {
        return None;
    }
    Some(format!("{marker}{body}"))
}
