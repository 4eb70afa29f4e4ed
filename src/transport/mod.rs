/// Filesystem listing and atomic document writes.
pub mod fs;
