//! Storage Trait
//!
//! This module defines the `IndexStorage` trait, the persistence interface for
//! stream manifests. One manifest lives in each split directory.

use std::path::{Path, PathBuf};

use crate::error_handling::types::StorageError;
use crate::storage::types::StreamIndex;

/// Persists and loads the manifest of a split directory.
///
/// Implementations are not expected to support concurrent writers to the same
/// directory; the controller's single session slot guarantees there is only one.
pub trait IndexStorage: Send + Sync {
    /// Writes `index` into `split_dir`, replacing any previous manifest.
    /// Returns the manifest location.
    fn write_index(&self, split_dir: &Path, index: &StreamIndex) -> Result<PathBuf, StorageError>;

    /// Loads the manifest of `split_dir`. Fails with
    /// [`StorageError::NotFound`] when there is none.
    fn read_index(&self, split_dir: &Path) -> Result<StreamIndex, StorageError>;

    fn has_index(&self, split_dir: &Path) -> bool;
}
