use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use log::debug;

use crate::error_handling::types::SessionError;
use crate::storage::naming::{index_path, is_capture_file, looks_like_split_dir};

/// What an import path turned out to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportTarget {
    /// A capture file to split.
    RawArtifact(PathBuf),
    /// A split folder whose manifest can be returned as is.
    SplitFolderWithManifest(PathBuf),
    /// A split folder whose manifest must be rebuilt.
    SplitFolderMissingManifest(PathBuf),
    /// Any other directory; see [`ImportTarget::resolve`].
    ParentDirectory(PathBuf),
}

impl ImportTarget {
    /// Classifies `path` without looking inside subdirectories.
    pub fn classify(path: &Path) -> Result<Self, SessionError> {
        if path.is_file() {
            return Ok(ImportTarget::RawArtifact(path.to_path_buf()));
        }
        if !path.is_dir() {
            return Err(SessionError::NothingToImport(path.to_path_buf()));
        }
        if index_path(path).is_file() {
            Ok(ImportTarget::SplitFolderWithManifest(path.to_path_buf()))
        } else if looks_like_split_dir(path) {
            Ok(ImportTarget::SplitFolderMissingManifest(path.to_path_buf()))
        } else {
            Ok(ImportTarget::ParentDirectory(path.to_path_buf()))
        }
    }

    /// Turns a parent directory into something importable: its most recently
    /// modified split folder, else its most recently modified capture file.
    /// Other variants are returned unchanged.
    pub fn resolve(self) -> Result<Self, SessionError> {
        let dir = match self {
            ImportTarget::ParentDirectory(dir) => dir,
            other => return Ok(other),
        };

        let mut split_dirs = Vec::new();
        let mut captures = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.is_dir() && (index_path(&path).is_file() || looks_like_split_dir(&path)) {
                split_dirs.push(path);
            } else if is_capture_file(&path) {
                captures.push(path);
            }
        }

        if let Some(newest) = newest(split_dirs) {
            debug!("Importing newest split folder {}", newest.display());
            return ImportTarget::classify(&newest);
        }
        if let Some(newest) = newest(captures) {
            debug!("Importing newest capture {}", newest.display());
            return Ok(ImportTarget::RawArtifact(newest));
        }
        Err(SessionError::NothingToImport(dir))
    }
}

/// Most recently modified path; ties go to the greater name.
fn newest(paths: Vec<PathBuf>) -> Option<PathBuf> {
    paths
        .into_iter()
        .map(|p| {
            let modified = fs::metadata(&p)
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            (modified, p)
        })
        .max()
        .map(|(_, p)| p)
}
