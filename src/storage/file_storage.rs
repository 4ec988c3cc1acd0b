use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use log::{debug, error, info};
use tempfile::NamedTempFile;

use crate::error_handling::types::StorageError;
use crate::storage::naming::index_path;
use crate::storage::storage_trait::IndexStorage;
use crate::storage::types::StreamIndex;

/// Filesystem-backed manifest storage: one pretty-printed JSON file per split
/// directory.
///
/// Writes go to a hidden temporary file in the same directory and are renamed
/// into place, so readers see either the previous manifest or the complete new
/// one.
#[derive(Debug, Default, Clone)]
pub struct FileStorage;

impl FileStorage {
    pub fn new() -> Self {
        Self
    }
}

impl IndexStorage for FileStorage {
    fn write_index(&self, split_dir: &Path, index: &StreamIndex) -> Result<PathBuf, StorageError> {
        let path = index_path(split_dir);
        let tmp = tempfile::Builder::new()
            .prefix(".tcp-streams-index")
            .suffix(".tmp")
            .tempfile_in(split_dir)
            .map_err(|e| {
                error!("Failed to create temporary index in {}: {}", split_dir.display(), e);
                StorageError::WriteFailed(e.to_string())
            })?;

        write_json(&tmp, index).map_err(|e| {
            error!("Failed to serialize index for {}: {}", split_dir.display(), e);
            StorageError::WriteFailed(e.to_string())
        })?;

        tmp.persist(&path).map_err(|e| {
            error!("Failed to move index into place at {}: {}", path.display(), e);
            StorageError::WriteFailed(e.to_string())
        })?;

        info!(
            "Saved stream index ({} streams) to {}",
            index.streams.len(),
            path.display()
        );
        Ok(path)
    }

    fn read_index(&self, split_dir: &Path) -> Result<StreamIndex, StorageError> {
        let path = index_path(split_dir);
        if !path.is_file() {
            return Err(StorageError::NotFound(split_dir.to_path_buf()));
        }
        let file = File::open(&path).map_err(|e| {
            error!("Failed to open index {}: {}", path.display(), e);
            StorageError::ReadFailed(e.to_string())
        })?;
        let index: StreamIndex = serde_json::from_reader(BufReader::new(file)).map_err(|e| {
            error!("Failed to parse index {}: {}", path.display(), e);
            StorageError::ParseFailed(format!("{}: {}", path.display(), e))
        })?;
        debug!(
            "Loaded index v{} with {} streams from {}",
            index.version,
            index.streams.len(),
            path.display()
        );
        Ok(index)
    }

    fn has_index(&self, split_dir: &Path) -> bool {
        index_path(split_dir).is_file()
    }
}

fn write_json(tmp: &NamedTempFile, index: &StreamIndex) -> std::io::Result<()> {
    let mut writer = BufWriter::new(tmp.as_file());
    serde_json::to_writer_pretty(&mut writer, index)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    tmp.as_file().sync_all()
}
