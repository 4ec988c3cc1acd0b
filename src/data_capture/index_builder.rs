use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{info, warn};

use super::scanner::{self, EndpointMap};
use super::stats;
use crate::error_handling::types::{SplitError, StorageError};
use crate::resolver::{apply_hostnames, EndpointResolver};
use crate::storage::naming::list_stream_files;
use crate::storage::types::{
    StreamEndpoints, StreamIndex, StreamRecord, IMPORTED_CAPTURE,
};
use crate::storage::IndexStorage;
use crate::tooling::ToolContext;

/// Composes scan, resolution and per-file statistics into manifests, and
/// rebuilds a manifest from stream files when it is missing.
#[derive(Clone)]
pub struct IndexBuilder {
    tools: ToolContext,
    resolver: EndpointResolver,
    storage: Arc<dyn IndexStorage>,
}

impl IndexBuilder {
    pub fn new(tools: ToolContext, resolver: EndpointResolver, storage: Arc<dyn IndexStorage>) -> Self {
        Self {
            tools,
            resolver,
            storage,
        }
    }

    pub fn tools(&self) -> &ToolContext {
        &self.tools
    }

    pub fn resolver(&self) -> &EndpointResolver {
        &self.resolver
    }

    /// Resolves every address in `endpoints` once and attaches the names.
    pub async fn enrich(&self, endpoints: &mut EndpointMap) {
        if !self.resolver.is_enabled() || endpoints.is_empty() {
            return;
        }
        let addresses: Vec<String> = endpoints
            .values()
            .flat_map(|e| [e.src.as_ref(), e.dst.as_ref()])
            .flatten()
            .map(|e| e.address.clone())
            .collect();
        let names = self.resolver.resolve(&addresses).await;
        apply_hostnames(
            &names,
            endpoints
                .values_mut()
                .flat_map(|e| [e.src.as_mut(), e.dst.as_mut()])
                .flatten(),
        );
    }

    /// Persists `index` into `split_dir`.
    pub fn write(&self, split_dir: &Path, index: &StreamIndex) -> Result<PathBuf, StorageError> {
        self.storage.write_index(split_dir, index)
    }

    pub fn read(&self, split_dir: &Path) -> Result<StreamIndex, StorageError> {
        self.storage.read_index(split_dir)
    }

    pub fn has_index(&self, split_dir: &Path) -> bool {
        self.storage.has_index(split_dir)
    }

    /// Recreates the manifest of `split_dir` from the stream files it holds.
    ///
    /// Each file is scanned on its own, since the combined capture may be
    /// gone. The result is marked as imported. Running this twice yields the
    /// same streams and files.
    pub async fn rebuild(&self, split_dir: &Path) -> Result<StreamIndex, SplitError> {
        let files = list_stream_files(split_dir)?;
        info!(
            "Rebuilding stream index of {} from {} stream files",
            split_dir.display(),
            files.len()
        );

        let mut endpoints = EndpointMap::new();
        for (id, path) in &files {
            // The per-stream file holds a single conversation, whatever id
            // the tool gives it there
            let found = scanner::scan(&self.tools, path).await;
            match found.into_values().next() {
                Some(first) => {
                    endpoints.insert(*id, first);
                }
                None => warn!("No TCP endpoints found in {}", path.display()),
            }
        }
        self.enrich(&mut endpoints).await;

        let mut records = Vec::with_capacity(files.len());
        for (id, path) in &files {
            let file_name = match path.file_name().and_then(|n| n.to_str()) {
                Some(name) => name.to_string(),
                None => continue,
            };
            let mut record = StreamRecord::new(
                *id,
                file_name,
                endpoints.remove(id).unwrap_or_else(StreamEndpoints::default),
            );
            let probed = stats::probe(&self.tools, path).await;
            record.size_bytes = probed.size_bytes;
            record.packet_count = probed.packet_count;
            records.push(record);
        }

        let index = StreamIndex::new(IMPORTED_CAPTURE, split_dir.to_path_buf(), records);
        self.write(split_dir, &index)?;
        Ok(index)
    }
}
