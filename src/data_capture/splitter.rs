use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use tempfile::TempPath;

use super::index_builder::IndexBuilder;
use super::scanner::{self, EndpointMap};
use super::stats;
use crate::configuration::types::is_valid_snaplen;
use crate::error_handling::types::{SplitError, ToolError};
use crate::storage::naming::{is_non_empty_file, stream_file_name, STREAM_FILE_PREFIX};
use crate::storage::types::{SplitProgress, StreamId, StreamIndex, StreamRecord};
use crate::tooling::{Tool, ToolCommand, ToolContext};

/// `tshark ... -T fields -e tcp.stream`, one id per TCP packet.
pub fn enumerate_command(tools: &ToolContext, artifact: &Path) -> ToolCommand {
    tools
        .command(Tool::Tshark)
        .arg("-r")
        .arg(artifact)
        .args(["-n", "-Y", "tcp", "-T", "fields", "-e", "tcp.stream"])
}

pub fn extract_command(tools: &ToolContext, artifact: &Path, stream: StreamId, out: &Path) -> ToolCommand {
    tools
        .command(Tool::Tshark)
        .arg("-r")
        .arg(artifact)
        .args(["-n", "-Y"])
        .arg(format!("tcp.stream eq {}", stream))
        .args(["-F", "pcapng", "-w"])
        .arg(out)
}

pub fn truncate_command(tools: &ToolContext, snap_len: u32, input: &Path, out: &Path) -> ToolCommand {
    tools
        .command(Tool::Editcap)
        .arg("-s")
        .arg(snap_len.to_string())
        .arg(input)
        .arg(out)
}

/// Distinct stream ids in enumeration output, ascending.
pub fn parse_stream_ids(stdout: &str) -> Vec<StreamId> {
    stdout
        .lines()
        .flat_map(|line| line.split(','))
        .filter_map(|v| v.trim().parse::<StreamId>().ok())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Splits capture artifacts into one file per TCP stream.
#[derive(Clone)]
pub struct StreamSplitter {
    builder: IndexBuilder,
}

impl StreamSplitter {
    pub fn new(builder: IndexBuilder) -> Self {
        Self { builder }
    }

    pub fn builder(&self) -> &IndexBuilder {
        &self.builder
    }

    fn tools(&self) -> &ToolContext {
        self.builder.tools()
    }

    pub async fn enumerate(&self, artifact: &Path) -> Result<Vec<StreamId>, SplitError> {
        let output = self
            .tools()
            .run(&enumerate_command(self.tools(), artifact))
            .await
            .map_err(SplitError::Enumerate)?;
        Ok(parse_stream_ids(&output.stdout))
    }

    /// Runs the up-front stages (enumeration, endpoint scan, resolution) and
    /// returns the run that extracts the streams one by one.
    pub async fn start(&self, artifact: &Path, dest: &Path, snap_len: u32) -> Result<SplitRun<'_>, SplitError> {
        if !is_valid_snaplen(snap_len) {
            return Err(SplitError::InvalidSnapLen(snap_len));
        }
        tokio::fs::create_dir_all(dest).await?;

        let stream_ids = self.enumerate(artifact).await?;
        info!(
            "Splitting {} into {} TCP streams under {}",
            artifact.display(),
            stream_ids.len(),
            dest.display()
        );

        let mut endpoints = if stream_ids.is_empty() {
            EndpointMap::new()
        } else {
            scanner::scan(self.tools(), artifact).await
        };
        self.builder.enrich(&mut endpoints).await;

        Ok(SplitRun {
            splitter: self,
            artifact: artifact.to_path_buf(),
            dest: dest.to_path_buf(),
            snap_len,
            stream_ids,
            endpoints,
            records: Vec::new(),
        })
    }

    /// Splits `artifact` into `dest`, calling `on_progress` after every
    /// stream, and writes the manifest.
    pub async fn split<F>(
        &self,
        artifact: &Path,
        dest: &Path,
        snap_len: u32,
        mut on_progress: F,
    ) -> Result<StreamIndex, SplitError>
    where
        F: FnMut(&SplitProgress),
    {
        let mut run = self.start(artifact, dest, snap_len).await?;
        while let Some(progress) = run.next().await? {
            on_progress(&progress);
        }
        run.finish()
    }
}

/// An in-progress split. Each call to [`SplitRun::next`] writes the next
/// stream in ascending id order.
pub struct SplitRun<'a> {
    splitter: &'a StreamSplitter,
    artifact: PathBuf,
    dest: PathBuf,
    snap_len: u32,
    stream_ids: Vec<StreamId>,
    endpoints: EndpointMap,
    records: Vec<StreamRecord>,
}

impl<'a> SplitRun<'a> {
    pub fn total(&self) -> usize {
        self.stream_ids.len()
    }

    pub fn written(&self) -> usize {
        self.records.len()
    }

    pub fn stream_ids(&self) -> &[StreamId] {
        &self.stream_ids
    }

    pub fn dest(&self) -> &Path {
        &self.dest
    }

    /// Writes the next stream. `Ok(None)` once every stream is written.
    pub async fn next(&mut self) -> Result<Option<SplitProgress>, SplitError> {
        let Some(&stream_id) = self.stream_ids.get(self.records.len()) else {
            return Ok(None);
        };
        let tools = self.splitter.tools();
        let file_name = stream_file_name(stream_id);
        let final_path = self.dest.join(&file_name);

        let extracted = self.temp_path(stream_id, "extract")?;
        self.extract(stream_id, &extracted).await?;

        let promoted = match self.truncate(stream_id, &extracted).await {
            Some(truncated) => truncated,
            None => extracted,
        };
        promoted.persist(&final_path).map_err(|e| SplitError::IoError(e.error))?;

        let probed = stats::probe(tools, &final_path).await;
        let mut record = StreamRecord::new(
            stream_id,
            file_name.clone(),
            self.endpoints.remove(&stream_id).unwrap_or_default(),
        );
        record.size_bytes = probed.size_bytes;
        record.packet_count = probed.packet_count;
        self.records.push(record);

        let progress = SplitProgress {
            current: self.records.len(),
            total: self.total(),
            stream_id,
            file: file_name,
        };
        info!(
            "Wrote stream {} ({}/{}) to {}",
            stream_id,
            progress.current,
            progress.total,
            final_path.display()
        );
        Ok(Some(progress))
    }

    /// Composes and persists the manifest. Fails if streams remain.
    pub fn finish(self) -> Result<StreamIndex, SplitError> {
        if self.written() < self.total() {
            return Err(SplitError::Incomplete {
                written: self.written(),
                total: self.total(),
            });
        }
        let index = StreamIndex::new(
            self.artifact.display().to_string(),
            self.dest.clone(),
            self.records,
        );
        self.splitter.builder.write(&self.dest, &index)?;
        Ok(index)
    }

    /// Hidden temporary file in the destination directory, so promotion is
    /// a rename on the same filesystem.
    fn temp_path(&self, stream_id: StreamId, stage: &str) -> Result<TempPath, SplitError> {
        let file = tempfile::Builder::new()
            .prefix(&format!(".{}{:05}-{}-", STREAM_FILE_PREFIX, stream_id, stage))
            .suffix(".part")
            .tempfile_in(&self.dest)?;
        Ok(file.into_temp_path())
    }

    async fn extract(&self, stream_id: StreamId, out: &Path) -> Result<(), SplitError> {
        let tools = self.splitter.tools();
        let cmd = extract_command(tools, &self.artifact, stream_id, out);
        tools
            .run(&cmd)
            .await
            .map_err(|source| SplitError::Extract {
                stream: stream_id,
                source,
            })?;
        if !is_non_empty_file(out) {
            return Err(SplitError::Extract {
                stream: stream_id,
                source: ToolError::Failed {
                    tool: Tool::Tshark,
                    code: Some(0),
                    stderr: "no packets were written".to_string(),
                },
            });
        }
        Ok(())
    }

    /// Truncated copy of `input`, or `None` when truncation is off or did
    /// not work out.
    async fn truncate(&self, stream_id: StreamId, input: &Path) -> Option<TempPath> {
        if self.snap_len == 0 {
            return None;
        }
        let out = match self.temp_path(stream_id, "snap") {
            Ok(out) => out,
            Err(e) => {
                warn!("Stream {} left untruncated: {}", stream_id, e);
                return None;
            }
        };
        let tools = self.splitter.tools();
        match tools.run(&truncate_command(tools, self.snap_len, input, &out)).await {
            Ok(_) if is_non_empty_file(&out) => {
                debug!("Truncated stream {} to {} bytes per packet", stream_id, self.snap_len);
                Some(out)
            }
            Ok(_) => {
                warn!("editcap wrote nothing for stream {}, keeping it untruncated", stream_id);
                None
            }
            Err(e) => {
                warn!("Stream {} left untruncated: {}", stream_id, e);
                None
            }
        }
    }
}
