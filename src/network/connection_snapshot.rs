use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use chrono::{DateTime, FixedOffset};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};

use crate::error_handling::types::ToolError;

pub const DEFAULT_TCPWATCH: &str = "tcpwatch";
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

/// One socket of a live-connection snapshot.
///
/// The producer serialises rows with capitalised field names; both spellings
/// are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionRow {
    #[serde(alias = "Proto")]
    pub proto: String,
    #[serde(alias = "Local")]
    pub local: String,
    #[serde(alias = "Remote")]
    pub remote: String,
    #[serde(alias = "State")]
    pub state: String,
    #[serde(alias = "PID", default)]
    pub pid: i32,
    #[serde(alias = "Process", default)]
    pub process: String,
}

impl ConnectionRow {
    fn process_label(&self) -> &str {
        match self.process.trim() {
            "" => "-",
            p => p,
        }
    }

    fn display_order(&self, other: &Self) -> Ordering {
        self.state
            .cmp(&other.state)
            .then_with(|| self.local.cmp(&other.local))
            .then_with(|| self.remote.cmp(&other.remote))
            .then_with(|| self.pid.cmp(&other.pid))
    }
}

/// One refresh of the connection listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionSnapshot {
    pub updated: DateTime<FixedOffset>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub rows: Vec<ConnectionRow>,
}

impl ConnectionSnapshot {
    /// Renders the snapshot as an aligned text table.
    pub fn render_table(&self) -> String {
        let mut rows: Vec<&ConnectionRow> = self.rows.iter().collect();
        rows.sort_by(|a, b| a.display_order(b));

        let header = ["PROTO", "LOCAL", "REMOTE", "STATE", "PID", "PROCESS"];
        let cells: Vec<[String; 6]> = rows
            .iter()
            .map(|r| {
                [
                    r.proto.clone(),
                    r.local.clone(),
                    r.remote.clone(),
                    r.state.clone(),
                    r.pid.to_string(),
                    r.process_label().to_string(),
                ]
            })
            .collect();

        let mut widths = header.map(str::len);
        for row in &cells {
            for (width, cell) in widths.iter_mut().zip(row.iter()) {
                *width = (*width).max(cell.len());
            }
        }

        let mut out = String::new();
        if let Some(title) = &self.title {
            out.push_str(title);
            out.push('\n');
        }
        out.push_str(&format!("Updated: {}\n", self.updated.to_rfc3339()));
        push_row(&mut out, &widths, header.iter().copied());
        for row in &cells {
            push_row(&mut out, &widths, row.iter().map(String::as_str));
        }
        out
    }
}

fn push_row<'a>(out: &mut String, widths: &[usize; 6], cells: impl Iterator<Item = &'a str>) {
    let line: Vec<String> = cells
        .zip(widths.iter())
        .map(|(cell, width)| format!("{:<width$}", cell, width = *width))
        .collect();
    out.push_str(line.join("  ").trim_end());
    out.push('\n');
}

/// Parses one line of the stream. Blank lines yield `None`.
pub fn parse_line(line: &str) -> Result<Option<ConnectionSnapshot>, serde_json::Error> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(line).map(Some)
}

/// Reads snapshots from a line-delimited JSON stream, skipping lines that
/// do not parse.
pub struct SnapshotReader<R> {
    lines: Lines<R>,
    skipped: usize,
}

impl<R: AsyncBufRead + Unpin> SnapshotReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            skipped: 0,
        }
    }

    /// Next well-formed snapshot, or `None` at end of stream.
    pub async fn next(&mut self) -> std::io::Result<Option<ConnectionSnapshot>> {
        while let Some(line) = self.lines.next_line().await? {
            match parse_line(&line) {
                Ok(Some(snapshot)) => return Ok(Some(snapshot)),
                Ok(None) => continue,
                Err(e) => {
                    self.skipped += 1;
                    warn!("Skipping malformed connection snapshot: {}", e);
                }
            }
        }
        Ok(None)
    }

    /// Number of malformed lines skipped so far.
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

/// A running `tcpwatch -jsonl` process.
pub struct ConnectionWatcher {
    child: Child,
    reader: SnapshotReader<BufReader<ChildStdout>>,
}

impl ConnectionWatcher {
    pub fn command(program: &Path, interval: Duration) -> Command {
        let mut cmd = Command::new(program);
        cmd.arg("-jsonl")
            .arg("-interval")
            .arg(format!("{}ms", interval.as_millis().max(1)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        cmd
    }

    pub fn spawn(program: Option<PathBuf>, interval: Duration) -> Result<Self, ToolError> {
        let program = program.unwrap_or_else(|| PathBuf::from(DEFAULT_TCPWATCH));
        debug!("Spawning {} -jsonl", program.display());
        let mut child = Self::command(&program, interval).spawn().map_err(|e| {
            ToolError::IoError(std::io::Error::new(
                e.kind(),
                format!("unable to start {}: {}", program.display(), e),
            ))
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            ToolError::IoError(std::io::Error::other("connection watcher has no stdout"))
        })?;
        Ok(Self {
            child,
            reader: SnapshotReader::new(BufReader::new(stdout)),
        })
    }

    pub async fn next(&mut self) -> Result<Option<ConnectionSnapshot>, ToolError> {
        Ok(self.reader.next().await?)
    }

    pub async fn stop(mut self) -> Result<(), ToolError> {
        self.child.kill().await?;
        Ok(())
    }
}
