//! Stand-ins for the Wireshark tools and name lookups.
//!
//! A fake capture is a text file with one packet per line:
//! `stream \t ip.src \t ip.dst \t ipv6.src \t ipv6.dst \t srcport \t dstport \t payload`.
//! The fake tshark filters and prints these rows the way the real one prints
//! packet fields, so the whole pipeline runs against files on disk.

use std::collections::HashMap;
use std::fs;
use std::net::IpAddr;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{Notify, Semaphore};

use crate::data_capture::{IndexBuilder, StreamSplitter};
use crate::error_handling::types::ToolError;
use crate::resolver::{EndpointResolver, LookupFuture, NameLookup, ResolverSettings};
use crate::storage::types::StreamId;
use crate::storage::FileStorage;
use crate::tooling::{
    CommandRunner, RunningTool, Tool, ToolCommand, ToolContext, ToolFuture, ToolOutput, Toolchain,
};

const COLUMNS: usize = 8;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Debug, Clone)]
pub struct Packet {
    pub stream: StreamId,
    pub src: String,
    pub sport: u16,
    pub dst: String,
    pub dport: u16,
    pub payload: String,
}

impl Packet {
    pub fn tcp(stream: StreamId, src: &str, sport: u16, dst: &str, dport: u16, payload: &str) -> Self {
        Self {
            stream,
            src: src.to_string(),
            sport,
            dst: dst.to_string(),
            dport,
            payload: payload.to_string(),
        }
    }

    fn to_line(&self) -> String {
        let (v4_src, v4_dst, v6_src, v6_dst) = if self.src.contains(':') {
            ("", "", self.src.as_str(), self.dst.as_str())
        } else {
            (self.src.as_str(), self.dst.as_str(), "", "")
        };
        format!(
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            self.stream, v4_src, v4_dst, v6_src, v6_dst, self.sport, self.dport, self.payload
        )
    }
}

pub fn write_capture(path: &Path, packets: &[Packet]) {
    let body: String = packets.iter().map(|p| p.to_line() + "\n").collect();
    fs::write(path, body).unwrap();
}

/// Streams 0, 1 and 2 with interleaved packets in both directions.
pub fn three_stream_capture() -> Vec<Packet> {
    vec![
        Packet::tcp(0, "10.0.0.2", 51000, "10.0.0.1", 22, "SSH-2.0-OpenSSH_9.6"),
        Packet::tcp(1, "10.0.0.2", 51001, "93.184.216.34", 443, "client hello"),
        Packet::tcp(0, "10.0.0.1", 22, "10.0.0.2", 51000, "SSH-2.0-OpenSSH_9.3"),
        Packet::tcp(2, "fe80::1", 5353, "fe80::2", 8080, "GET / HTTP/1.1"),
        Packet::tcp(1, "93.184.216.34", 443, "10.0.0.2", 51001, "server hello"),
        Packet::tcp(2, "fe80::2", 8080, "fe80::1", 5353, "HTTP/1.1 200 OK"),
    ]
}

fn failed(tool: Tool, stderr: &str) -> ToolError {
    ToolError::Failed {
        tool,
        code: Some(2),
        stderr: stderr.to_string(),
    }
}

fn read_rows(tool: Tool, path: &Path) -> Result<Vec<Vec<String>>, ToolError> {
    let content = fs::read_to_string(path)
        .map_err(|e| failed(tool, &format!("{}: {}", path.display(), e)))?;
    Ok(content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| {
            let mut cols: Vec<String> = l.split('\t').map(str::to_string).collect();
            cols.resize(COLUMNS, String::new());
            cols
        })
        .collect())
}

fn write_rows<'a>(path: &Path, rows: impl IntoIterator<Item = &'a Vec<String>>) -> Result<(), ToolError> {
    let body: String = rows.into_iter().map(|r| r.join("\t") + "\n").collect();
    fs::write(path, body)?;
    Ok(())
}

fn lines(values: impl IntoIterator<Item = String>) -> String {
    values.into_iter().map(|v| v + "\n").collect()
}

/// Fake tshark, editcap, capinfos and dumpcap.
#[derive(Default)]
pub struct FakeTools {
    pub fail_enumerate: bool,
    pub fail_scan: bool,
    pub fail_extract: Option<StreamId>,
    pub editcap_missing: bool,
    pub capinfos_fails: bool,
    /// Each extraction takes one permit before writing.
    pub extract_gate: Option<Arc<Semaphore>>,
    /// What dumpcap writes to its output file; nothing when `None`.
    pub capture_fixture: Option<Vec<Packet>>,
    pub calls: Mutex<Vec<ToolCommand>>,
}

impl FakeTools {
    pub fn context(self: &Arc<Self>) -> ToolContext {
        ToolContext::new(Toolchain::default(), self.clone())
    }

    pub fn calls(&self) -> Vec<ToolCommand> {
        self.calls.lock().unwrap().clone()
    }

    pub fn extract_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.tool == Tool::Tshark && c.value_of("-w").is_some())
            .count()
    }

    pub fn scan_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.tool == Tool::Tshark && c.args_lossy().iter().any(|a| a == "-E"))
            .count()
    }

    async fn tshark(&self, cmd: &ToolCommand) -> Result<ToolOutput, ToolError> {
        let input = cmd
            .value_of("-r")
            .ok_or_else(|| failed(Tool::Tshark, "no input file"))?;
        let rows = read_rows(Tool::Tshark, Path::new(&input))?;

        if let Some(out) = cmd.value_of("-w") {
            let id: StreamId = cmd
                .value_of("-Y")
                .and_then(|f| f.strip_prefix("tcp.stream eq ").and_then(|v| v.trim().parse().ok()))
                .ok_or_else(|| failed(Tool::Tshark, "unsupported display filter"))?;
            if let Some(gate) = &self.extract_gate {
                if let Ok(permit) = gate.acquire().await {
                    permit.forget();
                }
            }
            if self.fail_extract == Some(id) {
                return Err(failed(Tool::Tshark, "The file appears to be damaged or corrupt."));
            }
            // Stream numbering restarts in the extracted file
            let extracted: Vec<Vec<String>> = rows
                .into_iter()
                .filter(|r| r[0] == id.to_string())
                .map(|mut r| {
                    r[0] = "0".to_string();
                    r
                })
                .collect();
            write_rows(Path::new(&out), &extracted)?;
            return Ok(ToolOutput::default());
        }

        let stdout = if cmd.args_lossy().iter().any(|a| a == "-E") {
            if self.fail_scan {
                return Err(failed(Tool::Tshark, "scan failed"));
            }
            lines(rows.iter().map(|r| r[..COLUMNS - 1].join("\t")))
        } else {
            if self.fail_enumerate {
                return Err(failed(Tool::Tshark, "The file isn't a capture file in a format TShark understands."));
            }
            lines(rows.iter().map(|r| r[0].clone()))
        };
        Ok(ToolOutput {
            stdout,
            stderr: String::new(),
        })
    }

    fn editcap(&self, cmd: &ToolCommand) -> Result<ToolOutput, ToolError> {
        if self.editcap_missing {
            return Err(ToolError::NotFound {
                tool: Tool::Editcap,
                hint: Tool::Editcap.install_hint(),
            });
        }
        let args = cmd.args_lossy();
        let snap: usize = cmd
            .value_of("-s")
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| failed(Tool::Editcap, "missing -s"))?;
        let (input, out) = match args.as_slice() {
            [.., input, out] => (input.clone(), out.clone()),
            _ => return Err(failed(Tool::Editcap, "usage")),
        };
        let rows: Vec<Vec<String>> = read_rows(Tool::Editcap, Path::new(&input))?
            .into_iter()
            .map(|mut r| {
                let payload = &mut r[COLUMNS - 1];
                if payload.len() > snap {
                    payload.truncate(snap);
                }
                r
            })
            .collect();
        write_rows(Path::new(&out), &rows)?;
        Ok(ToolOutput::default())
    }

    fn capinfos(&self, cmd: &ToolCommand) -> Result<ToolOutput, ToolError> {
        if self.capinfos_fails {
            return Err(failed(Tool::Capinfos, "capinfos: An error occurred"));
        }
        let file = cmd
            .args_lossy()
            .last()
            .cloned()
            .ok_or_else(|| failed(Tool::Capinfos, "usage"))?;
        let count = read_rows(Tool::Capinfos, Path::new(&file))?.len();
        Ok(ToolOutput {
            stdout: format!("File name:           {}\nNumber of packets:   {}\n", file, count),
            stderr: String::new(),
        })
    }
}

impl CommandRunner for FakeTools {
    fn output<'a>(&'a self, command: &'a ToolCommand) -> ToolFuture<'a, Result<ToolOutput, ToolError>> {
        Box::pin(async move {
            self.calls.lock().unwrap().push(command.clone());
            match command.tool {
                Tool::Tshark => self.tshark(command).await,
                Tool::Editcap => self.editcap(command),
                Tool::Capinfos => self.capinfos(command),
                Tool::Dumpcap => Err(failed(Tool::Dumpcap, "dumpcap is spawned, not run")),
            }
        })
    }

    fn spawn(&self, command: &ToolCommand) -> Result<Box<dyn RunningTool>, ToolError> {
        self.calls.lock().unwrap().push(command.clone());
        if command.tool != Tool::Dumpcap {
            return Err(failed(command.tool, "only dumpcap is spawned"));
        }
        let duration = command
            .value_of("-a")
            .and_then(|v| v.strip_prefix("duration:").and_then(|s| s.parse().ok()))
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(60));

        let code = match (&self.capture_fixture, command.value_of("-w")) {
            (Some(packets), Some(out)) => {
                write_capture(Path::new(&out), packets);
                Some(0)
            }
            _ => Some(1),
        };
        Ok(Box::new(FakeCapture {
            duration,
            code,
            stop: Arc::new(Notify::new()),
        }))
    }
}

/// A capture that runs for its duration unless stopped.
struct FakeCapture {
    duration: Duration,
    code: Option<i32>,
    stop: Arc<Notify>,
}

impl RunningTool for FakeCapture {
    fn wait(&mut self) -> ToolFuture<'_, Result<Option<i32>, ToolError>> {
        Box::pin(async move {
            tokio::select! {
                _ = tokio::time::sleep(self.duration) => {}
                _ = self.stop.notified() => {}
            }
            Ok(self.code)
        })
    }

    fn terminate(&mut self) -> Result<(), ToolError> {
        self.stop.notify_one();
        Ok(())
    }

    fn kill(&mut self) -> Result<(), ToolError> {
        self.stop.notify_one();
        Ok(())
    }
}

/// Answers reverse lookups from a fixed table.
#[derive(Default)]
pub struct StaticLookup {
    pub names: HashMap<IpAddr, Vec<String>>,
    pub calls: AtomicUsize,
}

impl StaticLookup {
    pub fn with(entries: &[(&str, &str)]) -> Self {
        Self {
            names: entries
                .iter()
                .map(|(ip, name)| (ip.parse().unwrap(), vec![name.to_string()]))
                .collect(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl NameLookup for StaticLookup {
    fn reverse(&self, ip: IpAddr) -> LookupFuture<'_> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let names = self.names.get(&ip).cloned().unwrap_or_default();
        Box::pin(async move { Ok(names) })
    }

    fn name_service(&self, _ip: IpAddr) -> LookupFuture<'_> {
        Box::pin(async { Ok(Vec::new()) })
    }
}

/// Splitter wired to the fakes with file storage.
pub fn splitter(tools: &Arc<FakeTools>, lookup: Arc<StaticLookup>, resolve: bool) -> StreamSplitter {
    let settings = ResolverSettings {
        enabled: resolve,
        ..Default::default()
    };
    let resolver = EndpointResolver::new(lookup, settings);
    StreamSplitter::new(IndexBuilder::new(
        tools.context(),
        resolver,
        Arc::new(FileStorage::new()),
    ))
}
