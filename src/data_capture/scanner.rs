use std::collections::BTreeMap;
use std::path::Path;

use log::{debug, warn};

use crate::storage::types::{Endpoint, StreamEndpoints, StreamId};
use crate::tooling::{Tool, ToolCommand, ToolContext};

/// First-observed endpoints of every stream in an artifact.
pub type EndpointMap = BTreeMap<StreamId, StreamEndpoints>;

/// Field order of [`scan_command`] output.
const FIELDS: [&str; 7] = [
    "tcp.stream",
    "ip.src",
    "ip.dst",
    "ipv6.src",
    "ipv6.dst",
    "tcp.srcport",
    "tcp.dstport",
];

/// One tshark pass printing the stream id and first address/port fields of
/// every TCP packet, tab separated.
pub fn scan_command(tools: &ToolContext, artifact: &Path) -> ToolCommand {
    let mut cmd = tools
        .command(Tool::Tshark)
        .arg("-r")
        .arg(artifact)
        .args(["-n", "-Y", "tcp", "-T", "fields"])
        .args(["-E", "separator=/t", "-E", "occurrence=f"]);
    for field in FIELDS {
        cmd = cmd.arg("-e").arg(field);
    }
    cmd
}

/// Scans `artifact` once for per-stream endpoints.
///
/// Metadata is enrichment only: when the tool fails the result is empty and
/// the caller carries on without endpoints.
pub async fn scan(tools: &ToolContext, artifact: &Path) -> EndpointMap {
    match tools.run(&scan_command(tools, artifact)).await {
        Ok(output) => {
            let endpoints = parse_scan_output(&output.stdout);
            debug!(
                "Scanned endpoints of {} streams in {}",
                endpoints.len(),
                artifact.display()
            );
            endpoints
        }
        Err(e) => {
            warn!(
                "Endpoint scan of {} failed, continuing without endpoints: {}",
                artifact.display(),
                e
            );
            EndpointMap::new()
        }
    }
}

/// Parses scan output. The first row seen for a stream wins.
pub fn parse_scan_output(stdout: &str) -> EndpointMap {
    let mut endpoints = EndpointMap::new();
    for line in stdout.lines() {
        if let Some((id, row)) = parse_row(line) {
            endpoints.entry(id).or_insert(row);
        }
    }
    endpoints
}

fn parse_row(line: &str) -> Option<(StreamId, StreamEndpoints)> {
    let line = line.trim_end_matches('\r');
    if line.trim().is_empty() {
        return None;
    }
    let mut cols = line.split('\t').map(str::trim);
    let mut next = || cols.next().unwrap_or("");

    let id = first_value(next()).parse::<StreamId>().ok()?;
    let (ip_src, ip_dst, ip6_src, ip6_dst) = (next(), next(), next(), next());
    let (src_port, dst_port) = (next(), next());

    Some((
        id,
        StreamEndpoints {
            src: endpoint(ip_src, ip6_src, src_port),
            dst: endpoint(ip_dst, ip6_dst, dst_port),
        },
    ))
}

/// IPv4 when present, else IPv6.
fn endpoint(v4: &str, v6: &str, port: &str) -> Option<Endpoint> {
    let address = [first_value(v4), first_value(v6)]
        .into_iter()
        .find(|a| !a.is_empty())?;
    Some(Endpoint::new(address, first_value(port).parse().ok()))
}

/// tshark joins repeated occurrences with commas.
fn first_value(field: &str) -> &str {
    field.split(',').next().unwrap_or("").trim()
}
