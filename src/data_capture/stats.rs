use std::path::Path;
use std::sync::OnceLock;

use log::{debug, warn};
use regex::Regex;

use crate::tooling::{Tool, ToolCommand, ToolContext};

/// Size and packet count of one stream file; `None` where the probe failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub size_bytes: Option<u64>,
    pub packet_count: Option<u64>,
}

fn packet_count_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?m)^\s*Number of packets:\s*([0-9][0-9,]*)\s*$")
            .expect("packet count pattern is valid")
    })
}

/// `capinfos -M -c <file>`; `-M` prints exact counts without unit suffixes.
pub fn packet_count_command(tools: &ToolContext, file: &Path) -> ToolCommand {
    tools.command(Tool::Capinfos).args(["-M", "-c"]).arg(file)
}

/// Extracts the packet count from capinfos output.
pub fn parse_packet_count(stdout: &str) -> Option<u64> {
    let captures = packet_count_pattern().captures(stdout)?;
    captures.get(1)?.as_str().replace(',', "").parse().ok()
}

/// Probes `file`. Never fails: an unreadable size or a failed count is
/// recorded as unknown.
pub async fn probe(tools: &ToolContext, file: &Path) -> StreamStats {
    let size_bytes = match tokio::fs::metadata(file).await {
        Ok(meta) => Some(meta.len()),
        Err(e) => {
            warn!("Unable to read size of {}: {}", file.display(), e);
            None
        }
    };

    let packet_count = match tools.run(&packet_count_command(tools, file)).await {
        Ok(output) => {
            let count = parse_packet_count(&output.stdout);
            if count.is_none() {
                warn!(
                    "Unrecognised capinfos output for {}, packet count unknown",
                    file.display()
                );
            }
            count
        }
        Err(e) => {
            warn!("Packet count of {} unknown: {}", file.display(), e);
            None
        }
    };

    debug!(
        "{}: {:?} bytes, {:?} packets",
        file.display(),
        size_bytes,
        packet_count
    );
    StreamStats {
        size_bytes,
        packet_count,
    }
}
