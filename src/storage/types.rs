//! Manifest data model shared by the splitter, the index builder and readers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Identifier the capture-analysis tool assigns to one reassembled TCP
/// conversation. Not guaranteed contiguous or zero-based.
pub type StreamId = u64;

/// Current manifest schema. Version 1 had no `sizeBytes`/`packetCount`.
pub const INDEX_VERSION: u32 = 2;

/// `captureFile` value of a manifest rebuilt from stream files alone.
pub const IMPORTED_CAPTURE: &str = "(imported)";

/// Rendering for statistics that could not be collected.
pub const UNKNOWN: &str = "unknown";

/// One side of a TCP conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    /// IPv4 or IPv6 literal.
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Empty until resolution completes; may stay empty.
    #[serde(default)]
    pub hostnames: Vec<String>,
}

impl Endpoint {
    pub fn new(address: impl Into<String>, port: Option<u16>) -> Self {
        Self {
            address: address.into(),
            port,
            hostnames: Vec::new(),
        }
    }

    /// `host (addr):port`, or `addr:port` when no hostname is known.
    /// IPv6 addresses are bracketed when a port follows.
    pub fn label(&self) -> String {
        let addr = match (self.port, self.address.contains(':')) {
            (Some(_), true) => format!("[{}]", self.address),
            _ => self.address.clone(),
        };
        let host = match self.hostnames.first() {
            Some(name) => format!("{} ({})", name, addr),
            None => addr,
        };
        match self.port {
            Some(port) => format!("{}:{}", host, port),
            None => host,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// First-observed endpoints of one stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamEndpoints {
    pub src: Option<Endpoint>,
    pub dst: Option<Endpoint>,
}

/// Manifest entry for one stream file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamRecord {
    pub id: StreamId,
    /// File name relative to the split directory.
    pub file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src: Option<Endpoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dst: Option<Endpoint>,
    /// Cached rendering of `src`/`dst`; never authoritative.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub packet_count: Option<u64>,
}

impl StreamRecord {
    pub fn new(id: StreamId, file: impl Into<String>, endpoints: StreamEndpoints) -> Self {
        let mut record = Self {
            id,
            file: file.into(),
            src: endpoints.src,
            dst: endpoints.dst,
            description: None,
            size_bytes: None,
            packet_count: None,
        };
        record.refresh_description();
        record
    }

    /// Recomputes `description` from the current endpoints.
    pub fn refresh_description(&mut self) {
        self.description = describe(self.src.as_ref(), self.dst.as_ref());
    }

    pub fn size_label(&self) -> String {
        self.size_bytes
            .map(|n| n.to_string())
            .unwrap_or_else(|| UNKNOWN.to_string())
    }

    pub fn packet_count_label(&self) -> String {
        self.packet_count
            .map(|n| n.to_string())
            .unwrap_or_else(|| UNKNOWN.to_string())
    }
}

/// `src → dst`, with whichever side is known. `None` when neither is.
pub fn describe(src: Option<&Endpoint>, dst: Option<&Endpoint>) -> Option<String> {
    match (src, dst) {
        (Some(s), Some(d)) => Some(format!("{} → {}", s, d)),
        (Some(s), None) => Some(format!("{} → ?", s)),
        (None, Some(d)) => Some(format!("? → {}", d)),
        (None, None) => None,
    }
}

/// The manifest of one split directory.
///
/// Readers accept any `version`: fields introduced later are optional and
/// unknown fields are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamIndex {
    pub version: u32,
    pub capture_file: String,
    #[serde(default)]
    pub split_dir: PathBuf,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub streams: Vec<StreamRecord>,
}

impl StreamIndex {
    pub fn new(capture_file: impl Into<String>, split_dir: PathBuf, streams: Vec<StreamRecord>) -> Self {
        Self {
            version: INDEX_VERSION,
            capture_file: capture_file.into(),
            split_dir,
            created_at: Utc::now(),
            streams,
        }
    }

    pub fn is_imported(&self) -> bool {
        self.capture_file == IMPORTED_CAPTURE
    }

    pub fn stream_ids(&self) -> Vec<StreamId> {
        self.streams.iter().map(|s| s.id).collect()
    }
}

/// Emitted once per completed stream, in ascending stream order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SplitProgress {
    /// 1-based position of the stream in the split.
    pub current: usize,
    pub total: usize,
    pub stream_id: StreamId,
    pub file: String,
}
