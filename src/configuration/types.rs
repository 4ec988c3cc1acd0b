use serde::Deserialize;
use std::path::PathBuf;

pub const DEFAULT_RESOLVER_CONCURRENCY: usize = 8;
pub const MIN_RESOLVER_CONCURRENCY: usize = 1;
pub const MAX_RESOLVER_CONCURRENCY: usize = 32;

pub const DEFAULT_RESOLVER_TIMEOUT_MS: u64 = 2000;
pub const MIN_RESOLVER_TIMEOUT_MS: u64 = 200;
pub const MAX_RESOLVER_TIMEOUT_MS: u64 = 10_000;

/// Zero disables truncation.
pub const DEFAULT_SNAPLEN: u32 = 0;
pub const MIN_SNAPLEN: u32 = 64;
pub const MAX_SNAPLEN: u32 = 262_144;

pub const DEFAULT_DUMP_DIR: &str = "captures";

/// Returns `true` when `snap_len` either disables truncation or lies in the
/// accepted range.
pub fn is_valid_snaplen(snap_len: u32) -> bool {
    snap_len == 0 || (MIN_SNAPLEN..=MAX_SNAPLEN).contains(&snap_len)
}

/// On-disk configuration file. Every field is optional; absent values fall
/// back to environment variables and then to the built-in defaults.
#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub dump_dir: Option<PathBuf>,
    pub resolver: ResolverFileConfig,
    pub split: SplitFileConfig,
    pub tools: ToolPaths,
}

#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ResolverFileConfig {
    pub enabled: Option<bool>,
    pub timeout_ms: Option<u64>,
    pub concurrency: Option<usize>,
}

#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SplitFileConfig {
    pub snaplen: Option<u32>,
}

/// Explicit executable locations. `None` means "discover".
#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ToolPaths {
    pub tshark: Option<PathBuf>,
    pub editcap: Option<PathBuf>,
    pub capinfos: Option<PathBuf>,
    pub dumpcap: Option<PathBuf>,
}

impl ToolPaths {
    /// Fills every unset path from `fallback`.
    pub fn or(self, fallback: ToolPaths) -> ToolPaths {
        ToolPaths {
            tshark: self.tshark.or(fallback.tshark),
            editcap: self.editcap.or(fallback.editcap),
            capinfos: self.capinfos.or(fallback.capinfos),
            dumpcap: self.dumpcap.or(fallback.dumpcap),
        }
    }
}
