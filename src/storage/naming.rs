//! File naming convention of a split directory.
//!
//! The splitter writes `tcp-stream-<id>.pcapng` with the id zero-padded to
//! five digits; reconstruction parses ids back out of a directory listing.

use regex::Regex;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use super::types::StreamId;

pub const STREAM_FILE_PREFIX: &str = "tcp-stream-";
pub const STREAM_FILE_EXTENSION: &str = "pcapng";
pub const INDEX_FILE_NAME: &str = "tcp-streams-index.json";

/// Extensions recognised as raw capture artifacts.
pub const CAPTURE_EXTENSIONS: [&str; 3] = ["pcap", "pcapng", "cap"];

fn stream_file_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^tcp-stream-(\d{5,})\.pcapng$").expect("stream file pattern is valid")
    })
}

pub fn stream_file_name(id: StreamId) -> String {
    format!("{}{:05}.{}", STREAM_FILE_PREFIX, id, STREAM_FILE_EXTENSION)
}

/// Parses the stream id out of a file name produced by [`stream_file_name`].
pub fn parse_stream_file_name(name: &str) -> Option<StreamId> {
    stream_file_pattern()
        .captures(name)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

pub fn index_path(split_dir: &Path) -> PathBuf {
    split_dir.join(INDEX_FILE_NAME)
}

pub fn is_capture_file(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| CAPTURE_EXTENSIONS.iter().any(|c| e.eq_ignore_ascii_case(c)))
            .unwrap_or(false)
}

/// `true` when `path` is a plain file with at least one byte.
pub fn is_non_empty_file(path: &Path) -> bool {
    fs::metadata(path)
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}

/// Stream files present in `dir`, sorted by ascending stream id.
pub fn list_stream_files(dir: &Path) -> io::Result<Vec<(StreamId, PathBuf)>> {
    let mut found = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name();
        if let Some(id) = name.to_str().and_then(parse_stream_file_name) {
            found.push((id, entry.path()));
        }
    }
    found.sort_by_key(|(id, _)| *id);
    Ok(found)
}

/// A directory looks like split output when it holds at least one stream file.
pub fn looks_like_split_dir(dir: &Path) -> bool {
    list_stream_files(dir)
        .map(|files| !files.is_empty())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn names_are_zero_padded() {
        assert_eq!(stream_file_name(0), "tcp-stream-00000.pcapng");
        assert_eq!(stream_file_name(42), "tcp-stream-00042.pcapng");
        assert_eq!(stream_file_name(123456), "tcp-stream-123456.pcapng");
    }

    #[test]
    fn parse_accepts_only_the_convention() {
        assert_eq!(parse_stream_file_name("tcp-stream-00007.pcapng"), Some(7));
        assert_eq!(parse_stream_file_name("tcp-stream-123456.pcapng"), Some(123456));
        assert_eq!(parse_stream_file_name("tcp-stream-7.pcapng"), None);
        assert_eq!(parse_stream_file_name("tcp-stream-00007.pcap"), None);
        assert_eq!(parse_stream_file_name(".tcp-stream-00007.pcapng.part"), None);
        assert_eq!(parse_stream_file_name(INDEX_FILE_NAME), None);
    }

    #[test]
    fn listing_is_sorted_and_filtered() {
        let dir = TempDir::new().unwrap();
        for name in [
            "tcp-stream-00010.pcapng",
            "tcp-stream-00002.pcapng",
            "notes.txt",
            "capture.pcapng",
        ] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }
        fs::create_dir(dir.path().join("tcp-stream-00005.pcapng")).unwrap();

        let ids: Vec<_> = list_stream_files(dir.path())
            .unwrap()
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(ids, vec![2, 10]);
        assert!(looks_like_split_dir(dir.path()));
    }

    #[test]
    fn capture_extension_check_is_case_insensitive() {
        let dir = TempDir::new().unwrap();
        let upper = dir.path().join("trace.PCAPNG");
        let text = dir.path().join("trace.txt");
        fs::write(&upper, b"x").unwrap();
        fs::write(&text, b"x").unwrap();
        assert!(is_capture_file(&upper));
        assert!(!is_capture_file(&text));
        assert!(!is_capture_file(&dir.path().join("missing.pcap")));
    }
}
