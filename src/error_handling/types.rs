use std::fmt;
use std::path::PathBuf;

use crate::session_management::SessionState;
use crate::storage::types::StreamId;
use crate::tooling::Tool;

#[derive(Debug)]
pub enum ConfigError {
    IoError(std::io::Error),
    TomlError(String),
    DirectoryDoesNotExist(String),
    NotInRange(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {}", e),
            ConfigError::TomlError(e) => write!(f, "TOML parsing error: {}", e),
            ConfigError::DirectoryDoesNotExist(e) => write!(f, "Directory error: {}", e),
            ConfigError::NotInRange(e) => write!(f, "Value out of range: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::IoError(err)
    }
}

/// Failure of an external capture-analysis tool invocation.
#[derive(Debug)]
pub enum ToolError {
    /// The executable could not be located.
    NotFound { tool: Tool, hint: String },
    /// The executable exists but could not be started.
    Spawn { tool: Tool, source: std::io::Error },
    /// The tool ran and exited unsuccessfully.
    Failed {
        tool: Tool,
        code: Option<i32>,
        stderr: String,
    },
    IoError(std::io::Error),
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolError::NotFound { tool, hint } => write!(f, "{} not found: {}", tool, hint),
            ToolError::Spawn { tool, source } => write!(f, "Failed to start {}: {}", tool, source),
            ToolError::Failed { tool, code, stderr } => {
                match code {
                    Some(c) => write!(f, "{} exited with status {}", tool, c)?,
                    None => write!(f, "{} was terminated by a signal", tool)?,
                }
                if !stderr.is_empty() {
                    write!(f, ": {}", stderr)?;
                }
                Ok(())
            }
            ToolError::IoError(e) => write!(f, "Tool IO error: {}", e),
        }
    }
}

impl std::error::Error for ToolError {}

impl From<std::io::Error> for ToolError {
    fn from(err: std::io::Error) -> Self {
        ToolError::IoError(err)
    }
}

#[derive(Debug)]
pub enum LookupError {
    Resolver(String),
    NameService(String),
}

impl fmt::Display for LookupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LookupError::Resolver(e) => write!(f, "Reverse lookup failed: {}", e),
            LookupError::NameService(e) => write!(f, "Name service lookup failed: {}", e),
        }
    }
}

impl std::error::Error for LookupError {}

#[derive(Debug)]
pub enum StorageError {
    NotFound(PathBuf),
    ReadFailed(String),
    WriteFailed(String),
    ParseFailed(String),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::NotFound(p) => write!(f, "No stream index in {}", p.display()),
            StorageError::ReadFailed(e) => write!(f, "Storage read failed: {}", e),
            StorageError::WriteFailed(e) => write!(f, "Storage write failed: {}", e),
            StorageError::ParseFailed(e) => write!(f, "Stream index is malformed: {}", e),
        }
    }
}

impl std::error::Error for StorageError {}

#[derive(Debug)]
pub enum SplitError {
    /// Stream enumeration failed; the artifact is unusable.
    Enumerate(ToolError),
    /// Primary extraction of one stream failed.
    Extract { stream: StreamId, source: ToolError },
    InvalidSnapLen(u32),
    /// `finish` was called before every stream was written.
    Incomplete { written: usize, total: usize },
    IoError(std::io::Error),
    StorageError(StorageError),
}

impl fmt::Display for SplitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SplitError::Enumerate(e) => write!(f, "Unable to enumerate TCP streams: {}", e),
            SplitError::Extract { stream, source } => {
                write!(f, "Unable to extract TCP stream {}: {}", stream, source)
            }
            SplitError::InvalidSnapLen(n) => write!(
                f,
                "Snap length {} is outside {}..={} (use 0 to disable truncation)",
                n,
                crate::configuration::types::MIN_SNAPLEN,
                crate::configuration::types::MAX_SNAPLEN
            ),
            SplitError::Incomplete { written, total } => {
                write!(f, "Split finished early: {}/{} streams written", written, total)
            }
            SplitError::IoError(e) => write!(f, "Split IO error: {}", e),
            SplitError::StorageError(e) => write!(f, "Split storage error: {}", e),
        }
    }
}

impl std::error::Error for SplitError {}

impl From<std::io::Error> for SplitError {
    fn from(err: std::io::Error) -> Self {
        SplitError::IoError(err)
    }
}

impl From<StorageError> for SplitError {
    fn from(err: StorageError) -> Self {
        SplitError::StorageError(err)
    }
}

#[derive(Debug)]
pub enum SessionError {
    /// A capture or split already owns the session slot.
    AlreadyActive(SessionState),
    NotCapturing(SessionState),
    InvalidTransition { from: SessionState, to: SessionState },
    /// A split is still writing to the requested directory.
    StillInProgress(PathBuf),
    NothingToImport(PathBuf),
    NotASplitFolder(PathBuf),
    InvalidRequest(String),
    ToolError(ToolError),
    SplitError(SplitError),
    StorageError(StorageError),
    IoError(std::io::Error),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::AlreadyActive(state) => {
                write!(f, "A capture session is already active (state: {})", state)
            }
            SessionError::NotCapturing(state) => {
                write!(f, "No capture is running (state: {})", state)
            }
            SessionError::InvalidTransition { from, to } => {
                write!(f, "Invalid session transition {} -> {}", from, to)
            }
            SessionError::StillInProgress(p) => write!(
                f,
                "Split of {} is still in progress; try again when it completes",
                p.display()
            ),
            SessionError::NothingToImport(p) => write!(
                f,
                "{} contains no capture file or split folder to import",
                p.display()
            ),
            SessionError::NotASplitFolder(p) => {
                write!(f, "{} is not a split output folder", p.display())
            }
            SessionError::InvalidRequest(e) => write!(f, "Invalid request: {}", e),
            SessionError::ToolError(e) => write!(f, "Tool error: {}", e),
            SessionError::SplitError(e) => write!(f, "Split error: {}", e),
            SessionError::StorageError(e) => write!(f, "Storage error: {}", e),
            SessionError::IoError(e) => write!(f, "Session IO error: {}", e),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<ToolError> for SessionError {
    fn from(err: ToolError) -> Self {
        SessionError::ToolError(err)
    }
}

impl From<SplitError> for SessionError {
    fn from(err: SplitError) -> Self {
        SessionError::SplitError(err)
    }
}

impl From<StorageError> for SessionError {
    fn from(err: StorageError) -> Self {
        SessionError::StorageError(err)
    }
}

impl From<std::io::Error> for SessionError {
    fn from(err: std::io::Error) -> Self {
        SessionError::IoError(err)
    }
}

#[derive(Debug)]
pub enum WebError {
    BindFailed(String),
}

impl fmt::Display for WebError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WebError::BindFailed(e) => write!(f, "Web server bind failed: {}", e),
        }
    }
}

impl std::error::Error for WebError {}
