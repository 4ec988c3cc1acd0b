//! External capture-analysis tools.
//!
//! Packet parsing, filtering and truncation are delegated to the Wireshark
//! command-line suite. This module locates the executables ([`Toolchain`]) and
//! runs them behind the [`CommandRunner`] seam so the pipeline can be exercised
//! without a Wireshark install.

pub mod runner;
pub mod toolchain;

pub use runner::{CommandRunner, RunningTool, TokioCommandRunner, ToolCommand, ToolFuture, ToolOutput};
pub use toolchain::Toolchain;

use serde::Serialize;
use std::fmt;
use std::sync::Arc;

use crate::error_handling::types::ToolError;

/// The external executables the pipeline relies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tool {
    /// Dissection, stream enumeration and per-stream filtering.
    Tshark,
    /// Per-packet truncation of stream files.
    Editcap,
    /// Packet counting.
    Capinfos,
    /// Live capture.
    Dumpcap,
}

impl Tool {
    pub const ALL: [Tool; 4] = [Tool::Tshark, Tool::Editcap, Tool::Capinfos, Tool::Dumpcap];

    pub fn binary_name(&self) -> &'static str {
        match self {
            Tool::Tshark => "tshark",
            Tool::Editcap => "editcap",
            Tool::Capinfos => "capinfos",
            Tool::Dumpcap => "dumpcap",
        }
    }

    /// Environment variable overriding the executable location.
    pub fn env_var(&self) -> &'static str {
        match self {
            Tool::Tshark => "TCPSPLIT_TSHARK",
            Tool::Editcap => "TCPSPLIT_EDITCAP",
            Tool::Capinfos => "TCPSPLIT_CAPINFOS",
            Tool::Dumpcap => "TCPSPLIT_DUMPCAP",
        }
    }

    /// What to tell the user when the executable is missing.
    pub fn install_hint(&self) -> String {
        format!(
            "install Wireshark's command-line tools (e.g. `apt install tshark`, `dnf install wireshark-cli` or `brew install --cask wireshark`) or point {} at the {} executable",
            self.env_var(),
            self.binary_name()
        )
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.binary_name())
    }
}

/// A [`Toolchain`] together with the runner that executes it.
#[derive(Clone)]
pub struct ToolContext {
    pub toolchain: Toolchain,
    pub runner: Arc<dyn CommandRunner>,
}

impl ToolContext {
    pub fn new(toolchain: Toolchain, runner: Arc<dyn CommandRunner>) -> Self {
        Self { toolchain, runner }
    }

    /// Real child processes.
    pub fn system(toolchain: Toolchain) -> Self {
        Self::new(toolchain, Arc::new(TokioCommandRunner::new()))
    }

    pub fn command(&self, tool: Tool) -> ToolCommand {
        self.toolchain.command(tool)
    }

    pub async fn run(&self, command: &ToolCommand) -> Result<ToolOutput, ToolError> {
        self.runner.output(command).await
    }

    pub fn spawn(&self, command: &ToolCommand) -> Result<Box<dyn RunningTool>, ToolError> {
        self.runner.spawn(command)
    }
}
