use log::debug;
use std::path::{Path, PathBuf};

use super::runner::ToolCommand;
use super::Tool;
use crate::configuration::types::ToolPaths;

/// Resolved locations of the Wireshark command-line tools.
#[derive(Debug, Clone, PartialEq)]
pub struct Toolchain {
    pub tshark: PathBuf,
    pub editcap: PathBuf,
    pub capinfos: PathBuf,
    pub dumpcap: PathBuf,
}

impl Toolchain {
    /// Uses explicit paths where given; otherwise the platform's Wireshark
    /// install location when it exists, and finally the bare binary name so
    /// the OS searches `PATH`.
    pub fn discover(overrides: &ToolPaths) -> Self {
        let pick = |tool: Tool, explicit: &Option<PathBuf>| {
            let path = match explicit {
                Some(p) => p.clone(),
                None => Self::bundled_path(tool)
                    .unwrap_or_else(|| PathBuf::from(executable_name(tool))),
            };
            debug!("Using {} at {}", tool, path.display());
            path
        };
        Self {
            tshark: pick(Tool::Tshark, &overrides.tshark),
            editcap: pick(Tool::Editcap, &overrides.editcap),
            capinfos: pick(Tool::Capinfos, &overrides.capinfos),
            dumpcap: pick(Tool::Dumpcap, &overrides.dumpcap),
        }
    }

    pub fn path(&self, tool: Tool) -> &Path {
        match tool {
            Tool::Tshark => &self.tshark,
            Tool::Editcap => &self.editcap,
            Tool::Capinfos => &self.capinfos,
            Tool::Dumpcap => &self.dumpcap,
        }
    }

    /// Starts a command line for `tool`.
    pub fn command(&self, tool: Tool) -> ToolCommand {
        ToolCommand::new(tool, self.path(tool))
    }

    fn bundled_path(tool: Tool) -> Option<PathBuf> {
        install_dirs()
            .iter()
            .map(|dir| Path::new(dir).join(executable_name(tool)))
            .find(|candidate| candidate.is_file())
    }
}

impl Default for Toolchain {
    fn default() -> Self {
        Self {
            tshark: PathBuf::from(executable_name(Tool::Tshark)),
            editcap: PathBuf::from(executable_name(Tool::Editcap)),
            capinfos: PathBuf::from(executable_name(Tool::Capinfos)),
            dumpcap: PathBuf::from(executable_name(Tool::Dumpcap)),
        }
    }
}

#[cfg(target_os = "macos")]
fn install_dirs() -> &'static [&'static str] {
    &["/Applications/Wireshark.app/Contents/MacOS"]
}

#[cfg(windows)]
fn install_dirs() -> &'static [&'static str] {
    &["C:\\Program Files\\Wireshark"]
}

#[cfg(not(any(target_os = "macos", windows)))]
fn install_dirs() -> &'static [&'static str] {
    &[]
}

fn executable_name(tool: Tool) -> String {
    if cfg!(windows) {
        format!("{}.exe", tool.binary_name())
    } else {
        tool.binary_name().to_string()
    }
}
