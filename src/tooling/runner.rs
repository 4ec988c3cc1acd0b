use std::ffi::{OsStr, OsString};
use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;

use log::{debug, trace, warn};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};

use super::Tool;
use crate::error_handling::types::ToolError;

/// Boxed future returned by the tool seams.
pub type ToolFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One invocation of an external tool.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCommand {
    pub tool: Tool,
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

impl ToolCommand {
    pub fn new(tool: Tool, program: impl Into<PathBuf>) -> Self {
        Self {
            tool,
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    pub fn args_lossy(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    /// Value following `flag`, if present.
    pub fn value_of(&self, flag: &str) -> Option<String> {
        let args = self.args_lossy();
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1).cloned())
    }
}

/// Captured output of a tool that exited successfully.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
}

/// A long-running tool such as a live capture.
pub trait RunningTool: Send {
    /// Waits for the process to exit and returns its exit code (`None` when
    /// killed by a signal).
    fn wait(&mut self) -> ToolFuture<'_, Result<Option<i32>, ToolError>>;

    /// Asks the process to stop (SIGTERM on unix). The process exits on its
    /// own schedule; callers keep waiting on [`RunningTool::wait`].
    fn terminate(&mut self) -> Result<(), ToolError>;

    /// Stops the process immediately.
    fn kill(&mut self) -> Result<(), ToolError>;
}

/// Executes external tools.
pub trait CommandRunner: Send + Sync {
    /// Runs `command` to completion. A non-zero exit is an error.
    fn output<'a>(&'a self, command: &'a ToolCommand) -> ToolFuture<'a, Result<ToolOutput, ToolError>>;

    /// Starts `command` without waiting for it.
    fn spawn(&self, command: &ToolCommand) -> Result<Box<dyn RunningTool>, ToolError>;
}

/// Runs tools as tokio child processes with a null stdin.
#[derive(Debug, Default, Clone)]
pub struct TokioCommandRunner;

impl TokioCommandRunner {
    pub fn new() -> Self {
        Self
    }

    fn build(command: &ToolCommand) -> Command {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

fn spawn_error(command: &ToolCommand, e: io::Error) -> ToolError {
    if e.kind() == io::ErrorKind::NotFound {
        ToolError::NotFound {
            tool: command.tool,
            hint: format!(
                "no executable at {}; {}",
                command.program.display(),
                command.tool.install_hint()
            ),
        }
    } else {
        ToolError::Spawn {
            tool: command.tool,
            source: e,
        }
    }
}

impl CommandRunner for TokioCommandRunner {
    fn output<'a>(&'a self, command: &'a ToolCommand) -> ToolFuture<'a, Result<ToolOutput, ToolError>> {
        Box::pin(async move {
            debug!(
                "Running {} {:?}",
                command.program.display(),
                command.args_lossy()
            );
            let output = Self::build(command)
                .output()
                .await
                .map_err(|e| spawn_error(command, e))?;

            let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

            if !output.status.success() {
                return Err(ToolError::Failed {
                    tool: command.tool,
                    code: output.status.code(),
                    stderr,
                });
            }
            if !stderr.is_empty() {
                trace!("[{}][stderr] {}", command.tool, stderr);
            }
            Ok(ToolOutput { stdout, stderr })
        })
    }

    fn spawn(&self, command: &ToolCommand) -> Result<Box<dyn RunningTool>, ToolError> {
        debug!(
            "Spawning {} {:?}",
            command.program.display(),
            command.args_lossy()
        );
        let mut cmd = Self::build(command);
        cmd.stdout(Stdio::null());
        let mut child = cmd.spawn().map_err(|e| spawn_error(command, e))?;

        // Capture stderr
        if let Some(stderr) = child.stderr.take() {
            let mut reader = BufReader::new(stderr).lines();
            let tool = command.tool;
            tokio::spawn(async move {
                while let Ok(Some(line)) = reader.next_line().await {
                    debug!("[{}][stderr] {}", tool, line);
                }
                debug!("stderr monitoring ended for {}", tool);
            });
        }

        Ok(Box::new(TokioRunningTool {
            tool: command.tool,
            child,
        }))
    }
}

struct TokioRunningTool {
    tool: Tool,
    child: Child,
}

impl RunningTool for TokioRunningTool {
    fn wait(&mut self) -> ToolFuture<'_, Result<Option<i32>, ToolError>> {
        Box::pin(async move {
            let status = self.child.wait().await?;
            debug!("{} exited with {}", self.tool, status);
            Ok(status.code())
        })
    }

    fn terminate(&mut self) -> Result<(), ToolError> {
        let Some(pid) = self.child.id() else {
            // Already reaped
            return Ok(());
        };

        #[cfg(unix)]
        {
            match send_sigterm(pid) {
                Ok(()) => {
                    debug!("Sent SIGTERM to {} (pid {})", self.tool, pid);
                    return Ok(());
                }
                Err(e) => warn!("SIGTERM to {} (pid {}) failed: {}, killing", self.tool, pid, e),
            }
        }

        #[cfg(not(unix))]
        debug!("Stopping {} (pid {})", self.tool, pid);

        self.kill()
    }

    fn kill(&mut self) -> Result<(), ToolError> {
        self.child.start_kill().map_err(ToolError::IoError)
    }
}

#[cfg(unix)]
fn send_sigterm(pid: u32) -> io::Result<()> {
    let status = std::process::Command::new("kill")
        .arg("-TERM")
        .arg(pid.to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()?;
    if status.success() {
        Ok(())
    } else {
        Err(io::Error::new(
            io::ErrorKind::Other,
            format!("kill exited with {}", status),
        ))
    }
}
