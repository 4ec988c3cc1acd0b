use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Local};
use log::{debug, info, warn};
use tokio::sync::oneshot;

use crate::error_handling::types::ToolError;
use crate::tooling::{RunningTool, Tool, ToolCommand, ToolContext};

/// How long a capture may take to exit after SIGTERM before it is killed.
pub const STOP_GRACE: Duration = Duration::from_secs(10);

const TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

/// Parameters of one live capture.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureSpec {
    pub iface: String,
    pub filter: Option<String>,
    pub duration: Duration,
    pub output: PathBuf,
}

/// `dumpcap -q -i <iface> [-f <filter>] -a duration:<secs> -n -w <file>`
pub fn capture_command(tools: &ToolContext, spec: &CaptureSpec) -> ToolCommand {
    let mut cmd = tools.command(Tool::Dumpcap).args(["-q", "-i"]).arg(&spec.iface);
    if let Some(filter) = spec.filter.as_deref().filter(|f| !f.trim().is_empty()) {
        cmd = cmd.arg("-f").arg(filter);
    }
    cmd.arg("-a")
        .arg(format!("duration:{}", spec.duration.as_secs().max(1)))
        .arg("-n")
        .arg("-w")
        .arg(&spec.output)
}

pub fn capture_file_name(now: DateTime<Local>) -> String {
    format!("capture-{}.pcapng", now.format(TIMESTAMP_FORMAT))
}

/// `<artifact dir>/<artifact stem>-streams-<timestamp>`, suffixed `-N` when
/// that directory already exists.
pub fn split_dir_for(artifact: &Path, now: DateTime<Local>) -> PathBuf {
    let parent = artifact
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let stem = artifact
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "capture".to_string());
    let base = format!("{}-streams-{}", stem, now.format(TIMESTAMP_FORMAT));

    let mut candidate = parent.join(&base);
    let mut n = 1;
    while candidate.exists() {
        n += 1;
        candidate = parent.join(format!("{}-{}", base, n));
    }
    candidate
}

/// Starts dumpcap for `spec`.
pub fn start_capture(tools: &ToolContext, spec: &CaptureSpec) -> Result<Box<dyn RunningTool>, ToolError> {
    info!(
        "Capturing on {} for {}s into {}",
        spec.iface,
        spec.duration.as_secs(),
        spec.output.display()
    );
    tools.spawn(&capture_command(tools, spec))
}

enum Wake {
    Exited(Result<Option<i32>, ToolError>),
    StopRequested,
}

/// Waits for a capture to end on its own or, once `stop` fires, asks it to
/// stop and waits up to `grace` before killing it. Returns the exit code.
pub async fn supervise(
    mut running: Box<dyn RunningTool>,
    stop: oneshot::Receiver<()>,
    grace: Duration,
) -> Result<Option<i32>, ToolError> {
    let wake = tokio::select! {
        code = running.wait() => Wake::Exited(code),
        _ = stop => Wake::StopRequested,
    };

    match wake {
        Wake::Exited(code) => code,
        Wake::StopRequested => {
            debug!("Stop requested, terminating capture");
            running.terminate()?;
            match tokio::time::timeout(grace, running.wait()).await {
                Ok(code) => code,
                Err(_) => {
                    warn!("Capture did not exit within {:?}, killing it", grace);
                    running.kill()?;
                    running.wait().await
                }
            }
        }
    }
}
