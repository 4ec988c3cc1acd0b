//! Capture session management.
//!
//! One [`CaptureSession`] exists per process. The [`CaptureController`] owns it
//! and drives the capture-then-split workflow, the import of existing
//! artifacts and the recovery of interrupted splits.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Classification of import paths.
pub mod import;
/// The session record and its guarded transitions.
pub mod session;
/// The controller driving captures, splits and imports.
pub mod session_manager;

#[cfg(test)]
mod tests;

pub use import::ImportTarget;
pub use session::CaptureSession;
pub use session_manager::{CaptureController, CaptureRequest, ImportRequest, Outcome, SessionSnapshot};

/// Lifecycle of the capture session.
///
/// - `Idle`: nothing running; a capture or import may start.
/// - `Capturing`: the capture process is writing the artifact.
/// - `Splitting`: the artifact is being split into stream files.
/// - `Complete` / `Failed`: the split just ended; the session returns to
///   `Idle` right after.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Capturing,
    Splitting,
    Complete,
    Failed,
}

impl SessionState {
    /// Whether `self -> to` is a legal transition.
    pub fn can_transition_to(self, to: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, to),
            (Idle, Capturing)
                | (Idle, Splitting)
                | (Capturing, Splitting)
                | (Capturing, Idle)
                | (Splitting, Complete)
                | (Splitting, Failed)
                | (Complete, Idle)
                | (Failed, Idle)
        )
    }

    /// A capture or split owns the session slot.
    pub fn is_busy(self) -> bool {
        matches!(self, SessionState::Capturing | SessionState::Splitting)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Capturing => "capturing",
            SessionState::Splitting => "splitting",
            SessionState::Complete => "complete",
            SessionState::Failed => "failed",
        };
        f.write_str(name)
    }
}
