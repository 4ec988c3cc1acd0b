use chrono::{DateTime, Utc};
use log::debug;
use serde::Serialize;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use super::SessionState;
use crate::error_handling::types::SessionError;

/// The single in-memory capture session.
///
/// Fields other than `state` describe the work in progress and are cleared
/// when the session returns to `Idle`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureSession {
    pub id: Option<Uuid>,
    pub state: SessionState,
    pub dump_dir: Option<PathBuf>,
    /// Artifact being captured or split.
    pub file_path: Option<PathBuf>,
    /// Destination of the split, once known.
    pub split_dir: Option<PathBuf>,
    pub iface_id: Option<String>,
    pub capture_filter: Option<String>,
    pub snap_len: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<u64>,
}

/// What a new capture records in the session.
#[derive(Debug, Clone)]
pub struct CaptureParams {
    pub dump_dir: PathBuf,
    pub file_path: PathBuf,
    pub iface_id: String,
    pub capture_filter: Option<String>,
    pub snap_len: u32,
    pub duration_seconds: u64,
}

impl Default for CaptureSession {
    fn default() -> Self {
        Self::idle()
    }
}

impl CaptureSession {
    pub fn idle() -> Self {
        Self {
            id: None,
            state: SessionState::Idle,
            dump_dir: None,
            file_path: None,
            split_dir: None,
            iface_id: None,
            capture_filter: None,
            snap_len: 0,
            started_at: None,
            duration_seconds: None,
        }
    }

    fn transition(&mut self, to: SessionState) -> Result<(), SessionError> {
        if !self.state.can_transition_to(to) {
            return Err(SessionError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        debug!("[{}] {} -> {}", self.label(), self.state, to);
        self.state = to;
        Ok(())
    }

    fn claim(&mut self) -> Result<Uuid, SessionError> {
        if self.state != SessionState::Idle {
            return Err(SessionError::AlreadyActive(self.state));
        }
        let id = Uuid::new_v4();
        self.id = Some(id);
        self.started_at = Some(Utc::now());
        Ok(id)
    }

    /// `Idle -> Capturing`.
    pub fn begin_capture(&mut self, params: CaptureParams) -> Result<Uuid, SessionError> {
        let id = self.claim()?;
        self.transition(SessionState::Capturing)?;
        self.dump_dir = Some(params.dump_dir);
        self.file_path = Some(params.file_path);
        self.iface_id = Some(params.iface_id);
        self.capture_filter = params.capture_filter;
        self.snap_len = params.snap_len;
        self.duration_seconds = Some(params.duration_seconds);
        Ok(id)
    }

    /// `Idle -> Splitting` for an import or a rebuild.
    pub fn begin_import(
        &mut self,
        file_path: Option<PathBuf>,
        split_dir: PathBuf,
        snap_len: u32,
    ) -> Result<Uuid, SessionError> {
        let id = self.claim()?;
        self.transition(SessionState::Splitting)?;
        self.file_path = file_path;
        self.split_dir = Some(split_dir);
        self.snap_len = snap_len;
        Ok(id)
    }

    /// `Capturing -> Splitting` once the capture produced an artifact.
    pub fn begin_split(&mut self, split_dir: PathBuf) -> Result<(), SessionError> {
        // Idle -> Splitting belongs to imports, which claim an id first
        if self.state != SessionState::Capturing {
            return Err(SessionError::InvalidTransition {
                from: self.state,
                to: SessionState::Splitting,
            });
        }
        self.transition(SessionState::Splitting)?;
        self.split_dir = Some(split_dir);
        Ok(())
    }

    /// `Splitting -> Complete | Failed`.
    pub fn end_split(&mut self, succeeded: bool) -> Result<(), SessionError> {
        self.transition(if succeeded {
            SessionState::Complete
        } else {
            SessionState::Failed
        })
    }

    /// Back to `Idle`, clearing the work description.
    pub fn reset(&mut self) -> Result<(), SessionError> {
        self.transition(SessionState::Idle)?;
        *self = Self::idle();
        Ok(())
    }

    /// A split is currently writing into `dir`.
    pub fn is_splitting_into(&self, dir: &Path) -> bool {
        self.state == SessionState::Splitting
            && self
                .split_dir
                .as_deref()
                .map(|d| same_path(d, dir))
                .unwrap_or(false)
    }

    /// Short form of the session id for log prefixes.
    pub fn label(&self) -> String {
        match self.id {
            Some(id) => id.to_string(),
            None => "-".to_string(),
        }
    }
}

fn same_path(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (std::fs::canonicalize(a), std::fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}
