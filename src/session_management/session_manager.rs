use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Local;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, oneshot, watch};

use super::import::ImportTarget;
use super::session::{CaptureParams, CaptureSession};
use super::SessionState;
use crate::configuration::types::{is_valid_snaplen, MAX_SNAPLEN, MIN_SNAPLEN};
use crate::configuration::Config;
use crate::data_capture::capture::{self, CaptureSpec, STOP_GRACE};
use crate::data_capture::{IndexBuilder, StreamSplitter};
use crate::error_handling::types::SessionError;
use crate::resolver::EndpointResolver;
use crate::storage::naming::{index_path, is_non_empty_file, looks_like_split_dir};
use crate::storage::types::{SplitProgress, StreamIndex};
use crate::storage::FileStorage;
use crate::tooling::{ToolContext, Toolchain};

pub const DEFAULT_CAPTURE_SECONDS: u64 = 60;
pub const MAX_CAPTURE_SECONDS: u64 = 86_400;

const PROGRESS_CHANNEL_CAPACITY: usize = 256;

fn default_duration() -> u64 {
    DEFAULT_CAPTURE_SECONDS
}

/// Parameters of a capture start request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureRequest {
    pub iface_id: String,
    #[serde(default)]
    pub capture_filter: Option<String>,
    #[serde(default = "default_duration")]
    pub duration_seconds: u64,
    /// Falls back to the configured default.
    #[serde(default)]
    pub snap_len: Option<u32>,
    /// Falls back to the configured dump directory.
    #[serde(default)]
    pub dump_dir: Option<PathBuf>,
}

impl CaptureRequest {
    pub fn new(iface_id: impl Into<String>) -> Self {
        Self {
            iface_id: iface_id.into(),
            capture_filter: None,
            duration_seconds: DEFAULT_CAPTURE_SECONDS,
            snap_len: None,
            dump_dir: None,
        }
    }

    pub fn validate(&self) -> Result<(), SessionError> {
        if self.iface_id.trim().is_empty() {
            return Err(SessionError::InvalidRequest(
                "an interface id is required".to_string(),
            ));
        }
        if self.duration_seconds == 0 || self.duration_seconds > MAX_CAPTURE_SECONDS {
            return Err(SessionError::InvalidRequest(format!(
                "duration must be within 1..={} seconds",
                MAX_CAPTURE_SECONDS
            )));
        }
        if let Some(snap_len) = self.snap_len {
            check_snaplen(snap_len)?;
        }
        Ok(())
    }
}

/// Parameters of an import request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportRequest {
    pub path: PathBuf,
    #[serde(default)]
    pub snap_len: Option<u32>,
}

/// How the most recent capture or split ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum Outcome {
    #[serde(rename_all = "camelCase")]
    Completed {
        split_dir: PathBuf,
        index_path: PathBuf,
        streams: usize,
    },
    Failed { message: String },
}

/// Current session plus the last outcome, for status queries.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session: CaptureSession,
    pub last_outcome: Option<Outcome>,
}

fn check_snaplen(snap_len: u32) -> Result<(), SessionError> {
    if is_valid_snaplen(snap_len) {
        Ok(())
    } else {
        Err(SessionError::InvalidRequest(format!(
            "snapLen {} must be 0 or within {}..={}",
            snap_len, MIN_SNAPLEN, MAX_SNAPLEN
        )))
    }
}

struct Inner {
    config: Arc<Config>,
    splitter: StreamSplitter,
    session: Mutex<CaptureSession>,
    stop: Mutex<Option<oneshot::Sender<()>>>,
    state_tx: watch::Sender<SessionState>,
    progress_tx: broadcast::Sender<SplitProgress>,
    progress: Mutex<Vec<SplitProgress>>,
    last_outcome: Mutex<Option<Outcome>>,
    stop_grace: Duration,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panicked holder cannot leave these values half-updated
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Owner of the single capture session.
///
/// Cheap to clone; clones drive the same session.
#[derive(Clone)]
pub struct CaptureController {
    inner: Arc<Inner>,
}

impl CaptureController {
    pub fn new(config: Arc<Config>, splitter: StreamSplitter) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Idle);
        let (progress_tx, _) = broadcast::channel(PROGRESS_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                config,
                splitter,
                session: Mutex::new(CaptureSession::idle()),
                stop: Mutex::new(None),
                state_tx,
                progress_tx,
                progress: Mutex::new(Vec::new()),
                last_outcome: Mutex::new(None),
                stop_grace: STOP_GRACE,
            }),
        }
    }

    /// Controller running the real Wireshark tools and system resolver.
    pub fn from_config(config: Arc<Config>) -> Self {
        let tools = ToolContext::system(Toolchain::discover(&config.tools));
        let resolver = EndpointResolver::system(config.resolver.clone());
        let builder = IndexBuilder::new(tools, resolver, Arc::new(FileStorage::new()));
        Self::new(config, StreamSplitter::new(builder))
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn state(&self) -> SessionState {
        lock(&self.inner.session).state
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let session = lock(&self.inner.session).clone();
        SessionSnapshot {
            session,
            last_outcome: self.last_outcome(),
        }
    }

    pub fn last_outcome(&self) -> Option<Outcome> {
        lock(&self.inner.last_outcome).clone()
    }

    /// Progress of the current split, or of the last one.
    pub fn progress(&self) -> Vec<SplitProgress> {
        lock(&self.inner.progress).clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state_tx.subscribe()
    }

    pub fn subscribe_progress(&self) -> broadcast::Receiver<SplitProgress> {
        self.inner.progress_tx.subscribe()
    }

    /// Resolves once the session is back to `Idle`.
    pub async fn wait_until_idle(&self) {
        let mut rx = self.subscribe_state();
        loop {
            let state = *rx.borrow_and_update();
            if state == SessionState::Idle {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    fn publish(&self, state: SessionState) {
        self.inner.state_tx.send_replace(state);
    }

    fn set_outcome(&self, outcome: Outcome) {
        *lock(&self.inner.last_outcome) = Some(outcome);
    }

    /// Starts a capture. The split runs automatically when the capture ends.
    pub fn start_capture(&self, request: CaptureRequest) -> Result<CaptureSession, SessionError> {
        request.validate()?;
        let config = &self.inner.config;
        let snap_len = request.snap_len.unwrap_or(config.default_snaplen);
        let dump_dir = request
            .dump_dir
            .clone()
            .unwrap_or_else(|| config.dump_dir.clone());

        let mut session = lock(&self.inner.session);
        if session.state != SessionState::Idle {
            return Err(SessionError::AlreadyActive(session.state));
        }
        std::fs::create_dir_all(&dump_dir)?;
        let file_path = dump_dir.join(capture::capture_file_name(Local::now()));

        let spec = CaptureSpec {
            iface: request.iface_id.clone(),
            filter: request.capture_filter.clone(),
            duration: Duration::from_secs(request.duration_seconds),
            output: file_path.clone(),
        };
        let running = capture::start_capture(self.tools(), &spec)?;

        let id = session.begin_capture(CaptureParams {
            dump_dir,
            file_path: file_path.clone(),
            iface_id: request.iface_id,
            capture_filter: request.capture_filter,
            snap_len,
            duration_seconds: request.duration_seconds,
        })?;
        let started = session.clone();
        drop(session);

        let (stop_tx, stop_rx) = oneshot::channel();
        *lock(&self.inner.stop) = Some(stop_tx);
        self.publish(SessionState::Capturing);
        info!("[{}] Capture started into {}", id, file_path.display());

        let this = self.clone();
        let grace = self.inner.stop_grace;
        tokio::spawn(async move {
            match capture::supervise(running, stop_rx, grace).await {
                Ok(code) => info!("[{}] Capture ended (exit code {:?})", id, code),
                Err(e) => warn!("[{}] Capture ended abnormally: {}", id, e),
            }
            lock(&this.inner.stop).take();
            this.after_capture(file_path, snap_len).await;
        });

        Ok(started)
    }

    /// Asks the running capture to stop. The split starts once it exits.
    pub fn stop_capture(&self) -> Result<(), SessionError> {
        let session = lock(&self.inner.session);
        if session.state != SessionState::Capturing {
            return Err(SessionError::NotCapturing(session.state));
        }
        match lock(&self.inner.stop).take() {
            Some(stop) => {
                info!("[{}] Stop requested", session.label());
                let _ = stop.send(());
            }
            None => info!("[{}] Stop already requested", session.label()),
        }
        Ok(())
    }

    async fn after_capture(&self, artifact: PathBuf, snap_len: u32) {
        if !is_non_empty_file(&artifact) {
            self.abandon_capture(format!("capture produced no data at {}", artifact.display()));
            return;
        }

        let split_dir = capture::split_dir_for(&artifact, Local::now());
        let began = lock(&self.inner.session).begin_split(split_dir.clone());
        if let Err(e) = began {
            self.abandon_capture(format!("unable to start split of {}: {}", artifact.display(), e));
            return;
        }
        self.publish(SessionState::Splitting);
        // The outcome records failures
        let _ = self.run_split(&artifact, &split_dir, snap_len).await;
    }

    /// Returns a capture that will not be split to `Idle`, recording why.
    fn abandon_capture(&self, message: String) {
        let label = {
            let mut session = lock(&self.inner.session);
            if let Err(e) = session.reset() {
                error!("Unable to reset session: {}", e);
            }
            session.label()
        };
        warn!("[{}] Capture abandoned: {}", label, message);
        self.set_outcome(Outcome::Failed { message });
        self.publish(SessionState::Idle);
    }

    /// Splits `artifact` into `split_dir`. The session must be `Splitting`.
    async fn run_split(
        &self,
        artifact: &Path,
        split_dir: &Path,
        snap_len: u32,
    ) -> Result<StreamIndex, SessionError> {
        lock(&self.inner.progress).clear();
        let result = self
            .inner
            .splitter
            .split(artifact, split_dir, snap_len, |p| self.record_progress(p))
            .await
            .map_err(SessionError::from);
        self.finish_split(split_dir, result)
    }

    fn record_progress(&self, progress: &SplitProgress) {
        lock(&self.inner.progress).push(progress.clone());
        // No subscribers is fine
        let _ = self.inner.progress_tx.send(progress.clone());
    }

    /// `Splitting -> Complete | Failed -> Idle`, recording the outcome.
    fn finish_split(
        &self,
        split_dir: &Path,
        result: Result<StreamIndex, SessionError>,
    ) -> Result<StreamIndex, SessionError> {
        let outcome = match &result {
            Ok(index) => Outcome::Completed {
                split_dir: split_dir.to_path_buf(),
                index_path: index_path(split_dir),
                streams: index.streams.len(),
            },
            Err(e) => Outcome::Failed {
                message: e.to_string(),
            },
        };

        let mut session = lock(&self.inner.session);
        let label = session.label();
        match &result {
            Ok(index) => info!(
                "[{}] Split complete: {} streams in {}",
                label,
                index.streams.len(),
                split_dir.display()
            ),
            Err(e) => error!("[{}] Split of {} failed: {}", label, split_dir.display(), e),
        }
        let ended = session.end_split(result.is_ok());
        self.publish(session.state);
        self.set_outcome(outcome);
        ended.and_then(|_| session.reset())?;
        self.publish(SessionState::Idle);
        result
    }

    /// Imports a capture file, a split folder or a directory holding them
    /// and returns the resulting manifest.
    pub async fn import(&self, request: ImportRequest) -> Result<StreamIndex, SessionError> {
        let snap_len = request
            .snap_len
            .unwrap_or(self.inner.config.default_snaplen);
        check_snaplen(snap_len)?;
        // An in-flight folder may not hold a stream file yet
        self.ensure_not_splitting_into(&request.path)?;

        match ImportTarget::classify(&request.path)?.resolve()? {
            ImportTarget::SplitFolderWithManifest(dir) => {
                info!("Loading existing stream index of {}", dir.display());
                self.read_index(&dir)
            }
            ImportTarget::SplitFolderMissingManifest(dir) => {
                self.ensure_not_splitting_into(&dir)?;
                self.rebuild(&dir).await
            }
            ImportTarget::RawArtifact(artifact) => {
                let split_dir = capture::split_dir_for(&artifact, Local::now());
                let id = lock(&self.inner.session).begin_import(
                    Some(artifact.clone()),
                    split_dir.clone(),
                    snap_len,
                )?;
                self.publish(SessionState::Splitting);
                info!("[{}] Importing {}", id, artifact.display());
                self.run_split(&artifact, &split_dir, snap_len).await
            }
            ImportTarget::ParentDirectory(dir) => Err(SessionError::NothingToImport(dir)),
        }
    }

    /// Reads the manifest of `split_dir`, refusing while a split is still
    /// writing into it.
    pub fn read_index(&self, split_dir: &Path) -> Result<StreamIndex, SessionError> {
        self.ensure_not_splitting_into(split_dir)?;
        Ok(self.inner.splitter.builder().read(split_dir)?)
    }

    fn ensure_not_splitting_into(&self, dir: &Path) -> Result<(), SessionError> {
        if lock(&self.inner.session).is_splitting_into(dir) {
            return Err(SessionError::StillInProgress(dir.to_path_buf()));
        }
        Ok(())
    }

    /// Rebuilds the manifest of a split folder from its stream files.
    pub async fn rebuild(&self, split_dir: &Path) -> Result<StreamIndex, SessionError> {
        self.ensure_not_splitting_into(split_dir)?;
        if !split_dir.is_dir() || !looks_like_split_dir(split_dir) {
            return Err(SessionError::NotASplitFolder(split_dir.to_path_buf()));
        }
        let id = lock(&self.inner.session).begin_import(None, split_dir.to_path_buf(), 0)?;
        self.publish(SessionState::Splitting);
        info!("[{}] Rebuilding stream index of {}", id, split_dir.display());
        lock(&self.inner.progress).clear();

        let result = self
            .inner
            .splitter
            .builder()
            .rebuild(split_dir)
            .await
            .map_err(SessionError::from);
        self.finish_split(split_dir, result)
    }

    fn tools(&self) -> &ToolContext {
        self.inner.splitter.builder().tools()
    }
}
