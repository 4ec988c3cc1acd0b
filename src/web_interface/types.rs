use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Error payload of every failed API call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    pub message: String,
}

impl ApiError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// `GET /index?dir=<path>`
#[derive(Debug, Clone, Deserialize)]
pub struct IndexQuery {
    pub dir: PathBuf,
}

/// Acknowledgement of an accepted stop request.
#[derive(Debug, Clone, Serialize)]
pub struct StopAccepted {
    pub stopping: bool,
}
