pub mod configuration;
pub use configuration::{Config, TunableArgs};

pub mod error_handling;

pub mod tooling;

pub mod resolver;

pub mod storage;
pub use storage::types::{StreamIndex, StreamRecord};

pub mod data_capture;
pub use data_capture::StreamSplitter;

pub mod session_management;
pub use session_management::{CaptureController, SessionState};

pub mod web_interface;

pub mod network;

#[cfg(test)]
mod test_support;
