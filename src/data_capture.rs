//! The capture-to-manifest pipeline.
//!
//! [`StreamSplitter`] enumerates the TCP streams of an artifact, scans their
//! endpoints once, resolves hostnames once and then extracts the streams one
//! at a time. [`IndexBuilder`] turns the results into a manifest, or rebuilds
//! one from stream files alone. [`capture`] launches and supervises live
//! captures.

pub mod capture;
pub mod index_builder;
pub mod scanner;
pub mod splitter;
pub mod stats;


pub use capture::{CaptureSpec, STOP_GRACE};
pub use index_builder::IndexBuilder;
pub use scanner::EndpointMap;
pub use splitter::{SplitRun, StreamSplitter};
pub use stats::StreamStats;
