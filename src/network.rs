//! Consumer of the live-connection snapshot stream.

pub mod connection_snapshot;

pub use connection_snapshot::{ConnectionRow, ConnectionSnapshot, ConnectionWatcher, SnapshotReader};
