//! Storage subsystem
//!
//! Manifest model and persistence for split directories.
//!
//! Components:
//! - `types`: the manifest data model (`StreamIndex`, `StreamRecord`, `Endpoint`).
//! - `naming`: the stream file naming convention and directory helpers.
//! - `storage_trait`: the `IndexStorage` trait.
//! - `file_storage`: JSON-file implementation of `IndexStorage`.

pub mod file_storage;
pub mod naming;
pub mod storage_trait;
pub mod types;

pub use file_storage::FileStorage;
pub use storage_trait::IndexStorage;
