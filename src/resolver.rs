//! Best-effort hostname enrichment for stream endpoints.
//!
//! Addresses are resolved through a bounded worker pool; each address gets a
//! single time budget covering a reverse (PTR) lookup and, when that yields
//! nothing, a lookup through the system name service. Failures never escape
//! this module: an address that cannot be resolved simply has no names.

pub mod endpoint_resolver;
pub mod lookup;

pub use endpoint_resolver::{apply_hostnames, EndpointResolver, HostnameMap, ResolverSettings};
pub use lookup::{LookupFuture, NameLookup, SystemLookup};
