//! Platform adapters.
//!
//! Each adapter implements the [`platform`](crate::platform) traits for a
//! concrete node type and is enabled by its own feature flag.

#[cfg(feature = "dom")]
pub mod dom;
