//! Snapshot computation.
//!
//! A snapshot is the flat attribute map mirrored from a subject record onto
//! its references. It is either a plain key selection over the subject's
//! attributes, or the output of a named [`AttributeFormatter`] minus an
//! exception list. Building a snapshot does no I/O.

mod builder;
mod digest;
mod formatter;

pub use builder::SnapshotBuilder;
pub use digest::SnapshotDigest;
pub use formatter::{AttributeFormatter, FormatterRegistry};

/// Computed attribute snapshot. Keys iterate in sorted order, so encoding is
/// deterministic.
pub type Snapshot = serde_json::Map<String, serde_json::Value>;
