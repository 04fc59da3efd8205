//! Current-version selection for record families.
//!
//! A version group is every record of one type sharing the same values on a
//! fixed tuple of condition fields. Exactly one member of a saved group is
//! marked current. The marker is either a nullable timestamp or a 0/1 flag,
//! chosen per record type when its [`VersionSelector`] is built.

mod marker;
mod selector;

pub use marker::CurrentMarker;
pub use selector::VersionSelector;
