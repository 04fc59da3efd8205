//! Schema-less record attributes ("props").
//!
//! An [`AttributeBag`] is a string-keyed map of arbitrary JSON values owned by
//! one record. The sync coordinator merges snapshots into it; applications set
//! values directly. A [`PropsAdapter`] exposes a record type's bag to the
//! engine, so the column holding it can differ per type.

mod adapter;
mod bag;

pub use adapter::{ColumnProps, PropsAdapter};
pub use bag::AttributeBag;
