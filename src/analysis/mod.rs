//! Analyses feeding the optimizer.
//!
//! Currently this is the alias model: heap location identity, reference
//! escape classification and the may-alias oracle consumed by load-store
//! elimination.

mod alias;

pub use alias::{AliasModel, HeapLocation, LocationKind, ReferenceInfo};
