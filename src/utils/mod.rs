//! Shared utilities for the analyses and passes.

mod bitset;

pub use bitset::BitSet;
