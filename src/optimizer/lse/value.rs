//! The heap value model.
//!
//! Load-store elimination abstracts the content of every heap location into
//! a [`Value`]: what a load at the current program point would observe. The
//! lattice is shallow on purpose - the interesting structure lives in the
//! placeholder machinery, which defers merges until the whole graph has
//! been swept.
//!
//! # Merge laws
//!
//! [`merge`] combines the values flowing in over predecessor edges:
//!
//! - equal inputs pass through unchanged
//! - any `Unknown` input forces `Unknown`
//! - anything else introduces a [`PhiPlaceholder`], tagged loop-carried if
//!   any input already depended on a loop placeholder
//!
//! `stored_by` sides of a record merge with [`merge_stored_by`], which
//! never collapses to `Unknown`: losing track of a pending store would let
//! the eliminator delete an observable write.
//!
//! # Equality
//!
//! [`Value::equals`] treats [`Value::Default`] as equal to any constant
//! with a zero bit pattern (a fresh allocation's content *is* the zero
//! pattern), and treats two `Unknown`s as never equal - each stands for an
//! arbitrary, unrelated runtime value.

use crate::ir::{BlockId, InstrId, InstructionGraph};

/// Identity of a deferred merge: one per (block, heap location) pair.
///
/// Deterministic by construction, so two reads of the same placeholder
/// always resolve to the same outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct PhiPlaceholder {
    /// The join block the merge belongs to.
    pub block: BlockId,
    /// The heap location index.
    pub location: u32,
}

impl PhiPlaceholder {
    pub(crate) fn new(block: BlockId, location: usize) -> Self {
        Self {
            block,
            location: location as u32,
        }
    }
}

/// An abstract heap value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Value {
    /// Unset slot in the placeholder replacement table.
    Invalid,
    /// No provable value.
    Unknown,
    /// The type's zero/null value, as left by a fresh allocation.
    Default,
    /// Equal to the result of an existing, still-live instruction.
    Instruction(InstrId),
    /// A deferred merge, not yet resolved.
    Placeholder {
        /// The merge identity.
        ph: PhiPlaceholder,
        /// Whether any contributing edge was a loop back edge.
        loop_carried: bool,
    },
    /// A deferred merge observed through a narrower load than the location
    /// it originated at; equal to that load's result.
    Converted {
        /// The narrowing load.
        load: InstrId,
        /// The merge the load observed.
        ph: PhiPlaceholder,
    },
}

impl Value {
    pub(crate) fn is_invalid(self) -> bool {
        matches!(self, Self::Invalid)
    }

    pub(crate) fn is_unknown(self) -> bool {
        matches!(self, Self::Unknown)
    }

    pub(crate) fn is_default(self) -> bool {
        matches!(self, Self::Default)
    }

    pub(crate) fn as_instruction(self) -> Option<InstrId> {
        match self {
            Self::Instruction(id) => Some(id),
            _ => None,
        }
    }

    /// The placeholder this value waits on, if any.
    pub(crate) fn as_placeholder(self) -> Option<PhiPlaceholder> {
        match self {
            Self::Placeholder { ph, .. } | Self::Converted { ph, .. } => Some(ph),
            _ => None,
        }
    }

    /// Returns `true` if resolving this value requires a loop placeholder.
    pub(crate) fn needs_loop_phi(self) -> bool {
        matches!(self, Self::Placeholder { loop_carried: true, .. })
    }

    /// Semantic equality: would a load observing `self` read the same bits
    /// as one observing `other`?
    pub(crate) fn equals(self, other: Value, graph: &InstructionGraph) -> bool {
        match (self, other) {
            // Unknown stands for an arbitrary value; two of them are never
            // provably the same.
            (Self::Unknown, _) | (_, Self::Unknown) => false,
            (Self::Default, Self::Default) => true,
            (Self::Default, Self::Instruction(id)) | (Self::Instruction(id), Self::Default) => {
                graph.instruction(id).is_zero_constant()
            }
            (Self::Instruction(a), Self::Instruction(b)) => a == b,
            (Self::Instruction(a), Self::Converted { load, .. })
            | (Self::Converted { load, .. }, Self::Instruction(a)) => a == load,
            (Self::Converted { load: a, .. }, Self::Converted { load: b, .. }) => a == b,
            (Self::Placeholder { ph: a, .. }, Self::Placeholder { ph: b, .. }) => a == b,
            _ => false,
        }
    }
}

/// The per-(block, location) table entry.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ValueRecord {
    /// What a load would currently observe.
    pub value: Value,
    /// Which store(s) most recently wrote the location: a store
    /// instruction, a placeholder merging stores, or `Unknown` when the
    /// writers are already accounted for.
    pub stored_by: Value,
}

impl ValueRecord {
    pub(crate) const fn unknown() -> Self {
        Self {
            value: Value::Unknown,
            stored_by: Value::Unknown,
        }
    }
}

/// Merges two heap values flowing into a join.
pub(crate) fn merge(a: Value, b: Value, ph: PhiPlaceholder, graph: &InstructionGraph) -> Value {
    debug_assert!(!a.is_invalid() && !b.is_invalid());
    if a == b || a.equals(b, graph) {
        return a;
    }
    if a.is_unknown() || b.is_unknown() {
        return Value::Unknown;
    }
    Value::Placeholder {
        ph,
        loop_carried: a.needs_loop_phi() || b.needs_loop_phi(),
    }
}

/// Merges two `stored_by` sides. Unlike value merging this never collapses
/// to `Unknown`: a pending store on either edge stays reachable through
/// the placeholder so the keep analysis can find it.
pub(crate) fn merge_stored_by(a: Value, b: Value, ph: PhiPlaceholder) -> Value {
    if a == b {
        return a;
    }
    Value::Placeholder {
        ph,
        loop_carried: a.needs_loop_phi() || b.needs_loop_phi(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{DataType, GraphBuilder};

    fn graph_with_constants() -> (InstructionGraph, InstrId, InstrId) {
        let mut b = GraphBuilder::new();
        let zero = b.const_i32(0);
        let one = b.const_i32(1);
        b.ret_void();
        (b.finish(), zero, one)
    }

    #[test]
    fn test_equals_default_vs_zero_constant() {
        let (graph, zero, one) = graph_with_constants();
        assert!(Value::Default.equals(Value::Instruction(zero), &graph));
        assert!(!Value::Default.equals(Value::Instruction(one), &graph));
    }

    #[test]
    fn test_unknown_never_equals_unknown() {
        let (graph, _, _) = graph_with_constants();
        assert!(!Value::Unknown.equals(Value::Unknown, &graph));
    }

    #[test]
    fn test_merge_identical_passes_through() {
        let (graph, zero, _) = graph_with_constants();
        let ph = PhiPlaceholder::new(BlockId::new(0), 0);
        let v = Value::Instruction(zero);
        assert_eq!(merge(v, v, ph, &graph), v);
    }

    #[test]
    fn test_merge_unknown_wins() {
        let (graph, zero, _) = graph_with_constants();
        let ph = PhiPlaceholder::new(BlockId::new(0), 0);
        assert!(merge(Value::Instruction(zero), Value::Unknown, ph, &graph).is_unknown());
        assert!(merge(Value::Unknown, Value::Default, ph, &graph).is_unknown());
    }

    #[test]
    fn test_merge_differing_creates_placeholder() {
        let (graph, zero, one) = graph_with_constants();
        let ph = PhiPlaceholder::new(BlockId::new(2), 1);
        let merged = merge(Value::Instruction(zero), Value::Instruction(one), ph, &graph);
        assert_eq!(merged.as_placeholder(), Some(ph));
        assert!(!merged.needs_loop_phi());
    }

    #[test]
    fn test_merge_propagates_loop_tag() {
        let (graph, zero, _) = graph_with_constants();
        let loop_ph = PhiPlaceholder::new(BlockId::new(1), 0);
        let join_ph = PhiPlaceholder::new(BlockId::new(2), 0);
        let loop_value = Value::Placeholder {
            ph: loop_ph,
            loop_carried: true,
        };
        let merged = merge(loop_value, Value::Instruction(zero), join_ph, &graph);
        assert!(merged.needs_loop_phi());
    }

    #[test]
    fn test_merge_stored_by_keeps_pending_stores() {
        let (_, zero, _) = graph_with_constants();
        let ph = PhiPlaceholder::new(BlockId::new(3), 0);
        // One edge has a pending store, the other has none; the merge must
        // stay reachable for the keep analysis.
        let merged = merge_stored_by(Value::Instruction(zero), Value::Unknown, ph);
        assert_eq!(merged.as_placeholder(), Some(ph));
    }
}
