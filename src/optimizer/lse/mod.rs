//! Load-store elimination.
//!
//! Removes redundant reads and writes of object fields, array elements and
//! vector memory, and deletes allocations that never escape. The pass is a
//! flow-sensitive abstract interpretation over the instruction graph:
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                   Load-Store Elimination                      │
//! ├───────────────────────────────────────────────────────────────┤
//! │                                                               │
//! │  Phase 1  Forward sweep (reverse post order)                  │
//! │    ├─ per-block value records {value, stored_by}              │
//! │    ├─ loads with proven values scheduled for replacement      │
//! │    ├─ same-value stores deleted on sight                      │
//! │    └─ loop-dependent loads deferred via placeholders          │
//! │                                                               │
//! │  Phase 2  Placeholder resolution                              │
//! │    ├─ default / single-input shortcuts (DFS)                  │
//! │    ├─ grouped materialization (transitive closure)            │
//! │    └─ unknown-input re-walks until settled                    │
//! │                                                               │
//! │  Phase 3  Store-keep analysis                                 │
//! │    ├─ backward "must keep" propagation to fixpoint            │
//! │    └─ write-old-value stores dropped from the kept set        │
//! │                                                               │
//! │  Phase 4  Commit                                              │
//! │    ├─ load substitution (+ width conversions)                 │
//! │    ├─ non-kept store removal                                  │
//! │    └─ dead singleton allocation + fence removal               │
//! │                                                               │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! Both outcomes of the pass are semantically correct by construction: it
//! either optimizes or conservatively leaves code unchanged. Broken
//! internal invariants are programming errors and abort via assertions -
//! they are never downgraded to "skip this optimization".
//!
//! # Example
//!
//! ```rust
//! use dotopt::analysis::AliasModel;
//! use dotopt::ir::{DataType, FieldRef, GraphBuilder};
//! use dotopt::optimizer::lse;
//!
//! let mut b = GraphBuilder::new();
//! let obj = b.parameter(0, DataType::Reference);
//! let field = FieldRef::new(1, 0, DataType::Int32);
//! let one = b.const_i32(1);
//! b.field_set(obj, field, one);
//! let load = b.field_get(obj, field); // reads back the stored 1
//! b.ret_val(load);
//! let mut graph = b.finish();
//!
//! let alias = AliasModel::build(&graph);
//! assert!(lse::eliminate(&mut graph, &alias));
//! assert!(!graph.instruction(load).is_live());
//! ```

mod analysis;
mod commit;
mod phis;
mod stores;
mod value;

use crate::analysis::AliasModel;
use crate::ir::InstructionGraph;
use crate::optimizer::{EventKind, EventLog, GraphPass};
use crate::Result;

use analysis::LseEngine;

/// Runs load-store elimination on `graph` against the given alias model.
///
/// Returns `true` if the graph changed. This is the single-procedure
/// entry point; all pass state is created here and dropped before
/// returning.
pub fn eliminate(graph: &mut InstructionGraph, alias: &AliasModel) -> bool {
    let mut events = EventLog::new();
    eliminate_with_events(graph, alias, &mut events)
}

/// Like [`eliminate`], recording what happened into `events`.
pub fn eliminate_with_events(
    graph: &mut InstructionGraph,
    alias: &AliasModel,
    events: &mut EventLog,
) -> bool {
    if alias.location_count() == 0 {
        return false;
    }
    let (changed, stats) = LseEngine::new(graph, alias).run();

    if stats.loads_removed > 0 {
        events
            .record(EventKind::LoadEliminated)
            .message(format!("{} loads replaced", stats.loads_removed));
    }
    if stats.stores_removed > 0 {
        events
            .record(EventKind::StoreEliminated)
            .message(format!("{} stores removed", stats.stores_removed));
    }
    if stats.allocations_removed > 0 {
        events
            .record(EventKind::AllocationEliminated)
            .message(format!("{} allocations removed", stats.allocations_removed));
    }
    if stats.merges_created > 0 {
        events
            .record(EventKind::MergeCreated)
            .message(format!("{} merges materialized", stats.merges_created));
    }
    changed
}

/// Load-store elimination as a schedulable pass.
pub struct LoadStoreElimination;

impl LoadStoreElimination {
    /// Creates the pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Default for LoadStoreElimination {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphPass for LoadStoreElimination {
    fn name(&self) -> &'static str {
        "load-store-elimination"
    }

    fn description(&self) -> &'static str {
        "Removes redundant heap reads and writes and dead allocations"
    }

    fn run(&self, graph: &mut InstructionGraph, events: &mut EventLog) -> Result<bool> {
        let alias = AliasModel::build(graph);
        Ok(eliminate_with_events(graph, &alias, events))
    }
}
