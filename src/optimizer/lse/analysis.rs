//! The forward analysis driver (phase 1) and the pass-scoped state.
//!
//! One reverse-post-order sweep builds a per-block table of
//! [`ValueRecord`]s, eliminates loads whose value is already proven,
//! deletes stores that rewrite the current value, and logs everything that
//! needs the later phases: loads waiting on loop placeholders, store
//! records for the keep analysis, and the placeholder replacement table.
//!
//! All state lives in [`LseEngine`], created at pass entry and consumed by
//! the commit stage - nothing survives across invocations.

use std::collections::HashMap;

use crate::analysis::AliasModel;
use crate::ir::{BlockId, DataType, InstrId, InstrKind, InstructionGraph, SideEffects};
use crate::optimizer::lse::value::{
    merge, merge_stored_by, PhiPlaceholder, Value, ValueRecord,
};
use crate::utils::BitSet;

/// What a store overwrote, and what it wrote.
#[derive(Debug, Clone, Copy)]
pub(super) struct StoreRecord {
    /// The record the store displaced, for re-evaluation in phase 3.
    pub old: ValueRecord,
    /// The stored value (already routed through substitutes).
    pub value: InstrId,
}

/// Counters reported through the event log.
#[derive(Debug, Clone, Copy, Default)]
pub(super) struct LseStats {
    pub loads_removed: usize,
    pub stores_removed: usize,
    pub allocations_removed: usize,
    pub merges_created: usize,
}

/// The pass-scoped engine: all tables for one invocation.
pub(super) struct LseEngine<'g, 'a> {
    pub graph: &'g mut InstructionGraph,
    pub alias: &'a AliasModel,
    pub num_locations: usize,
    /// Snapshot of reverse post order (blocks are never added or removed
    /// during the pass).
    pub rpo: Vec<BlockId>,
    /// Per-block value records; empty until the block is visited.
    pub heap_values: Vec<Vec<ValueRecord>>,
    /// Dense placeholder replacement table, one slot per
    /// (block x location): `Invalid` until resolved, then `Unknown` or a
    /// concrete instruction. Resolution is monotonic.
    pub replacements: Vec<Value>,
    /// Append-only log of every (possibly eliminable) load and store, in
    /// visitation order.
    pub loads_and_stores: Vec<(InstrId, usize)>,
    /// Loads whose value waits on a loop placeholder.
    pub deferred_loads: HashMap<InstrId, ValueRecord>,
    /// Every store that was not deleted on sight.
    pub store_records: HashMap<InstrId, StoreRecord>,
    /// Chosen substitute per eliminated load.
    pub substitutes: HashMap<InstrId, InstrId>,
    /// Stores proven observable, by instruction index.
    pub kept_stores: BitSet,
    /// Placeholders whose contributing stores must be kept; doubles as the
    /// visited set of the phase-3 search.
    pub kept_placeholders: BitSet,
    pub stats: LseStats,
    /// Set as soon as phase 1 deletes a same-value store.
    pub changed: bool,
}

impl<'g, 'a> LseEngine<'g, 'a> {
    pub(super) fn new(graph: &'g mut InstructionGraph, alias: &'a AliasModel) -> Self {
        let num_locations = alias.location_count();
        let block_count = graph.block_count();
        let instruction_count = graph.instruction_count();
        let rpo = graph.rpo().to_vec();
        assert!(!rpo.is_empty(), "graph must be analyzed before elimination");
        Self {
            graph,
            alias,
            num_locations,
            rpo,
            heap_values: vec![Vec::new(); block_count],
            replacements: vec![Value::Invalid; block_count * num_locations],
            loads_and_stores: Vec::new(),
            deferred_loads: HashMap::new(),
            store_records: HashMap::new(),
            substitutes: HashMap::new(),
            kept_stores: BitSet::new(instruction_count),
            kept_placeholders: BitSet::new(block_count * num_locations),
            stats: LseStats::default(),
            changed: false,
        }
    }

    /// Runs all phases and applies the result to the graph.
    pub(super) fn run(mut self) -> (bool, LseStats) {
        self.run_forward_analysis();
        self.resolve_deferred_loads();
        self.search_kept_stores();
        self.eliminate_stores_writing_old_values();
        self.commit()
    }

    // ------------------------------------------------------------------
    // Shared helpers
    // ------------------------------------------------------------------

    pub(super) fn placeholder_index(&self, ph: PhiPlaceholder) -> usize {
        ph.block.index() * self.num_locations + ph.location as usize
    }

    pub(super) fn replacement(&self, ph: PhiPlaceholder) -> Value {
        self.replacements[self.placeholder_index(ph)]
    }

    /// Routes a value through the replacement table: resolved placeholders
    /// become their chosen instruction or `Unknown`; unresolved ones pass
    /// through.
    pub(super) fn replacement_or_value(&self, value: Value) -> Value {
        match value {
            Value::Placeholder { ph, .. } => match self.replacement(ph) {
                Value::Invalid => value,
                resolved => {
                    debug_assert!(
                        resolved.is_unknown() || resolved.as_instruction().is_some(),
                        "replacements hold only Unknown or instructions"
                    );
                    resolved
                }
            },
            Value::Converted { load, ph } => {
                if self.replacement(ph).is_invalid() {
                    value
                } else {
                    // Once the merge is settled the narrow view is exactly
                    // what the observing load produced.
                    Value::Instruction(load)
                }
            }
            _ => value,
        }
    }

    /// Follows the substitute chain to the final replacement.
    pub(super) fn find_substitute(&self, mut id: InstrId) -> InstrId {
        while let Some(&next) = self.substitutes.get(&id) {
            if next == id {
                break;
            }
            id = next;
        }
        id
    }

    /// Marks the writers reachable through `stored_by` as observable.
    pub(super) fn keep_stores(&mut self, stored_by: Value) {
        match stored_by {
            Value::Instruction(store) => {
                debug_assert!(store.index() < self.kept_stores.capacity());
                self.kept_stores.insert(store.index());
            }
            Value::Placeholder { ph, .. } => {
                self.kept_placeholders.insert(self.placeholder_index(ph));
            }
            _ => {}
        }
    }

    /// Records the chosen substitute for an eliminated load.
    pub(super) fn add_removed_load(&mut self, load: InstrId, substitute: InstrId) {
        let substitute = self.find_substitute(substitute);
        debug_assert!(self.graph.instruction(substitute).is_live());
        debug_assert!(
            self.graph.dominates(substitute, load),
            "substitute must dominate the load it replaces"
        );
        self.substitutes.insert(load, substitute);
    }

    pub(super) fn location_type(&self, location: usize) -> DataType {
        self.alias.location(location).data_type()
    }

    /// The classification of the reference owning `location`.
    pub(super) fn location_owner(&self, location: usize) -> &'a crate::analysis::ReferenceInfo {
        self.alias
            .reference(self.alias.location(location).reference_index())
    }

    // ------------------------------------------------------------------
    // Phase 1: the sweep
    // ------------------------------------------------------------------

    fn run_forward_analysis(&mut self) {
        for position in 0..self.rpo.len() {
            let block = self.rpo[position];
            if self.graph.is_loop_header(block) {
                self.prepare_loop_records(block);
            } else {
                self.merge_predecessor_records(block);
            }

            let instructions = self.graph.block(block).instructions().to_vec();
            for id in instructions {
                if self.graph.instruction(id).is_live() {
                    self.visit_instruction(block, id);
                }
            }
        }
    }

    /// Seeds a loop header: values come from the pre-header only, wrapped
    /// in loop placeholders; back edges are accounted for when the
    /// placeholders resolve. Loops whose structure cannot be analyzed get
    /// the fully conservative treatment.
    fn prepare_loop_records(&mut self, block: BlockId) {
        let info = self
            .graph
            .loop_containing(block)
            .expect("loop header without loop info");
        let pre_header = if info.is_irreducible() {
            None
        } else {
            info.pre_header()
        };

        let Some(pre_header) = pre_header else {
            // Irreducible (or pre-header-less) loop: nothing is known, and
            // every store flowing in - including over the back edges, whose
            // blocks are not processed yet - must be kept. The placeholder
            // queued here makes the phase-3 search walk all predecessors.
            let records = vec![ValueRecord::unknown(); self.num_locations];
            for location in 0..self.num_locations {
                let ph = PhiPlaceholder::new(block, location);
                self.kept_placeholders.insert(self.placeholder_index(ph));
            }
            self.heap_values[block.index()] = records;
            return;
        };

        debug_assert!(!self.heap_values[pre_header.index()].is_empty());
        let mut records = Vec::with_capacity(self.num_locations);
        for location in 0..self.num_locations {
            let ph = PhiPlaceholder::new(block, location);
            let pre_record = self.heap_values[pre_header.index()][location];
            let pre_value = self.replacement_or_value(pre_record.value);
            let placeholder = Value::Placeholder {
                ph,
                loop_carried: true,
            };
            records.push(ValueRecord {
                value: if pre_value.is_unknown() {
                    Value::Unknown
                } else {
                    placeholder
                },
                // The keep decision for stores reaching the header is
                // deferred through the placeholder.
                stored_by: placeholder,
            });
        }
        self.heap_values[block.index()] = records;
    }

    fn merge_predecessor_records(&mut self, block: BlockId) {
        let predecessors = self.graph.block(block).predecessors().to_vec();

        let any_unvisited = predecessors
            .iter()
            .any(|pred| self.heap_values[pred.index()].is_empty());
        if any_unvisited {
            // An edge from inside an unanalyzable (irreducible) region.
            // Nothing is known, and the unseen edges' pending stores are
            // claimed through placeholders once their blocks are swept.
            for location in 0..self.num_locations {
                let ph = PhiPlaceholder::new(block, location);
                self.kept_placeholders.insert(self.placeholder_index(ph));
            }
            self.heap_values[block.index()] = vec![ValueRecord::unknown(); self.num_locations];
            return;
        }

        if self.graph.block(block).is_catch_handler() {
            // Control may arrive from the middle of any throwing block in
            // the try region; nothing merges cleanly.
            for &pred in &predecessors {
                if self.heap_values[pred.index()].is_empty() {
                    continue;
                }
                for location in 0..self.num_locations {
                    let stored_by = self.heap_values[pred.index()][location].stored_by;
                    self.keep_stores(stored_by);
                }
            }
            self.heap_values[block.index()] = vec![ValueRecord::unknown(); self.num_locations];
            return;
        }

        if predecessors.is_empty() {
            // Entry: nothing is known about the heap on method entry.
            self.heap_values[block.index()] = vec![ValueRecord::unknown(); self.num_locations];
            return;
        }

        let mut records = Vec::with_capacity(self.num_locations);
        for location in 0..self.num_locations {
            let ph = PhiPlaceholder::new(block, location);
            let mut merged: Option<ValueRecord> = None;
            for &pred in &predecessors {
                debug_assert!(
                    !self.heap_values[pred.index()].is_empty(),
                    "reverse post order visits predecessors first"
                );
                let record = self.heap_values[pred.index()][location];
                let value = self.replacement_or_value(record.value);
                merged = Some(match merged {
                    None => ValueRecord {
                        value,
                        stored_by: record.stored_by,
                    },
                    Some(acc) => ValueRecord {
                        value: merge(acc.value, value, ph, self.graph),
                        stored_by: merge_stored_by(acc.stored_by, record.stored_by, ph),
                    },
                });
            }
            records.push(merged.expect("at least one predecessor"));
        }
        self.heap_values[block.index()] = records;
    }

    // ------------------------------------------------------------------
    // Per-instruction handling
    // ------------------------------------------------------------------

    fn visit_instruction(&mut self, block: BlockId, id: InstrId) {
        let instr = self.graph.instruction(id);
        let kind = instr.kind().clone();
        let in_try = self.graph.block(block).in_try();

        match kind {
            InstrKind::FieldGet { field } if field.volatile => {
                self.handle_acquire_fence(block, id)
            }
            InstrKind::FieldSet { field } if field.volatile => {
                self.handle_release_fence(block, id)
            }
            InstrKind::FieldGet { .. } | InstrKind::ArrayGet | InstrKind::VecLoad { .. } => {
                let location = self
                    .alias
                    .location_for_access(self.graph.instruction(id))
                    .expect("load without a collected location");
                self.visit_get(block, id, location);
            }
            InstrKind::FieldSet { .. } | InstrKind::ArraySet | InstrKind::VecStore { .. } => {
                if kind.side_effects().may_throw() && in_try {
                    self.handle_exit(block, true);
                }
                let location = self
                    .alias
                    .location_for_access(self.graph.instruction(id))
                    .expect("store without a collected location");
                self.visit_set(block, id, location);
            }
            InstrKind::NewInstance { .. } => {
                if in_try {
                    self.handle_exit(block, true);
                }
                self.visit_new_instance(block, id);
            }
            InstrKind::NewArray => {
                if in_try {
                    self.handle_exit(block, true);
                }
                self.visit_new_array(block, id);
            }
            InstrKind::Invoke { effects } => {
                if effects.may_throw() && in_try {
                    self.handle_exit(block, true);
                }
                self.handle_invoke(block, id, effects);
            }
            InstrKind::MonitorEnter | InstrKind::MonitorExit => {
                if in_try {
                    self.handle_exit(block, true);
                }
                self.handle_monitor(block, id);
            }
            InstrKind::Return => self.handle_exit(block, false),
            // A throw caught in this method exposes the frame to the
            // handler; one that leaves the method cannot reach singletons.
            InstrKind::Throw => self.handle_exit(block, in_try),
            InstrKind::Deoptimize => self.handle_exit(block, true),
            _ => {
                if kind.side_effects().may_throw() && in_try {
                    self.handle_exit(block, true);
                }
            }
        }
    }

    fn visit_get(&mut self, block: BlockId, id: InstrId, location: usize) {
        let load_ty = self.graph.instruction(id).data_type();
        let mut record = self.heap_values[block.index()][location];
        record.value = self.replacement_or_value(record.value);

        self.loads_and_stores.push((id, location));

        match record.value {
            Value::Instruction(value) => {
                debug_assert!(self.graph.instruction(value).is_live());
                // The writer may still be observed through other means.
                self.keep_stores(record.stored_by);
                record.stored_by = Value::Unknown;
                self.add_removed_load(id, value);
            }
            Value::Default => {
                self.keep_stores(record.stored_by);
                record.stored_by = Value::Unknown;
                let zero = self.graph.zero(load_ty);
                self.substitutes.insert(id, zero);
            }
            Value::Unknown => {
                // Not eliminable, but the loaded value is fixed from here
                // on: later loads of the same location can reuse it.
                record.value = Value::Instruction(id);
                self.keep_stores(record.stored_by);
                record.stored_by = Value::Unknown;
                self.keep_aliased_stores(block, location);
            }
            Value::Converted { load, .. } => {
                // Same narrow view as the earlier observing load.
                self.keep_stores(record.stored_by);
                record.stored_by = Value::Unknown;
                self.add_removed_load(id, load);
            }
            Value::Placeholder { ph, loop_carried } => {
                if loop_carried {
                    // Deferred until the placeholder resolves in phase 2.
                    self.deferred_loads.insert(id, record);
                    if load_ty.bit_size() < self.location_type(location).bit_size() {
                        record.value = Value::Converted { load: id, ph };
                    }
                } else {
                    // All inputs are already final; materialize now.
                    let value = self.materialize_non_loop_placeholder(ph);
                    self.keep_stores(record.stored_by);
                    record.stored_by = Value::Unknown;
                    record.value = Value::Instruction(value);
                    self.add_removed_load(id, value);
                }
            }
            Value::Invalid => unreachable!("table records are never invalid"),
        }

        self.heap_values[block.index()][location] = record;
    }

    fn visit_set(&mut self, block: BlockId, id: InstrId, location: usize) {
        let instr = self.graph.instruction(id);
        let stored = self
            .find_substitute(instr.stored_value().expect("store without value"));
        let stored_ty = self.graph.instruction(stored).data_type();
        let location_ty = self.location_type(location);

        let record = self.heap_values[block.index()][location];
        let current = self.replacement_or_value(record.value);

        // A store whose value is already in the location is dead on sight -
        // unless an implicit narrowing could change the stored bits.
        let width_safe = !location_ty.requires_conversion(stored_ty)
            || self.graph.instruction(stored).is_zero_constant();
        if width_safe && current.equals(Value::Instruction(stored), self.graph) {
            self.graph.remove_instruction(id);
            self.stats.stores_removed += 1;
            self.changed = true;
            return;
        }

        self.loads_and_stores.push((id, location));
        self.store_records.insert(
            id,
            StoreRecord {
                old: ValueRecord {
                    value: current,
                    stored_by: record.stored_by,
                },
                value: stored,
            },
        );

        // Anything that may overlap this slot no longer has a known value,
        // and its pending stores become observable.
        for other in 0..self.num_locations {
            if other == location || !self.alias.may_alias(other, location) {
                continue;
            }
            let other_record = self.heap_values[block.index()][other];
            self.keep_stores(other_record.stored_by);
            self.heap_values[block.index()][other] = ValueRecord::unknown();
        }

        self.heap_values[block.index()][location] = ValueRecord {
            value: Value::Instruction(stored),
            stored_by: Value::Instruction(id),
        };
    }

    fn visit_new_instance(&mut self, block: BlockId, id: InstrId) {
        let type_const = self.graph.instruction(id).operands()[0];
        if self.alias.reference_info(id).is_none() {
            return;
        }
        for location in 0..self.num_locations {
            if self.location_owner(location).reference() != id {
                continue;
            }
            let record = self.heap_values[block.index()][location];
            // A store from a previous loop iteration wrote a different
            // object allocated at this site.
            self.keep_stores(record.stored_by);

            let is_type_pointer = matches!(
                self.alias.location(location).kind(),
                crate::analysis::LocationKind::Field(field) if field.is_type_pointer()
            );
            self.heap_values[block.index()][location] = ValueRecord {
                value: if is_type_pointer {
                    // The header is initialized with the class handle,
                    // making type checks before any store free to resolve.
                    Value::Instruction(type_const)
                } else {
                    Value::Default
                },
                stored_by: Value::Unknown,
            };
        }
    }

    fn visit_new_array(&mut self, block: BlockId, id: InstrId) {
        if self.alias.reference_info(id).is_none() {
            return;
        }
        for location in 0..self.num_locations {
            if self.location_owner(location).reference() != id {
                continue;
            }
            let record = self.heap_values[block.index()][location];
            self.keep_stores(record.stored_by);
            self.heap_values[block.index()][location] = ValueRecord {
                value: Value::Default,
                stored_by: Value::Unknown,
            };
        }
    }

    fn handle_invoke(&mut self, block: BlockId, id: InstrId, effects: SideEffects) {
        let operands = self.graph.instruction(id).operands().to_vec();
        let environment = self.graph.instruction(id).environment().to_vec();
        for location in 0..self.num_locations {
            let info = self.location_owner(location);
            // A singleton the callee never receives - as an argument or
            // through the deoptimization environment - is invisible to it.
            let reference = info.reference();
            if info.is_singleton()
                && !operands.contains(&reference)
                && !environment.contains(&reference)
            {
                continue;
            }
            let mut record = self.heap_values[block.index()][location];
            self.keep_stores(record.stored_by);
            record.stored_by = Value::Unknown;
            if effects.does_any_write() {
                record.value = Value::Unknown;
            }
            self.heap_values[block.index()][location] = record;
        }
    }

    fn handle_monitor(&mut self, block: BlockId, id: InstrId) {
        let object = self.graph.instruction(id).operands()[0];
        let is_singleton = self
            .alias
            .reference_info(object)
            .is_some_and(|info| info.is_singleton());
        if is_singleton {
            // A lock on a private object synchronizes with nobody.
            return;
        }
        // Full fence: another thread may observe and mutate everything
        // shared.
        for location in 0..self.num_locations {
            if self.location_owner(location).is_singleton() {
                continue;
            }
            let record = self.heap_values[block.index()][location];
            self.keep_stores(record.stored_by);
            self.heap_values[block.index()][location] = ValueRecord::unknown();
        }
    }

    /// Method exits and handler-visible points: pending stores to anything
    /// observable from outside become kept. `even_singletons` covers
    /// constructs that expose the whole frame (throw into a handler,
    /// deoptimization).
    pub(super) fn handle_exit(&mut self, block: BlockId, even_singletons: bool) {
        for location in 0..self.num_locations {
            if !even_singletons && self.location_owner(location).is_removable() {
                continue;
            }
            let mut record = self.heap_values[block.index()][location];
            self.keep_stores(record.stored_by);
            record.stored_by = Value::Unknown;
            self.heap_values[block.index()][location] = record;
        }
    }

    // NOTE: `handle_exit` leaves `value` sides intact; exits read the heap
    // but do not write it.

    /// A volatile read acquires: no cached value survives it.
    fn handle_acquire_fence(&mut self, block: BlockId, id: InstrId) {
        let own = self.alias.location_for_access(self.graph.instruction(id));
        for location in 0..self.num_locations {
            let mut record = self.heap_values[block.index()][location];
            if Some(location) == own {
                // The volatile read observes its own location's writer.
                self.keep_stores(record.stored_by);
                record.stored_by = Value::Unknown;
            }
            record.value = Value::Unknown;
            self.heap_values[block.index()][location] = record;
        }
    }

    /// A volatile write releases: every pending store becomes observable.
    /// The volatile store itself is never logged and never removed.
    fn handle_release_fence(&mut self, block: BlockId, id: InstrId) {
        for location in 0..self.num_locations {
            let mut record = self.heap_values[block.index()][location];
            self.keep_stores(record.stored_by);
            record.stored_by = Value::Unknown;
            self.heap_values[block.index()][location] = record;
        }
        let own = self.alias.location_for_access(self.graph.instruction(id));
        if let Some(location) = own {
            let stored = self
                .find_substitute(self.graph.instruction(id).stored_value().expect("store value"));
            self.heap_values[block.index()][location].value = Value::Instruction(stored);
        }
    }

    fn keep_aliased_stores(&mut self, block: BlockId, location: usize) {
        for other in 0..self.num_locations {
            if other == location || !self.alias.may_alias(other, location) {
                continue;
            }
            let record = self.heap_values[block.index()][other];
            self.keep_stores(record.stored_by);
            self.heap_values[block.index()][other].stored_by = Value::Unknown;
        }
    }
}
