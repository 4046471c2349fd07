//! The placeholder resolver (phase 2).
//!
//! Phase 1 leaves loads that observed a loop placeholder in a deferred
//! list. This phase decides, per placeholder, whether the deferred merge
//! collapses to a known value, materializes into real merge (phi)
//! instructions, or is unresolvable:
//!
//! 1. *Default shortcut* - every non-placeholder input reachable through
//!    the dependency graph is the default value (and, for loop-variant
//!    array indices, every back-edge write to the same reference stores the
//!    default). All visited placeholders resolve to the zero constant.
//! 2. *Single-input shortcut* - every non-placeholder input is the same
//!    instruction, looking through implicit narrowing conversions. All
//!    visited placeholders resolve to that instruction.
//! 3. Otherwise the visited set is grouped by mutual dependency (an
//!    all-pairs transitive closure over the dependency relation) and
//!    materialized smallest-group-first, one phi per placeholder.
//!
//! A walk that finds an `Unknown` input fails: the failing placeholder is
//! proven unresolvable, and the driver re-walks the affected suffix of the
//! reverse post order, downgrading dependent records and deferred loads to
//! `Unknown`. Every such re-walk marks at least one placeholder Unknown,
//! which bounds the whole phase.
//!
//! All traversals use explicit stacks; placeholder dependency chains grow
//! with loop nesting depth and must not recurse.

use std::collections::HashMap;

use crate::analysis::LocationKind;
use crate::ir::{DataType, InstrId, InstrKind};
use crate::optimizer::lse::analysis::LseEngine;
use crate::optimizer::lse::value::{PhiPlaceholder, Value};
use crate::utils::BitSet;

/// Result of one resolution attempt.
pub(super) enum ResolveOutcome {
    /// The placeholder's replacement-table slot is now set.
    Resolved,
    /// The walk found an `Unknown` input at the reported placeholder.
    UnknownInput(PhiPlaceholder),
}

impl LseEngine<'_, '_> {
    // ------------------------------------------------------------------
    // Phase 2 driver
    // ------------------------------------------------------------------

    /// Resolves every deferred load, in load order.
    pub(super) fn resolve_deferred_loads(&mut self) {
        for position in 0..self.loads_and_stores.len() {
            let (id, location) = self.loads_and_stores[position];
            let Some(record) = self.deferred_loads.get(&id).copied() else {
                continue;
            };
            // Whatever happens to the load, it observed the pending writer.
            self.keep_stores(record.stored_by);

            let mut value = record.value;
            loop {
                match self.replacement_or_value(value) {
                    Value::Instruction(substitute) => {
                        self.add_removed_load(id, substitute);
                        break;
                    }
                    Value::Unknown => {
                        // Unreplaceable; the load stays in the graph.
                        break;
                    }
                    Value::Placeholder { ph, .. } => {
                        let ty = self.location_type(location);
                        match self.try_resolve_placeholder(ph, ty) {
                            ResolveOutcome::Resolved => {
                                debug_assert!(!self.replacement(ph).is_invalid());
                            }
                            ResolveOutcome::UnknownInput(failing) => {
                                self.process_loop_phi_with_unknown_input(failing);
                                if let Some(updated) = self.deferred_loads.get(&id) {
                                    value = updated.value;
                                }
                            }
                        }
                    }
                    resolved => unreachable!("deferred load resolved to {resolved:?}"),
                }
            }
            self.deferred_loads.remove(&id);
        }
        debug_assert!(self.deferred_loads.is_empty());
    }

    /// Lazy materialization for merges with no loop input: every
    /// dependency is already final, so resolution cannot fail.
    pub(super) fn materialize_non_loop_placeholder(&mut self, ph: PhiPlaceholder) -> InstrId {
        let ty = self.location_type(ph.location as usize);
        if !self.try_default_shortcut(ph, ty) && !self.try_single_input_shortcut(ph, ty) {
            let set = self
                .collect_placeholders_to_materialize(ph)
                .unwrap_or_else(|_| unreachable!("non-loop merge with an unknown input"));
            self.materialize_group_set(&set, ty);
        }
        self.replacement(ph)
            .as_instruction()
            .expect("materialization resolves to an instruction")
    }

    fn try_resolve_placeholder(&mut self, ph: PhiPlaceholder, ty: DataType) -> ResolveOutcome {
        if self.try_default_shortcut(ph, ty) || self.try_single_input_shortcut(ph, ty) {
            return ResolveOutcome::Resolved;
        }
        match self.collect_placeholders_to_materialize(ph) {
            Err(failing) => ResolveOutcome::UnknownInput(failing),
            Ok(set) => {
                self.materialize_group_set(&set, ty);
                debug_assert!(!self.replacement(ph).is_invalid());
                ResolveOutcome::Resolved
            }
        }
    }

    // ------------------------------------------------------------------
    // Shortcut walks
    // ------------------------------------------------------------------

    /// Depth-first walk over unresolved placeholder dependencies, starting
    /// at `start`. Calls `input` for every non-placeholder input found;
    /// aborting early when it returns `false`. Returns the visited set in
    /// visitation order, or `None` if aborted.
    fn walk_dependencies(
        &self,
        start: PhiPlaceholder,
        mut input: impl FnMut(&Self, Value) -> bool,
    ) -> Option<Vec<PhiPlaceholder>> {
        let mut visited = BitSet::new(self.replacements.len());
        let mut order = Vec::new();
        let mut stack = vec![start];
        while let Some(placeholder) = stack.pop() {
            if !visited.insert(self.placeholder_index(placeholder)) {
                continue;
            }
            order.push(placeholder);
            for &pred in self.graph.block(placeholder.block).predecessors() {
                debug_assert!(!self.heap_values[pred.index()].is_empty());
                let record = self.heap_values[pred.index()][placeholder.location as usize];
                match self.replacement_or_value(record.value) {
                    Value::Placeholder { ph, .. } if self.replacement(ph).is_invalid() => {
                        stack.push(ph);
                    }
                    value => {
                        if !input(self, value) {
                            return None;
                        }
                    }
                }
            }
        }
        Some(order)
    }

    /// Succeeds if every reachable input is the default value; all visited
    /// placeholders then resolve to the zero constant.
    fn try_default_shortcut(&mut self, start: PhiPlaceholder, ty: DataType) -> bool {
        let Some(order) = self.walk_dependencies(start, |engine, value| match value {
            Value::Default => true,
            Value::Instruction(id) => engine.graph.instruction(id).is_zero_constant(),
            _ => false,
        }) else {
            return false;
        };

        // Loop-variant indices: distinct iterations may touch different
        // elements of the same structure, so every write on a back-edge
        // path to the same underlying reference must also be the default.
        for &placeholder in &order {
            if !self.loop_variant_writes_are_default(placeholder) {
                return false;
            }
        }

        let zero = self.graph.zero(ty);
        for placeholder in order {
            let index = self.placeholder_index(placeholder);
            self.replacements[index] = Value::Instruction(zero);
        }
        true
    }

    /// Succeeds if every reachable input is the same instruction modulo
    /// implicit narrowing conversions; all visited placeholders then
    /// resolve to that instruction.
    fn try_single_input_shortcut(&mut self, start: PhiPlaceholder, _ty: DataType) -> bool {
        let mut candidate: Option<InstrId> = None;
        let order = self.walk_dependencies(start, |engine, value| {
            let base = match value {
                Value::Instruction(id) => engine.peel_conversions(id),
                Value::Converted { load, .. } => engine.peel_conversions(load),
                _ => return false,
            };
            match candidate {
                None => {
                    candidate = Some(base);
                    true
                }
                Some(existing) => existing == base,
            }
        });
        let (Some(order), Some(candidate)) = (order, candidate) else {
            return false;
        };
        for placeholder in order {
            let index = self.placeholder_index(placeholder);
            self.replacements[index] = Value::Instruction(candidate);
        }
        true
    }

    /// Follows implicit narrowing conversion chains to the original value.
    fn peel_conversions(&self, mut id: InstrId) -> InstrId {
        loop {
            let instr = self.graph.instruction(id);
            if !matches!(instr.kind(), InstrKind::Convert) {
                return id;
            }
            let input = instr.operands()[0];
            let to = instr.data_type();
            let from = self.graph.instruction(input).data_type();
            // Only integral narrowing is transparent to a narrower read.
            if to.is_integral() && from.is_integral() && to.bit_size() <= from.bit_size() {
                id = input;
            } else {
                return id;
            }
        }
    }

    /// For placeholders at loop headers whose location has a loop-variant
    /// index: checks that every store in the loop body to the same
    /// underlying reference writes the default value.
    fn loop_variant_writes_are_default(&self, placeholder: PhiPlaceholder) -> bool {
        if !self.graph.is_loop_header(placeholder.block) {
            return true;
        }
        let location = self.alias.location(placeholder.location as usize);
        let index = match *location.kind() {
            LocationKind::ArrayElement { index, .. } | LocationKind::Vector { index, .. } => index,
            LocationKind::Field(_) => return true,
        };
        let info = self
            .graph
            .loop_containing(placeholder.block)
            .expect("loop header without loop info");
        let index_block = match self.graph.instruction(index).block() {
            Some(block) => block,
            None => return true,
        };
        if !info.contains(index_block) {
            // The index is loop-invariant; iterations address one element.
            return true;
        }

        let reference_index = location.reference_index();
        for block in info.blocks.iter() {
            let block_id = crate::ir::BlockId::new(block);
            for &id in self.graph.block(block_id).instructions() {
                let instr = self.graph.instruction(id);
                if !instr.kind().is_heap_store() {
                    continue;
                }
                let Some(loc) = self.alias.location_for_access(instr) else {
                    continue;
                };
                if self.alias.location(loc).reference_index() != reference_index {
                    continue;
                }
                let stored = self.find_substitute(instr.stored_value().expect("store value"));
                if !self.graph.instruction(stored).is_zero_constant() {
                    return false;
                }
            }
        }
        true
    }

    // ------------------------------------------------------------------
    // Materialization
    // ------------------------------------------------------------------

    /// Collects every unresolved placeholder reachable from `start`, or
    /// reports the placeholder that has an `Unknown` input.
    fn collect_placeholders_to_materialize(
        &self,
        start: PhiPlaceholder,
    ) -> Result<Vec<PhiPlaceholder>, PhiPlaceholder> {
        let mut visited = BitSet::new(self.replacements.len());
        let mut order = Vec::new();
        let mut stack = vec![start];
        while let Some(placeholder) = stack.pop() {
            if !visited.insert(self.placeholder_index(placeholder)) {
                continue;
            }
            order.push(placeholder);
            for &pred in self.graph.block(placeholder.block).predecessors() {
                let record = self.heap_values[pred.index()][placeholder.location as usize];
                match self.replacement_or_value(record.value) {
                    Value::Unknown => return Err(placeholder),
                    Value::Placeholder { ph, .. } if self.replacement(ph).is_invalid() => {
                        stack.push(ph);
                    }
                    _ => {}
                }
            }
        }
        Ok(order)
    }

    /// Groups the collected placeholders by mutual dependency and
    /// materializes the groups smallest-first.
    fn materialize_group_set(&mut self, set: &[PhiPlaceholder], ty: DataType) {
        let count = set.len();
        let mut position: HashMap<usize, usize> = HashMap::with_capacity(count);
        for (at, &placeholder) in set.iter().enumerate() {
            position.insert(self.placeholder_index(placeholder), at);
        }

        // Direct dependency rows, then Floyd-Warshall transitive closure.
        let mut deps: Vec<BitSet> = vec![BitSet::new(count); count];
        for (at, &placeholder) in set.iter().enumerate() {
            for &pred in self.graph.block(placeholder.block).predecessors() {
                let record = self.heap_values[pred.index()][placeholder.location as usize];
                if let Value::Placeholder { ph, .. } = self.replacement_or_value(record.value) {
                    if self.replacement(ph).is_invalid() {
                        let dep = position[&self.placeholder_index(ph)];
                        deps[at].insert(dep);
                    }
                }
            }
        }
        for via in 0..count {
            for row in 0..count {
                if deps[row].contains(via) {
                    let other = deps[via].clone();
                    deps[row].union_with(&other);
                }
            }
        }

        // A group is a mutual-dependency class; a minimal closure has no
        // unprocessed external dependencies.
        let mut remaining = vec![true; count];
        let mut processed = 0;
        while processed < count {
            let seed = (0..count)
                .filter(|&at| remaining[at])
                .min_by_key(|&at| deps[at].count())
                .expect("unprocessed placeholder remains");
            let mut group = Vec::new();
            for at in 0..count {
                if !remaining[at] {
                    continue;
                }
                let mutual = at == seed || (deps[seed].contains(at) && deps[at].contains(seed));
                if mutual {
                    remaining[at] = false;
                    processed += 1;
                    group.push(set[at]);
                }
            }
            self.materialize_group(&group, ty);
        }
    }

    /// Materializes one mutual-dependency group: collapse to a single
    /// outside value when possible, otherwise create one phi per
    /// placeholder and wire the inputs.
    fn materialize_group(&mut self, members: &[PhiPlaceholder], ty: DataType) {
        let member_set: Vec<usize> = members
            .iter()
            .map(|&placeholder| self.placeholder_index(placeholder))
            .collect();

        // Single-input collapse over the group's outside inputs.
        let mut candidate: Option<InstrId> = None;
        let mut collapses = true;
        'outer: for &placeholder in members {
            for &pred in self.graph.block(placeholder.block).predecessors() {
                let record = self.heap_values[pred.index()][placeholder.location as usize];
                let base = match self.replacement_or_value(record.value) {
                    Value::Placeholder { ph, .. }
                        if member_set.contains(&self.placeholder_index(ph)) =>
                    {
                        continue;
                    }
                    Value::Instruction(id) => self.peel_conversions(id),
                    Value::Converted { load, .. } => self.peel_conversions(load),
                    Value::Default => {
                        collapses = false;
                        break 'outer;
                    }
                    value => unreachable!("group input resolved to {value:?}"),
                };
                match candidate {
                    None => candidate = Some(base),
                    Some(existing) if existing == base => {}
                    Some(_) => {
                        collapses = false;
                        break 'outer;
                    }
                }
            }
        }
        if collapses {
            if let Some(candidate) = candidate {
                for &index in &member_set {
                    self.replacements[index] = Value::Instruction(candidate);
                }
                return;
            }
        }

        // Create the phis first so in-group references resolve, then fill
        // in the inputs from each predecessor's resolved value.
        for (&placeholder, &index) in members.iter().zip(&member_set) {
            let phi = self.graph.insert_phi(placeholder.block, ty);
            self.replacements[index] = Value::Instruction(phi);
            self.stats.merges_created += 1;
        }
        for &placeholder in members {
            let phi = self
                .replacement(placeholder)
                .as_instruction()
                .expect("just materialized");
            let predecessors = self.graph.block(placeholder.block).predecessors().to_vec();
            let mut inputs = Vec::with_capacity(predecessors.len());
            for &pred in &predecessors {
                let record = self.heap_values[pred.index()][placeholder.location as usize];
                let input = match self.replacement_or_value(record.value) {
                    Value::Instruction(id) => id,
                    Value::Converted { load, .. } => load,
                    Value::Default => self.graph.zero(ty),
                    value => unreachable!("phi input resolved to {value:?}"),
                };
                // Inputs stored through a different width go through an
                // explicit conversion at the end of the predecessor.
                let input_ty = self.graph.instruction(input).data_type();
                let input = if ty.requires_conversion(input_ty) {
                    self.graph
                        .insert_before_terminator(pred, InstrKind::Convert, ty, vec![input])
                } else {
                    input
                };
                inputs.push(input);
            }
            self.graph.set_phi_operands(phi, inputs);
        }
    }

    // ------------------------------------------------------------------
    // Unknown-input re-walk
    // ------------------------------------------------------------------

    /// Proves `failing` unresolvable and re-walks the reverse post order
    /// from its block onward, downgrading every dependent record and
    /// deferred load. Each invocation marks at least one placeholder
    /// `Unknown`, which guarantees phase-2 termination.
    pub(super) fn process_loop_phi_with_unknown_input(&mut self, failing: PhiPlaceholder) {
        let failing_index = self.placeholder_index(failing);
        assert!(
            self.replacements[failing_index].is_invalid(),
            "placeholder {failing:?} resolved twice"
        );
        self.replacements[failing_index] = Value::Unknown;

        let start = self
            .graph
            .rpo_position(failing.block)
            .expect("placeholder blocks are reachable");
        for position in start..self.rpo.len() {
            let block = self.rpo[position];

            // Merges in this block whose inputs are now unknown.
            for location in 0..self.num_locations {
                let placeholder = PhiPlaceholder::new(block, location);
                if !self.replacement(placeholder).is_invalid() {
                    continue;
                }
                let now_unknown = self
                    .graph
                    .block(block)
                    .predecessors()
                    .iter()
                    .any(|&pred| {
                        !self.heap_values[pred.index()].is_empty()
                            && self
                                .replacement_or_value(self.heap_values[pred.index()][location].value)
                                .is_unknown()
                    });
                if now_unknown {
                    let index = self.placeholder_index(placeholder);
                    self.replacements[index] = Value::Unknown;
                }
            }

            // Downgrade this block's affected records.
            for location in 0..self.num_locations {
                let mut record = self.heap_values[block.index()][location];
                let mut changed = false;
                if record.value.as_placeholder().is_some()
                    && self.replacement_or_value(record.value).is_unknown()
                {
                    record.value = Value::Unknown;
                    changed = true;
                }
                if let Value::Placeholder { ph, .. } = record.stored_by {
                    if self.replacement(ph).is_unknown() {
                        // The merge of pending writers is untrackable now;
                        // they must all be kept.
                        self.keep_stores(record.stored_by);
                        record.stored_by = Value::Unknown;
                        changed = true;
                    }
                }
                if changed {
                    self.heap_values[block.index()][location] = record;
                }
            }
        }

        // Deferred loads that lost their value become unreplaceable.
        let affected: Vec<InstrId> = self
            .deferred_loads
            .iter()
            .filter(|(_, record)| self.replacement_or_value(record.value).is_unknown())
            .map(|(&id, _)| id)
            .collect();
        for id in affected {
            if let Some(record) = self.deferred_loads.get_mut(&id) {
                record.value = Value::Unknown;
            }
        }
    }

    // ------------------------------------------------------------------
    // Phase-3 matching mode
    // ------------------------------------------------------------------

    /// Resolves a placeholder for old-value recomputation without creating
    /// instructions: shortcuts first, then matching against existing phis.
    /// Failure resolves to `Unknown`, which conservatively keeps the
    /// store under consideration.
    pub(super) fn find_old_value_for_placeholder(&mut self, ph: PhiPlaceholder) {
        if !self.replacement(ph).is_invalid() {
            return;
        }
        let ty = self.location_type(ph.location as usize);
        if self.try_default_shortcut(ph, ty) || self.try_single_input_shortcut(ph, ty) {
            return;
        }
        match self.collect_placeholders_to_materialize(ph) {
            Err(failing) => {
                for placeholder in [failing, ph] {
                    let index = self.placeholder_index(placeholder);
                    if self.replacements[index].is_invalid() {
                        self.replacements[index] = Value::Unknown;
                    }
                }
            }
            Ok(set) if set.len() == 1 => self.try_match_existing_phi(set[0], ty),
            Ok(set) => {
                // Matching a whole dependency group against existing phis
                // is not attempted; keeping the store is always sound.
                for placeholder in set {
                    let index = self.placeholder_index(placeholder);
                    if self.replacements[index].is_invalid() {
                        self.replacements[index] = Value::Unknown;
                    }
                }
            }
        }
    }

    fn try_match_existing_phi(&mut self, ph: PhiPlaceholder, ty: DataType) {
        let predecessors = self.graph.block(ph.block).predecessors().to_vec();
        'candidates: for phi in self.graph.phis(ph.block) {
            if self.graph.instruction(phi).data_type() != ty {
                continue;
            }
            let operands = self.graph.instruction(phi).operands().to_vec();
            if operands.len() != predecessors.len() {
                continue;
            }
            for (at, &pred) in predecessors.iter().enumerate() {
                let record = self.heap_values[pred.index()][ph.location as usize];
                let matches = match self.replacement_or_value(record.value) {
                    Value::Instruction(id) => {
                        self.find_substitute(operands[at]) == self.find_substitute(id)
                    }
                    Value::Default => self.graph.instruction(operands[at]).is_zero_constant(),
                    // The back edge of the candidate refers to itself.
                    Value::Placeholder { ph: dep, .. } if dep == ph => operands[at] == phi,
                    Value::Converted { load, .. } => operands[at] == load,
                    _ => false,
                };
                if !matches {
                    continue 'candidates;
                }
            }
            let index = self.placeholder_index(ph);
            self.replacements[index] = Value::Instruction(phi);
            return;
        }
        let index = self.placeholder_index(ph);
        self.replacements[index] = Value::Unknown;
    }
}
