//! The store-keep analyzer (phase 3).
//!
//! Phase 1 marked stores kept either directly (their value was observed)
//! or indirectly, through a placeholder standing for a merge of pending
//! writers. The first pass here propagates "must keep" backward through
//! those placeholders to a fixed point; on loop back edges the propagation
//! widens to every may-aliasing location, because a later iteration may
//! observe the store through a different index.
//!
//! The second pass then re-derives, per surviving store, the value the
//! store would overwrite once all non-kept stores are deleted - using the
//! placeholder machinery in matching mode - and additionally eliminates
//! stores that write that same value back.

use crate::ir::BlockId;
use crate::optimizer::lse::analysis::LseEngine;
use crate::optimizer::lse::value::{Value, ValueRecord};

impl LseEngine<'_, '_> {
    /// Backward fixed point over kept placeholders.
    pub(super) fn search_kept_stores(&mut self) {
        let mut worklist: Vec<usize> = self.kept_placeholders.iter().collect();
        while let Some(index) = worklist.pop() {
            let block = BlockId::new(index / self.num_locations);
            let location = index % self.num_locations;

            let is_header = self.graph.is_loop_header(block);
            let predecessors = self.graph.block(block).predecessors().to_vec();
            let back_edge_flags: Vec<bool> = {
                let loop_info = self.graph.loop_containing(block);
                predecessors
                    .iter()
                    .map(|&pred| {
                        is_header && loop_info.is_some_and(|info| info.contains(pred))
                    })
                    .collect()
            };

            for (pred, back_edge) in predecessors.into_iter().zip(back_edge_flags) {
                if self.heap_values[pred.index()].is_empty() {
                    continue;
                }
                if back_edge {
                    // A later iteration may observe the store through any
                    // overlapping location.
                    for other in 0..self.num_locations {
                        if other != location && !self.alias.may_alias(other, location) {
                            continue;
                        }
                        let stored_by = self.heap_values[pred.index()][other].stored_by;
                        self.keep_stores_into(stored_by, &mut worklist);
                        self.heap_values[pred.index()][other].stored_by = Value::Unknown;
                    }
                } else {
                    let stored_by = self.heap_values[pred.index()][location].stored_by;
                    self.keep_stores_into(stored_by, &mut worklist);
                    self.heap_values[pred.index()][location].stored_by = Value::Unknown;
                }
            }
        }
    }

    /// Like [`LseEngine::keep_stores`], but pushes newly kept placeholders
    /// onto the search worklist.
    fn keep_stores_into(&mut self, stored_by: Value, worklist: &mut Vec<usize>) {
        match stored_by {
            Value::Instruction(store) => {
                self.kept_stores.insert(store.index());
            }
            Value::Placeholder { ph, .. } => {
                let index = self.placeholder_index(ph);
                if self.kept_placeholders.insert(index) {
                    worklist.push(index);
                }
            }
            _ => {}
        }
    }

    /// Second elimination pass: a kept store whose written value equals the
    /// value already in the location (once non-kept stores are gone) is
    /// dropped from the kept set.
    pub(super) fn eliminate_stores_writing_old_values(&mut self) {
        for position in 0..self.loads_and_stores.len() {
            let (id, location) = self.loads_and_stores[position];
            let Some(store_record) = self.store_records.get(&id).copied() else {
                continue;
            };
            if !self.kept_stores.contains(id.index()) {
                // Already eliminated.
                continue;
            }

            let mut old = store_record.old;
            self.update_record_for_store_elimination(&mut old);

            let stored = self.find_substitute(store_record.value);
            let stored_ty = self.graph.instruction(stored).data_type();
            let location_ty = self.location_type(location);
            let width_safe = !location_ty.requires_conversion(stored_ty)
                || self.graph.instruction(stored).is_zero_constant();
            if width_safe && old.value.equals(Value::Instruction(stored), self.graph) {
                // The commit stage removes it along with the never-kept
                // stores.
                self.kept_stores.remove(id.index());
            }
        }
    }

    /// Rewinds a record past eliminated stores and resolves its value
    /// through the replacement table, using matching-mode resolution for
    /// placeholders that phase 2 never had to settle.
    fn update_record_for_store_elimination(&mut self, record: &mut ValueRecord) {
        loop {
            let Value::Instruction(store) = record.stored_by else {
                break;
            };
            let eliminated = self.store_records.contains_key(&store)
                && !self.kept_stores.contains(store.index());
            if !eliminated {
                break;
            }
            // The store is gone, so the value it displaced flows through.
            *record = self.store_records[&store].old;
        }

        record.value = self.replacement_or_value(record.value);
        if let Value::Placeholder { ph, .. } = record.value {
            self.find_old_value_for_placeholder(ph);
            record.value = self.replacement_or_value(record.value);
        }
        if let Value::Instruction(id) = record.value {
            record.value = Value::Instruction(self.find_substitute(id));
        }
    }
}
