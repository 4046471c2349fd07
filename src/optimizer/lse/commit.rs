//! The commit stage.
//!
//! Applies everything the earlier phases decided: replaces eliminated
//! loads (inserting width conversions where the substitute's type
//! differs), removes stores that were never kept, and removes dead
//! removable allocations together with their construction fences.
//!
//! Nothing here can fail: every decision was finalized earlier, and
//! internal consistency is asserted rather than recovered.

use crate::ir::InstrKind;
use crate::optimizer::lse::analysis::{LseEngine, LseStats};

impl LseEngine<'_, '_> {
    pub(super) fn commit(mut self) -> (bool, LseStats) {
        let mut changed = self.changed;

        // Eliminated loads, in visitation order so substitute chains
        // resolve to already-committed replacements.
        for position in 0..self.loads_and_stores.len() {
            let (id, _) = self.loads_and_stores[position];
            if !self.substitutes.contains_key(&id) {
                continue;
            }
            let substitute = self.find_substitute(id);
            assert!(
                self.graph.instruction(substitute).is_live(),
                "substitute of {id} was deleted"
            );

            let load_ty = self.graph.instruction(id).data_type();
            let substitute_ty = self.graph.instruction(substitute).data_type();
            let replacement = if load_ty.requires_conversion(substitute_ty) {
                self.graph
                    .insert_before(id, InstrKind::Convert, load_ty, vec![substitute])
            } else {
                substitute
            };

            // Later chain lookups must land on the converted value.
            self.substitutes.insert(id, replacement);
            self.graph.replace_all_uses(id, replacement);
            self.graph.remove_instruction(id);
            self.stats.loads_removed += 1;
            changed = true;
        }

        // Stores that no execution can observe.
        for position in 0..self.loads_and_stores.len() {
            let (id, _) = self.loads_and_stores[position];
            if !self.store_records.contains_key(&id) || self.kept_stores.contains(id.index()) {
                continue;
            }
            debug_assert!(self.graph.instruction(id).is_live());
            self.graph.remove_instruction(id);
            self.stats.stores_removed += 1;
            changed = true;
        }

        // Removable singleton allocations nothing uses anymore - their
        // loads were replaced and their stores deleted above, so only
        // construction fences (and environments) can remain.
        for index in 0..self.alias.reference_count() {
            let info = self.alias.reference(index);
            if !info.is_removable() {
                continue;
            }
            let id = info.reference();
            if !self.graph.instruction(id).is_live() {
                continue;
            }
            if !matches!(
                self.graph.instruction(id).kind(),
                InstrKind::NewInstance { .. } | InstrKind::NewArray
            ) {
                continue;
            }
            let mut fences = self.graph.instruction(id).uses().to_vec();
            if !fences.iter().all(|&use_id| {
                matches!(
                    self.graph.instruction(use_id).kind(),
                    InstrKind::ConstructionFence
                )
            }) {
                continue;
            }
            fences.sort_unstable();
            fences.dedup();
            for fence in fences {
                self.graph.remove_instruction(fence);
            }
            self.graph.remove_instruction(id);
            self.stats.allocations_removed += 1;
            changed = true;
        }

        (changed, self.stats)
    }
}
