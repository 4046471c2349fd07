//! The alias model: heap locations, reference classification, may-alias.
//!
//! The model assigns every field, array-element and vector access in a
//! graph a *heap location* index, classifies each accessed reference
//! (singleton allocation vs. possibly published), and answers may-alias
//! queries between locations. Load-store elimination is written entirely
//! against this surface.
//!
//! # Singletons
//!
//! A reference is a *singleton* if it is an allocation in the analyzed
//! graph and no use can publish it: it is never passed to a call, stored
//! into the heap, returned, thrown, or merged through a phi. A singleton
//! has no aliases, so writes through it are invisible to callees and to
//! other references; a singleton that is also non-finalizable is
//! *removable* - if nothing observes it, the allocation itself can go.
//!
//! # Vector accesses
//!
//! Vector (SIMD) accesses use a deliberately coarse approximation: any
//! possible index overlap between a vector access and another access to a
//! may-aliasing array is treated as a full alias. There is no
//! partial-overlap reasoning; refining this requires a correctness argument
//! the runtime has not needed.

use std::collections::HashMap;

use crate::ir::{DataType, FieldRef, InstrId, InstrKind, Instruction, InstructionGraph};

/// Classification of one reference appearing as an access receiver.
#[derive(Debug, Clone)]
pub struct ReferenceInfo {
    reference: InstrId,
    is_allocation: bool,
    is_singleton: bool,
    is_removable: bool,
    is_finalizable: bool,
}

impl ReferenceInfo {
    /// The instruction producing the reference.
    #[must_use]
    pub const fn reference(&self) -> InstrId {
        self.reference
    }

    /// Returns `true` if the reference is a provably unaliased allocation.
    #[must_use]
    pub const fn is_singleton(&self) -> bool {
        self.is_singleton
    }

    /// Returns `true` if the allocation may be deleted when nothing
    /// observes it (singleton and not finalizable).
    #[must_use]
    pub const fn is_removable(&self) -> bool {
        self.is_removable
    }

    /// Returns `true` if the allocated class has a finalizer.
    #[must_use]
    pub const fn is_finalizable(&self) -> bool {
        self.is_finalizable
    }
}

/// What a heap location refers to within its owning reference.
#[derive(Debug, Clone)]
pub enum LocationKind {
    /// An instance or static field (including the type-pointer slot).
    Field(FieldRef),
    /// An array element at the given index expression.
    ArrayElement {
        /// The index instruction.
        index: InstrId,
        /// The index value, when it is a compile-time constant.
        const_index: Option<i64>,
    },
    /// A vector access covering `lanes` consecutive elements.
    Vector {
        /// The base index instruction.
        index: InstrId,
        /// The base index value, when it is a compile-time constant.
        const_index: Option<i64>,
        /// Number of consecutive elements accessed.
        lanes: u8,
    },
}

/// One distinct readable/writable heap slot.
#[derive(Debug, Clone)]
pub struct HeapLocation {
    reference: usize,
    kind: LocationKind,
    ty: DataType,
}

impl HeapLocation {
    /// Index of the owning [`ReferenceInfo`].
    #[must_use]
    pub const fn reference_index(&self) -> usize {
        self.reference
    }

    /// The slot identity within the owning reference.
    #[must_use]
    pub const fn kind(&self) -> &LocationKind {
        &self.kind
    }

    /// The declared type of the slot (the widest access type seen).
    #[must_use]
    pub const fn data_type(&self) -> DataType {
        self.ty
    }

    /// Returns `true` for vector accesses.
    #[must_use]
    pub const fn is_vector(&self) -> bool {
        matches!(self.kind, LocationKind::Vector { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum LocationKey {
    Field {
        reference: usize,
        owner: u32,
        index: u32,
    },
    Array {
        reference: usize,
        index: InstrId,
    },
    Vector {
        reference: usize,
        index: InstrId,
        lanes: u8,
    },
}

/// The alias oracle for one graph.
///
/// Built once per pass invocation; private to that invocation.
pub struct AliasModel {
    references: Vec<ReferenceInfo>,
    locations: Vec<HeapLocation>,
    reference_lookup: HashMap<InstrId, usize>,
    location_lookup: HashMap<LocationKey, usize>,
}

impl AliasModel {
    /// Collects every heap location and reference classification in
    /// `graph`.
    #[must_use]
    pub fn build(graph: &InstructionGraph) -> Self {
        let mut model = Self {
            references: Vec::new(),
            locations: Vec::new(),
            reference_lookup: HashMap::new(),
            location_lookup: HashMap::new(),
        };

        for block in graph.blocks() {
            for &id in block.instructions() {
                let instr = graph.instruction(id);
                match instr.kind() {
                    InstrKind::NewInstance { .. } | InstrKind::NewArray => {
                        model.ensure_reference(graph, id);
                    }
                    InstrKind::MonitorEnter | InstrKind::MonitorExit => {
                        model.ensure_reference(graph, instr.operands()[0]);
                    }
                    kind if kind.is_heap_load() || kind.is_heap_store() => {
                        model.collect_access(graph, instr);
                    }
                    _ => {}
                }
            }
        }
        model
    }

    fn ensure_reference(&mut self, graph: &InstructionGraph, reference: InstrId) -> usize {
        if let Some(&index) = self.reference_lookup.get(&reference) {
            return index;
        }
        let instr = graph.instruction(reference);
        let (is_allocation, is_finalizable) = match instr.kind() {
            InstrKind::NewInstance { finalizable } => (true, *finalizable),
            InstrKind::NewArray => (true, false),
            _ => (false, false),
        };
        let is_singleton = is_allocation && !escapes(graph, instr);
        let index = self.references.len();
        self.references.push(ReferenceInfo {
            reference,
            is_allocation,
            is_singleton,
            is_removable: is_singleton && !is_finalizable,
            is_finalizable,
        });
        self.reference_lookup.insert(reference, index);
        index
    }

    fn collect_access(&mut self, graph: &InstructionGraph, instr: &Instruction) {
        let reference = self.ensure_reference(graph, instr.operands()[0]);
        let access_ty = access_type(graph, instr);
        let (key, kind) = match *instr.kind() {
            InstrKind::FieldGet { field } | InstrKind::FieldSet { field } => (
                LocationKey::Field {
                    reference,
                    owner: field.owner,
                    index: field.index,
                },
                LocationKind::Field(field),
            ),
            InstrKind::ArrayGet | InstrKind::ArraySet => {
                let index = instr.operands()[1];
                (
                    LocationKey::Array { reference, index },
                    LocationKind::ArrayElement {
                        index,
                        const_index: constant_value(graph, index),
                    },
                )
            }
            InstrKind::VecLoad { lanes } | InstrKind::VecStore { lanes } => {
                let index = instr.operands()[1];
                (
                    LocationKey::Vector {
                        reference,
                        index,
                        lanes,
                    },
                    LocationKind::Vector {
                        index,
                        const_index: constant_value(graph, index),
                        lanes,
                    },
                )
            }
            _ => unreachable!("collect_access is only called for heap accesses"),
        };

        match self.location_lookup.get(&key) {
            Some(&existing) => {
                // Widen the declared type if a wider access shows up.
                if access_ty.bit_size() > self.locations[existing].ty.bit_size() {
                    self.locations[existing].ty = access_ty;
                }
            }
            None => {
                let index = self.locations.len();
                self.locations.push(HeapLocation {
                    reference,
                    kind,
                    ty: access_ty,
                });
                self.location_lookup.insert(key, index);
            }
        }
    }

    /// Returns the number of distinct heap locations.
    #[must_use]
    pub fn location_count(&self) -> usize {
        self.locations.len()
    }

    /// Returns a location descriptor.
    #[must_use]
    pub fn location(&self, index: usize) -> &HeapLocation {
        &self.locations[index]
    }

    /// Returns the number of classified references.
    #[must_use]
    pub fn reference_count(&self) -> usize {
        self.references.len()
    }

    /// Returns a reference classification by index.
    #[must_use]
    pub fn reference(&self, index: usize) -> &ReferenceInfo {
        &self.references[index]
    }

    /// Returns the classification of a reference instruction, if it was
    /// seen as an access receiver or allocation.
    #[must_use]
    pub fn reference_info(&self, reference: InstrId) -> Option<&ReferenceInfo> {
        self.reference_lookup
            .get(&reference)
            .map(|&index| &self.references[index])
    }

    /// Looks up the location of `field` on `object`.
    #[must_use]
    pub fn field_location(&self, object: InstrId, field: &FieldRef) -> Option<usize> {
        let reference = *self.reference_lookup.get(&object)?;
        self.location_lookup
            .get(&LocationKey::Field {
                reference,
                owner: field.owner,
                index: field.index,
            })
            .copied()
    }

    /// Looks up the location of the array element `array[index]`.
    #[must_use]
    pub fn array_location(&self, array: InstrId, index: InstrId) -> Option<usize> {
        let reference = *self.reference_lookup.get(&array)?;
        self.location_lookup
            .get(&LocationKey::Array { reference, index })
            .copied()
    }

    /// Returns the location accessed by a heap load or store instruction.
    #[must_use]
    pub fn location_for_access(&self, instr: &Instruction) -> Option<usize> {
        let reference = *self.reference_lookup.get(&instr.operands()[0])?;
        let key = match *instr.kind() {
            InstrKind::FieldGet { field } | InstrKind::FieldSet { field } => LocationKey::Field {
                reference,
                owner: field.owner,
                index: field.index,
            },
            InstrKind::ArrayGet | InstrKind::ArraySet => LocationKey::Array {
                reference,
                index: instr.operands()[1],
            },
            InstrKind::VecLoad { lanes } | InstrKind::VecStore { lanes } => LocationKey::Vector {
                reference,
                index: instr.operands()[1],
                lanes,
            },
            _ => return None,
        };
        self.location_lookup.get(&key).copied()
    }

    /// Returns `true` if the two locations may refer to overlapping memory.
    #[must_use]
    pub fn may_alias(&self, a: usize, b: usize) -> bool {
        if a == b {
            return true;
        }
        let loc_a = &self.locations[a];
        let loc_b = &self.locations[b];
        match (&loc_a.kind, &loc_b.kind) {
            (LocationKind::Field(fa), LocationKind::Field(fb)) => {
                fa.owner == fb.owner
                    && fa.index == fb.index
                    && self.references_may_alias(loc_a.reference, loc_b.reference)
            }
            // Fields and array elements are disjoint address spaces.
            (LocationKind::Field(_), _) | (_, LocationKind::Field(_)) => false,
            (
                LocationKind::ArrayElement {
                    const_index: ia, ..
                },
                LocationKind::ArrayElement {
                    const_index: ib, ..
                },
            ) => {
                self.references_may_alias(loc_a.reference, loc_b.reference)
                    && ranges_may_overlap(*ia, 1, *ib, 1)
            }
            (
                LocationKind::ArrayElement {
                    const_index: ia, ..
                },
                LocationKind::Vector {
                    const_index: ib,
                    lanes,
                    ..
                },
            )
            | (
                LocationKind::Vector {
                    const_index: ib,
                    lanes,
                    ..
                },
                LocationKind::ArrayElement {
                    const_index: ia, ..
                },
            ) => {
                self.references_may_alias(loc_a.reference, loc_b.reference)
                    && ranges_may_overlap(*ia, 1, *ib, i64::from(*lanes))
            }
            (
                LocationKind::Vector {
                    const_index: ia,
                    lanes: la,
                    ..
                },
                LocationKind::Vector {
                    const_index: ib,
                    lanes: lb,
                    ..
                },
            ) => {
                self.references_may_alias(loc_a.reference, loc_b.reference)
                    && ranges_may_overlap(*ia, i64::from(*la), *ib, i64::from(*lb))
            }
        }
    }

    fn references_may_alias(&self, a: usize, b: usize) -> bool {
        if a == b {
            return true;
        }
        let info_a = &self.references[a];
        let info_b = &self.references[b];
        // A singleton has no aliases at all.
        if info_a.is_singleton || info_b.is_singleton {
            return false;
        }
        // Two distinct allocations are distinct objects even when escaped.
        !(info_a.is_allocation && info_b.is_allocation)
    }
}

/// Overlap test for constant element ranges; unknown indices always
/// overlap (the coarse vector rule).
fn ranges_may_overlap(a: Option<i64>, a_len: i64, b: Option<i64>, b_len: i64) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a < b + b_len && b < a + a_len,
        _ => true,
    }
}

fn constant_value(graph: &InstructionGraph, id: InstrId) -> Option<i64> {
    match graph.instruction(id).kind() {
        InstrKind::Constant { bits } => Some(*bits),
        _ => None,
    }
}

fn access_type(graph: &InstructionGraph, instr: &Instruction) -> DataType {
    if let InstrKind::FieldGet { field } | InstrKind::FieldSet { field } = instr.kind() {
        return field.ty;
    }
    if let Some(value) = instr.stored_value() {
        return graph.instruction(value).data_type();
    }
    instr.data_type()
}

/// Returns `true` if any use of `instr` can publish the reference.
fn escapes(graph: &InstructionGraph, instr: &Instruction) -> bool {
    let id = instr.id();
    instr.uses().iter().any(|&user_id| {
        let user = graph.instruction(user_id);
        match user.kind() {
            // As an access receiver or lock target the reference stays
            // private.
            InstrKind::FieldGet { .. }
            | InstrKind::ArrayGet
            | InstrKind::VecLoad { .. }
            | InstrKind::MonitorEnter
            | InstrKind::MonitorExit
            | InstrKind::ConstructionFence => false,
            // Being the stored value publishes it; being the receiver does
            // not.
            InstrKind::FieldSet { .. } | InstrKind::ArraySet | InstrKind::VecStore { .. } => {
                user.stored_value() == Some(id)
            }
            // Calls, returns, throws, phis and anything else may publish.
            _ => true,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{DataType, FieldRef, GraphBuilder, SideEffects};

    #[test]
    fn test_singleton_classification() {
        let mut b = GraphBuilder::new();
        let cls = b.type_const(10);
        let obj = b.new_instance(cls);
        let field = FieldRef::new(10, 0, DataType::Int32);
        let one = b.const_i32(1);
        b.field_set(obj, field, one);
        b.ret_void();
        let graph = b.finish();

        let model = AliasModel::build(&graph);
        let info = model.reference_info(obj).expect("obj was collected");
        assert!(info.is_singleton());
        assert!(info.is_removable());
        assert!(!info.is_finalizable());
    }

    #[test]
    fn test_escape_through_invoke() {
        let mut b = GraphBuilder::new();
        let cls = b.type_const(10);
        let obj = b.new_instance(cls);
        b.invoke(&[obj], SideEffects::all_effects(), DataType::Void);
        b.ret_void();
        let graph = b.finish();

        let model = AliasModel::build(&graph);
        assert!(!model.reference_info(obj).expect("collected").is_singleton());
    }

    #[test]
    fn test_escape_through_store() {
        let mut b = GraphBuilder::new();
        let target = b.parameter(0, DataType::Reference);
        let cls = b.type_const(10);
        let obj = b.new_instance(cls);
        let field = FieldRef::new(10, 0, DataType::Reference);
        // Storing obj as a *value* publishes it.
        b.field_set(target, field, obj);
        b.ret_void();
        let graph = b.finish();

        let model = AliasModel::build(&graph);
        assert!(!model.reference_info(obj).expect("collected").is_singleton());
    }

    #[test]
    fn test_finalizable_not_removable() {
        let mut b = GraphBuilder::new();
        let cls = b.type_const(10);
        let obj = b.new_finalizable_instance(cls);
        let field = FieldRef::new(10, 0, DataType::Int32);
        let one = b.const_i32(1);
        b.field_set(obj, field, one);
        b.ret_void();
        let graph = b.finish();

        let model = AliasModel::build(&graph);
        let info = model.reference_info(obj).expect("collected");
        assert!(info.is_singleton());
        assert!(!info.is_removable());
    }

    #[test]
    fn test_distinct_fields_do_not_alias() {
        let mut b = GraphBuilder::new();
        let obj = b.parameter(0, DataType::Reference);
        let f0 = FieldRef::new(1, 0, DataType::Int32);
        let f1 = FieldRef::new(1, 1, DataType::Int32);
        let l0 = b.field_get(obj, f0);
        let _l1 = b.field_get(obj, f1);
        b.ret_val(l0);
        let graph = b.finish();

        let model = AliasModel::build(&graph);
        assert_eq!(model.location_count(), 2);
        assert!(!model.may_alias(0, 1));
        assert!(model.may_alias(0, 0));
    }

    #[test]
    fn test_same_field_two_objects_may_alias() {
        let mut b = GraphBuilder::new();
        let p0 = b.parameter(0, DataType::Reference);
        let p1 = b.parameter(1, DataType::Reference);
        let f = FieldRef::new(1, 0, DataType::Int32);
        let _ = b.field_get(p0, f);
        let _ = b.field_get(p1, f);
        b.ret_void();
        let graph = b.finish();

        let model = AliasModel::build(&graph);
        assert_eq!(model.location_count(), 2);
        assert!(model.may_alias(0, 1), "two unknown receivers may be equal");
    }

    #[test]
    fn test_singleton_field_never_aliases_parameter_field() {
        let mut b = GraphBuilder::new();
        let p = b.parameter(0, DataType::Reference);
        let cls = b.type_const(10);
        let obj = b.new_instance(cls);
        let f = FieldRef::new(1, 0, DataType::Int32);
        let _ = b.field_get(p, f);
        let _ = b.field_get(obj, f);
        b.ret_void();
        let graph = b.finish();

        let model = AliasModel::build(&graph);
        assert_eq!(model.location_count(), 2);
        assert!(!model.may_alias(0, 1));
    }

    #[test]
    fn test_constant_array_indices() {
        let mut b = GraphBuilder::new();
        let arr = b.parameter(0, DataType::Reference);
        let i0 = b.const_i32(0);
        let i1 = b.const_i32(1);
        let _ = b.array_get(arr, i0, DataType::Int32);
        let _ = b.array_get(arr, i1, DataType::Int32);
        b.ret_void();
        let graph = b.finish();

        let model = AliasModel::build(&graph);
        assert_eq!(model.location_count(), 2);
        assert!(!model.may_alias(0, 1), "a[0] and a[1] are disjoint");
    }

    #[test]
    fn test_unknown_index_aliases() {
        let mut b = GraphBuilder::new();
        let arr = b.parameter(0, DataType::Reference);
        let i = b.parameter(1, DataType::Int32);
        let i0 = b.const_i32(0);
        let _ = b.array_get(arr, i, DataType::Int32);
        let _ = b.array_get(arr, i0, DataType::Int32);
        b.ret_void();
        let graph = b.finish();

        let model = AliasModel::build(&graph);
        assert!(model.may_alias(0, 1));
    }

    #[test]
    fn test_vector_overlap_is_coarse() {
        let mut b = GraphBuilder::new();
        let arr = b.parameter(0, DataType::Reference);
        let i0 = b.const_i32(0);
        let i2 = b.const_i32(2);
        let i4 = b.const_i32(4);
        let _ = b.vec_load(arr, i0, 4, DataType::Int32);
        let _ = b.array_get(arr, i2, DataType::Int32);
        let _ = b.array_get(arr, i4, DataType::Int32);
        b.ret_void();
        let graph = b.finish();

        let model = AliasModel::build(&graph);
        // vec[0..4) overlaps a[2] but not a[4].
        assert!(model.may_alias(0, 1));
        assert!(!model.may_alias(0, 2));
    }

    #[test]
    fn test_field_vs_array_never_alias() {
        let mut b = GraphBuilder::new();
        let r = b.parameter(0, DataType::Reference);
        let f = FieldRef::new(1, 0, DataType::Int32);
        let i0 = b.const_i32(0);
        let _ = b.field_get(r, f);
        let _ = b.array_get(r, i0, DataType::Int32);
        b.ret_void();
        let graph = b.finish();

        let model = AliasModel::build(&graph);
        assert!(!model.may_alias(0, 1));
    }

    #[test]
    fn test_location_lookups() {
        let mut b = GraphBuilder::new();
        let obj = b.parameter(0, DataType::Reference);
        let arr = b.parameter(1, DataType::Reference);
        let f = FieldRef::new(1, 0, DataType::Int32);
        let i0 = b.const_i32(0);
        let load = b.field_get(obj, f);
        let _ = b.array_get(arr, i0, DataType::Int32);
        b.ret_val(load);
        let graph = b.finish();

        let model = AliasModel::build(&graph);
        let field_loc = model.field_location(obj, &f).expect("field collected");
        let array_loc = model.array_location(arr, i0).expect("array collected");
        assert_ne!(field_loc, array_loc);
        assert_eq!(
            model.location_for_access(graph.instruction(load)),
            Some(field_loc)
        );
    }
}
