//! Convenience builder for constructing instruction graphs.
//!
//! Used by tests and benchmarks; front ends drive [`InstructionGraph`]
//! directly.

use crate::ir::{
    BinaryOp, BlockId, DataType, FieldRef, InstrId, InstrKind, InstructionGraph, SideEffects,
};

/// Builds an [`InstructionGraph`] block by block.
///
/// The builder starts with an entry block selected; instructions are
/// appended to the current block until [`GraphBuilder::switch_to`] moves
/// elsewhere. [`GraphBuilder::finish`] runs the structural analyses and
/// returns the graph.
pub struct GraphBuilder {
    graph: InstructionGraph,
    current: BlockId,
}

impl GraphBuilder {
    /// Creates a builder with an empty entry block.
    #[must_use]
    pub fn new() -> Self {
        let mut graph = InstructionGraph::new();
        let current = graph.add_block();
        Self { graph, current }
    }

    /// Adds a new block (no edges yet).
    pub fn add_block(&mut self) -> BlockId {
        self.graph.add_block()
    }

    /// Makes `block` the insertion point.
    pub fn switch_to(&mut self, block: BlockId) {
        self.current = block;
    }

    /// Returns the current insertion block.
    #[must_use]
    pub const fn current(&self) -> BlockId {
        self.current
    }

    /// Adds a CFG edge.
    pub fn edge(&mut self, from: BlockId, to: BlockId) {
        self.graph.add_edge(from, to);
    }

    /// Marks a block as inside a try region.
    pub fn mark_try(&mut self, block: BlockId) {
        self.graph.set_in_try(block);
    }

    /// Marks a block as a catch handler entry.
    pub fn mark_catch_handler(&mut self, block: BlockId) {
        self.graph.set_catch_handler(block);
    }

    fn push(&mut self, kind: InstrKind, ty: DataType, operands: Vec<InstrId>) -> InstrId {
        self.graph.add_instruction(self.current, kind, ty, operands)
    }

    /// A method parameter.
    pub fn parameter(&mut self, index: u16, ty: DataType) -> InstrId {
        self.push(InstrKind::Parameter { index }, ty, vec![])
    }

    /// An interned 32-bit integer constant.
    pub fn const_i32(&mut self, value: i32) -> InstrId {
        self.graph.constant(DataType::Int32, i64::from(value))
    }

    /// An interned constant of arbitrary type and bit pattern.
    pub fn const_of(&mut self, ty: DataType, bits: i64) -> InstrId {
        self.graph.constant(ty, bits)
    }

    /// A resolved class handle.
    pub fn type_const(&mut self, class: u32) -> InstrId {
        self.push(InstrKind::TypeConst { class }, DataType::Reference, vec![])
    }

    /// 32-bit addition.
    pub fn add(&mut self, left: InstrId, right: InstrId) -> InstrId {
        self.binary(BinaryOp::Add, left, right, DataType::Int32)
    }

    /// Binary arithmetic of an arbitrary type.
    pub fn binary(&mut self, op: BinaryOp, left: InstrId, right: InstrId, ty: DataType) -> InstrId {
        self.push(InstrKind::Binary { op }, ty, vec![left, right])
    }

    /// Width conversion.
    pub fn convert(&mut self, value: InstrId, ty: DataType) -> InstrId {
        self.push(InstrKind::Convert, ty, vec![value])
    }

    /// Field read at the field's declared type.
    pub fn field_get(&mut self, object: InstrId, field: FieldRef) -> InstrId {
        self.push(InstrKind::FieldGet { field }, field.ty, vec![object])
    }

    /// Field read through a narrower type.
    pub fn field_get_as(&mut self, object: InstrId, field: FieldRef, ty: DataType) -> InstrId {
        self.push(InstrKind::FieldGet { field }, ty, vec![object])
    }

    /// Field write.
    pub fn field_set(&mut self, object: InstrId, field: FieldRef, value: InstrId) -> InstrId {
        self.push(InstrKind::FieldSet { field }, DataType::Void, vec![object, value])
    }

    /// Read of the object header's type-pointer slot.
    pub fn type_pointer_get(&mut self, object: InstrId) -> InstrId {
        self.field_get(object, FieldRef::type_pointer())
    }

    /// Array element read.
    pub fn array_get(&mut self, array: InstrId, index: InstrId, ty: DataType) -> InstrId {
        self.push(InstrKind::ArrayGet, ty, vec![array, index])
    }

    /// Array element write.
    pub fn array_set(&mut self, array: InstrId, index: InstrId, value: InstrId) -> InstrId {
        self.push(InstrKind::ArraySet, DataType::Void, vec![array, index, value])
    }

    /// SIMD vector read.
    pub fn vec_load(&mut self, array: InstrId, index: InstrId, lanes: u8, ty: DataType) -> InstrId {
        self.push(InstrKind::VecLoad { lanes }, ty, vec![array, index])
    }

    /// SIMD vector write.
    pub fn vec_store(
        &mut self,
        array: InstrId,
        index: InstrId,
        value: InstrId,
        lanes: u8,
    ) -> InstrId {
        self.push(
            InstrKind::VecStore { lanes },
            DataType::Void,
            vec![array, index, value],
        )
    }

    /// Object allocation of the class named by `type_const`.
    pub fn new_instance(&mut self, type_const: InstrId) -> InstrId {
        self.push(
            InstrKind::NewInstance { finalizable: false },
            DataType::Reference,
            vec![type_const],
        )
    }

    /// Object allocation of a finalizable class.
    pub fn new_finalizable_instance(&mut self, type_const: InstrId) -> InstrId {
        self.push(
            InstrKind::NewInstance { finalizable: true },
            DataType::Reference,
            vec![type_const],
        )
    }

    /// Array allocation.
    pub fn new_array(&mut self, type_const: InstrId, length: InstrId) -> InstrId {
        self.push(
            InstrKind::NewArray,
            DataType::Reference,
            vec![type_const, length],
        )
    }

    /// Construction fence publishing a fresh allocation.
    pub fn fence(&mut self, allocation: InstrId) -> InstrId {
        self.push(InstrKind::ConstructionFence, DataType::Void, vec![allocation])
    }

    /// Call returning a value of `ty`.
    pub fn invoke(&mut self, args: &[InstrId], effects: SideEffects, ty: DataType) -> InstrId {
        self.push(InstrKind::Invoke { effects }, ty, args.to_vec())
    }

    /// Call with statically unknown behavior.
    pub fn invoke_unknown(&mut self, args: &[InstrId]) -> InstrId {
        self.invoke(args, SideEffects::all_effects(), DataType::Void)
    }

    /// Monitor acquisition.
    pub fn monitor_enter(&mut self, object: InstrId) -> InstrId {
        self.push(InstrKind::MonitorEnter, DataType::Void, vec![object])
    }

    /// Monitor release.
    pub fn monitor_exit(&mut self, object: InstrId) -> InstrId {
        self.push(InstrKind::MonitorExit, DataType::Void, vec![object])
    }

    /// Void return.
    pub fn ret_void(&mut self) -> InstrId {
        self.push(InstrKind::Return, DataType::Void, vec![])
    }

    /// Value return.
    pub fn ret_val(&mut self, value: InstrId) -> InstrId {
        self.push(InstrKind::Return, DataType::Void, vec![value])
    }

    /// Throw.
    pub fn throw(&mut self, exception: InstrId) -> InstrId {
        self.push(InstrKind::Throw, DataType::Void, vec![exception])
    }

    /// Deoptimization point capturing `environment`.
    pub fn deoptimize(&mut self, environment: &[InstrId]) -> InstrId {
        let id = self.push(InstrKind::Deoptimize, DataType::Void, vec![]);
        self.graph.set_environment(id, environment.to_vec());
        id
    }

    /// Unconditional branch; adds the edge.
    pub fn goto(&mut self, target: BlockId) -> InstrId {
        let id = self.push(InstrKind::Goto, DataType::Void, vec![]);
        self.graph.add_edge(self.current, target);
        id
    }

    /// Conditional branch; adds both edges, true target first.
    pub fn branch(&mut self, condition: InstrId, if_true: BlockId, if_false: BlockId) -> InstrId {
        let id = self.push(InstrKind::If, DataType::Void, vec![condition]);
        self.graph.add_edge(self.current, if_true);
        self.graph.add_edge(self.current, if_false);
        id
    }

    /// Phi in `block`; `inputs` are in predecessor order.
    pub fn phi(&mut self, block: BlockId, ty: DataType, inputs: Vec<InstrId>) -> InstrId {
        let id = self.graph.insert_phi(block, ty);
        self.graph.set_phi_operands(id, inputs);
        id
    }

    /// Runs the structural analyses and returns the finished graph.
    ///
    /// # Panics
    ///
    /// Panics if the constructed graph fails validation.
    #[must_use]
    pub fn finish(mut self) -> InstructionGraph {
        self.graph.analyze();
        if let Err(error) = self.graph.validate() {
            panic!("built an invalid graph: {error}");
        }
        self.graph
    }
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}
