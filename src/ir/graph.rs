//! The instruction graph.
//!
//! [`InstructionGraph`] owns two arenas - basic blocks and instructions -
//! addressed by stable small-integer ids ([`BlockId`], [`InstrId`]).
//! Adjacency and operands are stored as id lists, never references, so
//! removal cannot dangle and dumping the graph is trivial.
//!
//! Mutation goes through a small set of primitives that keep def-use
//! information consistent:
//!
//! - [`InstructionGraph::add_instruction`] / [`InstructionGraph::insert_before`]
//! - [`InstructionGraph::remove_instruction`]
//! - [`InstructionGraph::replace_all_uses`]
//!
//! After the block structure is final, [`InstructionGraph::analyze`]
//! computes reverse post order, the dominator tree and loop information;
//! optimization passes rely on these being current.

use std::collections::HashMap;
use std::fmt;

use crate::ir::loops::{self, LoopInfo};
use crate::ir::{BasicBlock, BlockId, DataType, InstrId, InstrKind, Instruction};
use crate::{Error, Result};

/// Where a new instruction is placed within its block.
enum Position {
    /// After all existing instructions.
    Append,
    /// At the front of the block.
    Front,
    /// Immediately before the given instruction.
    Before(InstrId),
    /// Before the block terminator, or at the end if there is none.
    BeforeTerminator,
}

/// A control-flow graph of typed instructions for one compiled method.
pub struct InstructionGraph {
    blocks: Vec<BasicBlock>,
    instructions: Vec<Instruction>,
    rpo: Vec<BlockId>,
    rpo_index: Vec<usize>,
    idom: Vec<Option<BlockId>>,
    loops: Vec<LoopInfo>,
    constants: HashMap<(DataType, i64), InstrId>,
}

impl InstructionGraph {
    /// Creates an empty graph. The first block added becomes the entry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            blocks: Vec::new(),
            instructions: Vec::new(),
            rpo: Vec::new(),
            rpo_index: Vec::new(),
            idom: Vec::new(),
            loops: Vec::new(),
            constants: HashMap::new(),
        }
    }

    // ------------------------------------------------------------------
    // Structure
    // ------------------------------------------------------------------

    /// Adds a new empty block and returns its id.
    pub fn add_block(&mut self) -> BlockId {
        let id = BlockId::new(self.blocks.len());
        self.blocks.push(BasicBlock::new(id));
        id
    }

    /// Adds a CFG edge. The edge's position in the successor's predecessor
    /// list determines the matching phi operand position.
    pub fn add_edge(&mut self, from: BlockId, to: BlockId) {
        self.blocks[from.index()].successors.push(to);
        self.blocks[to.index()].predecessors.push(from);
    }

    /// Marks a block as belonging to a try region.
    pub fn set_in_try(&mut self, block: BlockId) {
        self.blocks[block.index()].in_try = true;
    }

    /// Marks a block as a catch handler entry.
    pub fn set_catch_handler(&mut self, block: BlockId) {
        self.blocks[block.index()].catch_handler = true;
    }

    /// Returns the entry block.
    ///
    /// # Panics
    ///
    /// Panics if the graph has no blocks.
    #[must_use]
    pub fn entry(&self) -> BlockId {
        assert!(!self.blocks.is_empty(), "graph has no entry block");
        BlockId::new(0)
    }

    /// Returns a block by id.
    #[must_use]
    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.index()]
    }

    /// Returns all blocks in arena order.
    #[must_use]
    pub fn blocks(&self) -> &[BasicBlock] {
        &self.blocks
    }

    /// Returns the number of blocks.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Returns an instruction by id.
    #[must_use]
    pub fn instruction(&self, id: InstrId) -> &Instruction {
        &self.instructions[id.index()]
    }

    /// Returns all instruction slots, including removed ones.
    #[must_use]
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Returns the number of instruction slots ever created.
    #[must_use]
    pub fn instruction_count(&self) -> usize {
        self.instructions.len()
    }

    /// Returns the number of live instructions.
    #[must_use]
    pub fn live_instruction_count(&self) -> usize {
        self.instructions.iter().filter(|i| i.is_live()).count()
    }

    // ------------------------------------------------------------------
    // Instruction creation and mutation
    // ------------------------------------------------------------------

    fn register(
        &mut self,
        block: BlockId,
        kind: InstrKind,
        ty: DataType,
        operands: Vec<InstrId>,
        position: Position,
    ) -> InstrId {
        let id = InstrId::new(self.instructions.len());
        for &operand in &operands {
            debug_assert!(self.instructions[operand.index()].is_live());
            self.instructions[operand.index()].uses.push(id);
        }
        self.instructions.push(Instruction {
            id,
            block: Some(block),
            kind,
            ty,
            operands,
            uses: Vec::new(),
            env_uses: Vec::new(),
            environment: Vec::new(),
        });

        let list = &mut self.blocks[block.index()].instructions;
        match position {
            Position::Append => list.push(id),
            Position::Front => list.insert(0, id),
            Position::Before(anchor) => {
                let at = list
                    .iter()
                    .position(|&i| i == anchor)
                    .expect("anchor not in block");
                list.insert(at, id);
            }
            Position::BeforeTerminator => {
                let at = list
                    .iter()
                    .position(|&i| self.instructions[i.index()].kind.is_terminator())
                    .unwrap_or(list.len());
                list.insert(at, id);
            }
        }
        id
    }

    /// Appends an instruction to a block and returns its id.
    pub fn add_instruction(
        &mut self,
        block: BlockId,
        kind: InstrKind,
        ty: DataType,
        operands: Vec<InstrId>,
    ) -> InstrId {
        self.register(block, kind, ty, operands, Position::Append)
    }

    /// Inserts an instruction immediately before `anchor`, in the same
    /// block.
    pub fn insert_before(
        &mut self,
        anchor: InstrId,
        kind: InstrKind,
        ty: DataType,
        operands: Vec<InstrId>,
    ) -> InstrId {
        let block = self.instructions[anchor.index()]
            .block
            .expect("anchor was removed");
        self.register(block, kind, ty, operands, Position::Before(anchor))
    }

    /// Inserts an instruction before the block's terminator (or at the end
    /// if the block has none yet).
    pub fn insert_before_terminator(
        &mut self,
        block: BlockId,
        kind: InstrKind,
        ty: DataType,
        operands: Vec<InstrId>,
    ) -> InstrId {
        self.register(block, kind, ty, operands, Position::BeforeTerminator)
    }

    /// Creates a phi at the front of `block` with no operands yet; callers
    /// fill them in with [`InstructionGraph::set_phi_operands`] once all
    /// sibling phis exist.
    pub fn insert_phi(&mut self, block: BlockId, ty: DataType) -> InstrId {
        self.register(block, InstrKind::Phi, ty, Vec::new(), Position::Front)
    }

    /// Sets a phi's operands, one per predecessor edge of its block.
    pub fn set_phi_operands(&mut self, phi: InstrId, inputs: Vec<InstrId>) {
        debug_assert!(matches!(
            self.instructions[phi.index()].kind,
            InstrKind::Phi
        ));
        debug_assert!(self.instructions[phi.index()].operands.is_empty());
        for &input in &inputs {
            debug_assert!(self.instructions[input.index()].is_live());
            self.instructions[input.index()].uses.push(phi);
        }
        self.instructions[phi.index()].operands = inputs;
    }

    /// Returns the phi instructions at the front of a block.
    #[must_use]
    pub fn phis(&self, block: BlockId) -> Vec<InstrId> {
        self.blocks[block.index()]
            .instructions
            .iter()
            .copied()
            .take_while(|&i| matches!(self.instructions[i.index()].kind, InstrKind::Phi))
            .collect()
    }

    /// Records the values captured by an instruction's environment
    /// (interpreter state for deoptimization).
    pub fn set_environment(&mut self, instr: InstrId, values: Vec<InstrId>) {
        for &value in &values {
            debug_assert!(self.instructions[value.index()].is_live());
            self.instructions[value.index()].env_uses.push(instr);
        }
        self.instructions[instr.index()].environment = values;
    }

    /// Removes an instruction from the graph.
    ///
    /// The instruction must have no remaining data uses. Environment uses
    /// are dropped from the capturing instructions.
    pub fn remove_instruction(&mut self, id: InstrId) {
        let block = self.instructions[id.index()]
            .block
            .expect("instruction already removed");
        assert!(
            self.instructions[id.index()].uses.is_empty(),
            "removing {id} which still has uses"
        );

        // Detach from operands' use lists.
        let operands = std::mem::take(&mut self.instructions[id.index()].operands);
        for operand in operands {
            self.instructions[operand.index()].uses.retain(|&u| u != id);
        }
        let environment = std::mem::take(&mut self.instructions[id.index()].environment);
        for value in environment {
            self.instructions[value.index()]
                .env_uses
                .retain(|&u| u != id);
        }

        // Drop this value from any environment that captured it.
        let env_uses = std::mem::take(&mut self.instructions[id.index()].env_uses);
        for user in env_uses {
            self.instructions[user.index()]
                .environment
                .retain(|&v| v != id);
        }

        let list = &mut self.blocks[block.index()].instructions;
        list.retain(|&i| i != id);
        self.instructions[id.index()].block = None;
    }

    /// Replaces every data and environment use of `old` with `new`,
    /// keeping use lists consistent.
    pub fn replace_all_uses(&mut self, old: InstrId, new: InstrId) {
        debug_assert!(self.instructions[new.index()].is_live());
        let users = std::mem::take(&mut self.instructions[old.index()].uses);
        for user in &users {
            for operand in &mut self.instructions[user.index()].operands {
                if *operand == old {
                    *operand = new;
                }
            }
        }
        self.instructions[new.index()].uses.extend(users);

        let env_users = std::mem::take(&mut self.instructions[old.index()].env_uses);
        for user in &env_users {
            for value in &mut self.instructions[user.index()].environment {
                if *value == old {
                    *value = new;
                }
            }
        }
        self.instructions[new.index()].env_uses.extend(env_users);
    }

    // ------------------------------------------------------------------
    // Constants
    // ------------------------------------------------------------------

    /// Returns the cached constant with the given type and bit pattern,
    /// materializing it at the front of the entry block on first use.
    pub fn constant(&mut self, ty: DataType, bits: i64) -> InstrId {
        if let Some(&id) = self.constants.get(&(ty, bits)) {
            debug_assert!(self.instructions[id.index()].is_live());
            return id;
        }
        let entry = self.entry();
        let id = self.register(
            entry,
            InstrKind::Constant { bits },
            ty,
            Vec::new(),
            Position::Front,
        );
        self.constants.insert((ty, bits), id);
        id
    }

    /// Returns the type's default value: the cached zero constant.
    pub fn zero(&mut self, ty: DataType) -> InstrId {
        self.constant(ty, 0)
    }

    /// Returns the cached constant without materializing it.
    #[must_use]
    pub fn find_constant(&self, ty: DataType, bits: i64) -> Option<InstrId> {
        self.constants.get(&(ty, bits)).copied()
    }

    // ------------------------------------------------------------------
    // Analysis: reverse post order, dominators, loops
    // ------------------------------------------------------------------

    /// Computes reverse post order, the dominator tree and loop
    /// information. Must be called after the block structure is final and
    /// before running any pass.
    pub fn analyze(&mut self) {
        self.compute_rpo();
        self.compute_dominators();
        let (loops, membership) = loops::detect(self);
        self.loops = loops;
        for (index, loop_index) in membership.into_iter().enumerate() {
            self.blocks[index].loop_index = loop_index;
        }
    }

    fn compute_rpo(&mut self) {
        let entry = self.entry();
        let mut visited = vec![false; self.blocks.len()];
        let mut postorder = Vec::with_capacity(self.blocks.len());
        let mut stack: Vec<(BlockId, usize)> = vec![(entry, 0)];
        visited[entry.index()] = true;

        while let Some((block, next)) = stack.last().copied() {
            let successors = &self.blocks[block.index()].successors;
            if next < successors.len() {
                stack.last_mut().expect("stack is non-empty").1 += 1;
                let succ = successors[next];
                if !visited[succ.index()] {
                    visited[succ.index()] = true;
                    stack.push((succ, 0));
                }
            } else {
                postorder.push(block);
                stack.pop();
            }
        }

        postorder.reverse();
        self.rpo = postorder;
        self.rpo_index = vec![usize::MAX; self.blocks.len()];
        for (position, &block) in self.rpo.iter().enumerate() {
            self.rpo_index[block.index()] = position;
        }
    }

    /// Iterative dominator computation over reverse post order
    /// (Cooper/Harvey/Kennedy).
    fn compute_dominators(&mut self) {
        let entry = self.entry();
        self.idom = vec![None; self.blocks.len()];
        self.idom[entry.index()] = Some(entry);

        let mut changed = true;
        while changed {
            changed = false;
            for &block in &self.rpo {
                if block == entry {
                    continue;
                }
                let mut new_idom: Option<BlockId> = None;
                for &pred in &self.blocks[block.index()].predecessors {
                    if self.idom[pred.index()].is_none() {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => pred,
                        Some(current) => self.intersect(pred, current),
                    });
                }
                if self.idom[block.index()] != new_idom {
                    self.idom[block.index()] = new_idom;
                    changed = true;
                }
            }
        }
    }

    fn intersect(&self, mut a: BlockId, mut b: BlockId) -> BlockId {
        while a != b {
            while self.rpo_index[a.index()] > self.rpo_index[b.index()] {
                a = self.idom[a.index()].expect("processed block without idom");
            }
            while self.rpo_index[b.index()] > self.rpo_index[a.index()] {
                b = self.idom[b.index()].expect("processed block without idom");
            }
        }
        a
    }

    /// Returns the blocks in reverse post order. Only valid after
    /// [`InstructionGraph::analyze`].
    #[must_use]
    pub fn rpo(&self) -> &[BlockId] {
        &self.rpo
    }

    /// Returns a block's position in reverse post order, or `None` for
    /// unreachable blocks.
    #[must_use]
    pub fn rpo_position(&self, block: BlockId) -> Option<usize> {
        match self.rpo_index.get(block.index()) {
            Some(&position) if position != usize::MAX => Some(position),
            _ => None,
        }
    }

    /// Returns the immediate dominator of a block. The entry block is its
    /// own immediate dominator.
    #[must_use]
    pub fn immediate_dominator(&self, block: BlockId) -> Option<BlockId> {
        self.idom.get(block.index()).copied().flatten()
    }

    /// Returns `true` if `a` dominates `b` (reflexively).
    #[must_use]
    pub fn block_dominates(&self, a: BlockId, b: BlockId) -> bool {
        let entry = self.entry();
        let mut current = b;
        loop {
            if current == a {
                return true;
            }
            if current == entry {
                return false;
            }
            match self.idom[current.index()] {
                Some(next) => current = next,
                None => return false,
            }
        }
    }

    /// Returns `true` if instruction `a`'s value is available at `b`:
    /// either `a` appears before `b` in the same block, or `a`'s block
    /// strictly dominates `b`'s block.
    #[must_use]
    pub fn dominates(&self, a: InstrId, b: InstrId) -> bool {
        let block_a = self.instructions[a.index()].block.expect("a was removed");
        let block_b = self.instructions[b.index()].block.expect("b was removed");
        if block_a == block_b {
            let list = &self.blocks[block_a.index()].instructions;
            let pos_a = list.iter().position(|&i| i == a);
            let pos_b = list.iter().position(|&i| i == b);
            return pos_a < pos_b;
        }
        self.block_dominates(block_a, block_b)
    }

    /// Returns the recognized loops. Only valid after
    /// [`InstructionGraph::analyze`].
    #[must_use]
    pub fn loops(&self) -> &[LoopInfo] {
        &self.loops
    }

    /// Returns the innermost loop containing `block`, if any.
    #[must_use]
    pub fn loop_containing(&self, block: BlockId) -> Option<&LoopInfo> {
        self.blocks[block.index()].loop_index.map(|i| &self.loops[i])
    }

    /// Returns `true` if `block` is a loop header.
    #[must_use]
    pub fn is_loop_header(&self, block: BlockId) -> bool {
        self.loop_containing(block)
            .is_some_and(|info| info.header == block)
    }

    // ------------------------------------------------------------------
    // Validation
    // ------------------------------------------------------------------

    /// Checks structural invariants: mirrored edges, live in-range
    /// operands, phi arity, and instruction ordering (phis first, at most
    /// one terminator, last).
    pub fn validate(&self) -> Result<()> {
        if self.blocks.is_empty() {
            return Err(Error::EmptyGraph);
        }
        for block in &self.blocks {
            for &succ in &block.successors {
                let mirrored = self
                    .blocks
                    .get(succ.index())
                    .is_some_and(|s| s.predecessors.contains(&block.id));
                if !mirrored {
                    return Err(Error::InconsistentEdge {
                        block: block.id,
                        target: succ,
                    });
                }
            }

            let mut seen_non_phi = false;
            for (position, &id) in block.instructions.iter().enumerate() {
                let instr = &self.instructions[id.index()];
                match instr.kind {
                    InstrKind::Phi => {
                        if seen_non_phi {
                            return Err(Error::MisplacedInstruction {
                                block: block.id,
                                instr: id,
                            });
                        }
                        if instr.operands.len() != block.predecessors.len() {
                            return Err(Error::PhiArityMismatch {
                                instr: id,
                                operands: instr.operands.len(),
                                predecessors: block.predecessors.len(),
                            });
                        }
                    }
                    _ => seen_non_phi = true,
                }
                if instr.kind.is_terminator() && position + 1 != block.instructions.len() {
                    return Err(Error::MisplacedInstruction {
                        block: block.id,
                        instr: id,
                    });
                }
                for &operand in &instr.operands {
                    let live = self
                        .instructions
                        .get(operand.index())
                        .is_some_and(Instruction::is_live);
                    if !live {
                        return Err(Error::InvalidOperand {
                            instr: id,
                            operand,
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

impl Default for InstructionGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for InstructionGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for block in &self.blocks {
            let preds: Vec<String> = block.predecessors.iter().map(ToString::to_string).collect();
            let succs: Vec<String> = block.successors.iter().map(ToString::to_string).collect();
            writeln!(
                f,
                "{} (preds: [{}], succs: [{}]):",
                block.id,
                preds.join(", "),
                succs.join(", ")
            )?;
            for &id in &block.instructions {
                let instr = &self.instructions[id.index()];
                let operands: Vec<String> = instr.operands.iter().map(ToString::to_string).collect();
                writeln!(
                    f,
                    "  {}: {} {:?}({})",
                    id,
                    instr.ty,
                    instr.kind,
                    operands.join(", ")
                )?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::DataType;

    fn diamond() -> InstructionGraph {
        // B0 -> B1 -> B3
        //   \-> B2 ---^
        let mut graph = InstructionGraph::new();
        let b0 = graph.add_block();
        let b1 = graph.add_block();
        let b2 = graph.add_block();
        let b3 = graph.add_block();
        graph.add_edge(b0, b1);
        graph.add_edge(b0, b2);
        graph.add_edge(b1, b3);
        graph.add_edge(b2, b3);
        graph.analyze();
        graph
    }

    #[test]
    fn test_rpo_visits_preds_first() {
        let graph = diamond();
        let rpo = graph.rpo();
        assert_eq!(rpo.len(), 4);
        assert_eq!(rpo[0], BlockId::new(0));
        assert_eq!(rpo[3], BlockId::new(3));
    }

    #[test]
    fn test_dominators_of_diamond() {
        let graph = diamond();
        let b0 = BlockId::new(0);
        let b3 = BlockId::new(3);
        assert_eq!(graph.immediate_dominator(b3), Some(b0));
        assert!(graph.block_dominates(b0, b3));
        assert!(!graph.block_dominates(BlockId::new(1), b3));
    }

    #[test]
    fn test_instruction_dominance_within_block() {
        let mut graph = InstructionGraph::new();
        let b0 = graph.add_block();
        let c1 = graph.add_instruction(b0, InstrKind::Constant { bits: 1 }, DataType::Int32, vec![]);
        let c2 = graph.add_instruction(b0, InstrKind::Constant { bits: 2 }, DataType::Int32, vec![]);
        graph.analyze();
        assert!(graph.dominates(c1, c2));
        assert!(!graph.dominates(c2, c1));
    }

    #[test]
    fn test_constant_interning() {
        let mut graph = InstructionGraph::new();
        let _entry = graph.add_block();
        let a = graph.constant(DataType::Int32, 7);
        let b = graph.constant(DataType::Int32, 7);
        let c = graph.constant(DataType::Int64, 7);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(graph.find_constant(DataType::Int32, 7), Some(a));
        assert_eq!(graph.find_constant(DataType::Int32, 8), None);
    }

    #[test]
    fn test_replace_all_uses() {
        let mut graph = InstructionGraph::new();
        let b0 = graph.add_block();
        let a = graph.constant(DataType::Int32, 1);
        let b = graph.constant(DataType::Int32, 2);
        let add = graph.add_instruction(
            b0,
            InstrKind::Binary {
                op: crate::ir::BinaryOp::Add,
            },
            DataType::Int32,
            vec![a, a],
        );

        graph.replace_all_uses(a, b);
        assert_eq!(graph.instruction(add).operands(), &[b, b]);
        assert!(graph.instruction(a).uses().is_empty());
        assert_eq!(graph.instruction(b).uses(), &[add, add]);
    }

    #[test]
    fn test_remove_instruction_detaches() {
        let mut graph = InstructionGraph::new();
        let b0 = graph.add_block();
        let a = graph.constant(DataType::Int32, 1);
        let add = graph.add_instruction(
            b0,
            InstrKind::Binary {
                op: crate::ir::BinaryOp::Add,
            },
            DataType::Int32,
            vec![a, a],
        );

        graph.remove_instruction(add);
        assert!(!graph.instruction(add).is_live());
        assert!(graph.instruction(a).uses().is_empty());
        assert_eq!(graph.block(b0).instructions().len(), 1);
    }

    #[test]
    fn test_validate_catches_phi_arity() {
        let mut graph = InstructionGraph::new();
        let b0 = graph.add_block();
        let b1 = graph.add_block();
        graph.add_edge(b0, b1);
        let phi = graph.insert_phi(b1, DataType::Int32);
        // One predecessor, zero operands.
        assert!(matches!(
            graph.validate(),
            Err(Error::PhiArityMismatch { instr, .. }) if instr == phi
        ));
    }

    #[test]
    fn test_validate_ok_on_diamond() {
        let graph = diamond();
        assert!(graph.validate().is_ok());
    }
}
