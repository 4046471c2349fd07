use thiserror::Error;

use crate::ir::{BlockId, InstrId};

/// The generic Error type covering all errors this library can return.
///
/// The optimizer itself has no recoverable failure mode: a pass either
/// transforms the graph or leaves it unchanged, and broken internal
/// invariants are programming errors checked by assertions (see the crate
/// documentation). `Error` therefore covers only the *construction* side:
/// malformed graphs handed to [`crate::ir::InstructionGraph::validate`] or
/// to the pass driver.
#[derive(Error, Debug)]
pub enum Error {
    /// The graph has no basic blocks.
    #[error("Graph is empty - an entry block is required")]
    EmptyGraph,

    /// A block references another block that does not exist, or an edge is
    /// recorded on only one side.
    ///
    /// Predecessor and successor lists must mirror each other exactly;
    /// anything else means the graph was mutated outside the provided
    /// primitives.
    #[error("Block {block} has an inconsistent edge to {target}")]
    InconsistentEdge {
        /// The block whose adjacency list is broken.
        block: BlockId,
        /// The edge target that is missing or dangling.
        target: BlockId,
    },

    /// An instruction operand references a dead or out-of-range instruction.
    #[error("Instruction {instr} has an invalid operand {operand}")]
    InvalidOperand {
        /// The instruction holding the bad operand.
        instr: InstrId,
        /// The operand id that does not resolve to a live instruction.
        operand: InstrId,
    },

    /// A phi does not have exactly one operand per predecessor edge.
    #[error("Phi {instr} has {operands} operands but its block has {predecessors} predecessors")]
    PhiArityMismatch {
        /// The offending phi instruction.
        instr: InstrId,
        /// Number of operands the phi carries.
        operands: usize,
        /// Number of predecessor edges of the phi's block.
        predecessors: usize,
    },

    /// A terminator appears in the middle of a block, or a phi appears after
    /// a non-phi instruction.
    #[error("Block {block} has a misplaced instruction {instr}")]
    MisplacedInstruction {
        /// The block with the ordering violation.
        block: BlockId,
        /// The misplaced instruction.
        instr: InstrId,
    },
}

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
