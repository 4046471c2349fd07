//! Basic blocks.
//!
//! A block owns an ordered list of instruction ids (phis first, at most one
//! terminator last) and records its CFG adjacency as id lists, so removing
//! an instruction or block can never leave a dangling pointer.

use std::fmt;

use crate::ir::InstrId;

/// Stable identifier of a basic block in the graph arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(u32);

impl BlockId {
    /// Creates an id from an arena index.
    #[must_use]
    pub const fn new(index: usize) -> Self {
        Self(index as u32)
    }

    /// Returns the arena index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "B{}", self.0)
    }
}

/// A basic block.
#[derive(Debug, Clone)]
pub struct BasicBlock {
    pub(crate) id: BlockId,
    pub(crate) predecessors: Vec<BlockId>,
    pub(crate) successors: Vec<BlockId>,
    pub(crate) instructions: Vec<InstrId>,
    pub(crate) in_try: bool,
    pub(crate) catch_handler: bool,
    pub(crate) loop_index: Option<usize>,
}

impl BasicBlock {
    pub(crate) fn new(id: BlockId) -> Self {
        Self {
            id,
            predecessors: Vec::new(),
            successors: Vec::new(),
            instructions: Vec::new(),
            in_try: false,
            catch_handler: false,
            loop_index: None,
        }
    }

    /// Returns this block's id.
    #[must_use]
    pub const fn id(&self) -> BlockId {
        self.id
    }

    /// Returns the predecessor blocks, in edge order.
    ///
    /// Phi operands are positionally matched against this list.
    #[must_use]
    pub fn predecessors(&self) -> &[BlockId] {
        &self.predecessors
    }

    /// Returns the successor blocks, in edge order.
    #[must_use]
    pub fn successors(&self) -> &[BlockId] {
        &self.successors
    }

    /// Returns the ordered instruction ids.
    #[must_use]
    pub fn instructions(&self) -> &[InstrId] {
        &self.instructions
    }

    /// Returns `true` if the block is inside a try region.
    ///
    /// Throwing instructions in a try region make prior heap writes
    /// observable to the catch handler.
    #[must_use]
    pub const fn in_try(&self) -> bool {
        self.in_try
    }

    /// Returns `true` if the block is a catch handler entry.
    #[must_use]
    pub const fn is_catch_handler(&self) -> bool {
        self.catch_handler
    }

    /// Returns the index of the innermost loop containing this block, if
    /// any. The index resolves through
    /// [`crate::ir::InstructionGraph::loops`].
    #[must_use]
    pub const fn loop_index(&self) -> Option<usize> {
        self.loop_index
    }
}
