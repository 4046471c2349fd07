//! Natural loop recognition.
//!
//! A loop is identified by its header: the target of one or more back edges
//! (edges whose source the header dominates). The loop body is everything
//! that can reach a back edge source without passing the header. A
//! retreating edge whose target does not dominate its source makes the
//! region irreducible; irreducible loops keep their flag and are treated
//! conservatively by every analysis.
//!
//! Loop terminology:
//!
//! ```text
//!     [pre-header]        <- single non-loop predecessor of the header
//!          |
//!          v
//!     [header] <------+
//!          |          |
//!     [body ...]      |
//!          |          |
//!     [latch] --------+   <- back edge source
//! ```

use crate::ir::{BlockId, InstructionGraph};
use crate::utils::BitSet;

/// A recognized loop.
#[derive(Debug, Clone)]
pub struct LoopInfo {
    pub(crate) header: BlockId,
    pub(crate) pre_header: Option<BlockId>,
    pub(crate) back_edges: Vec<BlockId>,
    pub(crate) blocks: BitSet,
    pub(crate) irreducible: bool,
}

impl LoopInfo {
    /// Returns the loop header.
    #[must_use]
    pub const fn header(&self) -> BlockId {
        self.header
    }

    /// Returns the pre-header: the single predecessor of the header outside
    /// the loop, if the header has exactly one.
    #[must_use]
    pub const fn pre_header(&self) -> Option<BlockId> {
        self.pre_header
    }

    /// Returns the back edge sources (latches).
    #[must_use]
    pub fn back_edges(&self) -> &[BlockId] {
        &self.back_edges
    }

    /// Returns `true` if `block` belongs to the loop body (header
    /// included).
    #[must_use]
    pub fn contains(&self, block: BlockId) -> bool {
        self.blocks.contains(block.index())
    }

    /// Returns `true` if the loop structure could not be analyzed
    /// (multiple-entry region).
    #[must_use]
    pub const fn is_irreducible(&self) -> bool {
        self.irreducible
    }
}

/// Detects loops and computes per-block innermost-loop membership.
///
/// Requires reverse post order and dominators to be current on `graph`.
pub(crate) fn detect(graph: &InstructionGraph) -> (Vec<LoopInfo>, Vec<Option<usize>>) {
    let block_count = graph.block_count();
    let entry = graph.entry();

    // DFS coloring to find retreating edges: white 0, gray 1, black 2.
    let mut color = vec![0u8; block_count];
    let mut retreating: Vec<(BlockId, BlockId)> = Vec::new();
    let mut stack: Vec<(BlockId, usize)> = vec![(entry, 0)];
    color[entry.index()] = 1;

    while let Some((block, next)) = stack.last().copied() {
        let successors = graph.block(block).successors();
        if next < successors.len() {
            stack.last_mut().expect("stack is non-empty").1 += 1;
            let succ = successors[next];
            match color[succ.index()] {
                0 => {
                    color[succ.index()] = 1;
                    stack.push((succ, 0));
                }
                1 => retreating.push((block, succ)),
                _ => {}
            }
        } else {
            color[block.index()] = 2;
            stack.pop();
        }
    }

    // Group retreating edges by header, in header order for determinism.
    let mut loops: Vec<LoopInfo> = Vec::new();
    for (source, header) in retreating {
        let position = loops.iter().position(|l| l.header == header);
        let index = position.unwrap_or_else(|| {
            let mut blocks = BitSet::new(block_count);
            blocks.insert(header.index());
            loops.push(LoopInfo {
                header,
                pre_header: None,
                back_edges: Vec::new(),
                blocks,
                irreducible: false,
            });
            loops.len() - 1
        });
        loops[index].back_edges.push(source);
        if graph.block_dominates(header, source) {
            // Natural loop body: walk predecessors back from the latch.
            let info = &mut loops[index];
            let mut worklist = vec![source];
            while let Some(block) = worklist.pop() {
                if !info.blocks.insert(block.index()) {
                    continue;
                }
                for &pred in graph.block(block).predecessors() {
                    if pred != header {
                        worklist.push(pred);
                    }
                }
            }
        } else {
            // Entered from more than one place; structure unknown.
            loops[index].irreducible = true;
            loops[index].blocks.insert(source.index());
        }
    }

    // Pre-headers: the single predecessor outside the loop body.
    for info in &mut loops {
        let outside: Vec<BlockId> = graph
            .block(info.header)
            .predecessors()
            .iter()
            .copied()
            .filter(|p| !info.blocks.contains(p.index()))
            .collect();
        if outside.len() == 1 {
            info.pre_header = Some(outside[0]);
        }
    }

    // Innermost membership: the smallest containing loop wins.
    let mut membership: Vec<Option<usize>> = vec![None; block_count];
    for (index, info) in loops.iter().enumerate() {
        for block in info.blocks.iter() {
            let replace = match membership[block] {
                None => true,
                Some(current) => info.blocks.count() < loops[current].blocks.count(),
            };
            if replace {
                membership[block] = Some(index);
            }
        }
    }

    (loops, membership)
}
