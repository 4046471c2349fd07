//! The instruction graph: blocks, instructions, types and side effects.
//!
//! This module realizes the representation the optimizer works on:
//!
//! - [`InstructionGraph`] - arena of blocks and instructions with stable
//!   ids, mutation primitives that keep use lists consistent, and the
//!   structural analyses (reverse post order, dominators, loops)
//! - [`InstrKind`] - the closed instruction sum type
//! - [`DataType`] / [`SideEffects`] - value types and effect summaries
//! - [`GraphBuilder`] - construction convenience for tests and benches

mod block;
mod builder;
mod effects;
mod graph;
mod instruction;
mod loops;
mod types;

pub use block::{BasicBlock, BlockId};
pub use builder::GraphBuilder;
pub use effects::SideEffects;
pub use graph::InstructionGraph;
pub use instruction::{BinaryOp, FieldRef, InstrId, InstrKind, Instruction};
pub use loops::LoopInfo;
pub use types::DataType;
