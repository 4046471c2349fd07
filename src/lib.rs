// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![warn(missing_docs)]
#![allow(dead_code)]

//! # dotopt
//!
//! An optimizing middle-end for managed bytecode compilation: typed
//! instruction graphs, alias analysis and load-store elimination, built in
//! pure Rust.
//!
//! `dotopt` transforms a control-flow graph of typed instructions into an
//! equivalent, smaller and faster graph before code generation. The
//! centerpiece is the load-store elimination engine: a flow-sensitive
//! abstract interpretation that removes redundant heap reads and writes
//! and deletes allocations that never escape, including across loops via a
//! placeholder/merge-materialization mechanism.
//!
//! ## Quick Start
//!
//! ```rust
//! use dotopt::ir::{DataType, FieldRef, GraphBuilder};
//! use dotopt::optimizer;
//!
//! // store obj.f = 1; x = load obj.f; return x
//! let mut b = GraphBuilder::new();
//! let obj = b.parameter(0, DataType::Reference);
//! let field = FieldRef::new(1, 0, DataType::Int32);
//! let one = b.const_i32(1);
//! b.field_set(obj, field, one);
//! let x = b.field_get(obj, field);
//! b.ret_val(x);
//! let mut graph = b.finish();
//!
//! // The load collapses to the constant 1.
//! assert!(optimizer::optimize(&mut graph)?);
//! # Ok::<(), dotopt::Error>(())
//! ```
//!
//! ## Architecture
//!
//! `dotopt` is organized into three layers:
//!
//! - [`ir`] - the instruction graph: arena-allocated blocks and
//!   instructions with stable integer ids, structural analyses (reverse
//!   post order, dominators, natural loops) and use-list-preserving
//!   mutation primitives
//! - [`analysis`] - the alias model: heap location identity, escape
//!   classification of references, and the may-alias oracle
//! - [`optimizer`] - the pass interface, the parallel per-method driver,
//!   and the load-store elimination engine ([`optimizer::lse`])
//!
//! ## Concurrency
//!
//! One pass invocation owns one method's graph exclusively and runs to
//! completion on a single thread - no locking, no suspension points. The
//! driver fans independent methods out across worker threads with `rayon`;
//! the alias model instance is private per invocation.
//!
//! ## Error Handling
//!
//! Optimization itself cannot fail: a pass either improves the graph or
//! conservatively leaves it alone, and both outcomes are correct by
//! construction. [`Error`] only covers malformed *input* graphs detected
//! by [`ir::InstructionGraph::validate`]. Broken internal invariants abort
//! via assertions - silently producing unsound code is never an option.

pub mod analysis;
pub mod ir;
pub mod optimizer;
pub mod utils;

mod error;

pub use error::{Error, Result};
