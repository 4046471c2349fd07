//! The optimization pass interface.

use crate::ir::InstructionGraph;
use crate::optimizer::EventLog;
use crate::Result;

/// An optimization pass over one method's instruction graph.
///
/// Passes mutate the graph in place and report whether anything changed,
/// so the driver can iterate to a fixpoint. A pass must leave the graph
/// semantically equivalent and structurally valid.
pub trait GraphPass: Send + Sync {
    /// Short kebab-case identifier.
    fn name(&self) -> &'static str;

    /// One-line description of what the pass does.
    fn description(&self) -> &'static str;

    /// Runs the pass. Returns `true` if the graph was changed.
    fn run(&self, graph: &mut InstructionGraph, events: &mut EventLog) -> Result<bool>;
}
