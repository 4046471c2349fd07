//! The parallel pass driver.
//!
//! Methods are optimized independently: one pass invocation owns one
//! method's graph exclusively, so the driver can fan methods out across
//! worker threads with no locking. The only cross-thread state is the
//! per-method event collection.

use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;
use rayon::prelude::*;

use crate::ir::InstructionGraph;
use crate::optimizer::{EventLog, GraphPass, LoadStoreElimination};

/// One method under compilation.
pub struct MethodGraph {
    /// Stable method identifier (e.g. its token).
    pub id: u32,
    /// The method's instruction graph.
    pub graph: InstructionGraph,
}

/// Aggregate result of a driver run.
#[derive(Debug)]
pub struct DriverStats {
    /// Number of methods any pass changed.
    pub methods_changed: usize,
    /// Per-method event logs, keyed by method id.
    pub events: DashMap<u32, EventLog>,
    /// Per-method failure descriptions (invalid input graphs).
    pub failures: DashMap<u32, String>,
}

/// Runs a pass list over many methods in parallel.
///
/// Each method iterates its passes until nothing changes, bounded by
/// `max_iterations`.
pub struct PassDriver {
    passes: Vec<Box<dyn GraphPass>>,
    max_iterations: usize,
}

impl PassDriver {
    /// Creates a driver with no passes.
    #[must_use]
    pub fn new(max_iterations: usize) -> Self {
        Self {
            passes: Vec::new(),
            max_iterations,
        }
    }

    /// Creates a driver with the default pipeline.
    #[must_use]
    pub fn with_default_passes() -> Self {
        Self::new(2).add_pass(Box::new(LoadStoreElimination::new()))
    }

    /// Appends a pass to the pipeline.
    #[must_use]
    pub fn add_pass(mut self, pass: Box<dyn GraphPass>) -> Self {
        self.passes.push(pass);
        self
    }

    /// Optimizes every method, in parallel.
    pub fn run(&self, methods: &mut [MethodGraph]) -> DriverStats {
        let events: DashMap<u32, EventLog> = DashMap::new();
        let failures: DashMap<u32, String> = DashMap::new();
        let methods_changed = AtomicUsize::new(0);

        methods.par_iter_mut().for_each(|method| {
            if let Err(error) = method.graph.validate() {
                failures.insert(method.id, error.to_string());
                return;
            }

            let mut log = EventLog::new();
            let mut changed_any = false;
            'method: for _ in 0..self.max_iterations {
                let mut changed_round = false;
                for pass in &self.passes {
                    match pass.run(&mut method.graph, &mut log) {
                        Ok(changed) => changed_round |= changed,
                        Err(error) => {
                            failures.insert(method.id, error.to_string());
                            break 'method;
                        }
                    }
                }
                changed_any |= changed_round;
                if !changed_round {
                    break;
                }
            }

            if changed_any {
                methods_changed.fetch_add(1, Ordering::Relaxed);
            }
            if !log.is_empty() {
                events.insert(method.id, log);
            }
        });

        DriverStats {
            methods_changed: methods_changed.load(Ordering::Relaxed),
            events,
            failures,
        }
    }
}

/// Convenience: runs the default pipeline over every method in parallel.
pub fn optimize_all(methods: &mut [MethodGraph]) -> DriverStats {
    PassDriver::with_default_passes().run(methods)
}

/// Convenience for a single method with the default pipeline.
pub fn optimize(graph: &mut InstructionGraph) -> crate::Result<bool> {
    graph.validate()?;
    let mut log = EventLog::new();
    LoadStoreElimination::new().run(graph, &mut log)
}
