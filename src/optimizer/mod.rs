//! Optimization passes and their driver.
//!
//! - [`GraphPass`] - the pass interface
//! - [`PassDriver`] - parallel per-method execution with event collection
//! - [`EventLog`] - change tracking
//! - [`lse`] - load-store elimination, the heap optimizer

mod driver;
mod events;
mod pass;

pub mod lse;

pub use driver::{optimize, optimize_all, DriverStats, MethodGraph, PassDriver};
pub use events::{Event, EventKind, EventLog, EventRecord};
pub use lse::LoadStoreElimination;
pub use pass::GraphPass;
