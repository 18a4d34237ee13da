//! Gantry Engine - task graph construction and execution
//!
//! This crate builds a directed acyclic graph of tasks from explicit
//! dependency declarations plus implicit edges inferred from declared
//! artifact inputs/outputs, and executes that graph concurrently with
//! per-task memoization, cycle detection, and selectable failure
//! propagation.

pub mod executor;
pub mod graph;
pub mod reporter;
pub mod result;

pub use executor::{ExecutorError, ExecutorOptions, Mode, TaskExecutionFailed, TaskExecutor};
pub use graph::{GraphError, TaskGraph, TaskGraphBuilder};
pub use reporter::{
    CollectingReporter, TaskEvent, TaskReporter, TaskReporterRegistry, TracingReporter,
};
pub use result::{DependencyFailed, ExecutionResult, Failure, Success, Unsuccessful};
