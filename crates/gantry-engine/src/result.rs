//! Per-task execution outcomes

use std::collections::BTreeSet;
use std::sync::Arc;

use gantry_core::{TaskName, TaskOutput};

/// Outcome of one task within one executor run.
///
/// Every arm is `Arc`-shared, so all dependents of a task observe the same
/// result object, and cloning the result map stays cheap.
#[derive(Debug, Clone)]
pub enum ExecutionResult {
    /// The task ran and produced an output.
    Success(Arc<Success>),
    /// The task ran and failed.
    Failure(Arc<Failure>),
    /// The task was skipped because at least one dependency was unsuccessful.
    DependencyFailed(Arc<DependencyFailed>),
}

impl ExecutionResult {
    pub fn task_name(&self) -> &TaskName {
        match self {
            Self::Success(s) => &s.task_name,
            Self::Failure(f) => &f.task_name,
            Self::DependencyFailed(d) => &d.task_name,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// The task's output, if it ran successfully.
    pub fn output(&self) -> Option<&Arc<dyn TaskOutput>> {
        match self {
            Self::Success(s) => Some(&s.output),
            _ => None,
        }
    }

    /// View of this result as an unsuccessful one, if it is.
    pub fn as_unsuccessful(&self) -> Option<Unsuccessful> {
        match self {
            Self::Success(_) => None,
            Self::Failure(f) => Some(Unsuccessful::Failure(f.clone())),
            Self::DependencyFailed(d) => Some(Unsuccessful::DependencyFailed(d.clone())),
        }
    }
}

/// A task that ran to completion.
#[derive(Debug)]
pub struct Success {
    pub task_name: TaskName,
    pub output: Arc<dyn TaskOutput>,
}

/// A task whose body failed.
#[derive(Debug)]
pub struct Failure {
    pub task_name: TaskName,
    pub error: Arc<anyhow::Error>,
}

/// A task skipped because one or more of its dependencies were unsuccessful.
#[derive(Debug)]
pub struct DependencyFailed {
    task_name: TaskName,
    unsuccessful_dependencies: Vec<Unsuccessful>,
    transitive_failures: Vec<Arc<Failure>>,
}

impl DependencyFailed {
    /// Build the outcome for a skipped task.
    ///
    /// The transitive-failure set is computed here, once: the union of the
    /// dependencies' failure sets, flattened so only leaf [`Failure`]s
    /// remain, deduplicated by task name.
    pub fn new(task_name: TaskName, unsuccessful_dependencies: Vec<Unsuccessful>) -> Self {
        assert!(
            !unsuccessful_dependencies.is_empty(),
            "a DependencyFailed result must have at least one unsuccessful dependency"
        );

        let mut seen = BTreeSet::new();
        let mut transitive_failures = Vec::new();
        for dependency in &unsuccessful_dependencies {
            for failure in dependency.leaf_failures() {
                if seen.insert(failure.task_name.clone()) {
                    transitive_failures.push(failure.clone());
                }
            }
        }

        Self {
            task_name,
            unsuccessful_dependencies,
            transitive_failures,
        }
    }

    pub fn task_name(&self) -> &TaskName {
        &self.task_name
    }

    /// Direct dependencies that were unsuccessful.
    pub fn unsuccessful_dependencies(&self) -> &[Unsuccessful] {
        &self.unsuccessful_dependencies
    }

    /// Leaf failures that ultimately caused this task to be skipped. Never
    /// contains a [`DependencyFailed`], and never empty.
    pub fn transitive_failures(&self) -> &[Arc<Failure>] {
        &self.transitive_failures
    }
}

/// The non-success subset of [`ExecutionResult`].
#[derive(Debug, Clone)]
pub enum Unsuccessful {
    Failure(Arc<Failure>),
    DependencyFailed(Arc<DependencyFailed>),
}

impl Unsuccessful {
    pub fn task_name(&self) -> &TaskName {
        match self {
            Self::Failure(f) => &f.task_name,
            Self::DependencyFailed(d) => &d.task_name,
        }
    }

    fn leaf_failures(&self) -> &[Arc<Failure>] {
        match self {
            Self::Failure(f) => std::slice::from_ref(f),
            Self::DependencyFailed(d) => d.transitive_failures(),
        }
    }
}
