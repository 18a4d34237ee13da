//! The unit-of-work abstraction

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::artifact::ArtifactAware;
use crate::context::ExecutionContext;
use crate::name::TaskName;

/// Result payload produced by a task and handed to its dependents.
///
/// The engine never inspects outputs; dependents downcast to the concrete
/// type they expect via [`downcast_ref`](dyn TaskOutput::downcast_ref).
pub trait TaskOutput: Any + Send + Sync + fmt::Debug {
    fn as_any(&self) -> &dyn Any;
}

impl dyn TaskOutput {
    /// Downcast to the concrete output type a dependent expects.
    pub fn downcast_ref<T: TaskOutput>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }
}

/// A named unit of build work.
///
/// Implementations know *how* to compile, link, test or package something;
/// the engine only decides *when* they run. Dependency outputs are handed
/// over in task-name order.
#[async_trait]
pub trait Task: Send + Sync {
    /// Stable name of this task, unique within a graph.
    fn name(&self) -> &TaskName;

    /// Run the task with the outputs of its (successful) dependencies.
    async fn run(
        &self,
        dependencies: Vec<Arc<dyn TaskOutput>>,
        ctx: &ExecutionContext,
    ) -> anyhow::Result<Arc<dyn TaskOutput>>;

    /// Artifact facet, if this task takes part in artifact auto-wiring.
    fn as_artifact_aware(&self) -> Option<&dyn ArtifactAware> {
        None
    }
}
