//! Task graph construction and artifact auto-wiring

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, instrument};

use gantry_core::{Artifact, Quantifier, ResolvedArtifacts, Task, TaskName};

/// Frozen DAG of tasks and dependency edges.
///
/// Produced once by [`TaskGraphBuilder::build`] and read-only afterwards;
/// safe to share across any number of concurrent executor runs.
pub struct TaskGraph {
    tasks: HashMap<TaskName, Arc<dyn Task>>,
    dependencies: HashMap<TaskName, BTreeSet<TaskName>>,
}

impl std::fmt::Debug for TaskGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskGraph")
            .field("tasks", &self.tasks.keys().collect::<Vec<_>>())
            .field("dependencies", &self.dependencies)
            .finish()
    }
}

impl TaskGraph {
    pub fn task(&self, name: &TaskName) -> Option<&Arc<dyn Task>> {
        self.tasks.get(name)
    }

    pub fn contains(&self, name: &TaskName) -> bool {
        self.tasks.contains_key(name)
    }

    pub fn task_names(&self) -> impl Iterator<Item = &TaskName> {
        self.tasks.keys()
    }

    /// Direct dependencies of a task. A task absent from the edge map has
    /// no dependencies.
    pub fn dependencies_of(&self, name: &TaskName) -> Option<&BTreeSet<TaskName>> {
        self.dependencies.get(name)
    }

    /// Get the total number of tasks
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Check if the graph is empty
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Get a human-readable listing of every task and its dependencies
    pub fn render_plan(&self) -> String {
        let mut names: Vec<&TaskName> = self.tasks.keys().collect();
        names.sort();

        let mut plan = String::new();
        for name in names {
            match self.dependencies.get(name) {
                Some(deps) if !deps.is_empty() => {
                    let after: Vec<&str> = deps.iter().map(TaskName::as_str).collect();
                    plan.push_str(&format!("{} (after: {})\n", name, after.join(", ")));
                }
                _ => plan.push_str(&format!("{name}\n")),
            }
        }
        plan
    }
}

/// Accumulates tasks and dependency edges, then freezes them into a
/// [`TaskGraph`].
///
/// Edges come from two sources that accumulate into one merged set: explicit
/// registration, and the artifact auto-wiring pass that runs inside
/// [`build`](TaskGraphBuilder::build) (a consumer depends on every task
/// producing an artifact matched by one of its selectors).
#[derive(Default)]
pub struct TaskGraphBuilder {
    tasks: HashMap<TaskName, Arc<dyn Task>>,
    dependencies: HashMap<TaskName, BTreeSet<TaskName>>,
    builtin_artifacts: Vec<Artifact>,
}

impl TaskGraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task and optional explicit dependency edges.
    ///
    /// Task names must be unique within a graph.
    pub fn register_task(
        &mut self,
        task: Arc<dyn Task>,
        depends_on: impl IntoIterator<Item = TaskName>,
    ) -> Result<(), GraphError> {
        let name = task.name().clone();
        if self.tasks.contains_key(&name) {
            return Err(GraphError::DuplicateTask(name));
        }
        self.tasks.insert(name.clone(), task);
        let edges = self.dependencies.entry(name).or_default();
        edges.extend(depends_on);
        Ok(())
    }

    /// Add one more dependency edge. Edges accumulate, and may be registered
    /// before or after the tasks they mention.
    pub fn register_dependency(&mut self, task: TaskName, depends_on: TaskName) {
        self.dependencies.entry(task).or_default().insert(depends_on);
    }

    /// Declare an artifact that exists on disk without being produced by any
    /// task (e.g. user-authored source directories). Builtin artifacts
    /// participate in selector matching but never induce a dependency edge.
    pub fn register_builtin_artifact(&mut self, artifact: Artifact) {
        self.builtin_artifacts.push(artifact);
    }

    /// Freeze the graph.
    ///
    /// Runs the artifact auto-wiring pass (producer uniqueness, selector
    /// matching, cardinality validation, input injection, edge
    /// materialization), then validates that every edge endpoint is a
    /// registered task.
    #[instrument(skip_all, fields(tasks = self.tasks.len()))]
    pub fn build(mut self) -> Result<TaskGraph, GraphError> {
        self.wire_artifacts()?;

        for (task, deps) in &self.dependencies {
            if !deps.is_empty() && !self.tasks.contains_key(task) {
                return Err(GraphError::UnregisteredTask(task.clone()));
            }
            for dependency in deps {
                if !self.tasks.contains_key(dependency) {
                    return Err(GraphError::UnknownDependency {
                        task: task.clone(),
                        dependency: dependency.clone(),
                    });
                }
            }
        }

        let edge_count: usize = self.dependencies.values().map(BTreeSet::len).sum();
        info!(
            task_count = self.tasks.len(),
            edge_count, "task graph built"
        );

        Ok(TaskGraph {
            tasks: self.tasks,
            dependencies: self.dependencies,
        })
    }

    /// Match consumer selectors to producer artifacts, validate cardinality,
    /// hand the resolved artifact lists to each consumer, and materialize
    /// the implied dependency edges.
    fn wire_artifacts(&mut self) -> Result<(), GraphError> {
        let mut names: Vec<TaskName> = self.tasks.keys().cloned().collect();
        names.sort();

        // Collect declared outputs, producer name order for determinism
        let mut produced: Vec<(TaskName, Artifact)> = Vec::new();
        for name in &names {
            if let Some(facet) = self.tasks[name].as_artifact_aware() {
                for artifact in facet.produces() {
                    produced.push((name.clone(), artifact));
                }
            }
        }

        // A path must have at most one producer in the whole graph
        let mut producers_by_path: HashMap<PathBuf, Vec<TaskName>> = HashMap::new();
        for (producer, artifact) in &produced {
            producers_by_path
                .entry(artifact.path().to_path_buf())
                .or_default()
                .push(producer.clone());
        }
        for (path, producers) in &producers_by_path {
            if producers.len() > 1 {
                let mut producers = producers.clone();
                producers.sort();
                return Err(GraphError::DuplicateProducer {
                    path: path.clone(),
                    producers,
                });
            }
        }

        let mut new_edges: Vec<(TaskName, TaskName)> = Vec::new();
        for consumer in &names {
            let Some(facet) = self.tasks[consumer].as_artifact_aware() else {
                continue;
            };
            let selectors = facet.consumes();
            if selectors.is_empty() {
                continue;
            }

            let mut resolved = Vec::with_capacity(selectors.len());
            for selector in &selectors {
                let mut artifacts = Vec::new();

                for (producer, artifact) in &produced {
                    if producer == consumer {
                        continue;
                    }
                    if selector.matches(artifact) {
                        artifacts.push(artifact.clone());
                        new_edges.push((consumer.clone(), producer.clone()));
                    }
                }
                for artifact in &self.builtin_artifacts {
                    // the producing task owns the path, if there is one
                    if producers_by_path.contains_key(artifact.path()) {
                        continue;
                    }
                    if selector.matches(artifact) {
                        artifacts.push(artifact.clone());
                    }
                }

                let satisfied = match selector.quantifier() {
                    Quantifier::Single => artifacts.len() == 1,
                    Quantifier::AtLeastOne => !artifacts.is_empty(),
                    Quantifier::AnyOrNone => true,
                };
                if !satisfied {
                    return Err(GraphError::UnmatchedSelector {
                        task: consumer.clone(),
                        selector: selector.description().to_string(),
                        quantifier: selector.quantifier(),
                        found: artifacts.len(),
                    });
                }

                debug!(
                    consumer = %consumer,
                    selector = selector.description(),
                    matched = artifacts.len(),
                    "selector resolved"
                );
                resolved.push(ResolvedArtifacts {
                    description: selector.description().to_string(),
                    artifacts,
                });
            }

            facet.bind_consumed(resolved);
        }

        for (consumer, producer) in new_edges {
            self.dependencies.entry(consumer).or_default().insert(producer);
        }
        Ok(())
    }
}

/// Errors during graph construction
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// A task with the same name is already registered
    #[error("task '{0}' is already registered")]
    DuplicateTask(TaskName),

    /// A dependency edge mentions a task that was never registered
    #[error("task '{task}' depends on '{dependency}', which is not registered in the graph")]
    UnknownDependency {
        task: TaskName,
        dependency: TaskName,
    },

    /// Dependencies were registered for a task that never materialized
    #[error("dependencies were registered for task '{0}', but the task itself was never registered")]
    UnregisteredTask(TaskName),

    /// The same output path is declared by more than one task
    #[error("artifact '{}' is produced by more than one task: {}", .path.display(), join_names(.producers))]
    DuplicateProducer {
        path: PathBuf,
        producers: Vec<TaskName>,
    },

    /// A selector's cardinality requirement was not met
    #[error("task '{task}' expected {quantifier} artifact(s) {selector}, but {found} matched")]
    UnmatchedSelector {
        task: TaskName,
        selector: String,
        quantifier: Quantifier,
        found: usize,
    },
}

fn join_names(names: &[TaskName]) -> String {
    let names: Vec<&str> = names.iter().map(TaskName::as_str).collect();
    names.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::any::Any;

    use async_trait::async_trait;

    use gantry_core::{
        ArtifactAware, ArtifactKind, ArtifactSelector, ConsumedArtifacts, ExecutionContext,
        TaskOutput,
    };

    #[derive(Debug)]
    struct Done;

    impl TaskOutput for Done {
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    struct PlainTask {
        name: TaskName,
    }

    #[async_trait]
    impl Task for PlainTask {
        fn name(&self) -> &TaskName {
            &self.name
        }

        async fn run(
            &self,
            _dependencies: Vec<Arc<dyn TaskOutput>>,
            _ctx: &ExecutionContext,
        ) -> anyhow::Result<Arc<dyn TaskOutput>> {
            Ok(Arc::new(Done))
        }
    }

    struct WiredTask {
        name: TaskName,
        produces: Vec<Artifact>,
        consumes: Vec<ArtifactSelector>,
        consumed: ConsumedArtifacts,
    }

    #[async_trait]
    impl Task for WiredTask {
        fn name(&self) -> &TaskName {
            &self.name
        }

        async fn run(
            &self,
            _dependencies: Vec<Arc<dyn TaskOutput>>,
            _ctx: &ExecutionContext,
        ) -> anyhow::Result<Arc<dyn TaskOutput>> {
            Ok(Arc::new(Done))
        }

        fn as_artifact_aware(&self) -> Option<&dyn ArtifactAware> {
            Some(self)
        }
    }

    impl ArtifactAware for WiredTask {
        fn produces(&self) -> Vec<Artifact> {
            self.produces.clone()
        }

        fn consumes(&self) -> Vec<ArtifactSelector> {
            self.consumes.clone()
        }

        fn bind_consumed(&self, resolved: Vec<ResolvedArtifacts>) {
            self.consumed.bind(resolved);
        }
    }

    fn name(s: &str) -> TaskName {
        TaskName::new(s)
    }

    fn plain(s: &str) -> Arc<PlainTask> {
        Arc::new(PlainTask { name: name(s) })
    }

    fn classes() -> ArtifactKind {
        ArtifactKind::new("classes")
    }

    fn producer(task: &str, path: &str) -> Arc<WiredTask> {
        Arc::new(WiredTask {
            name: name(task),
            produces: vec![Artifact::new(classes(), path)],
            consumes: Vec::new(),
            consumed: ConsumedArtifacts::new(),
        })
    }

    fn consumer(task: &str, quantifier: Quantifier) -> Arc<WiredTask> {
        Arc::new(WiredTask {
            name: name(task),
            produces: Vec::new(),
            consumes: vec![ArtifactSelector::any_of_kind(classes(), quantifier)],
            consumed: ConsumedArtifacts::new(),
        })
    }

    #[test]
    fn test_duplicate_task_registration_fails() {
        let mut builder = TaskGraphBuilder::new();
        builder.register_task(plain(":compile"), []).unwrap();

        let result = builder.register_task(plain(":compile"), []);
        assert!(matches!(result, Err(GraphError::DuplicateTask(_))));
    }

    #[test]
    fn test_explicit_dependencies() {
        let mut builder = TaskGraphBuilder::new();
        builder.register_task(plain(":resolve"), []).unwrap();
        builder
            .register_task(plain(":compile"), [name(":resolve")])
            .unwrap();

        let graph = builder.build().unwrap();
        assert_eq!(graph.len(), 2);
        assert!(graph
            .dependencies_of(&name(":compile"))
            .unwrap()
            .contains(&name(":resolve")));
    }

    #[test]
    fn test_edges_accumulate_regardless_of_registration_order() {
        let mut builder = TaskGraphBuilder::new();
        // edge registered before either task exists
        builder.register_dependency(name(":test"), name(":compile"));
        builder.register_task(plain(":compile"), []).unwrap();
        builder.register_task(plain(":test"), []).unwrap();
        builder.register_dependency(name(":test"), name(":compile"));

        let graph = builder.build().unwrap();
        let deps = graph.dependencies_of(&name(":test")).unwrap();
        assert_eq!(deps.len(), 1);
    }

    #[test]
    fn test_dependency_on_unregistered_task_fails_build() {
        let mut builder = TaskGraphBuilder::new();
        builder
            .register_task(plain(":compile"), [name(":missing")])
            .unwrap();

        let err = builder.build().unwrap_err();
        assert!(matches!(err, GraphError::UnknownDependency { .. }));
        assert!(err.to_string().contains(":missing"));
    }

    #[test]
    fn test_edge_for_unregistered_task_fails_build() {
        let mut builder = TaskGraphBuilder::new();
        builder.register_task(plain(":compile"), []).unwrap();
        builder.register_dependency(name(":ghost"), name(":compile"));

        let err = builder.build().unwrap_err();
        assert!(matches!(err, GraphError::UnregisteredTask(_)));
    }

    #[test]
    fn test_auto_wiring_creates_edge() {
        let mut builder = TaskGraphBuilder::new();
        builder
            .register_task(producer(":compile", "out/classes"), [])
            .unwrap();
        let sink = consumer(":jar", Quantifier::Single);
        builder.register_task(sink.clone(), []).unwrap();

        let graph = builder.build().unwrap();
        assert!(graph
            .dependencies_of(&name(":jar"))
            .unwrap()
            .contains(&name(":compile")));

        let resolved = sink.consumed.get();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].artifacts.len(), 1);
        assert_eq!(
            resolved[0].artifacts[0].path(),
            std::path::Path::new("out/classes")
        );
    }

    #[test]
    fn test_builtin_artifact_matches_without_edge() {
        let mut builder = TaskGraphBuilder::new();
        builder.register_builtin_artifact(Artifact::new(classes(), "src/prebuilt"));
        let sink = consumer(":jar", Quantifier::Single);
        builder.register_task(sink.clone(), []).unwrap();

        let graph = builder.build().unwrap();
        // matched, injected, but no edge was induced
        assert_eq!(sink.consumed.get()[0].artifacts.len(), 1);
        assert!(graph
            .dependencies_of(&name(":jar"))
            .map_or(true, BTreeSet::is_empty));
    }

    #[test]
    fn test_duplicate_producer_rejected() {
        let mut builder = TaskGraphBuilder::new();
        builder
            .register_task(producer(":compileA", "out/classes"), [])
            .unwrap();
        builder
            .register_task(producer(":compileB", "out/./classes"), [])
            .unwrap();

        let err = builder.build().unwrap_err();
        match err {
            GraphError::DuplicateProducer { producers, .. } => {
                assert_eq!(producers, vec![name(":compileA"), name(":compileB")]);
            }
            other => panic!("expected DuplicateProducer, got {other}"),
        }
    }

    #[test]
    fn test_single_quantifier_requires_exactly_one_match() {
        let mut builder = TaskGraphBuilder::new();
        builder.register_task(consumer(":jar", Quantifier::Single), []).unwrap();

        let err = builder.build().unwrap_err();
        match err {
            GraphError::UnmatchedSelector { found, .. } => assert_eq!(found, 0),
            other => panic!("expected UnmatchedSelector, got {other}"),
        }
    }

    #[test]
    fn test_single_quantifier_rejects_two_producers() {
        let mut builder = TaskGraphBuilder::new();
        builder
            .register_task(producer(":compileA", "out/a"), [])
            .unwrap();
        builder
            .register_task(producer(":compileB", "out/b"), [])
            .unwrap();
        builder.register_task(consumer(":jar", Quantifier::Single), []).unwrap();

        let err = builder.build().unwrap_err();
        match err {
            GraphError::UnmatchedSelector { found, .. } => assert_eq!(found, 2),
            other => panic!("expected UnmatchedSelector, got {other}"),
        }
    }

    #[test]
    fn test_at_least_one_quantifier() {
        let mut builder = TaskGraphBuilder::new();
        builder.register_task(consumer(":jar", Quantifier::AtLeastOne), []).unwrap();
        assert!(builder.build().is_err());

        let mut builder = TaskGraphBuilder::new();
        builder
            .register_task(producer(":compileA", "out/a"), [])
            .unwrap();
        builder
            .register_task(producer(":compileB", "out/b"), [])
            .unwrap();
        let sink = consumer(":jar", Quantifier::AtLeastOne);
        builder.register_task(sink.clone(), []).unwrap();

        let graph = builder.build().unwrap();
        assert_eq!(sink.consumed.get()[0].artifacts.len(), 2);
        assert_eq!(graph.dependencies_of(&name(":jar")).unwrap().len(), 2);
    }

    #[test]
    fn test_any_or_none_quantifier_accepts_no_matches() {
        let mut builder = TaskGraphBuilder::new();
        let sink = consumer(":jar", Quantifier::AnyOrNone);
        builder.register_task(sink.clone(), []).unwrap();

        builder.build().unwrap();
        assert!(sink.consumed.get()[0].artifacts.is_empty());
    }

    #[test]
    fn test_consumer_does_not_match_own_artifacts() {
        // a task producing and consuming the same kind must not depend on itself
        let task = Arc::new(WiredTask {
            name: name(":process"),
            produces: vec![Artifact::new(classes(), "out/processed")],
            consumes: vec![ArtifactSelector::any_of_kind(classes(), Quantifier::AnyOrNone)],
            consumed: ConsumedArtifacts::new(),
        });
        let mut builder = TaskGraphBuilder::new();
        builder.register_task(task.clone(), []).unwrap();

        let graph = builder.build().unwrap();
        assert!(task.consumed.get()[0].artifacts.is_empty());
        assert!(graph
            .dependencies_of(&name(":process"))
            .map_or(true, BTreeSet::is_empty));
    }

    #[test]
    fn test_explicit_and_wired_edges_merge() {
        let mut builder = TaskGraphBuilder::new();
        builder
            .register_task(producer(":compile", "out/classes"), [])
            .unwrap();
        builder
            .register_task(consumer(":jar", Quantifier::Single), [name(":compile")])
            .unwrap();

        let graph = builder.build().unwrap();
        // both mechanisms imply the same pair; the merged set has one edge
        assert_eq!(graph.dependencies_of(&name(":jar")).unwrap().len(), 1);
    }

    #[test]
    fn test_render_plan() {
        let mut builder = TaskGraphBuilder::new();
        builder.register_task(plain(":resolve"), []).unwrap();
        builder
            .register_task(plain(":compile"), [name(":resolve")])
            .unwrap();

        let graph = builder.build().unwrap();
        let plan = graph.render_plan();
        assert!(plan.contains(":resolve"));
        assert!(plan.contains(":compile (after: :resolve)"));
    }
}
