//! Concurrent task graph execution
//!
//! Each task of one run is represented by a single shared, memoized future;
//! requesting a task that is already being computed joins the in-flight
//! computation instead of starting a second one. Task bodies are spawned on
//! the runtime under a bounded worker pool.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use futures::future::{try_join_all, BoxFuture, Shared};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, Instrument};

use gantry_core::{ExecutionContext, TaskName, TaskOutput};

use crate::graph::TaskGraph;
use crate::reporter::{TaskEvent, TaskReporterRegistry};
use crate::result::{DependencyFailed, ExecutionResult, Failure, Success, Unsuccessful};

/// Failure-propagation policy of one execution run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    /// Upon task failure, keep executing every other task that does not
    /// depend on the failed one
    Greedy,
    /// Fail on the first failed task, cancelling all running and queued
    /// tasks of the same run
    FailFast,
}

/// Options for the task executor
#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    /// Failure-propagation policy
    pub mode: Mode,
    /// Upper bound on concurrently running task bodies
    pub concurrency: usize,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            mode: Mode::Greedy,
            concurrency: default_concurrency(),
        }
    }
}

/// Available parallelism, but at least 3 to keep I/O-bound build steps from
/// starving each other on small machines.
fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .max(3)
}

/// Error surfaced by a fail-fast run, carrying the offending task
#[derive(Debug, Clone, thiserror::Error)]
#[error("task '{task_name}' failed: {cause:#}")]
pub struct TaskExecutionFailed {
    pub task_name: TaskName,
    pub cause: Arc<anyhow::Error>,
}

/// Errors during graph execution
#[derive(Debug, Clone, thiserror::Error)]
pub enum ExecutorError {
    /// A requested root task does not exist in the graph
    #[error("task '{name}' was not found in the project{}", format_similar(.similar))]
    UnknownTask {
        name: TaskName,
        similar: Vec<String>,
    },

    /// The graph contains a dependency cycle
    #[error("found a cycle in the task graph: {}", render_path(.path))]
    Cycle { path: Vec<TaskName> },

    /// A task failed in fail-fast mode
    #[error(transparent)]
    TaskFailed(#[from] TaskExecutionFailed),

    /// One or more tasks failed in a checked run
    #[error("{}", render_failures(.0))]
    TasksFailed(Vec<TaskExecutionFailed>),

    /// The run was torn down after a fatal error elsewhere
    #[error("run aborted after a failure in another task")]
    Aborted,
}

fn format_similar(similar: &[String]) -> String {
    if similar.is_empty() {
        String::new()
    } else {
        format!(", maybe you meant one of:\n   {}", similar.join("\n   "))
    }
}

fn render_path(path: &[TaskName]) -> String {
    let names: Vec<&str> = path.iter().map(TaskName::as_str).collect();
    names.join(" -> ")
}

fn render_failures(failures: &[TaskExecutionFailed]) -> String {
    match failures {
        [] => "task run failed".to_string(),
        [first] => first.to_string(),
        [first, rest @ ..] => {
            let others: Vec<&str> = rest.iter().map(|f| f.task_name.as_str()).collect();
            format!(
                "{first}; {} more task(s) failed: {}",
                rest.len(),
                others.join(", ")
            )
        }
    }
}

type TaskOutcome = Result<ExecutionResult, ExecutorError>;
type TaskFuture = Shared<BoxFuture<'static, TaskOutcome>>;

/// Executes a frozen [`TaskGraph`] with bounded parallelism.
///
/// The graph may be shared across any number of concurrent [`run`] calls;
/// each call gets a fresh memoization table, so a task requested by two
/// roots of the same call runs exactly once, while separate calls re-run it.
///
/// [`run`]: TaskExecutor::run
pub struct TaskExecutor {
    graph: Arc<TaskGraph>,
    mode: Mode,
    workers: Arc<Semaphore>,
    reporters: Arc<TaskReporterRegistry>,
}

impl TaskExecutor {
    pub fn new(graph: Arc<TaskGraph>, mode: Mode) -> Self {
        Self::with_options(
            graph,
            ExecutorOptions {
                mode,
                ..ExecutorOptions::default()
            },
        )
    }

    pub fn with_options(graph: Arc<TaskGraph>, options: ExecutorOptions) -> Self {
        Self {
            graph,
            mode: options.mode,
            workers: Arc::new(Semaphore::new(options.concurrency.max(1))),
            reporters: Arc::new(TaskReporterRegistry::new()),
        }
    }

    /// Replace the reporter registry (e.g. to collect events in tests or
    /// drive a terminal renderer).
    pub fn with_reporters(mut self, reporters: TaskReporterRegistry) -> Self {
        self.reporters = Arc::new(reporters);
        self
    }

    /// Run the given root tasks and return the outcome of every task that
    /// was touched, dependencies included.
    ///
    /// In [`Mode::Greedy`] a task failure is recorded in the result map and
    /// independent branches keep running; in [`Mode::FailFast`] the first
    /// failure aborts the whole call with [`ExecutorError::TaskFailed`],
    /// cancelling everything still waiting or in flight.
    #[instrument(skip_all)]
    pub async fn run(
        &self,
        roots: impl IntoIterator<Item = TaskName>,
    ) -> Result<HashMap<TaskName, ExecutionResult>, ExecutorError> {
        let roots: BTreeSet<TaskName> = roots.into_iter().collect();
        for root in &roots {
            self.assert_task_is_known(root)?;
        }

        debug!(roots = %render_path(&roots.iter().cloned().collect::<Vec<_>>()), mode = ?self.mode, "running tasks");
        self.reporters.broadcast(&TaskEvent::RunStarted {
            roots: roots.iter().cloned().collect(),
        });

        let start = Instant::now();
        let state = Arc::new(RunState {
            graph: self.graph.clone(),
            mode: self.mode,
            workers: self.workers.clone(),
            reporters: self.reporters.clone(),
            memo: Mutex::new(HashMap::new()),
            first_error: Mutex::new(None),
            cancel: CancellationToken::new(),
            context: Arc::new(ExecutionContext::new()),
        });

        let outcome = run_tasks(
            state.clone(),
            roots.into_iter().collect(),
            Arc::new(Vec::new()),
        )
        .await;

        // hooks run whether the graph execution succeeded or not
        state.context.run_post_run_hooks().await;

        if let Err(error) = outcome {
            return Err(state.first_error.lock().unwrap().clone().unwrap_or(error));
        }

        // unpack the memo table; every computation finished with the roots
        let memo = std::mem::take(&mut *state.memo.lock().unwrap());
        let mut results = HashMap::with_capacity(memo.len());
        for (name, fut) in memo {
            results.insert(name, fut.await?);
        }

        let succeeded = results.values().filter(|r| r.is_success()).count();
        let failed = results
            .values()
            .filter(|r| matches!(r, ExecutionResult::Failure(_)))
            .count();
        let skipped = results
            .values()
            .filter(|r| matches!(r, ExecutionResult::DependencyFailed(_)))
            .count();
        self.reporters.broadcast(&TaskEvent::RunCompleted {
            total: results.len(),
            succeeded,
            failed,
            skipped,
            duration: start.elapsed(),
        });

        Ok(results)
    }

    /// Run the given roots and fail if any task failed.
    ///
    /// The failure with the lowest task name becomes the primary error and
    /// every other failure is listed after it. On success the result map is
    /// unwrapped to the tasks' payloads, which is then guaranteed complete.
    pub async fn run_checked(
        &self,
        roots: impl IntoIterator<Item = TaskName>,
    ) -> Result<HashMap<TaskName, Arc<dyn TaskOutput>>, ExecutorError> {
        let results = self.run(roots).await?;

        let mut failures: Vec<&Arc<Failure>> = results
            .values()
            .filter_map(|result| match result {
                ExecutionResult::Failure(failure) => Some(failure),
                _ => None,
            })
            .collect();
        if !failures.is_empty() {
            failures.sort_by(|a, b| a.task_name.cmp(&b.task_name));
            return Err(ExecutorError::TasksFailed(
                failures
                    .into_iter()
                    .map(|failure| TaskExecutionFailed {
                        task_name: failure.task_name.clone(),
                        cause: failure.error.clone(),
                    })
                    .collect(),
            ));
        }

        Ok(results
            .into_iter()
            .map(|(name, result)| match result {
                ExecutionResult::Success(success) => (name, success.output.clone()),
                other => panic!(
                    "unsuccessful result for '{}' without a recorded failure",
                    other.task_name()
                ),
            })
            .collect())
    }

    fn assert_task_is_known(&self, name: &TaskName) -> Result<(), ExecutorError> {
        if self.graph.contains(name) {
            return Ok(());
        }
        Err(ExecutorError::UnknownTask {
            name: name.clone(),
            similar: self.find_similar_task_names(name),
        })
    }

    /// Case-insensitive substring match, both directions, for "did you mean"
    /// suggestions.
    fn find_similar_task_names(&self, name: &TaskName) -> Vec<String> {
        let needle = name.as_str().to_lowercase();
        let mut similar: Vec<String> = self
            .graph
            .task_names()
            .map(|candidate| candidate.as_str().to_string())
            .filter(|candidate| {
                let haystack = candidate.to_lowercase();
                haystack.contains(&needle) || needle.contains(&haystack)
            })
            .collect();
        similar.sort();
        similar
    }
}

/// Bookkeeping exclusive to one `run()` call. Never reused across calls,
/// even against the same graph.
struct RunState {
    graph: Arc<TaskGraph>,
    mode: Mode,
    workers: Arc<Semaphore>,
    reporters: Arc<TaskReporterRegistry>,
    memo: Mutex<HashMap<TaskName, TaskFuture>>,
    first_error: Mutex<Option<ExecutorError>>,
    cancel: CancellationToken,
    context: Arc<ExecutionContext>,
}

impl RunState {
    /// Record the first fatal error of this run and start cooperative
    /// teardown. Returns the error for propagation.
    fn fatal(&self, error: ExecutorError) -> ExecutorError {
        {
            let mut slot = self.first_error.lock().unwrap();
            if slot.is_none() {
                *slot = Some(error.clone());
            }
        }
        self.cancel.cancel();
        error
    }

    /// The error this run is being torn down with.
    fn current_error(&self) -> ExecutorError {
        self.first_error
            .lock()
            .unwrap()
            .clone()
            .unwrap_or(ExecutorError::Aborted)
    }
}

/// Run the tasks identified by `names` and return their results.
///
/// A task that is already being computed is awaited instead of started
/// again. The cycle check must happen before consulting the memo table;
/// awaiting an ancestor's own future would deadlock instead of failing.
fn run_tasks(
    state: Arc<RunState>,
    names: Vec<TaskName>,
    path: Arc<Vec<TaskName>>,
) -> BoxFuture<'static, Result<Vec<ExecutionResult>, ExecutorError>> {
    async move {
        let mut futures = Vec::with_capacity(names.len());
        for name in names {
            if path.contains(&name) {
                let mut cycle = (*path).clone();
                cycle.push(name);
                return Err(state.fatal(ExecutorError::Cycle { path: cycle }));
            }
            let future = {
                let mut memo = state.memo.lock().unwrap();
                memo.entry(name.clone())
                    .or_insert_with(|| {
                        run_dependencies_and_task(state.clone(), name, path.clone())
                            .boxed()
                            .shared()
                    })
                    .clone()
            };
            futures.push(future);
        }
        try_join_all(futures).await
    }
    .boxed()
}

/// Run the given task's dependencies, and then the task itself.
async fn run_dependencies_and_task(
    state: Arc<RunState>,
    name: TaskName,
    path: Arc<Vec<TaskName>>,
) -> TaskOutcome {
    let path = {
        let mut extended = (*path).clone();
        extended.push(name.clone());
        Arc::new(extended)
    };
    let dependencies: Vec<TaskName> = state
        .graph
        .dependencies_of(&name)
        .map(|deps| deps.iter().cloned().collect())
        .unwrap_or_default();
    let dependency_results = run_tasks(state.clone(), dependencies, path).await?;

    let mut successful: Vec<Arc<dyn TaskOutput>> = Vec::new();
    let mut unsuccessful: Vec<Unsuccessful> = Vec::new();
    for result in &dependency_results {
        match result {
            ExecutionResult::Success(success) => successful.push(success.output.clone()),
            ExecutionResult::Failure(failure) => {
                unsuccessful.push(Unsuccessful::Failure(failure.clone()))
            }
            ExecutionResult::DependencyFailed(skipped) => {
                unsuccessful.push(Unsuccessful::DependencyFailed(skipped.clone()))
            }
        }
    }

    if !unsuccessful.is_empty() {
        // skip execution since at least one dependency was unsuccessful
        state.reporters.broadcast(&TaskEvent::Skipped {
            name: name.clone(),
            failed_dependencies: unsuccessful.iter().map(|u| u.task_name().clone()).collect(),
        });
        return Ok(ExecutionResult::DependencyFailed(Arc::new(
            DependencyFailed::new(name, unsuccessful),
        )));
    }

    run_single_task(state, name, successful).await
}

/// Run one task's body under a worker permit, mapping its outcome per the
/// run's failure mode.
async fn run_single_task(
    state: Arc<RunState>,
    name: TaskName,
    dependencies: Vec<Arc<dyn TaskOutput>>,
) -> TaskOutcome {
    let task = match state.graph.task(&name) {
        Some(task) => task.clone(),
        None => panic!(
            "task '{name}' is referenced by the graph but not registered; \
             this is a bug in the graph builder"
        ),
    };

    // don't start anything new once the run is being torn down
    let permit = tokio::select! {
        _ = state.cancel.cancelled() => return Err(state.current_error()),
        permit = state.workers.clone().acquire_owned() => permit.unwrap(),
    };

    let start = Instant::now();
    state
        .reporters
        .broadcast(&TaskEvent::Started { name: name.clone() });

    let span = tracing::info_span!("task", name = %name);
    let body = {
        let task = task.clone();
        let context = state.context.clone();
        let cancel = state.cancel.clone();
        async move {
            let _permit = permit;
            tokio::select! {
                _ = cancel.cancelled() => Err(anyhow::anyhow!("task cancelled")),
                result = task.run(dependencies, &context) => result,
            }
        }
    };
    let mut handle = tokio::spawn(body.instrument(span));

    let body_result = tokio::select! {
        _ = state.cancel.cancelled() => {
            handle.abort();
            return Err(state.current_error());
        }
        joined = &mut handle => match joined {
            Ok(result) => result,
            Err(join_error) if join_error.is_panic() => {
                Err(anyhow::anyhow!("task panicked: {join_error}"))
            }
            Err(_aborted) => return Err(state.current_error()),
        },
    };

    let duration = start.elapsed();
    match body_result {
        Ok(output) => {
            state.reporters.broadcast(&TaskEvent::Completed {
                name: name.clone(),
                duration,
            });
            Ok(ExecutionResult::Success(Arc::new(Success {
                task_name: name,
                output,
            })))
        }
        Err(error) => {
            if state.cancel.is_cancelled() {
                // cooperate with an already-failing run instead of recording
                // a bogus failure for a cancelled task
                return Err(state.current_error());
            }
            state.reporters.broadcast(&TaskEvent::Failed {
                name: name.clone(),
                duration,
                error: format!("{error:#}"),
            });
            let error = Arc::new(error);
            match state.mode {
                Mode::Greedy => Ok(ExecutionResult::Failure(Arc::new(Failure {
                    task_name: name,
                    error,
                }))),
                Mode::FailFast => Err(state.fatal(
                    TaskExecutionFailed {
                        task_name: name,
                        cause: error,
                    }
                    .into(),
                )),
            }
        }
    }
}
