//! Task execution reporting

use std::sync::Arc;
use std::time::Duration;

use gantry_core::TaskName;

/// Events emitted during graph execution
#[derive(Debug, Clone)]
pub enum TaskEvent {
    /// A run was requested for the given root tasks
    RunStarted {
        roots: Vec<TaskName>,
    },
    /// A task is starting execution
    Started {
        name: TaskName,
    },
    /// A task completed successfully
    Completed {
        name: TaskName,
        duration: Duration,
    },
    /// A task failed
    Failed {
        name: TaskName,
        duration: Duration,
        error: String,
    },
    /// A task was skipped because dependencies failed
    Skipped {
        name: TaskName,
        failed_dependencies: Vec<TaskName>,
    },
    /// The whole run finished
    RunCompleted {
        total: usize,
        succeeded: usize,
        failed: usize,
        skipped: usize,
        duration: Duration,
    },
}

/// Trait for reporting task execution progress
pub trait TaskReporter: Send + Sync {
    /// Handle a task event
    fn report(&self, event: &TaskEvent);
}

/// Simple reporter that logs to tracing
#[derive(Debug, Default)]
pub struct TracingReporter;

impl TaskReporter for TracingReporter {
    fn report(&self, event: &TaskEvent) {
        match event {
            TaskEvent::RunStarted { roots } => {
                tracing::info!("Running {} root task(s)", roots.len());
            }
            TaskEvent::Started { name } => {
                tracing::info!("Starting {}", name);
            }
            TaskEvent::Completed { name, duration } => {
                tracing::info!("{} completed in {:.1}s", name, duration.as_secs_f64());
            }
            TaskEvent::Failed {
                name,
                duration,
                error,
            } => {
                tracing::error!("{} failed after {:.1}s: {}", name, duration.as_secs_f64(), error);
            }
            TaskEvent::Skipped {
                name,
                failed_dependencies,
            } => {
                let causes: Vec<&str> =
                    failed_dependencies.iter().map(TaskName::as_str).collect();
                tracing::warn!("{} skipped, failed dependencies: {}", name, causes.join(", "));
            }
            TaskEvent::RunCompleted {
                total,
                succeeded,
                failed,
                skipped,
                duration,
            } => {
                tracing::info!(
                    "Run complete: {}/{} succeeded, {} failed, {} skipped ({:.1}s)",
                    succeeded,
                    total,
                    failed,
                    skipped,
                    duration.as_secs_f64()
                );
            }
        }
    }
}

/// Reporter that collects events for later inspection (useful for testing)
#[derive(Debug, Default)]
pub struct CollectingReporter {
    events: std::sync::Mutex<Vec<TaskEvent>>,
}

impl CollectingReporter {
    /// Get all collected events
    pub fn events(&self) -> Vec<TaskEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl TaskReporter for CollectingReporter {
    fn report(&self, event: &TaskEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

/// Registry of task reporters
pub struct TaskReporterRegistry {
    reporters: Vec<Arc<dyn TaskReporter>>,
}

impl TaskReporterRegistry {
    pub fn new() -> Self {
        Self {
            reporters: vec![Arc::new(TracingReporter)],
        }
    }

    pub fn empty() -> Self {
        Self {
            reporters: Vec::new(),
        }
    }

    pub fn register<R: TaskReporter + 'static>(&mut self, reporter: R) {
        self.reporters.push(Arc::new(reporter));
    }

    pub fn register_shared(&mut self, reporter: Arc<dyn TaskReporter>) {
        self.reporters.push(reporter);
    }

    pub fn all(&self) -> &[Arc<dyn TaskReporter>] {
        &self.reporters
    }

    /// Broadcast an event to all registered reporters
    pub fn broadcast(&self, event: &TaskEvent) {
        for reporter in &self.reporters {
            reporter.report(event);
        }
    }
}

impl Default for TaskReporterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collecting_reporter() {
        let reporter = CollectingReporter::default();
        let name = TaskName::new(":app:build");

        reporter.report(&TaskEvent::Started { name: name.clone() });
        reporter.report(&TaskEvent::Completed {
            name,
            duration: Duration::from_secs(5),
        });

        let events = reporter.events();
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn test_tracing_reporter() {
        let reporter = TracingReporter;
        let name = TaskName::new(":app:build");

        // Just verify it doesn't panic
        reporter.report(&TaskEvent::Started { name: name.clone() });
        reporter.report(&TaskEvent::Skipped {
            name,
            failed_dependencies: vec![TaskName::new(":app:resolve")],
        });
    }

    #[test]
    fn test_empty_registry() {
        let registry = TaskReporterRegistry::empty();
        assert!(registry.all().is_empty());
    }

    #[test]
    fn test_broadcast() {
        let collecting = Arc::new(CollectingReporter::default());
        let mut registry = TaskReporterRegistry::empty();
        registry.register_shared(collecting.clone());

        registry.broadcast(&TaskEvent::RunStarted {
            roots: vec![TaskName::new(":app:build")],
        });

        assert_eq!(collecting.events().len(), 1);
    }

    #[test]
    fn test_register() {
        let mut registry = TaskReporterRegistry::empty();
        assert!(registry.all().is_empty());

        registry.register(TracingReporter);
        assert_eq!(registry.all().len(), 1);

        registry.register(CollectingReporter::default());
        assert_eq!(registry.all().len(), 2);
    }
}
