//! Per-run execution context shared with task bodies

use std::future::Future;
use std::sync::Mutex;

use futures::future::BoxFuture;

/// Context shared by every task of one executor run.
///
/// Tasks may defer work until the whole graph has finished; deferred hooks
/// run exactly once per run, whether the run succeeded or not, and never
/// across runs.
#[derive(Default)]
pub struct ExecutionContext {
    post_run_hooks: Mutex<Vec<BoxFuture<'static, ()>>>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a hook to await once the graph execution has completed.
    pub fn defer_post_run<F>(&self, hook: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.post_run_hooks.lock().unwrap().push(Box::pin(hook));
    }

    /// Drain and await every registered hook, in registration order.
    ///
    /// Called by the executor after the graph has finished; not intended
    /// for task bodies.
    pub async fn run_post_run_hooks(&self) {
        let hooks = std::mem::take(&mut *self.post_run_hooks.lock().unwrap());
        for hook in hooks {
            hook.await;
        }
    }
}
