//! A task pipeline that fires lifecycle hooks around one async job

use profiling_coordinator::{LifecycleHooks, Pipeline, ProfilingError};
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error};

/// Which lifecycle event a hook failed in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPhase {
    /// Before the job ran
    BeforeRun,
    /// After the job finished
    AfterCompletion,
}

impl fmt::Display for HookPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookPhase::BeforeRun => f.write_str("before-run"),
            HookPhase::AfterCompletion => f.write_str("after-completion"),
        }
    }
}

/// A hook that returned an error
#[derive(Debug)]
pub struct HookFailure {
    /// Name the hook was registered under
    pub hook: String,
    /// Event it failed in
    pub phase: HookPhase,
    /// What went wrong
    pub error: ProfilingError,
}

/// Outcome of [`TaskPipeline::run`]
#[derive(Debug)]
pub struct PipelineReport<T> {
    /// What the job returned
    pub output: T,
    /// Hooks that failed, in the order they ran
    pub hook_failures: Vec<HookFailure>,
}

impl<T> PipelineReport<T> {
    /// Whether every hook succeeded
    pub fn is_clean(&self) -> bool {
        self.hook_failures.is_empty()
    }
}

/// Runs one async job between the before-run and after-completion hooks
///
/// Hook failures never replace the job's output. A failed before-run hook
/// does not stop the job or the after-completion hooks.
///
/// # Example
///
/// ```
/// use heap_telemetry::TaskPipeline;
///
/// # #[tokio::main]
/// # async fn main() {
/// let pipeline = TaskPipeline::new().with_output_dir("dist");
/// let report = pipeline.run(|| async { 2 + 2 }).await;
/// assert_eq!(report.output, 4);
/// assert!(report.is_clean());
/// # }
/// ```
#[derive(Default)]
pub struct TaskPipeline {
    output_dir: Option<PathBuf>,
    hooks: Vec<(String, Arc<dyn LifecycleHooks>)>,
}

impl TaskPipeline {
    /// Create a pipeline with no output directory and no hooks
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `dir` as the pipeline's output directory
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    /// Names of the registered hooks, in registration order
    pub fn hook_names(&self) -> Vec<&str> {
        self.hooks.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Fire before-run, run `job`, fire after-completion
    pub async fn run<F, Fut, T>(&self, job: F) -> PipelineReport<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let mut hook_failures = Vec::new();

        for (name, hooks) in &self.hooks {
            debug!("Running before-run hook {}", name);
            if let Err(e) = hooks.on_before_run().await {
                error!("before-run hook {} failed: {}", name, e);
                hook_failures.push(HookFailure {
                    hook: name.clone(),
                    phase: HookPhase::BeforeRun,
                    error: e,
                });
            }
        }

        let output = job().await;

        for (name, hooks) in &self.hooks {
            debug!("Running after-completion hook {}", name);
            if let Err(e) = hooks.on_after_completion().await {
                error!("after-completion hook {} failed: {}", name, e);
                hook_failures.push(HookFailure {
                    hook: name.clone(),
                    phase: HookPhase::AfterCompletion,
                    error: e,
                });
            }
        }

        PipelineReport {
            output,
            hook_failures,
        }
    }
}

impl Pipeline for TaskPipeline {
    fn output_dir(&self) -> Option<&Path> {
        self.output_dir.as_deref()
    }

    fn register_hooks(&mut self, name: &str, hooks: Arc<dyn LifecycleHooks>) {
        debug!("Registered lifecycle hooks {}", name);
        self.hooks.push((name.to_string(), hooks));
    }
}

impl fmt::Debug for TaskPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskPipeline")
            .field("output_dir", &self.output_dir)
            .field("hooks", &self.hook_names())
            .finish()
    }
}
