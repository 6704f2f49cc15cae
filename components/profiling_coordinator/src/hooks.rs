//! Host pipeline contract

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

use crate::error::ProfilingError;

/// The two lifecycle events a profiler binds to
///
/// The host fires `on_before_run` at most once before `on_after_completion`,
/// and never fires `on_after_completion` without a preceding `on_before_run`.
#[async_trait]
pub trait LifecycleHooks: Send + Sync {
    /// Fired before the pipeline begins its main work
    async fn on_before_run(&self) -> Result<(), ProfilingError>;

    /// Fired after the pipeline has finished all work, including output
    async fn on_after_completion(&self) -> Result<(), ProfilingError>;
}

/// A pipeline that lifecycle hooks can be registered with
pub trait Pipeline {
    /// Directory the pipeline writes its own output to, when it has one
    fn output_dir(&self) -> Option<&Path>;

    /// Register `hooks` under `name`
    fn register_hooks(&mut self, name: &str, hooks: Arc<dyn LifecycleHooks>);
}
