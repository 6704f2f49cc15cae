//! Profiling session coordinator

use artifact_writer::{ArtifactWriter, WrittenArtifact};
use async_trait::async_trait;
use instrumentation::{
    AllocationTrackingMode, HeapSnapshotMode, InstrumentationMode, ModeKind,
    SamplingProfileMode,
};
use memory_sampler::{MemoryReader, PeakMemoryReport, PeakMemorySampler, ProcessMemoryReader};
use protocol_session::{ProtocolSession, Transport};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::{ProfilingConfig, ProfilingOptions};
use crate::error::{ConfigurationError, ProfilingError, Result, TeardownFailure};
use crate::hooks::{LifecycleHooks, Pipeline};

/// Name the coordinator registers its hooks under
pub const HOOK_NAME: &str = "HeapProfilingCoordinator";

/// Creates the memory reader for each cycle's sampler
pub type MemoryReaderFactory = Arc<dyn Fn() -> Box<dyn MemoryReader> + Send + Sync>;

/// What one completed cycle produced
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    /// Artifacts written, in mode order
    pub artifacts: Vec<WrittenArtifact>,
    /// Peak memory figures, when tracked
    pub peak_memory: Option<PeakMemoryReport>,
}

/// State that lives from before-run to after-completion
#[derive(Default)]
struct ActiveCycle {
    session: Option<ProtocolSession>,
    modes: Vec<Box<dyn InstrumentationMode>>,
    sampler: Option<PeakMemorySampler>,
}

/// Multiplexes the enabled instrumentation modes onto one protocol session
///
/// A coordinator is long-lived and may observe many cycles. Each cycle opens
/// a fresh [`ProtocolSession`] at before-run, starts the enabled modes in a
/// fixed order, and at after-completion stops every mode, writes its
/// artifact, disables the session and reports peak memory.
///
/// # Example
///
/// ```
/// use profiler_domains::HeapProfilerDomain;
/// use profiling_coordinator::{ProfilingConfig, ProfilingCoordinator};
/// use protocol_session::LocalTransport;
/// use std::sync::Arc;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let transport = LocalTransport::new();
/// transport.register_domain(Arc::new(HeapProfilerDomain::new(transport.event_bus())));
///
/// let config = ProfilingConfig::builder().build()?;
/// let coordinator = ProfilingCoordinator::new(config, Arc::new(transport));
/// coordinator.before_run().await?;
/// let report = coordinator.after_completion().await?;
/// assert!(report.artifacts.is_empty());
/// # Ok(())
/// # }
/// ```
pub struct ProfilingCoordinator {
    config: ProfilingConfig,
    transport: Arc<dyn Transport>,
    writer: ArtifactWriter,
    memory_reader: MemoryReaderFactory,
    cycle: Mutex<Option<ActiveCycle>>,
}

impl ProfilingCoordinator {
    /// Create a coordinator writing to the local filesystem and sampling
    /// this process's resident memory
    pub fn new(config: ProfilingConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            config,
            transport,
            writer: ArtifactWriter::filesystem(),
            memory_reader: Arc::new(|| {
                Box::new(ProcessMemoryReader::current()) as Box<dyn MemoryReader>
            }),
            cycle: Mutex::new(None),
        }
    }

    /// Validate `options` and create a coordinator
    pub fn from_options(
        options: &ProfilingOptions,
        transport: Arc<dyn Transport>,
    ) -> std::result::Result<Self, ConfigurationError> {
        Ok(Self::new(ProfilingConfig::from_options(options)?, transport))
    }

    /// Persist artifacts through `writer`
    pub fn with_writer(mut self, writer: ArtifactWriter) -> Self {
        self.writer = writer;
        self
    }

    /// Take peak memory readings from readers made by `factory`
    pub fn with_memory_reader<F, R>(mut self, factory: F) -> Self
    where
        F: Fn() -> R + Send + Sync + 'static,
        R: MemoryReader,
    {
        self.memory_reader = Arc::new(move || Box::new(factory()) as Box<dyn MemoryReader>);
        self
    }

    /// Bind to `pipeline`
    ///
    /// Artifact paths that were not supplied are placed in the pipeline's
    /// output directory, then the lifecycle hooks are registered. If that
    /// placement makes two enabled modes share a destination, no hooks are
    /// registered and the clash is returned.
    pub fn apply<P: Pipeline + ?Sized>(mut self, pipeline: &mut P) -> Result<Arc<Self>> {
        if let Some(dir) = pipeline.output_dir() {
            if let Err(e) = self.config.resolve_output_dir(dir) {
                error!("Not binding heap profiling: {}", e);
                return Err(e.into());
            }
        }
        for kind in self.config.modes() {
            debug!("{} artifact path: {}", kind, self.config.output_path(kind).display());
        }

        let coordinator = Arc::new(self);
        pipeline.register_hooks(HOOK_NAME, coordinator.clone());
        Ok(coordinator)
    }

    /// Configuration in effect
    pub fn config(&self) -> &ProfilingConfig {
        &self.config
    }

    /// Whether a cycle has started and not completed
    pub async fn is_cycle_active(&self) -> bool {
        self.cycle.lock().await.is_some()
    }

    /// Open the session and start every enabled mode and the sampler
    ///
    /// If a mode fails to start, modes already started are stopped, the
    /// session is disabled and the error is returned; no sampler is started.
    pub async fn before_run(&self) -> Result<()> {
        let mut slot = self.cycle.lock().await;
        if slot.is_some() {
            return Err(ProfilingError::CycleAlreadyActive);
        }
        if !self.config.is_active() {
            debug!("Heap profiling disabled, nothing to start");
            return Ok(());
        }

        let mut cycle = ActiveCycle::default();
        if self.config.has_modes() {
            let session = ProtocolSession::new(self.transport.clone())
                .with_command_timeout(self.config.command_timeout());
            if let Err(e) = session.enable().await {
                error!("Failed to enable heap profiler: {}", e);
                return Err(e.into());
            }

            for kind in self.config.modes() {
                let mut mode = self.build_mode(kind);
                if let Err(e) = mode.start(&session).await {
                    error!("Failed to start {}: {}", kind, e);
                    roll_back(&session, &mut cycle.modes).await;
                    return Err(ProfilingError::Start {
                        mode: kind,
                        source: e,
                    });
                }
                cycle.modes.push(mode);
            }
            cycle.session = Some(session);
        }

        if self.config.check_peak_memory() {
            let mut reader = (self.memory_reader)();
            let mut sampler = PeakMemorySampler::new(move || reader.read_bytes());
            sampler.start(self.config.peak_memory_interval());
            cycle.sampler = Some(sampler);
        }

        info!(
            modes = cycle.modes.len(),
            peak_memory = cycle.sampler.is_some(),
            "Heap profiling cycle started"
        );
        *slot = Some(cycle);
        Ok(())
    }

    /// Stop every started mode, write artifacts, disable the session and
    /// report peak memory
    ///
    /// Each step runs even if an earlier one failed; failures are collected
    /// into [`ProfilingError::Teardown`].
    pub async fn after_completion(&self) -> Result<CycleReport> {
        let Some(mut cycle) = self.cycle.lock().await.take() else {
            if self.config.is_active() {
                warn!("after-completion without an active profiling cycle");
            }
            return Ok(CycleReport::default());
        };

        let mut report = CycleReport::default();
        let mut failures = Vec::new();

        if let Some(session) = cycle.session.take() {
            for mode in cycle.modes.iter_mut() {
                match mode.finish(&session, &self.writer).await {
                    Ok(Some(written)) => report.artifacts.push(written),
                    Ok(None) => {}
                    Err(e) => {
                        warn!("Failed to complete {}: {}", mode.kind(), e);
                        failures.push(TeardownFailure::Mode {
                            mode: mode.kind(),
                            source: e,
                        });
                    }
                }
            }

            if let Err(e) = session.disable().await {
                warn!("Failed to disable heap profiler: {}", e);
                failures.push(TeardownFailure::Disable(e));
            }
        }

        if let Some(mut sampler) = cycle.sampler.take() {
            let peak = sampler.dispose();
            info!(
                peak_bytes = peak.peak_bytes,
                samples = peak.samples,
                "Peak memory usage: {:.2} MB",
                peak.megabytes()
            );
            report.peak_memory = Some(peak);
        }

        info!(artifacts = report.artifacts.len(), "Heap profiling cycle finished");
        if failures.is_empty() {
            Ok(report)
        } else {
            Err(ProfilingError::Teardown { failures })
        }
    }

    fn build_mode(&self, kind: ModeKind) -> Box<dyn InstrumentationMode> {
        let path = self.config.output_path(kind);
        match kind {
            ModeKind::SamplingProfile => Box::new(SamplingProfileMode::new(path)),
            ModeKind::AllocationTracking => Box::new(AllocationTrackingMode::new(path)),
            ModeKind::HeapSnapshot => Box::new(HeapSnapshotMode::new(path)),
        }
    }
}

/// Undo a partial start: stop what was started, then disable
async fn roll_back(session: &ProtocolSession, started: &mut [Box<dyn InstrumentationMode>]) {
    for mode in started.iter_mut().rev() {
        // Artifacts of an aborted cycle are discarded unwritten
        if let Err(e) = mode.stop(session).await {
            warn!("Failed to roll back {}: {}", mode.kind(), e);
        }
    }
    if let Err(e) = session.disable().await {
        warn!("Failed to disable heap profiler after start failure: {}", e);
    }
}

#[async_trait]
impl LifecycleHooks for ProfilingCoordinator {
    async fn on_before_run(&self) -> Result<()> {
        self.before_run().await
    }

    async fn on_after_completion(&self) -> Result<()> {
        self.after_completion().await.map(|_| ())
    }
}

impl std::fmt::Debug for ProfilingCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProfilingCoordinator")
            .field("config", &self.config)
            .field("writer", &self.writer)
            .finish()
    }
}
