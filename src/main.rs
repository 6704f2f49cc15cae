//! `heap-telemetry`: profile a V8 heap over a fixed observation window

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use heap_telemetry::{
    in_process_backend, ProcessMemoryReader, ProfilingCoordinator, ProfilingOptions,
    TaskPipeline, Transport, WebSocketTransport,
};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "heap-telemetry", about = "Capture heap profiles over one run", version)]
struct Cli {
    /// Inspector WebSocket URL; the in-process backend is used when omitted.
    #[arg(long)]
    inspector_url: Option<String>,

    /// JSON options file (camelCase keys).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Record a sampling heap profile.
    #[arg(long)]
    heap_profile: bool,

    /// Track every allocation.
    #[arg(long)]
    allocation_tracking: bool,

    /// Capture a heap snapshot when the window ends.
    #[arg(long)]
    heap_snapshot: bool,

    /// Track peak resident memory.
    #[arg(long)]
    check_peak_memory: bool,

    /// Milliseconds between peak memory readings.
    #[arg(long, allow_hyphen_values = true)]
    check_peak_memory_interval_ms: Option<i64>,

    /// Sampling profile destination.
    #[arg(long)]
    output_path: Option<PathBuf>,

    /// Allocation summary destination.
    #[arg(long)]
    allocation_output_path: Option<PathBuf>,

    /// Heap snapshot destination.
    #[arg(long)]
    snapshot_output_path: Option<PathBuf>,

    /// Bound on every protocol round trip.
    #[arg(long)]
    command_timeout_ms: Option<u64>,

    /// Directory for artifacts whose path was not given.
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Process whose resident memory is sampled (defaults to this one).
    #[arg(long)]
    pid: Option<u32>,

    /// Length of the observation window.
    #[arg(long, default_value_t = 1000)]
    duration_ms: u64,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

impl Cli {
    /// Layer command line flags over `options`
    fn merge_into(&self, options: &mut ProfilingOptions) {
        options.heap_profile |= self.heap_profile;
        options.allocation_tracking |= self.allocation_tracking;
        options.heap_snapshot |= self.heap_snapshot;
        options.check_peak_memory |= self.check_peak_memory;

        if self.check_peak_memory_interval_ms.is_some() {
            options.check_peak_memory_interval_ms = self.check_peak_memory_interval_ms;
        }
        if self.output_path.is_some() {
            options.output_path = self.output_path.clone();
        }
        if self.allocation_output_path.is_some() {
            options.allocation_output_path = self.allocation_output_path.clone();
        }
        if self.snapshot_output_path.is_some() {
            options.snapshot_output_path = self.snapshot_output_path.clone();
        }
        if self.command_timeout_ms.is_some() {
            options.command_timeout_ms = self.command_timeout_ms;
        }
    }
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    let mut options = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("cannot read {}", path.display()))?;
            ProfilingOptions::from_json_str(&text)?
        }
        None => ProfilingOptions::default(),
    };
    args.merge_into(&mut options);

    let transport: Arc<dyn Transport> = match &args.inspector_url {
        Some(url) => {
            info!("Connecting to inspector at {}", url);
            Arc::new(WebSocketTransport::connect(url).await?)
        }
        None => {
            info!("Using the in-process heap profiler backend");
            let (transport, _domain) = in_process_backend();
            transport
        }
    };

    let mut coordinator = ProfilingCoordinator::from_options(&options, transport)?;
    if let Some(pid) = args.pid {
        coordinator = coordinator.with_memory_reader(move || ProcessMemoryReader::for_pid(pid));
    }

    let mut pipeline = TaskPipeline::new();
    if let Some(dir) = &args.output_dir {
        pipeline = pipeline.with_output_dir(dir);
    }
    coordinator.apply(&mut pipeline)?;

    let window = Duration::from_millis(args.duration_ms);
    let report = pipeline
        .run(|| async move {
            info!("Observing for {:?}", window);
            tokio::time::sleep(window).await;
        })
        .await;

    for failure in &report.hook_failures {
        error!(hook = %failure.hook, phase = %failure.phase, "{}", failure.error);
    }
    if !report.is_clean() {
        anyhow::bail!("{} profiling hook(s) failed", report.hook_failures.len());
    }
    Ok(())
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| anyhow::anyhow!("failed to init tracing: {err}"))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| anyhow::anyhow!("failed to init tracing: {err}"))?,
    }

    Ok(())
}
