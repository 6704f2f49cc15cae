//! Peak memory sampler

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

use crate::reader::MemoryReader;

const BYTES_PER_MEGABYTE: f64 = 1024.0 * 1024.0;

/// Periodically reads memory and retains the highest value seen
///
/// The polling task is owned by the sampler: [`dispose`](Self::dispose) or
/// dropping the sampler cancels it. The task is a plain tokio task, so a
/// pending tick never keeps the runtime from shutting down.
pub struct PeakMemorySampler {
    /// Highest reading so far
    peak: Arc<AtomicU64>,
    /// Number of readings taken
    samples: Arc<AtomicU64>,
    /// Set once disposed; the task checks it before recording
    stopped: Arc<AtomicBool>,
    /// Reader, until the task takes ownership of it
    reader: Option<Box<dyn MemoryReader>>,
    /// Polling task
    task: Option<JoinHandle<()>>,
}

impl PeakMemorySampler {
    /// Create an idle sampler reading from `reader`
    pub fn new(reader: impl MemoryReader) -> Self {
        Self {
            peak: Arc::new(AtomicU64::new(0)),
            samples: Arc::new(AtomicU64::new(0)),
            stopped: Arc::new(AtomicBool::new(false)),
            reader: Some(Box::new(reader)),
            task: None,
        }
    }

    /// Start polling every `interval`
    ///
    /// The first reading is taken one interval after the start. Calling this
    /// on a sampler that is running or was disposed does nothing.
    pub fn start(&mut self, interval: Duration) {
        let Some(mut reader) = self.reader.take() else {
            debug!("Peak memory sampler already started");
            return;
        };

        let peak = Arc::clone(&self.peak);
        let samples = Arc::clone(&self.samples);
        let stopped = Arc::clone(&self.stopped);

        debug!("Starting peak memory sampler every {:?}", interval);
        self.task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                if stopped.load(Ordering::SeqCst) {
                    break;
                }
                if let Some(reading) = reader.read_bytes() {
                    peak.fetch_max(reading, Ordering::SeqCst);
                    samples.fetch_add(1, Ordering::SeqCst);
                }
            }
        }));
    }

    /// Whether the polling task is live
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Highest reading so far, zero when nothing was sampled
    pub fn peak(&self) -> u64 {
        self.peak.load(Ordering::SeqCst)
    }

    /// Number of readings taken
    pub fn sample_count(&self) -> u64 {
        self.samples.load(Ordering::SeqCst)
    }

    /// Current figures as a report
    pub fn report(&self) -> PeakMemoryReport {
        PeakMemoryReport {
            peak_bytes: self.peak(),
            samples: self.sample_count(),
        }
    }

    /// Cancel polling and return the final report
    ///
    /// After this returns no further reading is recorded. Safe to call more
    /// than once.
    pub fn dispose(&mut self) -> PeakMemoryReport {
        self.stopped.store(true, Ordering::SeqCst);
        self.reader = None;
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.report()
    }
}

impl Drop for PeakMemorySampler {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for PeakMemorySampler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeakMemorySampler")
            .field("peak", &self.peak())
            .field("samples", &self.sample_count())
            .field("running", &self.is_running())
            .finish()
    }
}

/// Final figures of one sampler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeakMemoryReport {
    /// Highest reading in bytes
    pub peak_bytes: u64,
    /// Number of readings taken
    pub samples: u64,
}

impl PeakMemoryReport {
    /// Peak in megabytes (MiB)
    pub fn megabytes(&self) -> f64 {
        self.peak_bytes as f64 / BYTES_PER_MEGABYTE
    }
}

impl fmt::Display for PeakMemoryReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Peak memory usage: {:.2} MB", self.megabytes())
    }
}
