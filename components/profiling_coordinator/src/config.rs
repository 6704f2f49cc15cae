//! Profiling configuration
//!
//! [`ProfilingOptions`] is what an integrator writes: every field optional,
//! camelCase JSON keys. [`ProfilingConfig`] is the validated form the
//! coordinator runs from.

use instrumentation::ModeKind;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigurationError;

/// Default peak memory sampling interval in milliseconds
pub const DEFAULT_PEAK_MEMORY_INTERVAL_MS: i64 = 1000;

/// Integrator-facing options
///
/// Omitted keys take their defaults and unknown keys are ignored.
///
/// # Example
///
/// ```
/// use profiling_coordinator::ProfilingOptions;
///
/// let options = ProfilingOptions::from_json_str(
///     r#"{"heapProfile": true, "outputPath": "out/profile.heapprofile"}"#,
/// )
/// .unwrap();
/// assert!(options.heap_profile);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProfilingOptions {
    /// Track peak resident memory over the cycle
    pub check_peak_memory: bool,
    /// Peak memory sampling interval (default 1000)
    pub check_peak_memory_interval_ms: Option<i64>,
    /// Record a sampling heap profile
    pub heap_profile: bool,
    /// Track every allocation
    pub allocation_tracking: bool,
    /// Capture a heap snapshot at after-completion
    pub heap_snapshot: bool,
    /// Sampling profile destination
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
    /// Allocation summary destination
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allocation_output_path: Option<PathBuf>,
    /// Heap snapshot destination
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_output_path: Option<PathBuf>,
    /// Bound on every protocol round trip; unbounded when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_timeout_ms: Option<u64>,
}

impl ProfilingOptions {
    /// Parse options from JSON text
    pub fn from_json_str(text: &str) -> Result<Self, ConfigurationError> {
        Ok(serde_json::from_str(text)?)
    }

    fn is_enabled(&self, kind: ModeKind) -> bool {
        match kind {
            ModeKind::SamplingProfile => self.heap_profile,
            ModeKind::AllocationTracking => self.allocation_tracking,
            ModeKind::HeapSnapshot => self.heap_snapshot,
        }
    }

    fn path(&self, kind: ModeKind) -> Option<&PathBuf> {
        match kind {
            ModeKind::SamplingProfile => self.output_path.as_ref(),
            ModeKind::AllocationTracking => self.allocation_output_path.as_ref(),
            ModeKind::HeapSnapshot => self.snapshot_output_path.as_ref(),
        }
    }
}

/// Where one mode writes its artifact
#[derive(Debug, Clone, PartialEq, Eq)]
enum OutputPath {
    /// Supplied by the integrator; never rewritten
    Explicit(PathBuf),
    /// Default file name, possibly placed in the pipeline's output directory
    Default(PathBuf),
}

impl OutputPath {
    fn path(&self) -> &Path {
        match self {
            OutputPath::Explicit(path) | OutputPath::Default(path) => path,
        }
    }
}

/// Validated profiling configuration
///
/// Built once, then patched at most once when bound to a pipeline: paths
/// that were not supplied are placed in the pipeline's output directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfilingConfig {
    modes: BTreeSet<ModeKind>,
    check_peak_memory: bool,
    peak_memory_interval: Duration,
    command_timeout: Option<Duration>,
    output_paths: BTreeMap<ModeKind, OutputPath>,
}

impl ProfilingConfig {
    /// Create a new builder for ProfilingConfig
    ///
    /// # Example
    ///
    /// ```
    /// use profiling_coordinator::ProfilingConfig;
    ///
    /// let config = ProfilingConfig::builder()
    ///     .heap_profile(true)
    ///     .check_peak_memory(true)
    ///     .build()
    ///     .unwrap();
    /// assert!(config.is_active());
    /// ```
    pub fn builder() -> ProfilingConfigBuilder {
        ProfilingConfigBuilder::default()
    }

    /// Validate `options`
    pub fn from_options(options: &ProfilingOptions) -> Result<Self, ConfigurationError> {
        let interval_ms = options
            .check_peak_memory_interval_ms
            .unwrap_or(DEFAULT_PEAK_MEMORY_INTERVAL_MS);
        if interval_ms <= 0 {
            return Err(ConfigurationError::InvalidInterval(interval_ms));
        }

        let command_timeout = match options.command_timeout_ms {
            Some(0) => return Err(ConfigurationError::ZeroTimeout),
            Some(ms) => Some(Duration::from_millis(ms)),
            None => None,
        };

        let mut output_paths = BTreeMap::new();
        for kind in ModeKind::ALL {
            let path = match options.path(kind) {
                Some(path) if path.as_os_str().is_empty() => {
                    return Err(ConfigurationError::EmptyPath(kind))
                }
                Some(path) => OutputPath::Explicit(path.clone()),
                None => OutputPath::Default(PathBuf::from(kind.default_file_name())),
            };
            output_paths.insert(kind, path);
        }

        let modes: BTreeSet<ModeKind> = ModeKind::ALL
            .into_iter()
            .filter(|kind| options.is_enabled(*kind))
            .collect();

        let config = Self {
            modes,
            check_peak_memory: options.check_peak_memory,
            peak_memory_interval: Duration::from_millis(interval_ms as u64),
            command_timeout,
            output_paths,
        };
        config.check_path_conflicts()?;
        Ok(config)
    }

    fn check_path_conflicts(&self) -> Result<(), ConfigurationError> {
        let mut claimed: Vec<(ModeKind, &Path)> = Vec::new();
        for kind in &self.modes {
            let path = self.output_path(*kind);
            if let Some((first, _)) = claimed.iter().find(|(_, other)| *other == path) {
                return Err(ConfigurationError::PathConflict {
                    first: *first,
                    second: *kind,
                    path: path.to_path_buf(),
                });
            }
            claimed.push((*kind, path));
        }
        Ok(())
    }

    /// Place every default artifact path inside `dir`
    ///
    /// Explicitly supplied paths are left alone. If a resolved default lands
    /// on a path another enabled mode already writes to, the configuration is
    /// left unchanged and the clash is returned.
    pub fn resolve_output_dir(&mut self, dir: &Path) -> Result<(), ConfigurationError> {
        let mut resolved = self.clone();
        for (kind, path) in resolved.output_paths.iter_mut() {
            if let OutputPath::Default(_) = path {
                *path = OutputPath::Default(dir.join(kind.default_file_name()));
            }
        }
        resolved.check_path_conflicts()?;
        *self = resolved;
        Ok(())
    }

    /// Enabled modes, in start order
    pub fn modes(&self) -> impl Iterator<Item = ModeKind> + '_ {
        self.modes.iter().copied()
    }

    /// Whether `kind` is enabled
    pub fn is_enabled(&self, kind: ModeKind) -> bool {
        self.modes.contains(&kind)
    }

    /// Whether any mode is enabled
    pub fn has_modes(&self) -> bool {
        !self.modes.is_empty()
    }

    /// Whether either hook has anything to do
    pub fn is_active(&self) -> bool {
        self.has_modes() || self.check_peak_memory
    }

    /// Whether peak memory is tracked
    pub fn check_peak_memory(&self) -> bool {
        self.check_peak_memory
    }

    /// Peak memory sampling interval
    pub fn peak_memory_interval(&self) -> Duration {
        self.peak_memory_interval
    }

    /// Bound on each protocol round trip
    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout
    }

    /// Artifact destination of `kind`
    pub fn output_path(&self, kind: ModeKind) -> &Path {
        self.output_paths
            .get(&kind)
            .map(OutputPath::path)
            .unwrap_or_else(|| Path::new(kind.default_file_name()))
    }

    /// Whether the destination of `kind` was supplied by the integrator
    pub fn has_explicit_path(&self, kind: ModeKind) -> bool {
        matches!(self.output_paths.get(&kind), Some(OutputPath::Explicit(_)))
    }
}

impl Default for ProfilingConfig {
    /// Nothing enabled, default paths, 1000 ms interval, no timeout
    fn default() -> Self {
        let output_paths = ModeKind::ALL
            .into_iter()
            .map(|kind| (kind, OutputPath::Default(PathBuf::from(kind.default_file_name()))))
            .collect();
        Self {
            modes: BTreeSet::new(),
            check_peak_memory: false,
            peak_memory_interval: Duration::from_millis(DEFAULT_PEAK_MEMORY_INTERVAL_MS as u64),
            command_timeout: None,
            output_paths,
        }
    }
}

impl TryFrom<ProfilingOptions> for ProfilingConfig {
    type Error = ConfigurationError;

    fn try_from(options: ProfilingOptions) -> Result<Self, Self::Error> {
        Self::from_options(&options)
    }
}

/// Builder for ProfilingConfig
///
/// Provides a fluent interface over [`ProfilingOptions`]; validation happens
/// in [`build`](Self::build).
#[derive(Debug, Clone, Default)]
pub struct ProfilingConfigBuilder {
    options: ProfilingOptions,
}

impl ProfilingConfigBuilder {
    /// Record a sampling heap profile
    pub fn heap_profile(mut self, enabled: bool) -> Self {
        self.options.heap_profile = enabled;
        self
    }

    /// Track every allocation
    pub fn allocation_tracking(mut self, enabled: bool) -> Self {
        self.options.allocation_tracking = enabled;
        self
    }

    /// Capture a heap snapshot at after-completion
    pub fn heap_snapshot(mut self, enabled: bool) -> Self {
        self.options.heap_snapshot = enabled;
        self
    }

    /// Track peak memory
    pub fn check_peak_memory(mut self, enabled: bool) -> Self {
        self.options.check_peak_memory = enabled;
        self
    }

    /// Set the peak memory sampling interval
    ///
    /// # Arguments
    ///
    /// * `interval_ms` - Milliseconds between readings, must be positive
    pub fn peak_memory_interval_ms(mut self, interval_ms: i64) -> Self {
        self.options.check_peak_memory_interval_ms = Some(interval_ms);
        self
    }

    /// Set the sampling profile destination
    pub fn output_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.options.output_path = Some(path.into());
        self
    }

    /// Set the allocation summary destination
    pub fn allocation_output_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.options.allocation_output_path = Some(path.into());
        self
    }

    /// Set the heap snapshot destination
    pub fn snapshot_output_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.options.snapshot_output_path = Some(path.into());
        self
    }

    /// Bound every protocol round trip
    pub fn command_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.options.command_timeout_ms = Some(timeout_ms);
        self
    }

    /// Build the ProfilingConfig
    ///
    /// Uses default values for any options not explicitly set.
    pub fn build(self) -> Result<ProfilingConfig, ConfigurationError> {
        ProfilingConfig::from_options(&self.options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ProfilingConfig::default();

        assert!(!config.is_active());
        assert_eq!(config.peak_memory_interval(), Duration::from_millis(1000));
        assert_eq!(config.command_timeout(), None);
        assert_eq!(
            config.output_path(ModeKind::SamplingProfile),
            Path::new("v8-heap-sample.heapprofile")
        );
        assert_eq!(ProfilingConfig::builder().build().unwrap(), config);
    }

    #[test]
    fn test_options_from_json() {
        let options = ProfilingOptions::from_json_str(
            r#"{
                "heapProfile": true,
                "checkPeakMemory": true,
                "checkPeakMemoryIntervalMs": 100,
                "outputPath": "out/sub/profile.heapprofile",
                "somethingElse": 1
            }"#,
        )
        .unwrap();
        let config = ProfilingConfig::from_options(&options).unwrap();

        assert_eq!(config.modes().collect::<Vec<_>>(), vec![ModeKind::SamplingProfile]);
        assert!(config.check_peak_memory());
        assert_eq!(config.peak_memory_interval(), Duration::from_millis(100));
        assert!(config.has_explicit_path(ModeKind::SamplingProfile));
    }

    #[test]
    fn test_non_positive_interval_rejected() {
        for interval in [0, -5] {
            let err = ProfilingConfig::builder()
                .check_peak_memory(true)
                .peak_memory_interval_ms(interval)
                .build()
                .unwrap_err();
            assert!(matches!(err, ConfigurationError::InvalidInterval(i) if i == interval));
        }
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let err = ProfilingConfig::builder().command_timeout_ms(0).build().unwrap_err();
        assert!(matches!(err, ConfigurationError::ZeroTimeout));

        let config = ProfilingConfig::builder().command_timeout_ms(250).build().unwrap();
        assert_eq!(config.command_timeout(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_empty_path_rejected() {
        let err = ProfilingConfig::builder().snapshot_output_path("").build().unwrap_err();
        assert!(matches!(err, ConfigurationError::EmptyPath(ModeKind::HeapSnapshot)));
    }

    #[test]
    fn test_conflicting_paths_rejected() {
        let err = ProfilingConfig::builder()
            .heap_profile(true)
            .allocation_tracking(true)
            .output_path("heap.json")
            .allocation_output_path("heap.json")
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigurationError::PathConflict {
                first: ModeKind::SamplingProfile,
                second: ModeKind::AllocationTracking,
                ..
            }
        ));

        // Only enabled modes claim their path
        ProfilingConfig::builder()
            .heap_profile(true)
            .output_path("heap.json")
            .allocation_output_path("heap.json")
            .build()
            .unwrap();
    }

    #[test]
    fn test_resolve_output_dir_keeps_explicit_paths() {
        let mut config = ProfilingConfig::builder()
            .heap_profile(true)
            .heap_snapshot(true)
            .snapshot_output_path("snapshots/build.heapsnapshot")
            .build()
            .unwrap();
        config.resolve_output_dir(Path::new("dist")).unwrap();

        assert_eq!(
            config.output_path(ModeKind::SamplingProfile),
            Path::new("dist/v8-heap-sample.heapprofile")
        );
        assert_eq!(
            config.output_path(ModeKind::HeapSnapshot),
            Path::new("snapshots/build.heapsnapshot")
        );
    }

    #[test]
    fn test_resolve_output_dir_rejects_clash() {
        let mut config = ProfilingConfig::builder()
            .heap_profile(true)
            .allocation_tracking(true)
            .allocation_output_path("dist/v8-heap-sample.heapprofile")
            .build()
            .unwrap();

        let err = config.resolve_output_dir(Path::new("dist")).unwrap_err();

        match err {
            ConfigurationError::PathConflict { first, second, path } => {
                assert_eq!(first, ModeKind::SamplingProfile);
                assert_eq!(second, ModeKind::AllocationTracking);
                assert_eq!(path, PathBuf::from("dist/v8-heap-sample.heapprofile"));
            }
            other => panic!("Expected path conflict, got {:?}", other),
        }
        // Nothing was moved
        assert_eq!(
            config.output_path(ModeKind::SamplingProfile),
            Path::new("v8-heap-sample.heapprofile")
        );
    }
}
