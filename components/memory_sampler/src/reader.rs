//! Sources of memory readings

use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tracing::{debug, warn};

/// Something that can report a memory figure in bytes
///
/// Returning `None` means no reading was available for this tick; the
/// sampler skips it rather than recording zero.
pub trait MemoryReader: Send + 'static {
    /// Take one reading
    fn read_bytes(&mut self) -> Option<u64>;
}

impl<F> MemoryReader for F
where
    F: FnMut() -> Option<u64> + Send + 'static,
{
    fn read_bytes(&mut self) -> Option<u64> {
        self()
    }
}

/// Reads the resident set size of one process
pub struct ProcessMemoryReader {
    system: System,
    pid: Option<Pid>,
}

impl ProcessMemoryReader {
    /// Reader for the current process
    pub fn current() -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                warn!("Failed to get current PID: {}", e);
                None
            }
        };
        Self {
            system: System::new(),
            pid,
        }
    }

    /// Reader for the process with id `pid`
    pub fn for_pid(pid: u32) -> Self {
        Self {
            system: System::new(),
            pid: Some(Pid::from_u32(pid)),
        }
    }

    /// Process being observed
    pub fn pid(&self) -> Option<u32> {
        self.pid.map(|pid| pid.as_u32())
    }
}

impl MemoryReader for ProcessMemoryReader {
    fn read_bytes(&mut self) -> Option<u64> {
        let pid = self.pid?;
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            false,
            ProcessRefreshKind::nothing().with_memory(),
        );

        match self.system.process(pid) {
            Some(process) => {
                let rss_bytes = process.memory();
                debug!("Memory usage: RSS={} bytes", rss_bytes);
                Some(rss_bytes)
            }
            None => {
                warn!("Failed to get process information for pid {}", pid);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_process_has_resident_memory() {
        let mut reader = ProcessMemoryReader::current();
        assert!(reader.pid().is_some());
        assert!(reader.read_bytes().unwrap_or(0) > 0);
    }

    #[test]
    fn test_closure_reader() {
        let mut calls = 0u64;
        let mut reader = move || {
            calls += 1;
            Some(calls * 10)
        };
        assert_eq!(MemoryReader::read_bytes(&mut reader), Some(10));
        assert_eq!(MemoryReader::read_bytes(&mut reader), Some(20));
    }
}
