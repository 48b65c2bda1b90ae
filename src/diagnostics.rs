//! Process memory diagnostics.
//!
//! Reads `/proc/self/status` and logs the resident set at `debug` level under
//! the `Memory` target. Nothing here can fail the run: an unreadable or
//! unfamiliar status file just produces no log line.

use log::debug;
use std::fs;

const STATUS_PATH: &str = "/proc/self/status";

/// Memory figures from a `/proc/<pid>/status` file, in kB.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryUsage {
    /// Current resident set (`VmRSS`)
    pub resident_kb: u64,
    /// Peak resident set (`VmHWM`)
    pub peak_resident_kb: u64,
    /// Virtual size (`VmSize`)
    pub virtual_kb: u64,
    pub threads: u64,
}

/// Parse the fields of interest out of a status file.
///
/// Returns `None` when `VmRSS` is missing, e.g. for kernel threads or on
/// systems without procfs.
pub fn parse_status(status: &str) -> Option<MemoryUsage> {
    let mut usage = MemoryUsage::default();
    let mut resident = None;

    for line in status.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        // "  123456 kB" or "  4"
        let Some(number) = value
            .split_whitespace()
            .next()
            .and_then(|n| n.parse::<u64>().ok())
        else {
            continue;
        };
        match key {
            "VmRSS" => resident = Some(number),
            "VmHWM" => usage.peak_resident_kb = number,
            "VmSize" => usage.virtual_kb = number,
            "Threads" => usage.threads = number,
            _ => {}
        }
    }

    usage.resident_kb = resident?;
    Some(usage)
}

/// Current memory usage of this process, if procfs is available.
pub fn current_usage() -> Option<MemoryUsage> {
    fs::read_to_string(STATUS_PATH)
        .ok()
        .and_then(|status| parse_status(&status))
}

/// Log resident memory after `stage`.
pub fn log_memory(stage: &str) {
    if !log::log_enabled!(target: "Memory", log::Level::Debug) {
        return;
    }
    if let Some(usage) = current_usage() {
        debug!(
            target: "Memory",
            "After {}: resident {} kB (peak {} kB), virtual {} kB, {} threads",
            stage,
            usage.resident_kb,
            usage.peak_resident_kb,
            usage.virtual_kb,
            usage.threads
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_STATUS: &str = "\
Name:\tweather-station
Umask:\t0022
State:\tS (sleeping)
Pid:\t4121
VmPeak:\t  215436 kB
VmSize:\t  213388 kB
VmHWM:\t    9876 kB
VmRSS:\t    8532 kB
RssAnon:\t    2304 kB
Threads:\t5
voluntary_ctxt_switches:\t112
";

    #[test]
    fn test_parse_status_fields() {
        let usage = parse_status(SAMPLE_STATUS).unwrap();
        assert_eq!(
            usage,
            MemoryUsage {
                resident_kb: 8532,
                peak_resident_kb: 9876,
                virtual_kb: 213388,
                threads: 5,
            }
        );
    }

    #[test]
    fn test_missing_resident_set_is_none() {
        // Kernel threads report no Vm* lines at all
        let status = "Name:\tkworker/0:1\nState:\tI (idle)\nThreads:\t1\n";
        assert_eq!(parse_status(status), None);
        assert_eq!(parse_status(""), None);
    }

    #[test]
    fn test_garbage_lines_are_skipped() {
        let status = "VmHWM: lots kB\nnot a field\nVmRSS:\t 42 kB\n";
        let usage = parse_status(status).unwrap();
        assert_eq!(usage.resident_kb, 42);
        assert_eq!(usage.peak_resident_kb, 0);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_current_process_has_resident_memory() {
        let usage = current_usage().unwrap();
        assert!(usage.resident_kb > 0);
        assert!(usage.threads >= 1);
    }

    #[test]
    fn test_log_memory_never_panics() {
        log_memory("test");
    }
}
