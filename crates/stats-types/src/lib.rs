use serde::{Deserialize, Serialize};

/// Value reported for a thread that has no counterpart in the base sample.
pub const UNKNOWN_USAGE_PCT: f64 = -1.0;

/// User/system CPU utilization over one sampling window, in percent of total CPU time.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct CpuUsage {
    /// User-mode share (own + reaped children).
    pub user_pct: f64,
    /// Kernel-mode share (own + reaped children).
    pub sys_pct: f64,
}

/// Per-thread utilization entry.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ThreadCpuReport {
    /// Kernel thread id.
    pub tid: u32,
    /// Thread command name.
    pub name: String,
    /// User-mode share, or [`UNKNOWN_USAGE_PCT`] when the thread started after the baseline.
    pub user_pct: f64,
    /// Kernel-mode share, or [`UNKNOWN_USAGE_PCT`] when the thread started after the baseline.
    pub sys_pct: f64,
    /// `false` when the thread was not present in the base sample.
    pub known: bool,
}

impl ThreadCpuReport {
    /// Entry for a thread missing from the base sample.
    pub fn unknown(tid: u32, name: impl Into<String>) -> Self {
        Self {
            tid,
            name: name.into(),
            user_pct: UNKNOWN_USAGE_PCT,
            sys_pct: UNKNOWN_USAGE_PCT,
            known: false,
        }
    }

    pub fn is_known(&self) -> bool {
        self.known
    }
}

/// Utilization of one sampled process since the last reset.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct ProcessCpuReport {
    /// Process id.
    pub pid: u32,
    /// Display name.
    pub name: String,
    /// Process-wide utilization.
    pub usage: CpuUsage,
    /// Thread count reported by the kernel.
    pub num_threads: u32,
    /// Virtual memory size in bytes.
    pub vsize_bytes: u64,
    /// Resident set size in bytes.
    pub rss_bytes: u64,
    /// Per-thread detail; empty unless thread info is enabled.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub threads: Vec<ThreadCpuReport>,
}

/// Frame accounting across all pipeline elements since the last reset.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct DroppedFramesReport {
    /// Processed plus dropped frames since the baseline.
    pub total_frames: u64,
    /// Dropped share over all elements, in percent.
    pub dropped_pct: f64,
    /// Dropped share over elements whose name contains `sink`, in percent.
    pub sink_dropped_pct: f64,
}

/// Machine-readable counterpart of the two statistics text blocks.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct StatsSnapshot {
    /// Milliseconds since the Unix epoch when the snapshot was taken.
    pub timestamp_ms: u64,
    /// The application process, when its latest sample succeeded.
    pub application: Option<ProcessCpuReport>,
    /// The watched external process (display server), when found.
    pub watched: Option<ProcessCpuReport>,
    /// Dropped-frame statistics.
    pub frames: DroppedFramesReport,
}
