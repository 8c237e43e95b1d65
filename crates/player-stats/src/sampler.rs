//! Process sampler: CPU tick and memory snapshots of a process (and its threads), and the
//! utilization math between two snapshots.
//!
//! Utilization is relative to the growth of the aggregate CPU counters, so 100% means "all
//! CPUs busy with this process" rather than "one core".

use anyhow::{Context, Result};
use stats_types::{CpuUsage, UNKNOWN_USAGE_PCT};

use crate::procfs::{ProcFs, StatRecord, truncate_thread_name};

/// Kernel process id.
pub type ProcessId = u32;

/// The kernel keeps at most this many bytes of a command name.
const COMM_MAX_BYTES: usize = 15;

/// Tick counters and memory figures of one thread at a point in time.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ThreadSample {
    pub tid: u32,
    pub name: String,
    pub utime: u64,
    pub stime: u64,
    pub cutime: i64,
    pub cstime: i64,
    pub vsize: u64,
    pub rss: u64,
}

/// Tick counters and memory figures of one process at a point in time.
///
/// `threads` is only filled when thread detail was requested, sorted by tid.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProcessSample {
    pub pid: ProcessId,
    /// Display name; kept across re-sampling.
    pub name: String,
    pub utime: u64,
    pub stime: u64,
    pub cutime: i64,
    pub cstime: i64,
    /// Virtual memory size in bytes.
    pub vsize: u64,
    /// Resident set size in bytes.
    pub rss: u64,
    pub num_threads: u32,
    /// Sum of the aggregate CPU counters when this sample was taken.
    pub cpu_total: u64,
    pub threads: Vec<ThreadSample>,
}

/// Utilization of one thread; `usage` is `None` when the thread is missing from the base.
#[derive(Clone, Debug, PartialEq)]
pub struct ThreadUsage {
    pub tid: u32,
    pub name: String,
    pub usage: Option<CpuUsage>,
}

impl ThreadUsage {
    /// User share, or [`UNKNOWN_USAGE_PCT`].
    pub fn user_pct(&self) -> f64 {
        self.usage.map(|u| u.user_pct).unwrap_or(UNKNOWN_USAGE_PCT)
    }

    /// System share, or [`UNKNOWN_USAGE_PCT`].
    pub fn sys_pct(&self) -> f64 {
        self.usage.map(|u| u.sys_pct).unwrap_or(UNKNOWN_USAGE_PCT)
    }
}

trait Ticks {
    fn user_ticks(&self) -> i128;
    fn sys_ticks(&self) -> i128;
}

impl Ticks for ProcessSample {
    fn user_ticks(&self) -> i128 {
        self.utime as i128 + self.cutime as i128
    }

    fn sys_ticks(&self) -> i128 {
        self.stime as i128 + self.cstime as i128
    }
}

impl Ticks for ThreadSample {
    fn user_ticks(&self) -> i128 {
        self.utime as i128 + self.cutime as i128
    }

    fn sys_ticks(&self) -> i128 {
        self.stime as i128 + self.cstime as i128
    }
}

/// Reads samples from a [`ProcFs`].
#[derive(Clone, Debug)]
pub struct Sampler {
    procfs: ProcFs,
    page_size: u64,
}

impl Sampler {
    pub fn new(procfs: ProcFs) -> Self {
        Self {
            procfs,
            page_size: crate::procfs::page_size(),
        }
    }

    pub fn procfs(&self) -> &ProcFs {
        &self.procfs
    }

    /// Find the lowest pid whose command name equals `name`.
    ///
    /// Names longer than the kernel's 15-byte limit are compared by their truncated prefix.
    /// Returns `None` when nothing matches or the filesystem cannot be listed.
    pub fn find_process_id(&self, name: &str) -> Option<ProcessId> {
        let wanted = comm_form(name);
        let pids = match self.procfs.list_pids() {
            Ok(pids) => pids,
            Err(e) => {
                tracing::debug!("process lookup unavailable: {e:#}");
                return None;
            }
        };
        pids.into_iter().find(|pid| {
            self.procfs
                .read_comm_bytes(*pid)
                .map(|comm| comm == wanted)
                .unwrap_or(false)
        })
    }

    /// Take a fresh sample of `pid` labelled `name`.
    pub fn sample(&self, pid: ProcessId, name: &str, thread_detail: bool) -> Result<ProcessSample> {
        let mut sample = ProcessSample {
            name: name.to_string(),
            ..ProcessSample::default()
        };
        self.sample_into(pid, &mut sample, thread_detail)?;
        Ok(sample)
    }

    /// Re-sample `pid` into `out`, reusing its thread buffer.
    ///
    /// On error `out` is left untouched. Per-thread read failures are not errors: the
    /// thread is left out of this sample.
    pub fn sample_into(
        &self,
        pid: ProcessId,
        out: &mut ProcessSample,
        thread_detail: bool,
    ) -> Result<()> {
        let stat = self
            .procfs
            .read_process_stat(pid)
            .with_context(|| format!("sample process {pid}"))?;
        let cpu = self.procfs.read_cpu_times().context("sample aggregate cpu time")?;

        out.pid = pid;
        out.utime = stat.utime;
        out.stime = stat.stime;
        out.cutime = stat.cutime;
        out.cstime = stat.cstime;
        out.vsize = stat.vsize;
        out.rss = self.rss_bytes(&stat);
        out.num_threads = stat.num_threads;
        out.cpu_total = cpu.total();

        out.threads.clear();
        if thread_detail {
            self.sample_threads(pid, &mut out.threads);
        }
        Ok(())
    }

    fn sample_threads(&self, pid: ProcessId, threads: &mut Vec<ThreadSample>) {
        let tids = match self.procfs.list_tasks(pid) {
            Ok(tids) => tids,
            Err(e) => {
                tracing::debug!(pid, "thread list unavailable: {e:#}");
                return;
            }
        };
        threads.reserve(tids.len());
        for tid in tids {
            match self.procfs.read_thread_stat(pid, tid) {
                Ok(stat) => threads.push(ThreadSample {
                    tid,
                    name: truncate_thread_name(&stat.comm),
                    utime: stat.utime,
                    stime: stat.stime,
                    cutime: stat.cutime,
                    cstime: stat.cstime,
                    vsize: stat.vsize,
                    rss: self.rss_bytes(&stat),
                }),
                Err(e) => tracing::debug!(pid, tid, "thread skipped: {e:#}"),
            }
        }
    }

    fn rss_bytes(&self, stat: &StatRecord) -> u64 {
        u64::try_from(stat.rss_pages)
            .unwrap_or(0)
            .saturating_mul(self.page_size)
    }
}

fn comm_form(name: &str) -> &[u8] {
    let bytes = name.as_bytes();
    &bytes[..bytes.len().min(COMM_MAX_BYTES)]
}

fn elapsed_ticks(current: &ProcessSample, base: &ProcessSample) -> Option<f64> {
    current
        .cpu_total
        .checked_sub(base.cpu_total)
        .filter(|d| *d > 0)
        .map(|d| d as f64)
}

fn usage_between(current: &impl Ticks, base: &impl Ticks, elapsed: Option<f64>) -> CpuUsage {
    let Some(elapsed) = elapsed else {
        return CpuUsage::default();
    };
    CpuUsage {
        user_pct: 100.0 * (current.user_ticks() - base.user_ticks()) as f64 / elapsed,
        sys_pct: 100.0 * (current.sys_ticks() - base.sys_ticks()) as f64 / elapsed,
    }
}

/// Process utilization between `base` and `current`. No elapsed CPU time reports 0%.
pub fn diff_utilization(current: &ProcessSample, base: &ProcessSample) -> CpuUsage {
    usage_between(current, base, elapsed_ticks(current, base))
}

/// Per-thread utilization for every thread in `current`.
///
/// Threads are matched by tid against `base.threads`, which the sampler keeps sorted.
/// Threads started after the base sample get `usage: None`.
pub fn diff_thread_utilization(current: &ProcessSample, base: &ProcessSample) -> Vec<ThreadUsage> {
    let elapsed = elapsed_ticks(current, base);
    current
        .threads
        .iter()
        .map(|thread| {
            let usage = base
                .threads
                .binary_search_by_key(&thread.tid, |t| t.tid)
                .ok()
                .map(|idx| usage_between(thread, &base.threads[idx], elapsed));
            ThreadUsage {
                tid: thread.tid,
                name: thread.name.clone(),
                usage,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::procfs::fixture::*;

    fn sample_with(utime: u64, stime: u64, cutime: i64, cstime: i64, cpu_total: u64) -> ProcessSample {
        ProcessSample {
            pid: 1,
            name: "gstplay".to_string(),
            utime,
            stime,
            cutime,
            cstime,
            cpu_total,
            ..ProcessSample::default()
        }
    }

    fn thread(tid: u32, utime: u64, stime: u64) -> ThreadSample {
        ThreadSample {
            tid,
            name: format!("t{tid}"),
            utime,
            stime,
            ..ThreadSample::default()
        }
    }

    #[test]
    fn diff_utilization_includes_children() {
        let base = sample_with(100, 50, 10, 5, 10_000);
        let cur = sample_with(150, 70, 20, 5, 10_400);
        let usage = diff_utilization(&cur, &base);
        assert!((usage.user_pct - 15.0).abs() < 1e-9);
        assert!((usage.sys_pct - 5.0).abs() < 1e-9);
    }

    #[test]
    fn diff_utilization_zero_elapsed_is_zero() {
        let base = sample_with(100, 50, 0, 0, 10_000);
        let cur = sample_with(200, 90, 0, 0, 10_000);
        let usage = diff_utilization(&cur, &base);
        assert_eq!(usage.user_pct, 0.0);
        assert_eq!(usage.sys_pct, 0.0);
        assert!(usage.user_pct.is_finite());
    }

    #[test]
    fn diff_thread_utilization_zero_elapsed_is_zero() {
        let mut base = sample_with(0, 0, 0, 0, 5_000);
        base.threads = vec![thread(10, 100, 10), thread(11, 7, 3)];
        let mut cur = sample_with(0, 0, 0, 0, 5_000);
        cur.threads = vec![thread(10, 180, 40), thread(11, 7, 3)];

        let usage = diff_thread_utilization(&cur, &base);
        assert_eq!(usage.len(), 2);
        for thread in &usage {
            let cpu = thread.usage.expect("matched thread");
            assert_eq!(cpu.user_pct, 0.0);
            assert_eq!(cpu.sys_pct, 0.0);
            assert!(cpu.user_pct.is_finite() && cpu.sys_pct.is_finite());
        }
    }

    #[test]
    fn diff_utilization_stays_within_bounds() {
        let base = sample_with(0, 0, 0, 0, 0);
        for (du, ds, elapsed) in [(0u64, 0u64, 1u64), (30, 70, 100), (5, 5, 1000), (100, 0, 100)] {
            let cur = sample_with(du, ds, 0, 0, elapsed);
            let usage = diff_utilization(&cur, &base);
            assert!((0.0..=100.0).contains(&usage.user_pct));
            assert!((0.0..=100.0).contains(&usage.sys_pct));
            assert!(usage.user_pct + usage.sys_pct <= 100.0 + 1e-9);
        }
    }

    #[test]
    fn diff_thread_utilization_marks_new_threads_unknown() {
        let mut base = sample_with(0, 0, 0, 0, 1_000);
        base.threads = vec![thread(10, 100, 10), thread(12, 40, 0)];
        let mut cur = sample_with(0, 0, 0, 0, 1_200);
        cur.threads = vec![thread(10, 150, 30), thread(11, 5, 5), thread(12, 60, 0), thread(13, 1, 1)];

        let usage = diff_thread_utilization(&cur, &base);
        assert_eq!(usage.len(), 4);
        assert_eq!(usage[0].tid, 10);
        assert!((usage[0].user_pct() - 25.0).abs() < 1e-9);
        assert!((usage[0].sys_pct() - 10.0).abs() < 1e-9);
        assert_eq!(usage[1].usage, None);
        assert_eq!(usage[1].user_pct(), UNKNOWN_USAGE_PCT);
        assert_eq!(usage[1].sys_pct(), -1.0);
        assert!((usage[2].user_pct() - 10.0).abs() < 1e-9);
        assert_eq!(usage[3].user_pct(), UNKNOWN_USAGE_PCT);
    }

    #[test]
    fn diff_thread_utilization_with_empty_base_is_all_unknown() {
        let base = sample_with(0, 0, 0, 0, 1_000);
        let mut cur = sample_with(0, 0, 0, 0, 1_000);
        cur.threads = vec![thread(1, 1, 1)];
        let usage = diff_thread_utilization(&cur, &base);
        assert_eq!(usage[0].user_pct(), UNKNOWN_USAGE_PCT);
    }

    #[test]
    fn sample_reads_process_and_threads() {
        let root = temp_root("sample");
        write_cpu_total(&root, 1000, 500, 8500);
        write_process(&root, 42, "gstplay", &stat_line(42, "gstplay", 300, 100, 4, 2, 3));
        write_thread(&root, 42, 44, &stat_line(44, "queue0:src", 200, 60, 0, 0, 3));
        write_thread(&root, 42, 42, &stat_line(42, "gstplay", 100, 40, 0, 0, 3));
        write_thread(&root, 42, 43, &stat_line(43, "gmain", 0, 0, 0, 0, 3));

        let sampler = Sampler::new(ProcFs::new(&root));
        let sample = sampler.sample(42, "gstplay", true).unwrap();
        assert_eq!(sample.pid, 42);
        assert_eq!(sample.name, "gstplay");
        assert_eq!(sample.utime, 300);
        assert_eq!(sample.cutime, 4);
        assert_eq!(sample.num_threads, 3);
        assert_eq!(sample.cpu_total, 10_000);
        assert_eq!(sample.rss, 2560 * crate::procfs::page_size());
        let tids: Vec<u32> = sample.threads.iter().map(|t| t.tid).collect();
        assert_eq!(tids, vec![42, 43, 44]);
        assert_eq!(sample.threads[2].name, "queue0:src");
    }

    #[test]
    fn sample_without_detail_has_no_threads() {
        let root = temp_root("nodetail");
        write_cpu_total(&root, 1, 1, 1);
        write_process(&root, 7, "p", &stat_line(7, "p", 1, 1, 0, 0, 2));
        write_thread(&root, 7, 7, &stat_line(7, "p", 1, 1, 0, 0, 2));

        let sampler = Sampler::new(ProcFs::new(&root));
        let sample = sampler.sample(7, "p", false).unwrap();
        assert!(sample.threads.is_empty());
        assert_eq!(sample.num_threads, 2);
    }

    #[test]
    fn sample_skips_unreadable_thread() {
        let root = temp_root("badthread");
        write_cpu_total(&root, 1, 1, 1);
        write_process(&root, 9, "p", &stat_line(9, "p", 1, 1, 0, 0, 3));
        write_thread(&root, 9, 9, &stat_line(9, "p", 1, 1, 0, 0, 3));
        write_thread(&root, 9, 10, "10 (broken) S 1");
        std::fs::create_dir_all(root.join("9").join("task").join("11")).unwrap();

        let sampler = Sampler::new(ProcFs::new(&root));
        let sample = sampler.sample(9, "p", true).unwrap();
        let tids: Vec<u32> = sample.threads.iter().map(|t| t.tid).collect();
        assert_eq!(tids, vec![9]);
    }

    #[test]
    fn sample_into_keeps_previous_values_on_error() {
        let root = temp_root("gone");
        write_cpu_total(&root, 1, 1, 1);
        let sampler = Sampler::new(ProcFs::new(&root));
        let mut prev = sample_with(10, 10, 0, 0, 100);
        let snapshot = prev.clone();
        assert!(sampler.sample_into(999, &mut prev, false).is_err());
        assert_eq!(prev, snapshot);
    }

    #[test]
    fn sample_fails_without_aggregate_counters() {
        let root = temp_root("nostat");
        write_process(&root, 3, "p", &stat_line(3, "p", 1, 1, 0, 0, 1));
        let sampler = Sampler::new(ProcFs::new(&root));
        assert!(sampler.sample(3, "p", false).is_err());
    }

    #[test]
    fn find_process_id_matches_exact_name() {
        let root = temp_root("find");
        write_process(&root, 30, "Xorg", &stat_line(30, "Xorg", 0, 0, 0, 0, 1));
        write_process(&root, 12, "Xorg-helper", &stat_line(12, "Xorg-helper", 0, 0, 0, 0, 1));
        write_process(&root, 40, "Xorg", &stat_line(40, "Xorg", 0, 0, 0, 0, 1));

        let sampler = Sampler::new(ProcFs::new(&root));
        assert_eq!(sampler.find_process_id("Xorg"), Some(30));
        assert_eq!(sampler.find_process_id("Xor"), None);
    }

    #[test]
    fn find_process_id_handles_kernel_truncation() {
        let root = temp_root("trunc");
        write_process(&root, 8, "gst-launch-1.0-", &stat_line(8, "gst-launch-1.0-", 0, 0, 0, 0, 1));
        let sampler = Sampler::new(ProcFs::new(&root));
        assert_eq!(sampler.find_process_id("gst-launch-1.0-extra"), Some(8));
    }

    #[test]
    fn find_process_id_handles_truncation_inside_a_character() {
        let root = temp_root("trunc-utf8");
        let name = "éééééééé";
        let dir = root.join("77");
        std::fs::create_dir_all(&dir).unwrap();
        let mut comm = name.as_bytes()[..15].to_vec();
        comm.push(b'\n');
        std::fs::write(dir.join("comm"), comm).unwrap();

        let sampler = Sampler::new(ProcFs::new(&root));
        assert_eq!(sampler.find_process_id(name), Some(77));
    }

    #[test]
    fn find_process_id_missing_root_is_none() {
        let sampler = Sampler::new(ProcFs::new("/nonexistent/player-stats-proc"));
        assert_eq!(sampler.find_process_id("Xorg"), None);
    }
}
