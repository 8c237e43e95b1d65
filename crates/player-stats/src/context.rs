//! Statistics context: the one object the player creates at startup and hands to both the
//! pipeline (frame counter reports) and the statistics view (report rendering).
//!
//! Sampling happens outside the lock; a finished sample is swapped in whole, so a report
//! always diffs a completed base/current pair.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use stats_types::{ProcessCpuReport, StatsSnapshot, ThreadCpuReport};

use crate::config::StatsConfig;
use crate::frames::{DroppedFramesSummary, ElementId, FrameDropTracker};
use crate::procfs::ProcFs;
use crate::report;
use crate::sampler::{
    ProcessId, ProcessSample, Sampler, diff_thread_utilization, diff_utilization,
};

/// Cloneable handle given to pipeline threads for reporting frame counters.
#[derive(Clone, Debug)]
pub struct FrameReporter {
    tracker: Arc<FrameDropTracker>,
    enabled: Arc<AtomicBool>,
}

impl FrameReporter {
    /// Pipeline callback: cumulative counters of one element. Ignored while disabled.
    pub fn report(&self, element: ElementId, name: &str, processed: u64, dropped: u64) {
        if !self.enabled.load(Ordering::Relaxed) {
            return;
        }
        self.tracker.report(element, name, processed, dropped);
    }
}

/// One sampled process with its baseline and latest sample.
#[derive(Debug, Default)]
struct SampledTarget {
    pid: Option<ProcessId>,
    name: String,
    base: Option<ProcessSample>,
    current: Option<ProcessSample>,
    /// Recycled buffer for the next sample.
    spare: ProcessSample,
}

impl SampledTarget {
    fn new(pid: Option<ProcessId>, name: &str) -> Self {
        Self {
            pid,
            name: name.to_string(),
            ..Self::default()
        }
    }

    fn publish(&mut self, sample: ProcessSample, ok: bool) {
        if ok {
            self.spare = self.current.replace(sample).unwrap_or_default();
        } else {
            self.spare = sample;
        }
    }

    fn cpu_report(&self, thread_info: bool) -> Option<ProcessCpuReport> {
        let base = self.base.as_ref()?;
        let current = self.current.as_ref().unwrap_or(base);
        let threads = if thread_info {
            diff_thread_utilization(current, base)
                .into_iter()
                .map(|t| match t.usage {
                    Some(usage) => ThreadCpuReport {
                        tid: t.tid,
                        name: t.name,
                        user_pct: usage.user_pct,
                        sys_pct: usage.sys_pct,
                        known: true,
                    },
                    None => ThreadCpuReport::unknown(t.tid, t.name),
                })
                .collect()
        } else {
            Vec::new()
        };
        Some(ProcessCpuReport {
            pid: current.pid,
            name: self.name.clone(),
            usage: diff_utilization(current, base),
            num_threads: current.num_threads,
            vsize_bytes: current.vsize,
            rss_bytes: current.rss,
            threads,
        })
    }
}

#[derive(Debug)]
struct Targets {
    app: SampledTarget,
    /// `None` when no watched process is configured.
    watched: Option<SampledTarget>,
}

/// Owner of all statistics state. Share it behind an `Arc`.
#[derive(Debug)]
pub struct StatsContext {
    config: StatsConfig,
    sampler: Sampler,
    /// Frame tracker and enabled flag, shared with handed-out reporters.
    reporter: FrameReporter,
    thread_info: AtomicBool,
    targets: Mutex<Targets>,
}

impl StatsContext {
    /// Sample the current process as the application.
    pub fn new(config: StatsConfig) -> Result<Self> {
        Self::for_pid(config, std::process::id())
    }

    /// Sample `app_pid` as the application.
    ///
    /// Fails when the first application sample cannot be taken (no process-information
    /// filesystem, or the process does not exist).
    pub fn for_pid(config: StatsConfig, app_pid: ProcessId) -> Result<Self> {
        let sampler = Sampler::new(ProcFs::new(config.proc_root.clone()));
        let thread_info = config.thread_info;

        let mut app = SampledTarget::new(Some(app_pid), &config.app_name);
        app.base = Some(
            sampler
                .sample(app_pid, &config.app_name, thread_info)
                .with_context(|| format!("initial sample of {} ({app_pid})", config.app_name))?,
        );

        let watched = config.watch_process.as_deref().map(|name| {
            let pid = sampler.find_process_id(name);
            match pid {
                Some(pid) => tracing::info!(pid, name, "watching external process"),
                None => tracing::info!(name, "watched process not found"),
            }
            let mut target = SampledTarget::new(pid, name);
            target.base = pid.and_then(|pid| sample_or_warn(&sampler, pid, name, false));
            target
        });

        Ok(Self {
            sampler,
            reporter: FrameReporter {
                tracker: Arc::new(FrameDropTracker::new()),
                enabled: Arc::new(AtomicBool::new(false)),
            },
            thread_info: AtomicBool::new(thread_info),
            targets: Mutex::new(Targets { app, watched }),
            config,
        })
    }

    pub fn config(&self) -> &StatsConfig {
        &self.config
    }

    pub fn app_pid(&self) -> Option<ProcessId> {
        self.lock_targets().app.pid
    }

    /// Pid of the watched process, once found.
    pub fn watched_pid(&self) -> Option<ProcessId> {
        self.lock_targets().watched.as_ref().and_then(|w| w.pid)
    }

    /// Enable or disable collection of frame reports.
    pub fn set_enabled(&self, enabled: bool) {
        self.reporter.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.reporter.enabled.load(Ordering::Relaxed)
    }

    /// Toggle per-thread sampling of the application. Takes effect from the next sample;
    /// threads only get percentages once a base with thread detail exists (after a reset).
    pub fn set_thread_info(&self, enabled: bool) {
        self.thread_info.store(enabled, Ordering::Relaxed);
    }

    pub fn thread_info(&self) -> bool {
        self.thread_info.load(Ordering::Relaxed)
    }

    /// Handle for pipeline threads.
    pub fn frame_reporter(&self) -> FrameReporter {
        self.reporter.clone()
    }

    /// Pipeline callback: cumulative counters of one element. Ignored while disabled.
    pub fn report_dropped_frames(&self, element: ElementId, name: &str, processed: u64, dropped: u64) {
        self.reporter.report(element, name, processed, dropped);
    }

    /// Start a new measuring window: forget all element counters and re-take base samples.
    pub fn reset(&self) {
        self.reporter.tracker.reset();
        let detail = self.thread_info();

        let (app_pid, app_name, watched) = {
            let t = self.lock_targets();
            (
                t.app.pid,
                t.app.name.clone(),
                t.watched.as_ref().map(|w| (w.pid, w.name.clone())),
            )
        };

        let app_base = app_pid.and_then(|pid| sample_or_warn(&self.sampler, pid, &app_name, detail));
        let watched = watched.map(|(pid, name)| {
            let pid = pid.or_else(|| self.sampler.find_process_id(&name));
            let base = pid.and_then(|pid| sample_or_warn(&self.sampler, pid, &name, false));
            (pid, base)
        });

        let mut t = self.lock_targets();
        if let Some(base) = app_base {
            t.app.base = Some(base);
            t.app.current = None;
        }
        if let (Some(target), Some((pid, base))) = (t.watched.as_mut(), watched) {
            if target.pid.is_none() && pid.is_some() {
                tracing::info!(pid = pid.unwrap_or_default(), name = %target.name, "watched process found");
            }
            target.pid = pid;
            if let Some(base) = base {
                target.base = Some(base);
                target.current = None;
            }
        }
        tracing::debug!("statistics reset");
    }

    /// Current dropped-frame totals.
    pub fn dropped_frames(&self) -> DroppedFramesSummary {
        self.reporter.tracker.summary()
    }

    /// Take new samples and render the CPU utilization block.
    pub fn cpu_utilization_report(&self) -> String {
        let thread_info = self.thread_info();
        let (app, watched) = self.refresh_reports(thread_info);
        report::format_cpu_utilization(app.as_ref(), watched.as_ref(), thread_info)
    }

    /// Render the dropped-frames block.
    pub fn dropped_frames_report(&self) -> String {
        report::format_dropped_frames(&self.reporter.tracker.summary().to_report())
    }

    /// Take new samples and return both blocks in machine-readable form.
    pub fn snapshot(&self) -> StatsSnapshot {
        let (application, watched) = self.refresh_reports(self.thread_info());
        StatsSnapshot {
            timestamp_ms: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0),
            application,
            watched,
            frames: self.reporter.tracker.summary().to_report(),
        }
    }

    fn refresh_reports(
        &self,
        thread_info: bool,
    ) -> (Option<ProcessCpuReport>, Option<ProcessCpuReport>) {
        self.refresh(thread_info);
        let t = self.lock_targets();
        (
            t.app.cpu_report(thread_info),
            t.watched
                .as_ref()
                .filter(|w| w.pid.is_some())
                .and_then(|w| w.cpu_report(false)),
        )
    }

    fn refresh(&self, thread_info: bool) {
        let (app, watched) = {
            let mut t = self.lock_targets();
            let app = t.app.pid.map(|pid| (pid, std::mem::take(&mut t.app.spare)));
            let watched = t
                .watched
                .as_mut()
                .and_then(|w| w.pid.map(|pid| (pid, std::mem::take(&mut w.spare))));
            (app, watched)
        };

        let app = app.map(|(pid, scratch)| self.resample(pid, scratch, thread_info));
        let watched = watched.map(|(pid, scratch)| self.resample(pid, scratch, false));

        let mut t = self.lock_targets();
        if let Some((sample, ok)) = app {
            t.app.publish(sample, ok);
        }
        if let (Some(target), Some((sample, ok))) = (t.watched.as_mut(), watched) {
            target.publish(sample, ok);
        }
    }

    fn resample(&self, pid: ProcessId, mut scratch: ProcessSample, detail: bool) -> (ProcessSample, bool) {
        match self.sampler.sample_into(pid, &mut scratch, detail) {
            Ok(()) => (scratch, true),
            Err(e) => {
                tracing::warn!(pid, "keeping previous sample: {e:#}");
                (scratch, false)
            }
        }
    }

    fn lock_targets(&self) -> MutexGuard<'_, Targets> {
        self.targets.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn sample_or_warn(sampler: &Sampler, pid: ProcessId, name: &str, detail: bool) -> Option<ProcessSample> {
    match sampler.sample(pid, name, detail) {
        Ok(sample) => Some(sample),
        Err(e) => {
            tracing::warn!(pid, name, "sample failed: {e:#}");
            None
        }
    }
}
