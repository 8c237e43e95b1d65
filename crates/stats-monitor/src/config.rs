//! Configuration loading and resolution.
//!
//! Precedence: command-line flags, then the TOML file, then [`StatsConfig::default`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use player_stats::config::StatsConfig;
use serde::Deserialize;

use crate::cli::MonitorArgs;

/// Top-level config file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MonitorConfigFile {
    /// Statistics settings.
    pub stats: Option<StatsSection>,
}

/// `[stats]` table.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StatsSection {
    /// Root of the process-information filesystem.
    pub proc_root: Option<String>,
    /// Label for the application in reports.
    pub app_name: Option<String>,
    /// External process to sample; empty disables.
    pub watch_process: Option<String>,
    /// Sample per-thread utilization.
    pub thread_info: Option<bool>,
    /// Refresh interval in milliseconds.
    pub refresh_interval_ms: Option<u64>,
}

/// How the monitor loop runs, beyond what the statistics context needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorOptions {
    pub pid: Option<u32>,
    pub count: u64,
    pub json: bool,
    pub frames_from_stdin: bool,
}

impl MonitorConfigFile {
    /// Load configuration from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
        let cfg = toml::from_str::<MonitorConfigFile>(&raw)
            .with_context(|| format!("parse config {:?}", path))?;
        Ok(cfg)
    }

    /// Load `path` if given, otherwise use an empty config.
    pub fn load_optional(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Merge file values over the defaults, then apply the global `--proc-root` flag.
pub fn stats_config(file: &MonitorConfigFile, proc_root: Option<&Path>) -> Result<StatsConfig> {
    let mut cfg = StatsConfig::default();
    if let Some(section) = file.stats.as_ref() {
        if let Some(root) = section.proc_root.as_deref().and_then(non_empty) {
            cfg.proc_root = PathBuf::from(root);
        }
        if let Some(name) = section.app_name.as_deref().and_then(non_empty) {
            cfg.app_name = name;
        }
        if let Some(watch) = section.watch_process.as_deref() {
            cfg.watch_process = non_empty(watch);
        }
        if let Some(threads) = section.thread_info {
            cfg.thread_info = threads;
        }
        if let Some(ms) = section.refresh_interval_ms {
            cfg.refresh_interval = interval_from_ms(ms)?;
        }
    }
    if let Some(root) = proc_root {
        cfg.proc_root = root.to_path_buf();
    }
    Ok(cfg)
}

/// Apply `monitor` flags on top of a resolved config.
pub fn apply_monitor_args(
    mut cfg: StatsConfig,
    args: &MonitorArgs,
) -> Result<(StatsConfig, MonitorOptions)> {
    if let Some(name) = args.app_name.as_deref().and_then(non_empty) {
        cfg.app_name = name;
    }
    if args.no_watch {
        cfg.watch_process = None;
    } else if let Some(watch) = args.watch.as_deref() {
        cfg.watch_process = non_empty(watch);
    }
    if args.threads {
        cfg.thread_info = true;
    }
    if let Some(ms) = args.interval_ms {
        cfg.refresh_interval = interval_from_ms(ms)?;
    }
    let opts = MonitorOptions {
        pid: args.pid,
        count: args.count,
        json: args.json,
        frames_from_stdin: args.frames_from_stdin,
    };
    Ok((cfg, opts))
}

fn interval_from_ms(ms: u64) -> Result<Duration> {
    if ms == 0 {
        return Err(anyhow!("refresh interval must be at least 1 ms"));
    }
    Ok(Duration::from_millis(ms))
}
