//! `stats-monitor`: the media player's performance statistics on the command line.
//!
//! ## What it shows
//! 1. **CPU utilization**: user/system share of the sampled application (and optionally each
//!    of its threads) and of a watched external process such as the X server, relative to
//!    total CPU time since the last reset.
//! 2. **Dropped frames**: share of frames dropped across all reporting pipeline elements and
//!    across sink elements only.
//!
//! ## Modes
//! - `monitor`: reset, then refresh both blocks on an interval; frame reports can be piped in.
//! - `find-pid`: look up a process by command name.

mod cli;
mod config;
mod feed;
mod runtime;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,stats_monitor=info,player_stats=info")
        }))
        .init();

    let file = config::MonitorConfigFile::load_optional(args.config.as_deref())?;
    let stats = config::stats_config(&file, args.proc_root.as_deref())?;

    match &args.cmd {
        cli::Command::Monitor(monitor) => {
            let (stats, opts) = config::apply_monitor_args(stats, monitor)?;
            runtime::run_monitor(stats, opts, true)
        }
        cli::Command::FindPid { name } => runtime::run_find_pid(&stats, name),
    }
}
