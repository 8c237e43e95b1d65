//! Monitor runtime: the refresh loop and the one-shot pid lookup.

use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use player_stats::config::StatsConfig;
use player_stats::context::StatsContext;
use player_stats::procfs::ProcFs;
use player_stats::sampler::Sampler;

use crate::config::MonitorOptions;
use crate::feed;

/// Print the pid of `name` to stdout.
pub fn run_find_pid(stats: &StatsConfig, name: &str) -> Result<()> {
    let sampler = Sampler::new(ProcFs::new(stats.proc_root.clone()));
    let pid = sampler
        .find_process_id(name)
        .ok_or_else(|| anyhow!("no process named {name:?}"))?;
    println!("{pid}");
    Ok(())
}

/// Reset statistics, then print both blocks every refresh interval until the count is
/// reached or Ctrl-C arrives.
pub fn run_monitor(stats: StatsConfig, opts: MonitorOptions, install_ctrlc: bool) -> Result<()> {
    let interval = stats.refresh_interval;
    let ctx = Arc::new(match opts.pid {
        Some(pid) => StatsContext::for_pid(stats, pid)?,
        None => StatsContext::new(stats)?,
    });
    tracing::info!(
        pid = ctx.app_pid().unwrap_or_default(),
        watched = ?ctx.watched_pid(),
        interval_ms = interval.as_millis() as u64,
        "statistics started"
    );

    ctx.reset();
    ctx.set_enabled(true);

    let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
    if install_ctrlc {
        ctrlc::set_handler(move || {
            let _ = stop_tx.try_send(());
        })
        .context("install ctrl-c handler")?;
    }

    if opts.frames_from_stdin {
        // Detached: a blocking stdin read cannot be interrupted.
        let _feed = feed::spawn_stdin_feed(ctx.clone());
    }

    let ticker = crossbeam_channel::tick(interval);
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let mut refreshes = 0u64;
    loop {
        crossbeam_channel::select! {
            recv(ticker) -> _ => {
                print_refresh(&ctx, opts.json, &mut out)?;
                refreshes += 1;
                if opts.count > 0 && refreshes >= opts.count {
                    break;
                }
            }
            recv(stop_rx) -> _ => {
                tracing::info!("interrupted");
                print_refresh(&ctx, opts.json, &mut out)?;
                break;
            }
        }
    }

    ctx.set_enabled(false);
    Ok(())
}

fn print_refresh(ctx: &StatsContext, json: bool, out: &mut impl Write) -> Result<()> {
    if json {
        let line = serde_json::to_string(&ctx.snapshot()).context("encode snapshot")?;
        writeln!(out, "{line}").context("write snapshot")?;
    } else {
        let cpu = ctx.cpu_utilization_report();
        let frames = ctx.dropped_frames_report();
        writeln!(out, "{cpu}\n{frames}\n").context("write report")?;
    }
    out.flush().context("flush stdout")
}
