//! Text rendering of the two statistics blocks shown in the player's statistics view.

use std::fmt::Write as _;

use stats_types::{DroppedFramesReport, ProcessCpuReport};

/// Render the CPU utilization block.
///
/// The watched-process section is only present when `watched` is `Some`. Threads without a
/// base counterpart are listed without percentages.
pub fn format_cpu_utilization(
    app: Option<&ProcessCpuReport>,
    watched: Option<&ProcessCpuReport>,
    thread_info: bool,
) -> String {
    let mut out = String::from("CPU utilization (application)\n");
    match app {
        Some(app) => {
            push_usage_line(&mut out, app);
            let _ = writeln!(out, "Number of threads: {}", app.num_threads);
            if thread_info {
                for thread in &app.threads {
                    let name = format!("({})", thread.name);
                    if thread.is_known() {
                        let _ = writeln!(
                            out,
                            "Thread {:6} {:<24} user {:4.1}%, sys {:4.1}%",
                            thread.tid, name, thread.user_pct, thread.sys_pct
                        );
                    } else {
                        let _ = writeln!(out, "Thread {:6} {:<24}", thread.tid, name);
                    }
                }
            }
        }
        None => out.push_str("unavailable\n"),
    }
    if let Some(watched) = watched {
        out.push_str("\nCPU utilization (X server)\n");
        push_usage_line(&mut out, watched);
    }
    out
}

fn push_usage_line(out: &mut String, report: &ProcessCpuReport) {
    let _ = writeln!(
        out,
        "{:<38} user {:4.1}%, sys {:4.1}%",
        report.name, report.usage.user_pct, report.usage.sys_pct
    );
}

/// Render the dropped-frames block.
pub fn format_dropped_frames(report: &DroppedFramesReport) -> String {
    format!(
        "Total reported frames:          {}\n\
         Dropped frames:                 {:.1}%\n\
         Dropped frames by sink:         {:.1}%",
        report.total_frames, report.dropped_pct, report.sink_dropped_pct
    )
}
