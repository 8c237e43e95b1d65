use std::path::PathBuf;

use clap::{Parser, Subcommand};

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("GIT_SHA"),
    ", ",
    env!("BUILD_DATE"),
    ")"
);

#[derive(Parser, Debug)]
#[command(name = "stats-monitor", version = VERSION)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// TOML config file ([stats] table); command-line flags take precedence
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Root of the process-information filesystem
    #[arg(long, global = true)]
    pub proc_root: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print CPU utilization and dropped-frame statistics on an interval
    Monitor(MonitorArgs),

    /// Print the pid of the first process with the given command name
    FindPid {
        /// Command name, e.g. Xorg
        name: String,
    },
}

#[derive(clap::Args, Debug, Default)]
pub struct MonitorArgs {
    /// Sample this process instead of the monitor itself
    #[arg(long)]
    pub pid: Option<u32>,

    /// Label for the sampled application in reports
    #[arg(long)]
    pub app_name: Option<String>,

    /// Also sample the first process with this command name (default: Xorg)
    #[arg(long, conflicts_with = "no_watch")]
    pub watch: Option<String>,

    /// Do not sample an external process
    #[arg(long)]
    pub no_watch: bool,

    /// Include per-thread utilization of the application
    #[arg(long)]
    pub threads: bool,

    /// Refresh interval in milliseconds (default 200)
    #[arg(long)]
    pub interval_ms: Option<u64>,

    /// Stop after this many refreshes (0 = until interrupted)
    #[arg(long, default_value_t = 0)]
    pub count: u64,

    /// Print one JSON snapshot per refresh instead of text blocks
    #[arg(long)]
    pub json: bool,

    /// Read frame counter reports from stdin: `<element-id> <name> <processed> <dropped>` or `reset`
    #[arg(long)]
    pub frames_from_stdin: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monitor_flags_parse() {
        let args = Args::try_parse_from([
            "stats-monitor",
            "--proc-root",
            "/host/proc",
            "monitor",
            "--pid",
            "42",
            "--threads",
            "--interval-ms",
            "1000",
            "--count",
            "3",
            "--json",
        ])
        .unwrap();
        assert_eq!(args.proc_root, Some(PathBuf::from("/host/proc")));
        let Command::Monitor(m) = args.cmd else {
            panic!("expected monitor");
        };
        assert_eq!(m.pid, Some(42));
        assert!(m.threads);
        assert_eq!(m.interval_ms, Some(1000));
        assert_eq!(m.count, 3);
        assert!(m.json);
    }

    #[test]
    fn watch_conflicts_with_no_watch() {
        let res = Args::try_parse_from(["stats-monitor", "monitor", "--watch", "Xorg", "--no-watch"]);
        assert!(res.is_err());
    }

    #[test]
    fn find_pid_takes_name() {
        let args = Args::try_parse_from(["stats-monitor", "find-pid", "Xorg"]).unwrap();
        assert!(matches!(args.cmd, Command::FindPid { ref name } if name == "Xorg"));
    }
}
