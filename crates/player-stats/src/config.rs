use std::path::PathBuf;
use std::time::Duration;

use crate::procfs::DEFAULT_PROC_ROOT;

/// Statistics tuning shared by the sampler, the context and the refresh loop.
#[derive(Clone, Debug)]
pub struct StatsConfig {
    /// Root of the process-information filesystem.
    pub proc_root: PathBuf,
    /// Label used for the application process in reports.
    pub app_name: String,
    /// Process to sample in addition to the application (the display server), if any.
    pub watch_process: Option<String>,
    /// Sample every thread of the application as well.
    pub thread_info: bool,
    /// Refresh interval of the statistics view.
    pub refresh_interval: Duration,
}

impl Default for StatsConfig {
    /// Matches the player's statistics dialog: X server watched, threads off, 200 ms refresh.
    fn default() -> Self {
        Self {
            proc_root: PathBuf::from(DEFAULT_PROC_ROOT),
            app_name: "gstplay".to_string(),
            watch_process: Some("Xorg".to_string()),
            thread_info: false,
            refresh_interval: Duration::from_millis(200),
        }
    }
}
