//! Readers for the process-information pseudo-filesystem.
//!
//! The kernel exposes accounting as loosely structured text. Each record type gets a
//! strict parser with named fields here, so the sampler never indexes into raw splits:
//! - `<root>/<pid>/stat` and `<root>/<pid>/task/<tid>/stat` → [`StatRecord`]
//! - the aggregate `cpu` line of `<root>/stat` → [`CpuTimes`]
//! - `<root>/<pid>/comm` → command name

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};

/// Default mount point of the process-information filesystem.
pub const DEFAULT_PROC_ROOT: &str = "/proc";

/// Thread names longer than this are cut when stored.
pub const MAX_THREAD_NAME_CHARS: usize = 31;

const FALLBACK_PAGE_SIZE: u64 = 4096;

/// Handle to a process-information filesystem rooted at `root`.
#[derive(Clone, Debug)]
pub struct ProcFs {
    root: PathBuf,
}

impl Default for ProcFs {
    fn default() -> Self {
        Self::new(DEFAULT_PROC_ROOT)
    }
}

/// Fields of a per-process or per-thread `stat` record used for CPU and memory accounting.
///
/// Field numbers follow `proc(5)`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StatRecord {
    /// (1) process or thread id.
    pub pid: u32,
    /// (2) command name without the surrounding parentheses.
    pub comm: String,
    /// (3) state character.
    pub state: char,
    /// (14) user-mode ticks.
    pub utime: u64,
    /// (15) kernel-mode ticks.
    pub stime: u64,
    /// (16) user-mode ticks of waited-for children.
    pub cutime: i64,
    /// (17) kernel-mode ticks of waited-for children.
    pub cstime: i64,
    /// (20) number of threads.
    pub num_threads: u32,
    /// (23) virtual memory size in bytes.
    pub vsize: u64,
    /// (24) resident set size in pages.
    pub rss_pages: i64,
}

/// Aggregate CPU time counters from the first line of `<root>/stat`, in ticks.
///
/// Older kernels report fewer columns; absent trailing columns are zero.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CpuTimes {
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
    pub irq: u64,
    pub softirq: u64,
    pub steal: u64,
    pub guest: u64,
    pub guest_nice: u64,
}

const CPU_TIME_MIN_FIELDS: usize = 4;

impl CpuTimes {
    /// Sum of all columns.
    pub fn total(&self) -> u64 {
        [
            self.user,
            self.nice,
            self.system,
            self.idle,
            self.iowait,
            self.irq,
            self.softirq,
            self.steal,
            self.guest,
            self.guest_nice,
        ]
        .iter()
        .fold(0u64, |acc, v| acc.saturating_add(*v))
    }
}

/// Parse the contents of a `stat` record.
///
/// The command name may itself contain spaces and parentheses, so it is taken as the text
/// between the first `(` and the last `)`; numeric fields are counted from there.
pub fn parse_stat_record(raw: &str) -> Result<StatRecord> {
    let open = raw.find('(').ok_or_else(|| anyhow!("stat record missing '('"))?;
    let close = raw.rfind(')').ok_or_else(|| anyhow!("stat record missing ')'"))?;
    if close < open {
        return Err(anyhow!("stat record has unbalanced command name"));
    }
    let pid = raw[..open]
        .trim()
        .parse::<u32>()
        .context("stat record pid")?;
    let comm = raw[open + 1..close].to_string();

    // rest[0] is field 3 (state); field N lives at rest[N - 3].
    let rest: Vec<&str> = raw[close + 1..].split_whitespace().collect();
    let field = |n: usize, label: &str| -> Result<&str> {
        rest.get(n - 3)
            .copied()
            .ok_or_else(|| anyhow!("stat record too short: missing {label} (field {n})"))
    };

    let state = field(3, "state")?
        .chars()
        .next()
        .ok_or_else(|| anyhow!("stat record has empty state"))?;

    Ok(StatRecord {
        pid,
        comm,
        state,
        utime: parse_field(field(14, "utime")?, "utime")?,
        stime: parse_field(field(15, "stime")?, "stime")?,
        cutime: parse_field(field(16, "cutime")?, "cutime")?,
        cstime: parse_field(field(17, "cstime")?, "cstime")?,
        num_threads: parse_field(field(20, "num_threads")?, "num_threads")?,
        vsize: parse_field(field(23, "vsize")?, "vsize")?,
        rss_pages: parse_field(field(24, "rss")?, "rss")?,
    })
}

/// Parse the aggregate `cpu` line (the first line) of `<root>/stat`.
pub fn parse_cpu_times(raw: &str) -> Result<CpuTimes> {
    let line = raw
        .lines()
        .find(|l| l.split_whitespace().next() == Some("cpu"))
        .ok_or_else(|| anyhow!("no aggregate cpu line"))?;
    let values = line
        .split_whitespace()
        .skip(1)
        .take(10)
        .map(|v| parse_field::<u64>(v, "cpu time"))
        .collect::<Result<Vec<_>>>()?;
    if values.len() < CPU_TIME_MIN_FIELDS {
        return Err(anyhow!(
            "aggregate cpu line too short: {} fields, need {CPU_TIME_MIN_FIELDS}",
            values.len()
        ));
    }
    let at = |i: usize| values.get(i).copied().unwrap_or(0);
    Ok(CpuTimes {
        user: at(0),
        nice: at(1),
        system: at(2),
        idle: at(3),
        iowait: at(4),
        irq: at(5),
        softirq: at(6),
        steal: at(7),
        guest: at(8),
        guest_nice: at(9),
    })
}

fn parse_field<T>(value: &str, label: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .parse::<T>()
        .with_context(|| format!("parse {label} from {value:?}"))
}

/// Cut a thread name to [`MAX_THREAD_NAME_CHARS`] characters.
pub fn truncate_thread_name(name: &str) -> String {
    name.chars().take(MAX_THREAD_NAME_CHARS).collect()
}

impl ProcFs {
    /// Use a non-default root (tests, containers with a bind-mounted host `/proc`).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Read and parse `<root>/<pid>/stat`.
    pub fn read_process_stat(&self, pid: u32) -> Result<StatRecord> {
        let path = self.root.join(pid.to_string()).join("stat");
        read_stat_at(&path)
    }

    /// Read and parse `<root>/<pid>/task/<tid>/stat`.
    pub fn read_thread_stat(&self, pid: u32, tid: u32) -> Result<StatRecord> {
        let path = self
            .root
            .join(pid.to_string())
            .join("task")
            .join(tid.to_string())
            .join("stat");
        read_stat_at(&path)
    }

    /// Read and parse the aggregate CPU counters.
    pub fn read_cpu_times(&self) -> Result<CpuTimes> {
        let path = self.root.join("stat");
        let raw = std::fs::read_to_string(&path).with_context(|| format!("read {path:?}"))?;
        parse_cpu_times(&raw).with_context(|| format!("parse {path:?}"))
    }

    /// Command name of `pid` without the trailing newline.
    pub fn read_comm(&self, pid: u32) -> Result<String> {
        let raw = self.read_comm_bytes(pid)?;
        Ok(String::from_utf8_lossy(&raw).into_owned())
    }

    /// Raw command name of `pid` without the trailing newline.
    ///
    /// The kernel cuts names at a byte boundary, which may split a multi-byte character.
    pub fn read_comm_bytes(&self, pid: u32) -> Result<Vec<u8>> {
        let path = self.root.join(pid.to_string()).join("comm");
        let mut raw = std::fs::read(&path).with_context(|| format!("read {path:?}"))?;
        if raw.last() == Some(&b'\n') {
            raw.pop();
        }
        Ok(raw)
    }

    /// Ids of all processes, ascending.
    pub fn list_pids(&self) -> Result<Vec<u32>> {
        numeric_entries(&self.root)
    }

    /// Ids of all threads of `pid`, ascending.
    pub fn list_tasks(&self, pid: u32) -> Result<Vec<u32>> {
        numeric_entries(&self.root.join(pid.to_string()).join("task"))
    }
}

fn read_stat_at(path: &Path) -> Result<StatRecord> {
    let raw = std::fs::read(path).with_context(|| format!("read {path:?}"))?;
    parse_stat_record(&String::from_utf8_lossy(&raw)).with_context(|| format!("parse {path:?}"))
}

fn numeric_entries(dir: &Path) -> Result<Vec<u32>> {
    let mut ids = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("list {dir:?}"))? {
        let Ok(entry) = entry else {
            continue;
        };
        if let Some(id) = entry.file_name().to_str().and_then(|s| s.parse::<u32>().ok()) {
            ids.push(id);
        }
    }
    ids.sort_unstable();
    Ok(ids)
}

/// System page size in bytes, used to convert resident pages to bytes.
pub fn page_size() -> u64 {
    // SAFETY: sysconf has no preconditions and only reads system configuration.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 {
        size as u64
    } else {
        FALLBACK_PAGE_SIZE
    }
}


#[cfg(test)]
mod tests {
    use super::fixture::*;
    use super::*;

    #[test]
    fn parse_stat_record_reads_named_fields() {
        let rec = parse_stat_record(&stat_line(1234, "gstplay", 500, 120, 7, -1, 9)).unwrap();
        assert_eq!(rec.pid, 1234);
        assert_eq!(rec.comm, "gstplay");
        assert_eq!(rec.state, 'S');
        assert_eq!(rec.utime, 500);
        assert_eq!(rec.stime, 120);
        assert_eq!(rec.cutime, 7);
        assert_eq!(rec.cstime, -1);
        assert_eq!(rec.num_threads, 9);
        assert_eq!(rec.vsize, 104_857_600);
        assert_eq!(rec.rss_pages, 2560);
    }

    #[test]
    fn parse_stat_record_handles_spaces_and_parens_in_name() {
        let rec = parse_stat_record(&stat_line(77, "my (odd) name", 1, 2, 0, 0, 1)).unwrap();
        assert_eq!(rec.comm, "my (odd) name");
        assert_eq!(rec.utime, 1);
        assert_eq!(rec.stime, 2);
    }

    #[test]
    fn parse_stat_record_rejects_short_record() {
        let err = parse_stat_record("12 (short) S 1 2 3").unwrap_err();
        assert!(format!("{err:#}").contains("utime"));
    }

    #[test]
    fn parse_stat_record_rejects_missing_name() {
        assert!(parse_stat_record("12 S 1 2 3").is_err());
    }

    #[test]
    fn parse_cpu_times_sums_ten_columns() {
        let cpu = parse_cpu_times("cpu  10 1 5 100 2 0 3 0 0 0\ncpu0 10 1 5 100 2 0 3 0 0 0\n")
            .unwrap();
        assert_eq!(cpu.user, 10);
        assert_eq!(cpu.softirq, 3);
        assert_eq!(cpu.total(), 121);
    }

    #[test]
    fn parse_cpu_times_accepts_older_short_line() {
        let cpu = parse_cpu_times("cpu 4 0 2 50 1 0 0\n").unwrap();
        assert_eq!(cpu.steal, 0);
        assert_eq!(cpu.guest_nice, 0);
        assert_eq!(cpu.total(), 57);
    }

    #[test]
    fn parse_cpu_times_rejects_malformed_line() {
        assert!(parse_cpu_times("cpu 1 2\n").is_err());
        assert!(parse_cpu_times("cpu 1 x 3 4\n").is_err());
        assert!(parse_cpu_times("intr 1 2 3 4\n").is_err());
    }

    #[test]
    fn list_pids_returns_numeric_entries_sorted() {
        let root = temp_root("list");
        for pid in [300u32, 20, 1] {
            write_process(&root, pid, "p", &stat_line(pid, "p", 0, 0, 0, 0, 1));
        }
        std::fs::create_dir_all(root.join("self")).unwrap();
        std::fs::create_dir_all(root.join("sys")).unwrap();

        let fs = ProcFs::new(&root);
        assert_eq!(fs.list_pids().unwrap(), vec![1, 20, 300]);
    }

    #[test]
    fn read_comm_strips_newline() {
        let root = temp_root("comm");
        write_process(&root, 5, "Xorg", &stat_line(5, "Xorg", 0, 0, 0, 0, 1));
        assert_eq!(ProcFs::new(&root).read_comm(5).unwrap(), "Xorg");
    }

    #[test]
    fn split_character_in_comm_still_reads() {
        let root = temp_root("comm-utf8");
        let cut = &"éééééééé".as_bytes()[..15];
        let dir = root.join("6");
        std::fs::create_dir_all(&dir).unwrap();
        let mut comm = cut.to_vec();
        comm.push(b'\n');
        std::fs::write(dir.join("comm"), &comm).unwrap();
        let mut stat = b"6 (".to_vec();
        stat.extend_from_slice(cut);
        stat.extend_from_slice(stat_line(6, "x", 3, 4, 0, 0, 1).split_once(')').unwrap().1.as_bytes());
        std::fs::write(dir.join("stat"), stat).unwrap();

        let fs = ProcFs::new(&root);
        assert_eq!(fs.read_comm_bytes(6).unwrap(), cut);
        assert!(fs.read_comm(6).unwrap().starts_with("ééééééé"));
        let record = fs.read_process_stat(6).unwrap();
        assert_eq!((record.utime, record.stime), (3, 4));
    }

    #[test]
    fn truncate_thread_name_caps_length() {
        let long = "x".repeat(40);
        assert_eq!(truncate_thread_name(&long).len(), MAX_THREAD_NAME_CHARS);
        assert_eq!(truncate_thread_name("queue0:src"), "queue0:src");
    }

    #[test]
    fn page_size_is_positive() {
        assert!(page_size() > 0);
    }
}
