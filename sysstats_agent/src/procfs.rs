//! Readers for `/proc`-style text counters.
//!
//! Every reader is rooted at a [`ProcFs`] so the whole tree can be swapped for a
//! fixture. Nothing here returns a hard error: callers get `None` or zeroed
//! fields and keep streaming.

use once_cell::sync::Lazy;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const DEFAULT_PROC_ROOT: &str = "/proc";

/// Task state letters that may follow the `comm` field of `/proc/<pid>/stat`.
const TASK_STATES: &[u8] = b"RSDZTtWXxKPI";

/// System clock ticks per second (`_SC_CLK_TCK`), 100 when unavailable.
pub static CLK_TCK: Lazy<u64> = Lazy::new(|| {
    // SAFETY: sysconf has no preconditions; failure is reported as -1.
    let tck = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    if tck > 0 {
        tck as u64
    } else {
        warn!("sysconf(_SC_CLK_TCK) failed, assuming 100");
        100
    }
});

/// Online CPU cores, read once. Never zero so it is always safe to divide by.
pub static CPU_CORES: Lazy<u32> = Lazy::new(|| {
    // SAFETY: see CLK_TCK.
    let n = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
    let cores = if n > 0 {
        n as u32
    } else {
        warn!("sysconf(_SC_NPROCESSORS_ONLN) failed, defaulting to 1 CPU");
        1
    };
    info!("detected {cores} CPU core(s)");
    cores
});

/// Aggregate CPU counters from the first line of `/proc/stat`, in jiffies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuTimes {
    /// idle + iowait
    pub idle: u64,
    /// user + nice + system + idle + iowait + irq + softirq + steal
    pub total: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemInfo {
    pub total_kb: u64,
    pub available_kb: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LoadAvg {
    pub one: f64,
    pub five: f64,
    pub fifteen: f64,
}

/// Cumulative CPU time of one process, in clock ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatTimes {
    pub utime: u64,
    pub stime: u64,
}

impl StatTimes {
    pub fn total(&self) -> u64 {
        self.utime.saturating_add(self.stime)
    }
}

/// PSS and USS from `/proc/<pid>/smaps_rollup`, in kB.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SmapsRollup {
    pub pss_kb: u64,
    pub uss_kb: u64,
}

/// Parse the aggregate `cpu` line. Needs at least eight counters; extra
/// fields (guest, guest_nice) are ignored.
pub fn parse_cpu_line(line: &str) -> Option<CpuTimes> {
    let mut it = line.split_whitespace();
    if it.next()? != "cpu" {
        return None;
    }
    let mut fields = [0u64; 8];
    for slot in fields.iter_mut() {
        *slot = it.next()?.parse().ok()?;
    }
    let idle = fields[3].saturating_add(fields[4]);
    let total = fields.iter().fold(0u64, |acc, v| acc.saturating_add(*v));
    Some(CpuTimes { idle, total })
}

/// Parse the numeric part of a `"   1234 kB"` value.
pub fn parse_kb_value(v: &str) -> Option<u64> {
    v.split_whitespace().next()?.parse().ok()
}

pub fn parse_meminfo(content: &str) -> MemInfo {
    let mut mem = MemInfo::default();
    let mut got_total = false;
    let mut got_avail = false;
    for line in content.lines() {
        if let Some(v) = line.strip_prefix("MemTotal:") {
            mem.total_kb = parse_kb_value(v).unwrap_or(0);
            got_total = true;
        } else if let Some(v) = line.strip_prefix("MemAvailable:") {
            mem.available_kb = parse_kb_value(v).unwrap_or(0);
            got_avail = true;
        }
        if got_total && got_avail {
            break;
        }
    }
    mem
}

/// First value of `/proc/uptime`; the line must carry both uptime and idle.
pub fn parse_uptime(content: &str) -> Option<f64> {
    let mut it = content.split_whitespace();
    let up: f64 = it.next()?.parse().ok()?;
    let _idle: f64 = it.next()?.parse().ok()?;
    Some(up)
}

pub fn parse_loadavg(content: &str) -> Option<LoadAvg> {
    let mut it = content.split_whitespace();
    Some(LoadAvg {
        one: it.next()?.parse().ok()?,
        five: it.next()?.parse().ok()?,
        fifteen: it.next()?.parse().ok()?,
    })
}

/// Extract utime/stime from a `/proc/<pid>/stat` line.
///
/// The name field is parenthesized and may itself contain `)` and spaces.
/// Scanning forward from the first `(`, the name ends at the first `)` that is
/// followed by a space, a task state letter and another space.
pub fn parse_pid_stat(line: &str) -> Option<StatTimes> {
    let open = line.find('(')?;
    let bytes = line.as_bytes();
    let close = (open + 1..bytes.len()).find(|&i| {
        bytes[i] == b')'
            && bytes.get(i + 1) == Some(&b' ')
            && bytes.get(i + 2).is_some_and(|c| TASK_STATES.contains(c))
            && bytes.get(i + 3) == Some(&b' ')
    })?;

    // state ppid pgrp session tty_nr tpgid flags minflt cminflt majflt cmajflt utime stime
    let mut it = line.get(close + 2..)?.split_whitespace();
    let _state = it.next()?;
    let utime = it.nth(10)?.parse().ok()?;
    let stime = it.next()?.parse().ok()?;
    Some(StatTimes { utime, stime })
}

/// Sum the `/proc/<pid>/smaps_rollup` lines we care about.
/// USS = Private_Clean + Private_Dirty + Private_Hugetlb + Private_Shmem.
pub fn parse_smaps_rollup(content: &str) -> SmapsRollup {
    let mut out = SmapsRollup::default();
    for line in content.lines() {
        if let Some(v) = line.strip_prefix("Pss:") {
            out.pss_kb = parse_kb_value(v).unwrap_or(0);
        } else if let Some(v) = line
            .strip_prefix("Private_Clean:")
            .or_else(|| line.strip_prefix("Private_Dirty:"))
            .or_else(|| line.strip_prefix("Private_Hugetlb:"))
            .or_else(|| line.strip_prefix("Private_Shmem:"))
        {
            out.uss_kb = out.uss_kb.saturating_add(parse_kb_value(v).unwrap_or(0));
        }
    }
    out
}

/// Handle on a proc filesystem tree (normally `/proc`).
#[derive(Debug, Clone)]
pub struct ProcFs {
    root: PathBuf,
}

impl Default for ProcFs {
    fn default() -> Self {
        Self::new(DEFAULT_PROC_ROOT)
    }
}

impl ProcFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn read(&self, rel: impl AsRef<Path>) -> Option<String> {
        let path = self.root.join(rel);
        match fs::read_to_string(&path) {
            Ok(s) => Some(s),
            Err(e) => {
                debug!("failed to read {}: {e}", path.display());
                None
            }
        }
    }

    fn read_pid(&self, pid: u32, file: &str) -> Option<String> {
        let path = self.root.join(pid.to_string()).join(file);
        fs::read_to_string(path).ok()
    }

    pub fn cpu_times(&self) -> Option<CpuTimes> {
        let s = self.read("stat")?;
        parse_cpu_line(s.lines().next()?)
    }

    pub fn meminfo(&self) -> MemInfo {
        self.read("meminfo")
            .map(|s| parse_meminfo(&s))
            .unwrap_or_default()
    }

    pub fn uptime_secs(&self) -> Option<f64> {
        parse_uptime(&self.read("uptime")?)
    }

    pub fn loadavg(&self) -> Option<LoadAvg> {
        parse_loadavg(&self.read("loadavg")?)
    }

    /// Numeric entries of the proc root, in directory order.
    pub fn pids(&self) -> impl Iterator<Item = u32> {
        fs::read_dir(&self.root)
            .into_iter()
            .flatten()
            .flatten()
            .filter_map(|entry| {
                // Some filesystems report an unknown type; only skip what is clearly not a dir.
                if entry.file_type().is_ok_and(|t| !t.is_dir()) {
                    return None;
                }
                let name = entry.file_name();
                let name = name.to_str()?;
                if name.is_empty() || !name.bytes().all(|b| b.is_ascii_digit()) {
                    return None;
                }
                name.parse::<u32>().ok().filter(|&pid| pid > 0)
            })
    }

    /// Short process name from `/proc/<pid>/comm`, trailing newline removed.
    pub fn comm(&self, pid: u32) -> Option<String> {
        let s = self.read_pid(pid, "comm")?;
        Some(s.strip_suffix('\n').unwrap_or(&s).to_string())
    }

    pub fn stat_times(&self, pid: u32) -> Option<StatTimes> {
        let s = self.read_pid(pid, "stat")?;
        parse_pid_stat(s.lines().next()?)
    }

    /// `VmRSS` from `/proc/<pid>/status`. Kernel threads have none.
    pub fn vm_rss_kb(&self, pid: u32) -> Option<u64> {
        let s = self.read_pid(pid, "status")?;
        s.lines()
            .find_map(|l| l.strip_prefix("VmRSS:"))
            .and_then(parse_kb_value)
    }

    /// `None` when smaps_rollup is missing (kernel < 4.14) or not readable.
    pub fn smaps_rollup(&self, pid: u32) -> Option<SmapsRollup> {
        self.read_pid(pid, "smaps_rollup")
            .map(|s| parse_smaps_rollup(&s))
    }
}
