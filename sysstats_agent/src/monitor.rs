//! Per-connection process monitor.
//!
//! Tracks one process by its short name (`comm`). The PID is cached between
//! updates but re-checked against the name every time, so a recycled PID is
//! never reported as the monitored process.

use tracing::debug;

use crate::procfs::{ProcFs, SmapsRollup, CLK_TCK, CPU_CORES};

/// Longest monitored name kept, in bytes.
pub const MAX_PROC_NAME_LEN: usize = 63;

/// Constants used to turn jiffies into a core-normalized percentage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuScale {
    pub clk_tck: u64,
    pub cores: u32,
}

impl CpuScale {
    pub fn host() -> Self {
        Self {
            clk_tck: *CLK_TCK,
            cores: *CPU_CORES,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessSample {
    pub pid: u32,
    pub cpu: f64,
    pub rss_kb: u64,
    pub pss_kb: u64,
    pub uss_kb: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MonitorReport {
    Disabled,
    NotFound,
    Found(ProcessSample),
}

#[derive(Debug, Clone, Copy)]
struct Baseline {
    jiffies: u64,
    mono_ms: u64,
}

#[derive(Debug, Default)]
pub struct ProcessMonitor {
    name: Option<String>,
    /// 0 = unresolved
    pid: u32,
    baseline: Option<Baseline>,
}

impl ProcessMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start monitoring `name`; an empty name disables monitoring. Always
    /// drops the cached PID and baseline.
    pub fn set_target(&mut self, name: &str) {
        self.pid = 0;
        self.baseline = None;
        self.name = if name.is_empty() {
            None
        } else {
            Some(truncate_name(name).to_owned())
        };
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn cached_pid(&self) -> u32 {
        self.pid
    }

    pub fn update(&mut self, procfs: &ProcFs, now_mono_ms: u64, scale: CpuScale) -> MonitorReport {
        let Some(name) = self.name.as_deref() else {
            return MonitorReport::Disabled;
        };

        if self.pid != 0 && procfs.comm(self.pid).as_deref() != Some(name) {
            debug!("pid {} is no longer '{name}', re-resolving", self.pid);
            self.pid = 0;
            self.baseline = None;
        }
        if self.pid == 0 {
            self.pid = find_pid_by_comm(procfs, name).unwrap_or(0);
        }
        if self.pid == 0 {
            self.baseline = None;
            return MonitorReport::NotFound;
        }

        let pid = self.pid;
        let Some(times) = procfs.stat_times(pid) else {
            debug!("cannot read stat of pid {pid} ('{name}')");
            self.pid = 0;
            self.baseline = None;
            return MonitorReport::NotFound;
        };
        let rss_kb = procfs.vm_rss_kb(pid).unwrap_or(0);
        // Kernels without smaps_rollup report 0 for both.
        let SmapsRollup { pss_kb, uss_kb } = procfs.smaps_rollup(pid).unwrap_or_default();

        let jiffies = times.total();
        let cpu = match self.baseline {
            Some(prev) if jiffies >= prev.jiffies && now_mono_ms > prev.mono_ms => cpu_percent(
                jiffies - prev.jiffies,
                now_mono_ms - prev.mono_ms,
                scale,
            ),
            _ => 0.0,
        };
        self.baseline = Some(Baseline {
            jiffies,
            mono_ms: now_mono_ms,
        });

        MonitorReport::Found(ProcessSample {
            pid,
            cpu,
            rss_kb,
            pss_kb,
            uss_kb,
        })
    }
}

/// `(Δjiffies / clk_tck / Δseconds * 100) / cores`, clamped to [0, 100].
pub fn cpu_percent(delta_jiffies: u64, delta_ms: u64, scale: CpuScale) -> f64 {
    if delta_ms == 0 || scale.clk_tck == 0 {
        return 0.0;
    }
    let busy_s = delta_jiffies as f64 / scale.clk_tck as f64;
    let elapsed_s = delta_ms as f64 / 1000.0;
    let pct = busy_s / elapsed_s * 100.0 / scale.cores.max(1) as f64;
    pct.clamp(0.0, 100.0)
}

/// First process whose `comm` equals `name`. Kernel threads (`[...]`) are skipped.
fn find_pid_by_comm(procfs: &ProcFs, name: &str) -> Option<u32> {
    procfs.pids().find(|&pid| {
        procfs
            .comm(pid)
            .is_some_and(|comm| !comm.starts_with('[') && comm == name)
    })
}

fn truncate_name(name: &str) -> &str {
    if name.len() <= MAX_PROC_NAME_LEN {
        return name;
    }
    let mut end = MAX_PROC_NAME_LEN;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}
