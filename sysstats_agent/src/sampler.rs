//! Background sampler: refreshes the shared snapshot while clients are connected,
//! so per-connection sends only read the latest values from the hub.

use crate::clock::{monotonic_ms, wall_clock_ms};
use crate::procfs::{CpuTimes, ProcFs};
use crate::state::AppState;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::debug;

/// Latest system-wide sample. Zeroed until the first tick.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SystemSnapshot {
    pub timestamp_ms: u64,
    pub monotonic_ms: u64,
    pub delta_ms: u64,
    pub cpu_usage: f64,
    pub mem_total_kb: u64,
    pub mem_available_kb: u64,
    pub uptime_s: f64,
    pub load1: f64,
    pub load5: f64,
    pub load15: f64,
    pub cpu_cores: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerMode {
    Idle,
    Running,
    /// Terminal. Lifecycle transitions can no longer restart sampling.
    Shutdown,
}

/// Delta tracker for the aggregate CPU counters.
#[derive(Debug, Default)]
pub struct CpuBaseline {
    prev: Option<CpuTimes>,
}

impl CpuBaseline {
    /// Feed the latest counters; returns busy % since the previous call.
    pub fn update(&mut self, now: CpuTimes) -> f64 {
        let Some(prev) = self.prev.replace(now) else {
            return 0.0;
        };
        if now.idle < prev.idle || now.total < prev.total {
            debug!("cpu counters went backwards, re-baselining");
            return 0.0;
        }
        let d_total = now.total - prev.total;
        if d_total == 0 {
            return 0.0;
        }
        let d_idle = now.idle - prev.idle;
        (100.0 * (1.0 - d_idle as f64 / d_total as f64)).clamp(0.0, 100.0)
    }
}

pub struct StatsSampler {
    procfs: ProcFs,
    cpu: CpuBaseline,
    prev_mono_ms: Option<u64>,
    cores: u32,
}

impl StatsSampler {
    pub fn new(procfs: ProcFs, cores: u32) -> Self {
        Self {
            procfs,
            cpu: CpuBaseline::default(),
            prev_mono_ms: None,
            cores,
        }
    }

    pub fn sample(&mut self) -> SystemSnapshot {
        self.sample_at(wall_clock_ms(), monotonic_ms())
    }

    pub fn sample_at(&mut self, wall_ms: u64, mono_ms: u64) -> SystemSnapshot {
        // A failed read keeps the previous baseline.
        let cpu_usage = match self.procfs.cpu_times() {
            Some(times) => self.cpu.update(times),
            None => 0.0,
        };
        let mem = self.procfs.meminfo();
        let load = self.procfs.loadavg().unwrap_or_default();

        let delta_ms = match self.prev_mono_ms {
            Some(prev) if mono_ms >= prev => mono_ms - prev,
            _ => 0,
        };
        self.prev_mono_ms = Some(mono_ms);

        SystemSnapshot {
            timestamp_ms: wall_ms,
            monotonic_ms: mono_ms,
            delta_ms,
            cpu_usage,
            mem_total_kb: mem.total_kb,
            mem_available_kb: mem.available_kb,
            uptime_s: self.procfs.uptime_secs().unwrap_or(0.0),
            load1: load.one,
            load5: load.five,
            load15: load.fifteen,
            cpu_cores: self.cores,
        }
    }
}

/// Run `sampler` every `period` while the hub says `Running`; park otherwise.
/// Returns once the mode becomes `Shutdown`.
pub fn spawn_sampler(state: AppState, mut sampler: StatsSampler, period: Duration) -> JoinHandle<()> {
    let mut mode = state.sampler_mode();
    tokio::spawn(async move {
        loop {
            let current = *mode.borrow_and_update();
            match current {
                SamplerMode::Shutdown => break,
                SamplerMode::Idle => {
                    if mode.changed().await.is_err() {
                        break;
                    }
                    continue;
                }
                SamplerMode::Running => {}
            }

            debug!("sampler running every {period:?}");
            if !run_until_parked(&state, &mut sampler, &mut mode, period).await {
                break;
            }
            debug!("sampler parked");
        }
        debug!("sampler stopped");
    })
}

/// Returns false when the mode channel is gone.
async fn run_until_parked(
    state: &AppState,
    sampler: &mut StatsSampler,
    mode: &mut watch::Receiver<SamplerMode>,
    period: Duration,
) -> bool {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => state.publish(sampler.sample()),
            changed = mode.changed() => {
                if changed.is_err() {
                    return false;
                }
                if *mode.borrow_and_update() != SamplerMode::Running {
                    return true;
                }
            }
        }
    }
}
