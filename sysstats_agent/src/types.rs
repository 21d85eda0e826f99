//! Data types sent to the client over WebSocket.
//! Keep this module minimal and stable: it defines the wire format.

use serde::Serialize;

use crate::monitor::ProcessSample;
use crate::response::Truncate;
use crate::sampler::SystemSnapshot;

/// Percentages and load averages go out with two decimals.
pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
pub struct ClientsInfo {
    pub connected: u32,
    pub max: u32,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct ProcStats<'a> {
    pub name: &'a str,
    pub cpu: f64,
    pub rss_kb: u64,
    pub pss_kb: u64,
    pub uss_kb: u64,
    pub pid: u32,
}

impl<'a> ProcStats<'a> {
    pub fn new(name: &'a str, s: &ProcessSample) -> Self {
        Self {
            name,
            cpu: round2(s.cpu),
            rss_kb: s.rss_kb,
            pss_kb: s.pss_kb,
            uss_kb: s.uss_kb,
            pid: s.pid,
        }
    }
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub message: String,
}

impl ErrorInfo {
    pub fn process_not_found(name: &str) -> Self {
        Self {
            kind: "process_not_found",
            message: format!("Process '{name}' not found"),
        }
    }
}

/// Periodic frame streamed to every connected client.
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct StatsMessage<'a> {
    pub ts: u64,
    pub mono_ms: u64,
    pub delta_ms: u64,
    pub cpu: f64,
    pub cpu_cores: u32,
    pub mem_total_kb: u64,
    pub mem_available_kb: u64,
    pub uptime_s: u64,
    pub load1: f64,
    pub load5: f64,
    pub load15: f64,
    pub clients: ClientsInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proc: Option<ProcStats<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

impl StatsMessage<'_> {
    pub fn new(s: &SystemSnapshot, clients: ClientsInfo) -> Self {
        Self {
            ts: s.timestamp_ms,
            mono_ms: s.monotonic_ms,
            delta_ms: s.delta_ms,
            cpu: round2(s.cpu_usage),
            cpu_cores: s.cpu_cores,
            mem_total_kb: s.mem_total_kb,
            mem_available_kb: s.mem_available_kb,
            uptime_s: s.uptime_s.max(0.0).round() as u64,
            load1: round2(s.load1),
            load5: round2(s.load5),
            load15: round2(s.load15),
            clients,
            proc: None,
            error: None,
        }
    }
}

#[derive(Debug, Serialize, Clone, Default, PartialEq, Eq)]
pub struct ProcessListResponse {
    pub processes: Vec<String>,
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct StorageInfo {
    pub path: String,
    pub fs: String,
    pub total_kb: u64,
    pub used_kb: u64,
    pub available_kb: u64,
}

#[derive(Debug, Serialize, Clone, Default, PartialEq, Eq)]
pub struct StorageResponse {
    pub storage: Vec<StorageInfo>,
}

#[derive(Debug, Serialize, Clone, Default, PartialEq, Eq)]
pub struct SystemInfo {
    pub kernel_release: String,
    pub kernel_version: String,
    pub machine: String,
    pub hostname: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os_pretty_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os_version: Option<String>,
    pub cpu_cores: u32,
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct SystemInfoResponse {
    pub system: SystemInfo,
}

#[derive(Debug, Serialize, Clone, Default, PartialEq, Eq)]
pub struct CgiResponse {
    pub cgi: Vec<String>,
}

impl Truncate for ProcessListResponse {
    fn item_count(&self) -> usize {
        self.processes.len()
    }
    fn pop_tail(&mut self) -> bool {
        self.processes.pop().is_some()
    }
}

impl Truncate for StorageResponse {
    fn item_count(&self) -> usize {
        self.storage.len()
    }
    fn pop_tail(&mut self) -> bool {
        self.storage.pop().is_some()
    }
}

impl Truncate for CgiResponse {
    fn item_count(&self) -> usize {
        self.cgi.len()
    }
    fn pop_tail(&mut self) -> bool {
        self.cgi.pop().is_some()
    }
}
