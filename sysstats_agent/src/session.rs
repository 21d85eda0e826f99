//! Per-connection session: process monitor plus the two bounded output buffers.
//!
//! A session is owned by its connection task and never shared. Both entry points
//! return the encoded frame as a borrow of the session's own buffer; `None`
//! means there is nothing to send.

use tracing::{error, info, warn};

use crate::collectors::Discovery;
use crate::monitor::{CpuScale, MonitorReport, ProcessMonitor};
use crate::procfs::ProcFs;
use crate::proto::Command;
use crate::response::{encode_fixed, encode_truncating, BoundedBuf, Truncate};
use crate::state::SnapshotView;
use crate::types::{
    CgiResponse, ClientsInfo, ErrorInfo, ProcStats, ProcessListResponse, StatsMessage,
    StorageResponse, SystemInfoResponse,
};

pub struct Session {
    monitor: ProcessMonitor,
    stream: BoundedBuf,
    list: BoundedBuf,
}

impl Session {
    pub fn new(message_limit: usize, list_limit: usize) -> Self {
        Self {
            monitor: ProcessMonitor::new(),
            stream: BoundedBuf::with_limit(message_limit),
            list: BoundedBuf::with_limit(list_limit),
        }
    }

    pub fn monitored(&self) -> Option<&str> {
        self.monitor.name()
    }

    /// Build the periodic stats frame for this write opportunity.
    pub fn render_snapshot(
        &mut self,
        view: &SnapshotView,
        procfs: &ProcFs,
        now_mono_ms: u64,
        scale: CpuScale,
    ) -> Option<&str> {
        let report = self.monitor.update(procfs, now_mono_ms, scale);
        let clients = ClientsInfo {
            connected: view.connected,
            max: view.max_clients,
        };
        let mut msg = StatsMessage::new(&view.snapshot, clients);
        match (report, self.monitor.name()) {
            (MonitorReport::Found(sample), Some(name)) => msg.proc = Some(ProcStats::new(name, &sample)),
            (MonitorReport::NotFound, Some(name)) => msg.error = Some(ErrorInfo::process_not_found(name)),
            _ => {}
        }

        match encode_fixed(&mut self.stream, &msg) {
            Ok(_) => Some(self.stream.as_str()),
            Err(e) => {
                error!("dropping stats frame: {e}");
                None
            }
        }
    }

    /// Apply one parsed client command. One-shot queries return their reply.
    pub fn answer(&mut self, command: Command, discovery: &Discovery) -> Option<&str> {
        match command {
            Command::Monitor(name) => {
                self.monitor.set_target(&name);
                info!("client monitoring process '{}'", self.monitor.name().unwrap_or_default());
                None
            }
            Command::StopMonitor => {
                self.monitor.set_target("");
                info!("client stopped process monitoring");
                None
            }
            Command::ListProcesses => {
                let mut reply = ProcessListResponse {
                    processes: discovery.process_names(),
                };
                self.encode_list("process list", &mut reply)
            }
            Command::Storage => {
                let mut reply = StorageResponse {
                    storage: discovery.storage(),
                };
                self.encode_list("storage list", &mut reply)
            }
            Command::ListCgi => {
                let mut reply = CgiResponse {
                    cgi: discovery.cgi(),
                };
                self.encode_list("cgi list", &mut reply)
            }
            Command::SystemInfo => {
                let reply = SystemInfoResponse {
                    system: discovery.system_info()?,
                };
                match encode_fixed(&mut self.list, &reply) {
                    Ok(_) => Some(self.list.as_str()),
                    Err(e) => {
                        warn!("failed to encode system info: {e}");
                        None
                    }
                }
            }
        }
    }

    fn encode_list<T: Truncate>(&mut self, what: &str, reply: &mut T) -> Option<&str> {
        let total = reply.item_count();
        match encode_truncating(&mut self.list, reply) {
            Ok(enc) => {
                if enc.dropped > 0 {
                    info!(
                        "{what} truncated to {} of {total} entries to fit {} bytes",
                        total - enc.dropped,
                        self.list.limit()
                    );
                }
                Some(self.list.as_str())
            }
            Err(e) => {
                warn!("failed to encode {what}: {e}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentConfig;
    use crate::procfs::fixtures::write_process;
    use crate::sampler::SystemSnapshot;
    use serde_json::Value;
    use std::sync::Arc;
    use tempfile::{tempdir, TempDir};

    const SCALE: CpuScale = CpuScale {
        clk_tck: 100,
        cores: 1,
    };

    fn view() -> SnapshotView {
        SnapshotView {
            snapshot: SystemSnapshot {
                timestamp_ms: 1_700_000_000_000,
                monotonic_ms: 4_689_109_420,
                delta_ms: 500,
                cpu_usage: 12.5,
                mem_total_kb: 981716,
                mem_available_kb: 531704,
                uptime_s: 4689109.42,
                load1: 0.28,
                load5: 0.34,
                load15: 0.26,
                cpu_cores: 2,
            },
            connected: 3,
            max_clients: 10,
        }
    }

    fn discovery(dir: &TempDir, max_processes: usize) -> Discovery {
        let config = AgentConfig {
            proc_root: dir.path().to_path_buf(),
            max_processes,
            storage_paths: vec![dir.path().to_path_buf()],
            mounts_path: dir.path().join("mounts"),
            cgi_dirs: vec![dir.path().to_path_buf()],
            ..AgentConfig::default()
        };
        Discovery::new(Arc::new(config), ProcFs::new(dir.path()))
    }

    #[test]
    fn plain_snapshot_fits_stream_limit() {
        let dir = tempdir().unwrap();
        let mut s = Session::new(1024, 8192);
        let frame = s
            .render_snapshot(&view(), &ProcFs::new(dir.path()), 1000, SCALE)
            .unwrap()
            .to_owned();
        assert!(frame.len() < 300, "{} bytes", frame.len());
        let v: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(v["clients"]["connected"], 3);
        assert_eq!(v["clients"]["max"], 10);
        assert!(v.get("proc").is_none());
        assert!(v.get("error").is_none());
    }

    #[test]
    fn missing_monitored_process_yields_error_object() {
        let dir = tempdir().unwrap();
        write_process(dir.path(), 1, "init", 0, 0);
        let mut s = Session::new(1024, 8192);
        let d = discovery(&dir, 256);
        assert!(s.answer(Command::Monitor("nonexistent_xyz".into()), &d).is_none());

        let frame = s
            .render_snapshot(&view(), &ProcFs::new(dir.path()), 1000, SCALE)
            .unwrap();
        let v: Value = serde_json::from_str(frame).unwrap();
        assert_eq!(v["error"]["type"], "process_not_found");
        assert_eq!(v["error"]["message"], "Process 'nonexistent_xyz' not found");
        assert!(v.get("proc").is_none());
    }

    #[test]
    fn found_process_yields_proc_object_then_stop_clears_it() {
        let dir = tempdir().unwrap();
        write_process(dir.path(), 77, "worker", 10, 10);
        let procfs = ProcFs::new(dir.path());
        let d = discovery(&dir, 256);
        let mut s = Session::new(1024, 8192);
        s.answer(Command::Monitor("worker".into()), &d);

        let v: Value =
            serde_json::from_str(s.render_snapshot(&view(), &procfs, 1000, SCALE).unwrap()).unwrap();
        assert_eq!(v["proc"]["name"], "worker");
        assert_eq!(v["proc"]["pid"], 77);
        assert_eq!(v["proc"]["rss_kb"], 4321);
        assert!(v.get("error").is_none());

        s.answer(Command::StopMonitor, &d);
        assert_eq!(s.monitored(), None);
        let v: Value =
            serde_json::from_str(s.render_snapshot(&view(), &procfs, 1500, SCALE).unwrap()).unwrap();
        assert!(v.get("proc").is_none());
    }

    #[test]
    fn oversized_snapshot_is_dropped() {
        let dir = tempdir().unwrap();
        let mut s = Session::new(64, 8192);
        assert!(s
            .render_snapshot(&view(), &ProcFs::new(dir.path()), 1000, SCALE)
            .is_none());
    }

    #[test]
    fn process_list_is_truncated_to_list_limit() {
        let dir = tempdir().unwrap();
        for pid in 1..=100 {
            write_process(dir.path(), pid, &format!("daemon-number-{pid:04}"), 0, 0);
        }
        let d = discovery(&dir, 256);
        let mut s = Session::new(1024, 512);
        let reply = s.answer(Command::ListProcesses, &d).unwrap();
        assert!(reply.len() <= 512);
        let v: Value = serde_json::from_str(reply).unwrap();
        let names = v["processes"].as_array().unwrap();
        assert!(!names.is_empty() && names.len() < 100);
        let mut unique: Vec<_> = names.iter().filter_map(Value::as_str).collect();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), names.len());
    }

    #[test]
    fn storage_and_cgi_replies_are_valid_json() {
        let dir = tempdir().unwrap();
        let d = discovery(&dir, 256);
        let mut s = Session::new(1024, 8192);

        let v: Value = serde_json::from_str(s.answer(Command::Storage, &d).unwrap()).unwrap();
        let storage = v["storage"].as_array().unwrap();
        assert_eq!(storage.len(), 1);
        assert_eq!(storage[0]["fs"], "unknown");

        let v: Value = serde_json::from_str(s.answer(Command::ListCgi, &d).unwrap()).unwrap();
        assert_eq!(v["cgi"], Value::Array(vec![]));

        let v: Value = serde_json::from_str(s.answer(Command::SystemInfo, &d).unwrap()).unwrap();
        assert!(v["system"]["kernel_release"].is_string());
    }
}
