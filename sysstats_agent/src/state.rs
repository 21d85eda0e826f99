//! Shared agent state: the hub (latest snapshot + connection accounting) and
//! sampler control.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::debug;

use crate::collectors::Discovery;
use crate::config::AgentConfig;
use crate::lifecycle::{AdmissionError, ConnectionAccounting, Phase, SamplerAction, SessionSlot};
use crate::procfs::{ProcFs, CPU_CORES};
use crate::sampler::{SamplerMode, SystemSnapshot};

/// Everything behind the single hub lock. Never held across an `.await`.
struct Hub {
    accounting: ConnectionAccounting,
    snapshot: SystemSnapshot,
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AgentConfig>,
    pub procfs: ProcFs,
    pub discovery: Arc<Discovery>,
    hub: Arc<Mutex<Hub>>,
    sampler: Arc<watch::Sender<SamplerMode>>,
}

/// Copy of the hub taken for one outgoing frame.
#[derive(Debug, Clone, Copy)]
pub struct SnapshotView {
    pub snapshot: SystemSnapshot,
    pub connected: u32,
    pub max_clients: u32,
}

impl AppState {
    pub fn new(config: AgentConfig) -> Self {
        let procfs = ProcFs::new(&config.proc_root);
        let config = Arc::new(config);
        let hub = Hub {
            accounting: ConnectionAccounting::new(config.max_clients),
            snapshot: SystemSnapshot {
                cpu_cores: *CPU_CORES,
                ..SystemSnapshot::default()
            },
        };
        let (tx, _rx) = watch::channel(SamplerMode::Idle);
        Self {
            discovery: Arc::new(Discovery::new(config.clone(), procfs.clone())),
            config,
            procfs,
            hub: Arc::new(Mutex::new(hub)),
            sampler: Arc::new(tx),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Hub> {
        // The hub holds plain counters; a panicked holder leaves them usable.
        self.hub.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admission control. The returned ticket releases its slot when dropped.
    pub fn admit(&self) -> Result<SessionTicket, AdmissionError> {
        let slot = self.lock().accounting.admit()?;
        Ok(SessionTicket {
            state: self.clone(),
            slot,
        })
    }

    pub fn accounting(&self) -> ConnectionAccounting {
        self.lock().accounting
    }

    pub fn view(&self) -> SnapshotView {
        let hub = self.lock();
        SnapshotView {
            snapshot: hub.snapshot,
            connected: hub.accounting.connected(),
            max_clients: hub.accounting.max_clients(),
        }
    }

    pub fn publish(&self, snapshot: SystemSnapshot) {
        self.lock().snapshot = snapshot;
    }

    pub fn sampler_mode(&self) -> watch::Receiver<SamplerMode> {
        self.sampler.subscribe()
    }

    /// Stop the sampler for good; later connects will not restart it.
    pub fn shutdown_sampler(&self) {
        self.sampler.send_replace(SamplerMode::Shutdown);
    }

    fn drive_sampler(&self, action: SamplerAction) {
        let target = match action {
            SamplerAction::Start => SamplerMode::Running,
            SamplerAction::Stop => SamplerMode::Idle,
            SamplerAction::Keep => return,
        };
        self.sampler.send_if_modified(|mode| {
            if *mode == SamplerMode::Shutdown || *mode == target {
                return false;
            }
            *mode = target;
            true
        });
    }
}

/// Per-connection lifecycle ticket. Dropping it performs the destroy release.
pub struct SessionTicket {
    state: AppState,
    slot: SessionSlot,
}

impl SessionTicket {
    /// Upgrade completed. Returns the accounting after the transition.
    pub fn establish(&mut self) -> ConnectionAccounting {
        let mut hub = self.state.lock();
        let action = hub.accounting.establish(&mut self.slot);
        self.state.drive_sampler(action);
        hub.accounting
    }

    pub fn close(&mut self) -> ConnectionAccounting {
        let mut hub = self.state.lock();
        let action = hub.accounting.close(&mut self.slot);
        self.state.drive_sampler(action);
        hub.accounting
    }

    pub fn phase(&self) -> Phase {
        self.slot.phase()
    }
}

impl Drop for SessionTicket {
    fn drop(&mut self) {
        let mut hub = self.state.lock();
        let was = self.slot.phase();
        let action = hub.accounting.destroy(&mut self.slot);
        self.state.drive_sampler(action);
        if was != Phase::Closed {
            debug!(
                "session destroyed from {was:?} (pending={}, connected={})",
                hub.accounting.pending(),
                hub.accounting.connected()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(max_clients: u32) -> AppState {
        AppState::new(AgentConfig {
            max_clients,
            ..AgentConfig::default()
        })
    }

    #[test]
    fn ticket_drop_releases_pending_slot() {
        let s = state(1);
        let ticket = s.admit().unwrap();
        assert!(s.admit().is_err());
        drop(ticket);
        assert_eq!(s.accounting().pending(), 0);
        assert!(s.admit().is_ok());
    }

    #[test]
    fn first_establish_starts_and_last_close_parks_sampler() {
        let s = state(4);
        let mode = s.sampler_mode();
        let mut a = s.admit().unwrap();
        let mut b = s.admit().unwrap();
        assert_eq!(*mode.borrow(), SamplerMode::Idle);

        a.establish();
        assert_eq!(*mode.borrow(), SamplerMode::Running);
        let counts = b.establish();
        assert_eq!(counts.connected(), 2);

        a.close();
        assert_eq!(*mode.borrow(), SamplerMode::Running);
        b.close();
        assert_eq!(*mode.borrow(), SamplerMode::Idle);
        assert_eq!(s.view().connected, 0);
    }

    #[test]
    fn dropping_established_ticket_counts_as_close() {
        let s = state(2);
        let mode = s.sampler_mode();
        let mut t = s.admit().unwrap();
        t.establish();
        assert_eq!(s.view().connected, 1);
        drop(t);
        assert_eq!(s.view().connected, 0);
        assert_eq!(*mode.borrow(), SamplerMode::Idle);
    }

    #[test]
    fn shutdown_is_sticky() {
        let s = state(2);
        let mode = s.sampler_mode();
        s.shutdown_sampler();
        let mut t = s.admit().unwrap();
        t.establish();
        assert_eq!(*mode.borrow(), SamplerMode::Shutdown);
        t.close();
        assert_eq!(*mode.borrow(), SamplerMode::Shutdown);
    }

    #[test]
    fn view_reflects_published_snapshot() {
        let s = state(10);
        assert_eq!(s.view().snapshot.cpu_cores, *CPU_CORES);
        s.publish(SystemSnapshot {
            cpu_usage: 12.5,
            cpu_cores: 8,
            ..SystemSnapshot::default()
        });
        let v = s.view();
        assert_eq!(v.snapshot.cpu_usage, 12.5);
        assert_eq!(v.max_clients, 10);
    }
}
