//! Connection admission and accounting.
//!
//! The transport reports up to four events per connection: admission,
//! establishment, close, and a final destroy that always happens. Establish and
//! close may be skipped on handshake failures, so each admitted connection
//! carries a [`SessionSlot`] and every transition checks the slot's phase. The
//! slot makes sure exactly one of `pending`/`connected` is released, once.

use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("client limit ({max}) reached")]
    Full { max: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Pending,
    Established,
    Closed,
    Destroyed,
}

/// What the sampler should do after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerAction {
    Keep,
    Start,
    Stop,
}

/// Lifecycle token for one admitted connection.
#[derive(Debug)]
pub struct SessionSlot {
    phase: Phase,
    /// Set once the connection has been counted toward `connected`.
    counted: bool,
}

impl SessionSlot {
    fn new() -> Self {
        Self {
            phase: Phase::Pending,
            counted: false,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_counted(&self) -> bool {
        self.counted
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionAccounting {
    pending: u32,
    connected: u32,
    max_clients: u32,
}

impl ConnectionAccounting {
    pub fn new(max_clients: u32) -> Self {
        Self {
            pending: 0,
            connected: 0,
            max_clients,
        }
    }

    pub fn pending(&self) -> u32 {
        self.pending
    }

    pub fn connected(&self) -> u32 {
        self.connected
    }

    pub fn max_clients(&self) -> u32 {
        self.max_clients
    }

    /// Reserve a pending slot, counting handshakes in progress against the limit.
    pub fn admit(&mut self) -> Result<SessionSlot, AdmissionError> {
        if self.connected.saturating_add(self.pending) >= self.max_clients {
            return Err(AdmissionError::Full {
                max: self.max_clients,
            });
        }
        self.pending += 1;
        Ok(SessionSlot::new())
    }

    /// Handshake completed: convert the pending slot into a connected one.
    pub fn establish(&mut self, slot: &mut SessionSlot) -> SamplerAction {
        if slot.phase != Phase::Pending {
            return SamplerAction::Keep;
        }
        self.pending = self.pending.saturating_sub(1);
        self.connected += 1;
        slot.phase = Phase::Established;
        slot.counted = true;
        if self.connected == 1 {
            SamplerAction::Start
        } else {
            SamplerAction::Keep
        }
    }

    pub fn close(&mut self, slot: &mut SessionSlot) -> SamplerAction {
        if slot.phase != Phase::Established {
            return SamplerAction::Keep;
        }
        slot.phase = Phase::Closed;
        self.release_connected()
    }

    /// Final release. Frees the pending slot of a connection that never
    /// established; performs the close release if close was skipped.
    pub fn destroy(&mut self, slot: &mut SessionSlot) -> SamplerAction {
        let action = match slot.phase {
            Phase::Pending => {
                self.pending = self.pending.saturating_sub(1);
                SamplerAction::Keep
            }
            Phase::Established => self.release_connected(),
            Phase::Closed | Phase::Destroyed => SamplerAction::Keep,
        };
        slot.phase = Phase::Destroyed;
        action
    }

    fn release_connected(&mut self) -> SamplerAction {
        self.connected = self.connected.saturating_sub(1);
        if self.connected == 0 {
            SamplerAction::Stop
        } else {
            SamplerAction::Keep
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn full_lifecycle_starts_and_stops_sampler() {
        let mut acc = ConnectionAccounting::new(10);
        let mut slot = acc.admit().unwrap();
        assert_eq!((acc.pending(), acc.connected()), (1, 0));

        assert_eq!(acc.establish(&mut slot), SamplerAction::Start);
        assert_eq!((acc.pending(), acc.connected()), (0, 1));
        assert!(slot.is_counted());

        assert_eq!(acc.close(&mut slot), SamplerAction::Stop);
        assert_eq!(acc.destroy(&mut slot), SamplerAction::Keep);
        assert_eq!((acc.pending(), acc.connected()), (0, 0));
        assert_eq!(slot.phase(), Phase::Destroyed);
    }

    #[test]
    fn handshake_failure_releases_pending_on_destroy() {
        let mut acc = ConnectionAccounting::new(2);
        let mut slot = acc.admit().unwrap();
        // close without establish is a no-op
        assert_eq!(acc.close(&mut slot), SamplerAction::Keep);
        assert_eq!(acc.pending(), 1);
        acc.destroy(&mut slot);
        assert_eq!((acc.pending(), acc.connected()), (0, 0));
    }

    #[test]
    fn destroy_without_close_releases_connected() {
        let mut acc = ConnectionAccounting::new(2);
        let mut a = acc.admit().unwrap();
        let mut b = acc.admit().unwrap();
        acc.establish(&mut a);
        acc.establish(&mut b);
        assert_eq!(acc.destroy(&mut a), SamplerAction::Keep);
        assert_eq!(acc.destroy(&mut b), SamplerAction::Stop);
        assert_eq!((acc.pending(), acc.connected()), (0, 0));
    }

    #[test]
    fn repeated_events_are_idempotent() {
        let mut acc = ConnectionAccounting::new(3);
        let mut keep = acc.admit().unwrap();
        acc.establish(&mut keep);
        let mut slot = acc.admit().unwrap();
        acc.establish(&mut slot);
        acc.establish(&mut slot);
        assert_eq!(acc.connected(), 2);
        acc.close(&mut slot);
        acc.close(&mut slot);
        acc.destroy(&mut slot);
        acc.destroy(&mut slot);
        assert_eq!((acc.pending(), acc.connected()), (0, 1));
    }

    #[test]
    fn eleventh_client_is_rejected_without_touching_counters() {
        let mut acc = ConnectionAccounting::new(10);
        let mut slots: Vec<_> = (0..10).map(|_| acc.admit().unwrap()).collect();
        for s in slots.iter_mut() {
            acc.establish(s);
        }
        let before = acc;
        assert_eq!(acc.admit().unwrap_err(), AdmissionError::Full { max: 10 });
        assert_eq!(acc, before);
        assert_eq!((acc.pending(), acc.connected()), (0, 10));
    }

    #[test]
    fn pending_handshakes_count_toward_the_limit() {
        let mut acc = ConnectionAccounting::new(2);
        let _a = acc.admit().unwrap();
        let _b = acc.admit().unwrap();
        assert!(acc.admit().is_err());
    }

    #[test]
    fn random_event_sequences_keep_accounting_consistent() {
        const MAX: u32 = 5;
        for seed in 0..200u64 {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut acc = ConnectionAccounting::new(MAX);
            // (slot, number of releases observed for it)
            let mut live: Vec<(SessionSlot, u32)> = Vec::new();

            for _ in 0..300 {
                let before = (acc.pending(), acc.connected());
                match rng.gen_range(0..4) {
                    0 => {
                        if let Ok(slot) = acc.admit() {
                            live.push((slot, 0));
                        } else {
                            assert_eq!((acc.pending(), acc.connected()), before);
                        }
                    }
                    1 if !live.is_empty() => {
                        let i = rng.gen_range(0..live.len());
                        acc.establish(&mut live[i].0);
                    }
                    2 if !live.is_empty() => {
                        let i = rng.gen_range(0..live.len());
                        acc.close(&mut live[i].0);
                        if (acc.pending(), acc.connected()) != before {
                            live[i].1 += 1;
                        }
                    }
                    3 if !live.is_empty() => {
                        let i = rng.gen_range(0..live.len());
                        let (mut slot, mut releases) = live.swap_remove(i);
                        acc.destroy(&mut slot);
                        if (acc.pending(), acc.connected()) != before {
                            releases += 1;
                        }
                        assert_eq!(releases, 1, "seed {seed}: slot released {releases} times");
                    }
                    _ => {}
                }
                assert!(acc.pending() + acc.connected() <= MAX, "seed {seed}");
                let established = live
                    .iter()
                    .filter(|(s, _)| s.phase() == Phase::Established)
                    .count() as u32;
                let pending = live
                    .iter()
                    .filter(|(s, _)| s.phase() == Phase::Pending)
                    .count() as u32;
                assert_eq!(acc.connected(), established, "seed {seed}");
                assert_eq!(acc.pending(), pending, "seed {seed}");
            }

            for (mut slot, _) in live.drain(..) {
                acc.destroy(&mut slot);
            }
            assert_eq!((acc.pending(), acc.connected()), (0, 0), "seed {seed}");
        }
    }
}
