//! Snapshot shared with the presentation layer.
//!
//! The coordinator publishes a full copy after each step; readers copy it out
//! under the lock and never wait longer than their poll timeout. Relay
//! counters are read from atomics at poll time so they stay live even when the
//! coordinator is blocked on a flush.

use crate::control::ControlCommand;
use crate::relay::RelayGauge;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, TryLockError};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    pub paused: bool,
    pub keys_logged: u64,
    pub duplicates_filtered: u64,
    pub injected_skipped: u64,
    pub filtered_while_paused: u64,
    pub current_file: Option<PathBuf>,
    pub current_segment: u32,
    pub next_seq: u64,
    pub pending_records: usize,
    pub write_failures: u64,
    pub last_error: Option<String>,
    pub relay_depth_high_water: usize,
    pub relay_backlog: bool,
    /// False once the hook has been unregistered.
    pub capture_active: bool,
    pub relay_disconnected: bool,
    /// Keystrokes captured after the coordinator exited; never written.
    pub dropped_after_stop: u64,
    pub stopped: bool,
}

#[derive(Clone)]
pub struct SharedStatus {
    inner: Arc<Mutex<StatusSnapshot>>,
    gauge: Arc<RelayGauge>,
}

impl SharedStatus {
    pub fn new(gauge: Arc<RelayGauge>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(StatusSnapshot::default())),
            gauge,
        }
    }

    /// Replaces the stored snapshot. Called only by the coordinator.
    pub(crate) fn publish(&self, snapshot: StatusSnapshot) {
        let mut guard = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = snapshot;
    }

    /// Copies the snapshot out, giving up after `timeout`.
    pub fn try_snapshot(&self, timeout: Duration) -> Option<StatusSnapshot> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.inner.try_lock() {
                Ok(guard) => return Some(self.with_gauge(guard.clone())),
                Err(TryLockError::Poisoned(poisoned)) => {
                    return Some(self.with_gauge(poisoned.into_inner().clone()))
                }
                Err(TryLockError::WouldBlock) => {
                    if Instant::now() >= deadline {
                        return None;
                    }
                    thread::yield_now();
                }
            }
        }
    }

    fn with_gauge(&self, mut snapshot: StatusSnapshot) -> StatusSnapshot {
        let reading = self.gauge.reading();
        snapshot.duplicates_filtered = reading.duplicates;
        snapshot.injected_skipped = reading.injected_skipped;
        snapshot.relay_depth_high_water = reading.high_water;
        snapshot.relay_backlog = reading.backlog;
        snapshot.relay_disconnected = reading.disconnected;
        snapshot.dropped_after_stop = reading.dropped;
        snapshot
    }

    pub fn reader(&self, timeout: Duration) -> StatusReader {
        StatusReader {
            shared: self.clone(),
            timeout,
            last: StatusSnapshot::default(),
            stale_polls: 0,
        }
    }
}

/// Presentation-side poller that falls back to the previous snapshot when the
/// lock is busy.
pub struct StatusReader {
    shared: SharedStatus,
    timeout: Duration,
    last: StatusSnapshot,
    stale_polls: u64,
}

impl StatusReader {
    pub fn poll(&mut self) -> &StatusSnapshot {
        match self.shared.try_snapshot(self.timeout) {
            Some(snapshot) => self.last = snapshot,
            None => self.stale_polls += 1,
        }
        &self.last
    }

    pub fn stale_polls(&self) -> u64 {
        self.stale_polls
    }

    /// Pause or resume, whichever flips the state last seen. A busy lock
    /// decides from the previous snapshot rather than assuming running.
    pub fn pause_toggle(&mut self) -> ControlCommand {
        if self.poll().paused {
            ControlCommand::Resume
        } else {
            ControlCommand::Pause
        }
    }
}
