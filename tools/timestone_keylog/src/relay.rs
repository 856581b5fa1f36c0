//! Capture-to-coordinator queue.
//!
//! The channel is unbounded: a full queue would force the hook either to
//! block or to drop keystrokes, and neither is acceptable. Depth is tracked
//! with atomics on every send so a stalled consumer shows up in the status
//! record even while the coordinator itself is stuck.

use crate::event::RawInputEvent;
use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Lock-free counters shared by the capture thread and status readers.
#[derive(Debug, Default)]
pub struct RelayGauge {
    warn_depth: usize,
    sent: AtomicU64,
    duplicates: AtomicU64,
    injected_skipped: AtomicU64,
    high_water: AtomicUsize,
    backlog: AtomicBool,
    disconnected: AtomicBool,
    dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GaugeReading {
    pub sent: u64,
    pub duplicates: u64,
    pub injected_skipped: u64,
    pub high_water: usize,
    pub backlog: bool,
    pub disconnected: bool,
    /// Events the capture side could not hand over because the consumer
    /// had already exited.
    pub dropped: u64,
}

impl RelayGauge {
    pub fn new(warn_depth: usize) -> Self {
        Self {
            warn_depth,
            ..Default::default()
        }
    }

    pub fn warn_depth(&self) -> usize {
        self.warn_depth
    }

    pub fn record_duplicate(&self) {
        self.duplicates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_injected(&self) {
        self.injected_skipped.fetch_add(1, Ordering::Relaxed);
    }

    fn observe_depth(&self, depth: usize) {
        self.high_water.fetch_max(depth, Ordering::Relaxed);
        self.backlog.store(depth > self.warn_depth, Ordering::Relaxed);
    }

    pub fn reading(&self) -> GaugeReading {
        GaugeReading {
            sent: self.sent.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            injected_skipped: self.injected_skipped.load(Ordering::Relaxed),
            high_water: self.high_water.load(Ordering::Relaxed),
            backlog: self.backlog.load(Ordering::Relaxed),
            disconnected: self.disconnected.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

pub fn event_relay(warn_depth: usize) -> (RelaySender, RelayReceiver) {
    let (tx, rx) = unbounded();
    let gauge = Arc::new(RelayGauge::new(warn_depth));
    (
        RelaySender {
            tx,
            gauge: gauge.clone(),
        },
        RelayReceiver { rx, gauge },
    )
}

#[derive(Clone)]
pub struct RelaySender {
    tx: Sender<RawInputEvent>,
    gauge: Arc<RelayGauge>,
}

impl RelaySender {
    /// Never blocks. Returns false only once the coordinator is gone.
    pub fn send(&self, event: RawInputEvent) -> bool {
        if self.tx.send(event).is_err() {
            self.gauge.disconnected.store(true, Ordering::Relaxed);
            self.gauge.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        self.gauge.sent.fetch_add(1, Ordering::Relaxed);
        self.gauge.observe_depth(self.tx.len());
        true
    }

    pub fn gauge(&self) -> &Arc<RelayGauge> {
        &self.gauge
    }
}

pub struct RelayReceiver {
    rx: Receiver<RawInputEvent>,
    gauge: Arc<RelayGauge>,
}

impl RelayReceiver {
    pub fn channel(&self) -> &Receiver<RawInputEvent> {
        &self.rx
    }

    pub fn depth(&self) -> usize {
        self.rx.len()
    }

    pub fn gauge(&self) -> &Arc<RelayGauge> {
        &self.gauge
    }

    /// Refreshes the backlog flag after the consumer drained some events.
    pub fn refresh_depth(&self) {
        self.gauge.observe_depth(self.rx.len());
    }

    /// Takes everything currently queued without waiting.
    pub fn drain(&self) -> Vec<RawInputEvent> {
        let mut events = Vec::with_capacity(self.rx.len());
        loop {
            match self.rx.try_recv() {
                Ok(event) => events.push(event),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        self.refresh_depth();
        events
    }
}
