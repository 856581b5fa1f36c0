//! Suppresses duplicate hook firings for a single physical key transition.
//!
//! State is a fixed table indexed by `(vk, transition)`, so classification
//! never allocates and is safe to run inside the hook callback.

use crate::event::{RawInputEvent, Transition};
use std::time::Duration;

/// Identity used for duplicate detection. Never used to detect repeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub vk: u8,
    pub transition: Transition,
}

impl DedupKey {
    pub fn of(event: &RawInputEvent) -> Self {
        Self {
            vk: event.vk,
            transition: event.transition,
        }
    }

    fn slot(self) -> usize {
        let offset = match self.transition {
            Transition::Down => 0,
            Transition::Up => 1,
        };
        usize::from(self.vk) * 2 + offset
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accepted,
    Duplicate,
}

pub struct Deduplicator {
    window_ms: u32,
    last_accepted: [Option<u32>; 512],
}

impl Deduplicator {
    pub fn new(window: Duration) -> Self {
        let window_ms = u32::try_from(window.as_millis()).unwrap_or(u32::MAX);
        Self {
            window_ms,
            last_accepted: [None; 512],
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(u64::from(self.window_ms))
    }

    /// Classifies `event` and remembers it when accepted.
    ///
    /// The distance is taken as a signed wrapping difference so tick-counter
    /// wraparound and slightly out-of-order reports from a second hook are
    /// both measured correctly.
    pub fn classify(&mut self, event: &RawInputEvent) -> Verdict {
        let slot = DedupKey::of(event).slot();
        if let Some(last) = self.last_accepted[slot] {
            let delta = event.time_ms.wrapping_sub(last) as i32;
            if delta.unsigned_abs() < self.window_ms {
                return Verdict::Duplicate;
            }
        }
        self.last_accepted[slot] = Some(event.time_ms);
        Verdict::Accepted
    }
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self::new(Duration::from_millis(30))
    }
}
