//! Callback-side half of the pipeline: classify and enqueue, nothing else.

use crate::config::RawKeysMode;
use crate::dedup::{Deduplicator, Verdict};
use crate::error::StartupError;
use crate::event::{
    Modifiers, RawInputEvent, Transition, VK_CAPITAL, VK_CONTROL, VK_LCONTROL, VK_LMENU,
    VK_LSHIFT, VK_LWIN, VK_MENU, VK_RCONTROL, VK_RMENU, VK_RSHIFT, VK_RWIN, VK_SHIFT,
};
use crate::relay::RelaySender;
use std::fmt::Display;
use std::thread;
use std::time::Duration;
use tracing::warn;

/// A key held down auto-repeats well inside this many milliseconds, so a down
/// bit left unrefreshed for longer belongs to a release the hook never saw
/// (secure desktop, UAC prompt, a hook timeout).
pub const STALE_KEY_MS: u32 = 5_000;

/// Pressed-key bitset, one bit per virtual-key code, plus the tick at which
/// each down bit was last refreshed.
#[derive(Debug, Clone)]
pub struct KeyboardState {
    bits: [u64; 4],
    refreshed: [u32; 256],
    caps_lock: bool,
}

impl Default for KeyboardState {
    fn default() -> Self {
        Self {
            bits: [0; 4],
            refreshed: [0; 256],
            caps_lock: false,
        }
    }
}

impl KeyboardState {
    pub fn is_down(&self, vk: u8) -> bool {
        let (word, bit) = (usize::from(vk) / 64, vk % 64);
        self.bits[word] & (1u64 << bit) != 0
    }

    fn set(&mut self, vk: u8, down: bool, now: u32) {
        let (word, bit) = (usize::from(vk) / 64, vk % 64);
        if down {
            self.bits[word] |= 1u64 << bit;
            self.refreshed[usize::from(vk)] = now;
        } else {
            self.bits[word] &= !(1u64 << bit);
        }
    }

    /// Clears down bits that have not been refreshed within [`STALE_KEY_MS`]
    /// of `now`. Ticks reported out of order never expire anything.
    pub fn expire_stale(&mut self, now: u32) {
        for word in 0..self.bits.len() {
            let mut pending = self.bits[word];
            while pending != 0 {
                let bit = pending.trailing_zeros() as usize;
                pending &= pending - 1;
                let vk = word * 64 + bit;
                let age = now.wrapping_sub(self.refreshed[vk]) as i32;
                if age >= STALE_KEY_MS as i32 {
                    self.bits[word] &= !(1u64 << bit);
                }
            }
        }
    }

    pub fn caps_lock(&self) -> bool {
        self.caps_lock
    }

    pub fn modifiers(&self) -> Modifiers {
        Modifiers {
            ctrl: self.any_down(&[VK_CONTROL, VK_LCONTROL, VK_RCONTROL]),
            shift: self.any_down(&[VK_SHIFT, VK_LSHIFT, VK_RSHIFT]),
            alt: self.any_down(&[VK_MENU, VK_LMENU, VK_RMENU]),
            win: self.any_down(&[VK_LWIN, VK_RWIN]),
        }
    }

    fn any_down(&self, keys: &[u8]) -> bool {
        keys.iter().any(|vk| self.is_down(*vk))
    }
}

/// Modifier keys whose live OS state the Windows hook reconciles before each
/// submit.
pub const MODIFIER_KEYS: [u8; 11] = [
    VK_SHIFT, VK_CONTROL, VK_MENU, VK_LWIN, VK_RWIN, VK_LSHIFT, VK_RSHIFT, VK_LCONTROL,
    VK_RCONTROL, VK_LMENU, VK_RMENU,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Enqueued,
    Duplicate,
    Injected,
    Filtered,
    Disconnected,
}

/// Owned by the hook thread. Fills in repeat, modifier and Caps Lock state,
/// applies the injected and transition filters, deduplicates, then hands
/// accepted events to the relay.
pub struct CaptureSink {
    dedup: Deduplicator,
    keys: KeyboardState,
    relay: RelaySender,
    raw_keys_mode: RawKeysMode,
    ignore_injected: bool,
}

impl CaptureSink {
    pub fn new(
        dedup: Deduplicator,
        relay: RelaySender,
        raw_keys_mode: RawKeysMode,
        ignore_injected: bool,
    ) -> Self {
        Self {
            dedup,
            keys: KeyboardState::default(),
            relay,
            raw_keys_mode,
            ignore_injected,
        }
    }

    /// Corrects the tracked state of `vk` from an authoritative source such as
    /// the OS async key state. A confirmed down key is refreshed so it does
    /// not expire while held.
    pub fn reconcile_key(&mut self, vk: u8, down: bool, now: u32) {
        if down || self.keys.is_down(vk) {
            self.keys.set(vk, down, now);
        }
    }

    pub fn reconcile_caps_lock(&mut self, on: bool) {
        self.keys.caps_lock = on;
    }

    pub fn keys(&self) -> &KeyboardState {
        &self.keys
    }

    pub fn submit(&mut self, mut event: RawInputEvent) -> SubmitOutcome {
        self.keys.expire_stale(event.time_ms);
        let is_down = event.transition == Transition::Down;
        event.repeat = is_down && self.keys.is_down(event.vk);
        if is_down && !event.repeat && event.vk == VK_CAPITAL {
            self.keys.caps_lock = !self.keys.caps_lock;
        }
        self.keys.set(event.vk, is_down, event.time_ms);
        event.modifiers = self.keys.modifiers();
        event.caps_lock = self.keys.caps_lock;

        // Injected transitions still move key state so a skipped release
        // cannot leave a key stuck down.
        if event.injected && self.ignore_injected {
            self.relay.gauge().record_injected();
            return SubmitOutcome::Injected;
        }

        let wanted = match self.raw_keys_mode {
            RawKeysMode::Down => is_down,
            RawKeysMode::Up => !is_down,
            RawKeysMode::Both => true,
        };
        if !wanted {
            return SubmitOutcome::Filtered;
        }

        if self.dedup.classify(&event) == Verdict::Duplicate {
            self.relay.gauge().record_duplicate();
            return SubmitOutcome::Duplicate;
        }
        if self.relay.send(event) {
            SubmitOutcome::Enqueued
        } else {
            SubmitOutcome::Disconnected
        }
    }
}

/// A running capture source; dropping or stopping it unregisters the hook.
pub trait CaptureHandle: Send {
    fn stop(&mut self);
}

/// Something that can feed raw keyboard events into a [`CaptureSink`].
pub trait CaptureSource {
    fn start(self, sink: CaptureSink) -> Result<Box<dyn CaptureHandle>, StartupError>;
}

/// Sends a stop signal to a capture thread, retrying up to `attempts` times.
/// Returns false when every attempt failed; the caller must then tear the
/// hook down itself.
#[cfg_attr(not(windows), allow(dead_code))]
pub(crate) fn signal_with_retry<E: Display>(
    attempts: u32,
    pause: Duration,
    mut signal: impl FnMut() -> Result<(), E>,
) -> bool {
    for attempt in 1..=attempts {
        match signal() {
            Ok(()) => return true,
            Err(err) => {
                warn!(attempt, error = %err, "capture thread missed its stop signal");
                if attempt < attempts {
                    thread::sleep(pause);
                }
            }
        }
    }
    false
}
