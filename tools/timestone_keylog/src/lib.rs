//! Keystroke journal for the timestone toolchain.
//!
//! A low-level hook feeds a deduplicating capture sink, an unbounded relay
//! carries accepted events to a single coordinator thread, and the coordinator
//! appends every record to a date-named JSON-lines file with a synchronous
//! flush before moving on. Pause, resume, segment and save-marker commands
//! arrive on a separate control channel; presentation code reads a polled
//! status snapshot. Key records carry the character they typed, from which
//! the `read` command rebuilds a readable journal.

pub mod capture;
pub mod config;
pub mod control;
pub mod coordinator;
pub mod dedup;
pub mod error;
pub mod event;
pub mod logger;
pub mod pipeline;
pub mod record;
pub mod relay;
pub mod status;
pub mod text;

#[cfg(windows)]
pub mod hook;
#[cfg(windows)]
pub mod hotkeys;

pub use capture::{CaptureHandle, CaptureSink, CaptureSource, SubmitOutcome};
pub use config::{KeylogConfig, RawKeysMode};
pub use control::{ControlCommand, ControlHandle};
pub use coordinator::{Clock, Coordinator, ManualClock, RunState, SessionSummary, SystemClock};
pub use dedup::{DedupKey, Deduplicator, Verdict};
pub use error::{ConfigError, ControlError, LogError, ShutdownError, StartupError};
pub use event::{Modifiers, RawInputEvent, Transition};
pub use logger::{read_log, DurableLogger, LogReadout};
pub use pipeline::{Pipeline, PipelineOptions};
pub use record::{LogRecord, RecordEntry};
pub use status::{SharedStatus, StatusReader, StatusSnapshot};
pub use text::{render_text, typed_text, KeyTranslator, UsLayout};
