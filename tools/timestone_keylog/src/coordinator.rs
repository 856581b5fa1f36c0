//! The single owner of session state.
//!
//! One thread waits on the keyboard relay and the control channel together.
//! `select!` picks uniformly among ready channels, so a flood on one side
//! cannot starve the other, and every wait is bounded by the poll interval.
//! The coordinator also owns the capture handle: Quit, from any control
//! source, unhooks capture before the final drain.

use crate::capture::CaptureHandle;
use crate::control::ControlCommand;
use crate::error::{LogError, ShutdownError, StartupError};
use crate::event::RawInputEvent;
use crate::logger::DurableLogger;
use crate::record::{LogRecord, RecordEntry};
use crate::relay::RelayReceiver;
use crate::status::{SharedStatus, StatusSnapshot};
use crate::text::{system_translator, typed_text, KeyTranslator};
use chrono::{DateTime, Duration as ChronoDuration, Local, NaiveDate};
use crossbeam_channel::{select, Receiver, RecvTimeoutError};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Wall-clock source for record timestamps.
pub trait Clock: Send {
    fn now(&self) -> DateTime<Local>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// Clock that only moves when told to; shared between a test and the
/// coordinator it drives.
#[derive(Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Local>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Local>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn set(&self, to: DateTime<Local>) {
        if let Ok(mut now) = self.now.lock() {
            *now = to;
        }
    }

    pub fn advance(&self, by: ChronoDuration) {
        if let Ok(mut now) = self.now.lock() {
            *now += by;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Local> {
        match self.now.lock() {
            Ok(now) => *now,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    Paused,
}

#[derive(Debug, Clone)]
pub struct SessionState {
    pub run_state: RunState,
    pub segment: u32,
    pub next_seq: u64,
    pub active_date: Option<NaiveDate>,
    pub keys_logged: u64,
    pub filtered_while_paused: u64,
    pub records_written: u64,
    pub write_failures: u64,
    pub last_error: Option<String>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            run_state: RunState::Running,
            segment: 0,
            next_seq: 1,
            active_date: None,
            keys_logged: 0,
            filtered_while_paused: 0,
            records_written: 0,
            write_failures: 0,
            last_error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Continue,
    Quit,
}

/// What a clean shutdown reports back to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub records_written: u64,
    pub keys_logged: u64,
    pub filtered_while_paused: u64,
    pub write_failures: u64,
    pub next_seq: u64,
    pub last_file: Option<PathBuf>,
}

pub struct Coordinator {
    state: SessionState,
    logger: DurableLogger,
    pending: VecDeque<LogRecord>,
    last_file: Option<PathBuf>,
    relay: RelayReceiver,
    relay_open: bool,
    control: Receiver<ControlCommand>,
    status: SharedStatus,
    capture: Option<Box<dyn CaptureHandle>>,
    translator: Box<dyn KeyTranslator>,
    clock: Box<dyn Clock>,
    poll_interval: Duration,
    backlog_warned: bool,
}

impl Coordinator {
    pub fn new(
        logger: DurableLogger,
        relay: RelayReceiver,
        control: Receiver<ControlCommand>,
        status: SharedStatus,
        clock: Box<dyn Clock>,
        poll_interval: Duration,
    ) -> Self {
        let mut state = SessionState::default();
        match logger.recover_position() {
            Ok(Some(position)) => {
                info!(
                    next_seq = position.next_seq,
                    segment = position.segment,
                    file = %position.file.display(),
                    "resuming numbering from existing log"
                );
                state.next_seq = position.next_seq;
                state.segment = position.segment;
            }
            Ok(None) => {}
            Err(err) => warn!(error = %err, "could not read previous log; numbering restarts"),
        }
        let coordinator = Self {
            state,
            logger,
            pending: VecDeque::new(),
            last_file: None,
            relay,
            relay_open: true,
            control,
            status,
            capture: None,
            translator: system_translator(),
            clock,
            poll_interval,
            backlog_warned: false,
        };
        coordinator.publish(false);
        coordinator
    }

    /// Hands over the running capture source; it is stopped on Quit.
    pub fn with_capture(mut self, capture: Box<dyn CaptureHandle>) -> Self {
        self.capture = Some(capture);
        self.publish(false);
        self
    }

    pub fn with_translator(mut self, translator: Box<dyn KeyTranslator>) -> Self {
        self.translator = translator;
        self
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn pending_records(&self) -> usize {
        self.pending.len()
    }

    pub fn spawn(self) -> Result<JoinHandle<Result<SessionSummary, ShutdownError>>, StartupError> {
        thread::Builder::new()
            .name("keylog-coordinator".to_string())
            .spawn(move || self.run())
            .map_err(|source| StartupError::Spawn {
                name: "coordinator",
                source,
            })
    }

    pub fn run(mut self) -> Result<SessionSummary, ShutdownError> {
        info!("session coordinator started");
        while self.step() == Step::Continue {}
        self.shutdown()
    }

    /// Waits up to one poll interval for input on either channel.
    pub fn step(&mut self) -> Step {
        let step = if self.relay_open {
            let relay = self.relay.channel().clone();
            let control = self.control.clone();
            select! {
                recv(relay) -> event => match event {
                    Ok(event) => {
                        self.handle_event(event);
                        Step::Continue
                    }
                    Err(_) => {
                        warn!("capture relay closed; only control commands remain");
                        self.relay_open = false;
                        Step::Continue
                    }
                },
                recv(control) -> command => match command {
                    Ok(command) => self.handle_command(command),
                    Err(_) => Step::Quit,
                },
                default(self.poll_interval) => Step::Continue,
            }
        } else {
            match self.control.recv_timeout(self.poll_interval) {
                Ok(command) => self.handle_command(command),
                Err(RecvTimeoutError::Timeout) => Step::Continue,
                Err(RecvTimeoutError::Disconnected) => Step::Quit,
            }
        };
        self.watch_backlog();
        self.publish(false);
        step
    }

    pub fn handle_event(&mut self, event: RawInputEvent) {
        if self.state.run_state == RunState::Paused {
            self.state.filtered_while_paused += 1;
            return;
        }
        self.state.keys_logged += 1;
        let text = typed_text(&event, self.translator.as_ref());
        self.accept(RecordEntry::from_event(&event, text));
    }

    pub fn handle_command(&mut self, command: ControlCommand) -> Step {
        debug!(?command, "control command");
        match command {
            ControlCommand::Pause => {
                if self.state.run_state == RunState::Running {
                    self.accept(RecordEntry::Paused);
                    self.state.run_state = RunState::Paused;
                    info!("capture paused");
                }
            }
            ControlCommand::Resume => {
                if self.state.run_state == RunState::Paused {
                    self.state.run_state = RunState::Running;
                    self.accept(RecordEntry::Resumed);
                    info!("capture resumed");
                }
            }
            ControlCommand::NewSegment => {
                self.state.segment += 1;
                self.accept(RecordEntry::SegmentMarker);
                info!(segment = self.state.segment, "new segment");
            }
            ControlCommand::SaveMarker(note) => {
                if self.state.run_state == RunState::Paused {
                    info!("save marker ignored while paused");
                } else {
                    self.accept(RecordEntry::SaveMarker { note });
                }
            }
            ControlCommand::Quit => return Step::Quit,
        }
        Step::Continue
    }

    /// Numbers the entry, queues it, then writes everything queued in order.
    fn accept(&mut self, entry: RecordEntry) {
        let record = LogRecord {
            seq: self.state.next_seq,
            ts: self.clock.now(),
            segment: self.state.segment,
            entry,
        };
        self.state.next_seq += 1;
        self.pending.push_back(record);
        if let Err(err) = self.flush_pending() {
            self.state.write_failures += 1;
            error!(error = %err, pending = self.pending.len(), "log write failed; will retry");
            self.state.last_error = Some(err.to_string());
        }
    }

    fn flush_pending(&mut self) -> Result<(), LogError> {
        let had_error = self.state.last_error.is_some();
        while let Some(record) = self.pending.front() {
            let path = self.logger.append(record)?;
            self.state.active_date = Some(record.ts.date_naive());
            self.state.records_written += 1;
            self.last_file = Some(path);
            self.pending.pop_front();
        }
        if had_error {
            info!("log writes recovered");
            self.state.last_error = None;
        }
        Ok(())
    }

    fn watch_backlog(&mut self) {
        self.relay.refresh_depth();
        let reading = self.relay.gauge().reading();
        if reading.backlog && !self.backlog_warned {
            warn!(
                depth = self.relay.depth(),
                threshold = self.relay.gauge().warn_depth(),
                "capture relay backlog above threshold"
            );
            self.backlog_warned = true;
        } else if !reading.backlog && self.backlog_warned {
            info!("capture relay backlog cleared");
            self.backlog_warned = false;
        }
    }

    fn publish(&self, stopped: bool) {
        self.status.publish(StatusSnapshot {
            paused: self.state.run_state == RunState::Paused,
            keys_logged: self.state.keys_logged,
            filtered_while_paused: self.state.filtered_while_paused,
            current_file: self.last_file.clone(),
            current_segment: self.state.segment,
            next_seq: self.state.next_seq,
            pending_records: self.pending.len(),
            write_failures: self.state.write_failures,
            last_error: self.state.last_error.clone(),
            capture_active: self.capture.is_some(),
            stopped,
            ..Default::default()
        });
    }

    /// Unhooks capture, drains queued keystrokes, makes every record durable
    /// and closes the file. Any record that cannot be written is reported,
    /// not dropped.
    fn shutdown(&mut self) -> Result<SessionSummary, ShutdownError> {
        if let Some(mut capture) = self.capture.take() {
            capture.stop();
            info!("capture stopped");
        }
        let queued = self.relay.drain();
        if !queued.is_empty() {
            debug!(count = queued.len(), "draining relay before shutdown");
        }
        for event in queued {
            self.handle_event(event);
        }
        let flushed = self.flush_pending();
        let closed = self.logger.close();
        self.publish(true);

        if let Err(source) = flushed {
            error!(error = %source, pending = self.pending.len(), "final flush failed");
            return Err(ShutdownError::Unflushed {
                pending: self.pending.len(),
                source,
            });
        }
        if let Err(source) = closed {
            let path = self.last_file.clone().unwrap_or_default();
            return Err(ShutdownError::Close { path, source });
        }
        info!(
            records = self.state.records_written,
            keys = self.state.keys_logged,
            "session coordinator stopped"
        );
        Ok(SessionSummary {
            records_written: self.state.records_written,
            keys_logged: self.state.keys_logged,
            filtered_while_paused: self.state.filtered_while_paused,
            write_failures: self.state.write_failures,
            next_seq: self.state.next_seq,
            last_file: self.last_file.clone(),
        })
    }
}
