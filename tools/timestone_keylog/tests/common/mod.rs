#![allow(dead_code)]

use chrono::{DateTime, Local, TimeZone};
use crossbeam_channel::{select, unbounded, Receiver, Sender};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use timestone_keylog::{
    CaptureHandle, CaptureSink, CaptureSource, ManualClock, Pipeline, PipelineOptions, RawInputEvent,
    RawKeysMode, StartupError, StatusSnapshot,
};

/// Capture source fed from a test-owned channel instead of an OS hook.
pub struct ScriptedSource {
    events: Receiver<RawInputEvent>,
    stopped: Arc<AtomicBool>,
}

pub struct ScriptedHandle {
    stop: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
    stopped: Arc<AtomicBool>,
}

impl CaptureSource for ScriptedSource {
    fn start(self, mut sink: CaptureSink) -> Result<Box<dyn CaptureHandle>, StartupError> {
        let (stop_tx, stop_rx) = unbounded::<()>();
        let events = self.events;
        let thread = thread::spawn(move || loop {
            select! {
                recv(events) -> event => match event {
                    Ok(event) => {
                        sink.submit(event);
                    }
                    Err(_) => break,
                },
                recv(stop_rx) -> _ => {
                    for event in events.try_iter() {
                        sink.submit(event);
                    }
                    break;
                }
            }
        });
        Ok(Box::new(ScriptedHandle {
            stop: Some(stop_tx),
            thread: Some(thread),
            stopped: self.stopped,
        }))
    }
}

impl CaptureHandle for ScriptedHandle {
    fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        self.stopped.store(true, Ordering::SeqCst);
    }
}

impl Drop for ScriptedHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Source whose hook never installs.
pub struct FailingSource;

impl CaptureSource for FailingSource {
    fn start(self, _sink: CaptureSink) -> Result<Box<dyn CaptureHandle>, StartupError> {
        Err(StartupError::HookInstall("access denied".to_string()))
    }
}

pub fn options(log_dir: &Path) -> PipelineOptions {
    PipelineOptions {
        log_dir: log_dir.to_path_buf(),
        dedup_window: Duration::from_millis(30),
        raw_keys_mode: RawKeysMode::Down,
        ignore_injected: true,
        relay_warn_depth: 10_000,
        coordinator_poll: Duration::from_millis(5),
        status_poll: Duration::from_millis(20),
    }
}

pub fn at(day: u32, hour: u32, min: u32, sec: u32) -> DateTime<Local> {
    Local.with_ymd_and_hms(2026, 10, day, hour, min, sec).unwrap()
}

pub struct Running {
    pub pipeline: Pipeline,
    pub keys: Sender<RawInputEvent>,
    pub clock: ManualClock,
    pub capture_stopped: Arc<AtomicBool>,
}

pub fn start(options: PipelineOptions, start: DateTime<Local>) -> Running {
    let (keys, events) = unbounded();
    let clock = ManualClock::new(start);
    let capture_stopped = Arc::new(AtomicBool::new(false));
    let source = ScriptedSource {
        events,
        stopped: capture_stopped.clone(),
    };
    let pipeline = Pipeline::start_with_clock(options, source, Box::new(clock.clone())).unwrap();
    Running {
        pipeline,
        keys,
        clock,
        capture_stopped,
    }
}

impl Running {
    pub fn press(&self, vk: u8, time_ms: u32) {
        self.keys.send(RawInputEvent::key_down(vk, time_ms)).unwrap();
    }

    /// Polls status until `done` holds, panicking after two seconds.
    pub fn wait_for(&self, done: impl Fn(&StatusSnapshot) -> bool) -> StatusSnapshot {
        let mut reader = self.pipeline.status_reader();
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            let snapshot = reader.poll().clone();
            if done(&snapshot) {
                return snapshot;
            }
            assert!(Instant::now() < deadline, "status never converged: {snapshot:?}");
            thread::sleep(Duration::from_millis(5));
        }
    }
}
