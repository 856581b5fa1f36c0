use crate::capture::{CaptureSink, CaptureSource};
use crate::config::{KeylogConfig, RawKeysMode};
use crate::control::{control_channel, ControlHandle};
use crate::coordinator::{Clock, Coordinator, SessionSummary, SystemClock};
use crate::dedup::Deduplicator;
use crate::error::{ShutdownError, StartupError};
use crate::logger::DurableLogger;
use crate::relay::event_relay;
use crate::status::{SharedStatus, StatusReader};
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{info, warn};

/// Startup parameters, resolved from [`KeylogConfig`].
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub log_dir: PathBuf,
    pub dedup_window: Duration,
    pub raw_keys_mode: RawKeysMode,
    pub ignore_injected: bool,
    pub relay_warn_depth: usize,
    pub coordinator_poll: Duration,
    pub status_poll: Duration,
}

impl PipelineOptions {
    pub fn from_config(config: &KeylogConfig, base_dir: &Path) -> Self {
        Self {
            log_dir: config.resolve_log_dir(base_dir),
            dedup_window: config.dedup_window(),
            raw_keys_mode: config.raw_keys_mode(),
            ignore_injected: config.ignore_injected,
            relay_warn_depth: config.relay_warn_depth,
            coordinator_poll: config.coordinator_poll_interval(),
            status_poll: config.status_poll_interval(),
        }
    }
}

/// A running capture pipeline: hook, relay, coordinator.
pub struct Pipeline {
    control: ControlHandle,
    status: SharedStatus,
    status_poll: Duration,
    log_dir: PathBuf,
    coordinator: Option<JoinHandle<Result<SessionSummary, ShutdownError>>>,
}

impl Pipeline {
    pub fn start<S: CaptureSource>(options: PipelineOptions, source: S) -> Result<Self, StartupError> {
        Self::start_with_clock(options, source, Box::new(SystemClock))
    }

    /// Fatal conditions (log directory, hook install) are checked before the
    /// coordinator thread exists.
    pub fn start_with_clock<S: CaptureSource>(
        options: PipelineOptions,
        source: S,
        clock: Box<dyn Clock>,
    ) -> Result<Self, StartupError> {
        let logger = DurableLogger::open(&options.log_dir)?;
        let (relay_tx, relay_rx) = event_relay(options.relay_warn_depth);
        let sink = CaptureSink::new(
            Deduplicator::new(options.dedup_window),
            relay_tx,
            options.raw_keys_mode,
            options.ignore_injected,
        );
        let capture = source.start(sink)?;

        let (control, control_rx) = control_channel();
        let status = SharedStatus::new(relay_rx.gauge().clone());
        let coordinator = Coordinator::new(
            logger,
            relay_rx,
            control_rx,
            status.clone(),
            clock,
            options.coordinator_poll,
        )
        .with_capture(capture);
        // A failed spawn drops the coordinator, and the capture handle with it.
        let handle = coordinator.spawn()?;
        info!(
            log_dir = %options.log_dir.display(),
            dedup_ms = options.dedup_window.as_millis() as u64,
            "capture pipeline started"
        );
        Ok(Self {
            control,
            status,
            status_poll: options.status_poll,
            log_dir: options.log_dir,
            coordinator: Some(handle),
        })
    }

    pub fn control(&self) -> ControlHandle {
        self.control.clone()
    }

    pub fn status(&self) -> SharedStatus {
        self.status.clone()
    }

    pub fn status_reader(&self) -> StatusReader {
        self.status.reader(self.status_poll)
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// True once the coordinator has exited, e.g. after a Quit from the tray.
    pub fn is_finished(&self) -> bool {
        self.coordinator
            .as_ref()
            .map_or(true, |handle| handle.is_finished())
    }

    /// Asks the coordinator to quit and waits for its final flush. The
    /// coordinator unhooks capture before draining.
    pub fn shutdown(mut self) -> Result<SessionSummary, ShutdownError> {
        if self.control.quit().is_err() {
            info!("coordinator already stopped");
        }
        let Some(handle) = self.coordinator.take() else {
            return Err(ShutdownError::Panicked);
        };
        match handle.join() {
            Ok(result) => result,
            Err(_) => {
                warn!("coordinator thread panicked");
                Err(ShutdownError::Panicked)
            }
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if self.coordinator.is_some() {
            let _ = self.control.quit();
        }
    }
}
