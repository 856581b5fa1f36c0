use crate::error::ControlError;
use crossbeam_channel::{unbounded, Receiver, Sender};

/// User-issued commands merged into the coordinator's event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    Pause,
    Resume,
    /// Writes a save marker; the note is supplied by whoever issued it.
    SaveMarker(Option<String>),
    NewSegment,
    Quit,
}

pub fn control_channel() -> (ControlHandle, Receiver<ControlCommand>) {
    let (tx, rx) = unbounded();
    (ControlHandle { tx }, rx)
}

/// Cloneable sender given to tray, hotkey and signal threads.
#[derive(Clone)]
pub struct ControlHandle {
    tx: Sender<ControlCommand>,
}

impl ControlHandle {
    pub fn send(&self, command: ControlCommand) -> Result<(), ControlError> {
        self.tx
            .send(command)
            .map_err(|_| ControlError::CoordinatorGone)
    }

    pub fn pause(&self) -> Result<(), ControlError> {
        self.send(ControlCommand::Pause)
    }

    pub fn resume(&self) -> Result<(), ControlError> {
        self.send(ControlCommand::Resume)
    }

    pub fn save_marker(&self, note: Option<String>) -> Result<(), ControlError> {
        self.send(ControlCommand::SaveMarker(note))
    }

    pub fn new_segment(&self) -> Result<(), ControlError> {
        self.send(ControlCommand::NewSegment)
    }

    pub fn quit(&self) -> Result<(), ControlError> {
        self.send(ControlCommand::Quit)
    }
}
