//! Global hotkeys feeding the control channel.
//!
//! Ctrl+Shift+P toggles pause, Ctrl+Shift+N starts a segment, Ctrl+Shift+S
//! writes a save marker. Registration failures are logged and skipped.

use crate::control::{ControlCommand, ControlHandle};
use crate::error::StartupError;
use crate::status::{SharedStatus, StatusReader};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{info, warn};
use windows::Win32::Foundation::{HWND, LPARAM, WPARAM};
use windows::Win32::System::Threading::GetCurrentThreadId;
use windows::Win32::UI::Input::KeyboardAndMouse::{
    RegisterHotKey, UnregisterHotKey, HOT_KEY_MODIFIERS, MOD_CONTROL, MOD_NOREPEAT, MOD_SHIFT,
};
use windows::Win32::UI::WindowsAndMessaging::{
    GetMessageW, PeekMessageW, PostThreadMessageW, MSG, PM_NOREMOVE, WM_HOTKEY, WM_QUIT,
};

const HOTKEY_TOGGLE_PAUSE: i32 = 1;
const HOTKEY_NEW_SEGMENT: i32 = 2;
const HOTKEY_SAVE_MARKER: i32 = 3;

const VK_P: u32 = 0x50;
const VK_N: u32 = 0x4E;
const VK_S: u32 = 0x53;

const STATUS_TIMEOUT: Duration = Duration::from_millis(20);

pub struct HotkeyListener {
    thread_id: u32,
    thread: Option<JoinHandle<()>>,
}

impl HotkeyListener {
    pub fn spawn(control: ControlHandle, status: SharedStatus) -> Result<Self, StartupError> {
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<u32>(1);
        let thread = thread::Builder::new()
            .name("keylog-hotkeys".to_string())
            .spawn(move || {
                let thread_id = unsafe {
                    let mut msg = MSG::default();
                    let _ = PeekMessageW(&mut msg, HWND(0), 0, 0, PM_NOREMOVE);
                    GetCurrentThreadId()
                };
                register_hotkeys();
                let _ = ready_tx.send(thread_id);
                let mut status = status.reader(STATUS_TIMEOUT);
                status.poll();
                run_loop(&control, &mut status);
                unregister_hotkeys();
            })
            .map_err(|source| StartupError::Spawn {
                name: "hotkeys",
                source,
            })?;
        let thread_id = ready_rx.recv().unwrap_or(0);
        Ok(Self {
            thread_id,
            thread: Some(thread),
        })
    }

    pub fn stop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        let posted = unsafe { PostThreadMessageW(self.thread_id, WM_QUIT, WPARAM(0), LPARAM(0)) };
        if posted.is_ok() {
            let _ = thread.join();
        }
    }
}

impl Drop for HotkeyListener {
    fn drop(&mut self) {
        self.stop();
    }
}

fn register_hotkeys() {
    let mods = MOD_NOREPEAT | MOD_CONTROL | MOD_SHIFT;
    register_hotkey(HOTKEY_TOGGLE_PAUSE, mods, VK_P, "Ctrl+Shift+P");
    register_hotkey(HOTKEY_NEW_SEGMENT, mods, VK_N, "Ctrl+Shift+N");
    register_hotkey(HOTKEY_SAVE_MARKER, mods, VK_S, "Ctrl+Shift+S");
}

fn register_hotkey(id: i32, mods: HOT_KEY_MODIFIERS, vk: u32, label: &str) {
    match unsafe { RegisterHotKey(HWND(0), id, mods, vk) } {
        Ok(()) => info!(hotkey = label, "hotkey registered"),
        Err(err) => warn!(hotkey = label, code = err.code().0, "hotkey registration failed"),
    }
}

fn unregister_hotkeys() {
    unsafe {
        let _ = UnregisterHotKey(HWND(0), HOTKEY_TOGGLE_PAUSE);
        let _ = UnregisterHotKey(HWND(0), HOTKEY_NEW_SEGMENT);
        let _ = UnregisterHotKey(HWND(0), HOTKEY_SAVE_MARKER);
    }
}

fn run_loop(control: &ControlHandle, status: &mut StatusReader) {
    let mut msg = MSG::default();
    loop {
        let result = unsafe { GetMessageW(&mut msg, HWND(0), 0, 0) }.0;
        if result == 0 || result == -1 {
            break;
        }
        if msg.message != WM_HOTKEY {
            continue;
        }
        let Some(command) = command_for_hotkey(msg.wParam.0 as i32, status) else {
            continue;
        };
        if control.send(command).is_err() {
            break;
        }
    }
}

fn command_for_hotkey(id: i32, status: &mut StatusReader) -> Option<ControlCommand> {
    match id {
        HOTKEY_TOGGLE_PAUSE => Some(status.pause_toggle()),
        HOTKEY_NEW_SEGMENT => Some(ControlCommand::NewSegment),
        HOTKEY_SAVE_MARKER => Some(ControlCommand::SaveMarker(Some("hotkey".to_string()))),
        _ => None,
    }
}
