//! Windows low-level keyboard hook.
//!
//! The hook lives on its own thread with a message loop. The callback only
//! builds a [`RawInputEvent`] and hands it to the thread's [`CaptureSink`];
//! it never logs, never touches the log file and always chains to the next
//! hook.
//!
//! Before each submit the callback reconciles modifier and Caps Lock state
//! with the OS, so a release swallowed by the secure desktop does not leave
//! a modifier stuck in the sink.

use crate::capture::{signal_with_retry, CaptureHandle, CaptureSink, CaptureSource, MODIFIER_KEYS};
use crate::error::StartupError;
use crate::event::{Modifiers, RawInputEvent, Transition, VK_CAPITAL};
use crossbeam_channel::{bounded, Sender};
use std::cell::RefCell;
use std::sync::atomic::{AtomicIsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{info, warn};
use windows::Win32::Foundation::{HMODULE, HWND, LPARAM, LRESULT, WPARAM};
use windows::Win32::System::LibraryLoader::GetModuleHandleW;
use windows::Win32::System::Threading::GetCurrentThreadId;
use windows::Win32::UI::Input::KeyboardAndMouse::{GetAsyncKeyState, GetKeyState};
use windows::Win32::UI::WindowsAndMessaging::{
    CallNextHookEx, DispatchMessageW, GetMessageW, PeekMessageW, PostThreadMessageW, SetWindowsHookExW,
    TranslateMessage, UnhookWindowsHookEx, HHOOK, KBDLLHOOKSTRUCT, LLKHF_INJECTED, MSG, PM_NOREMOVE,
    WH_KEYBOARD_LL, WM_KEYDOWN, WM_KEYUP, WM_QUIT, WM_SYSKEYDOWN, WM_SYSKEYUP,
};

const STOP_ATTEMPTS: u32 = 5;
const STOP_RETRY_PAUSE: Duration = Duration::from_millis(20);

thread_local! {
    static SINK: RefCell<Option<CaptureSink>> = RefCell::new(None);
}

pub struct WindowsKeyboardHook;

impl CaptureSource for WindowsKeyboardHook {
    fn start(self, sink: CaptureSink) -> Result<Box<dyn CaptureHandle>, StartupError> {
        let (ready_tx, ready_rx) = bounded::<Result<u32, String>>(1);
        let hook = Arc::new(AtomicIsize::new(0));
        let installed = hook.clone();
        let thread = thread::Builder::new()
            .name("keylog-hook".to_string())
            .spawn(move || run_hook_thread(sink, installed, ready_tx))
            .map_err(|source| StartupError::Spawn { name: "hook", source })?;
        match ready_rx.recv() {
            Ok(Ok(thread_id)) => Ok(Box::new(HookThread {
                thread_id,
                hook,
                thread: Some(thread),
            })),
            Ok(Err(message)) => {
                let _ = thread.join();
                Err(StartupError::HookInstall(message))
            }
            Err(_) => {
                let _ = thread.join();
                Err(StartupError::HookInstall(
                    "hook thread exited before reporting".to_string(),
                ))
            }
        }
    }
}

struct HookThread {
    thread_id: u32,
    /// Raw HHOOK while installed; whoever swaps it to zero unhooks.
    hook: Arc<AtomicIsize>,
    thread: Option<JoinHandle<()>>,
}

impl CaptureHandle for HookThread {
    fn stop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        let thread_id = self.thread_id;
        let posted = signal_with_retry(STOP_ATTEMPTS, STOP_RETRY_PAUSE, || unsafe {
            PostThreadMessageW(thread_id, WM_QUIT, WPARAM(0), LPARAM(0))
        });
        if posted {
            let _ = thread.join();
            return;
        }
        // The message loop never got WM_QUIT, so joining would block forever.
        // Unhook from here so no further keys reach the sink, and detach.
        unhook(&self.hook);
        warn!(thread_id, "hook thread unreachable; unhooked and detached");
    }
}

fn unhook(hook: &AtomicIsize) {
    let raw = hook.swap(0, Ordering::SeqCst);
    if raw != 0 {
        let _ = unsafe { UnhookWindowsHookEx(HHOOK(raw)) };
        info!("keyboard hook removed");
    }
}

impl Drop for HookThread {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_hook_thread(sink: CaptureSink, installed: Arc<AtomicIsize>, ready: Sender<Result<u32, String>>) {
    SINK.with(|cell| *cell.borrow_mut() = Some(sink));
    let thread_id = unsafe { GetCurrentThreadId() };

    let registered = unsafe {
        // Force the message queue into existence so PostThreadMessageW works.
        let mut msg = MSG::default();
        let _ = PeekMessageW(&mut msg, HWND(0), 0, 0, PM_NOREMOVE);
        let module = GetModuleHandleW(None).unwrap_or(HMODULE::default());
        SetWindowsHookExW(WH_KEYBOARD_LL, Some(keyboard_hook_proc), module, 0)
    };
    let hook = match registered {
        Ok(hook) if hook.0 != 0 => hook,
        Ok(_) => {
            let _ = ready.send(Err("SetWindowsHookExW returned a null handle".to_string()));
            return;
        }
        Err(err) => {
            let _ = ready.send(Err(err.to_string()));
            return;
        }
    };
    installed.store(hook.0, Ordering::SeqCst);
    let _ = ready.send(Ok(thread_id));
    info!(thread_id, "keyboard hook installed");

    unsafe {
        let mut msg = MSG::default();
        loop {
            let result = GetMessageW(&mut msg, HWND(0), 0, 0).0;
            if result == 0 || result == -1 {
                break;
            }
            let _ = TranslateMessage(&msg);
            DispatchMessageW(&msg);
        }
    }
    unhook(&installed);
    SINK.with(|cell| cell.borrow_mut().take());
}

unsafe extern "system" fn keyboard_hook_proc(code: i32, wparam: WPARAM, lparam: LPARAM) -> LRESULT {
    if code == 0 {
        let data = *(lparam.0 as *const KBDLLHOOKSTRUCT);
        let transition = match wparam.0 as u32 {
            WM_KEYDOWN | WM_SYSKEYDOWN => Some(Transition::Down),
            WM_KEYUP | WM_SYSKEYUP => Some(Transition::Up),
            _ => None,
        };
        if let Some(transition) = transition {
            let event = RawInputEvent {
                vk: (data.vkCode & 0xFF) as u8,
                scan_code: data.scanCode,
                transition,
                time_ms: data.time,
                repeat: false,
                injected: data.flags.0 & LLKHF_INJECTED.0 != 0,
                modifiers: Modifiers::default(),
                caps_lock: false,
            };
            let _ = SINK.try_with(|cell| {
                if let Ok(mut slot) = cell.try_borrow_mut() {
                    if let Some(sink) = slot.as_mut() {
                        reconcile_with_os(sink, &event);
                        sink.submit(event);
                    }
                }
            });
        }
    }
    CallNextHookEx(HHOOK(0), code, wparam, lparam)
}

/// The event's own key is left to `submit`; the OS has not applied it yet.
unsafe fn reconcile_with_os(sink: &mut CaptureSink, event: &RawInputEvent) {
    for vk in MODIFIER_KEYS {
        if vk != event.vk {
            let down = GetAsyncKeyState(i32::from(vk)) as u16 & 0x8000 != 0;
            sink.reconcile_key(vk, down, event.time_ms);
        }
    }
    sink.reconcile_caps_lock(GetKeyState(i32::from(VK_CAPITAL)) & 1 != 0);
}
