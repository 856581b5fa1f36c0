//! Typed text: which character a key produced, and the readable journal
//! rebuilt from a day's records.
//!
//! Translation runs on the coordinator thread, never inside the hook
//! callback, so the OS keyboard state the callback depends on is left alone.

use crate::event::{RawInputEvent, Transition, VK_BACK, VK_RETURN};
use crate::record::{LogRecord, RecordEntry};
use chrono::{DateTime, Duration as ChronoDuration, Local};

/// A pause longer than this starts a new timestamped line.
pub const IDLE_BREAK_SECS: i64 = 30;

/// Ctrl+Enter continues the entry on a new line aligned under the text.
const CONTINUATION: &str = "           ";

pub trait KeyTranslator: Send {
    fn translate(&self, event: &RawInputEvent) -> Option<char>;
}

/// Fixed US-QWERTY table. Used off Windows and in tests.
pub struct UsLayout;

impl KeyTranslator for UsLayout {
    fn translate(&self, event: &RawInputEvent) -> Option<char> {
        us_char(event.vk, event.modifiers.shift, event.caps_lock)
    }
}

fn us_char(vk: u8, shift: bool, caps_lock: bool) -> Option<char> {
    let pick = |plain: char, shifted: char| Some(if shift { shifted } else { plain });
    match vk {
        0x20 => Some(' '),
        0x30..=0x39 => {
            let shifted = b")!@#$%^&*("[usize::from(vk - 0x30)] as char;
            pick(vk as char, shifted)
        }
        0x41..=0x5A => {
            let upper = vk as char;
            Some(if shift != caps_lock { upper } else { upper.to_ascii_lowercase() })
        }
        0x60..=0x69 => Some((b'0' + (vk - 0x60)) as char),
        0x6A => Some('*'),
        0x6B => Some('+'),
        0x6D => Some('-'),
        0x6E => Some('.'),
        0x6F => Some('/'),
        0xBA => pick(';', ':'),
        0xBB => pick('=', '+'),
        0xBC => pick(',', '<'),
        0xBD => pick('-', '_'),
        0xBE => pick('.', '>'),
        0xBF => pick('/', '?'),
        0xC0 => pick('`', '~'),
        0xDB => pick('[', '{'),
        0xDC => pick('\\', '|'),
        0xDD => pick(']', '}'),
        0xDE => pick('\'', '"'),
        _ => None,
    }
}

/// Resolves characters with `ToUnicodeEx` against the foreground window's
/// keyboard layout, using a keyboard state rebuilt from the event.
#[cfg(windows)]
pub struct SystemLayout;

#[cfg(windows)]
impl KeyTranslator for SystemLayout {
    fn translate(&self, event: &RawInputEvent) -> Option<char> {
        use crate::event::{VK_CAPITAL, VK_SHIFT};
        use windows::Win32::UI::Input::KeyboardAndMouse::{GetKeyboardLayout, ToUnicodeEx};
        use windows::Win32::UI::WindowsAndMessaging::{GetForegroundWindow, GetWindowThreadProcessId};

        let mut state = [0u8; 256];
        if event.modifiers.shift {
            state[usize::from(VK_SHIFT)] = 0x80;
        }
        if event.caps_lock {
            state[usize::from(VK_CAPITAL)] = 0x01;
        }
        let mut buffer = [0u16; 4];
        let written = unsafe {
            let thread = GetWindowThreadProcessId(GetForegroundWindow(), None);
            let layout = GetKeyboardLayout(thread);
            // Flag 0x4 keeps the kernel's dead-key state untouched.
            ToUnicodeEx(
                u32::from(event.vk),
                event.scan_code,
                &state,
                &mut buffer,
                0x4,
                layout,
            )
        };
        if written == 1 {
            char::from_u32(u32::from(buffer[0]))
        } else {
            None
        }
    }
}

pub fn system_translator() -> Box<dyn KeyTranslator> {
    #[cfg(windows)]
    {
        Box::new(SystemLayout)
    }
    #[cfg(not(windows))]
    {
        Box::new(UsLayout)
    }
}

/// Text a key-down contributes. Shortcuts (Ctrl, Alt or Win held) and keys
/// that produce control characters contribute nothing.
pub fn typed_text(event: &RawInputEvent, translator: &dyn KeyTranslator) -> Option<String> {
    if event.transition != Transition::Down {
        return None;
    }
    let mods = event.modifiers;
    if mods.ctrl || mods.alt || mods.win {
        return None;
    }
    translator
        .translate(event)
        .filter(|ch| !ch.is_control())
        .map(String::from)
}

/// Rebuilds the readable journal: one `[HH:MM:SS] ` prefixed line per entry,
/// Enter ends the line, Ctrl+Enter continues it, Backspace erases, and pause,
/// resume, segment and save records appear as marker lines.
pub fn render_text(records: &[LogRecord]) -> String {
    let mut renderer = TextRenderer::default();
    for record in records {
        renderer.push(record);
    }
    renderer.finish()
}

#[derive(Default)]
struct TextRenderer {
    out: String,
    line_open: bool,
    typed_in_line: usize,
    last_input: Option<DateTime<Local>>,
}

impl TextRenderer {
    fn push(&mut self, record: &LogRecord) {
        let ts = record.ts;
        match &record.entry {
            RecordEntry::Key {
                vk,
                transition: Transition::Down,
                modifiers,
                text,
                ..
            } => {
                let ctrl = modifiers.iter().any(|name| name == "Ctrl");
                if *vk == VK_RETURN {
                    self.enter(ts, ctrl);
                } else if *vk == VK_BACK && !ctrl {
                    if self.typed_in_line > 0 {
                        self.out.pop();
                        self.typed_in_line -= 1;
                    }
                    self.last_input = Some(ts);
                } else if let Some(text) = text {
                    self.write(ts, text);
                }
            }
            RecordEntry::Key { .. } => {}
            RecordEntry::SegmentMarker => self.marker(ts, &format!("segment {}", record.segment)),
            RecordEntry::SaveMarker { note: Some(note) } => self.marker(ts, &format!("saved: {note}")),
            RecordEntry::SaveMarker { note: None } => self.marker(ts, "saved"),
            RecordEntry::Paused => self.marker(ts, "paused"),
            RecordEntry::Resumed => self.marker(ts, "resumed"),
        }
    }

    fn write(&mut self, ts: DateTime<Local>, text: &str) {
        let idle = self
            .last_input
            .map_or(false, |last| ts - last > ChronoDuration::seconds(IDLE_BREAK_SECS));
        if idle {
            self.close_line();
        }
        if !self.line_open {
            self.open_line(ts);
        }
        self.out.push_str(text);
        self.typed_in_line += text.chars().count();
        self.last_input = Some(ts);
    }

    fn enter(&mut self, ts: DateTime<Local>, ctrl: bool) {
        if ctrl {
            if !self.line_open {
                self.open_line(ts);
            }
            self.out.push('\n');
            self.out.push_str(CONTINUATION);
            self.typed_in_line = 0;
        } else if self.line_open {
            self.close_line();
        } else {
            self.out.push('\n');
        }
        self.last_input = Some(ts);
    }

    fn marker(&mut self, ts: DateTime<Local>, label: &str) {
        self.close_line();
        self.out
            .push_str(&format!("[{}] --- {} ---\n", ts.format("%H:%M:%S"), label));
        self.last_input = None;
    }

    fn open_line(&mut self, ts: DateTime<Local>) {
        self.out.push_str(&format!("[{}] ", ts.format("%H:%M:%S")));
        self.line_open = true;
        self.typed_in_line = 0;
    }

    fn close_line(&mut self) {
        if self.line_open {
            self.out.push('\n');
            self.line_open = false;
            self.typed_in_line = 0;
        }
    }

    fn finish(mut self) -> String {
        self.close_line();
        self.out
    }
}
