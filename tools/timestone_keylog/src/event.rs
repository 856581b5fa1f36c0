use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    Down,
    Up,
}

/// Modifier keys held when the event fired.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Modifiers {
    pub ctrl: bool,
    pub shift: bool,
    pub alt: bool,
    pub win: bool,
}

impl Modifiers {
    pub fn is_empty(&self) -> bool {
        !(self.ctrl || self.shift || self.alt || self.win)
    }

    pub fn names(&self) -> Vec<String> {
        let mut mods = Vec::new();
        if self.ctrl {
            mods.push("Ctrl".to_string());
        }
        if self.shift {
            mods.push("Shift".to_string());
        }
        if self.alt {
            mods.push("Alt".to_string());
        }
        if self.win {
            mods.push("Win".to_string());
        }
        mods
    }
}

/// One keyboard transition as reported by the hook. `time_ms` is the OS tick
/// stamp and wraps roughly every 49.7 days.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawInputEvent {
    pub vk: u8,
    pub scan_code: u32,
    pub transition: Transition,
    pub time_ms: u32,
    pub repeat: bool,
    pub injected: bool,
    pub modifiers: Modifiers,
    /// Caps Lock toggle state when the event fired.
    pub caps_lock: bool,
}

impl RawInputEvent {
    pub fn new(vk: u8, transition: Transition, time_ms: u32) -> Self {
        Self {
            vk,
            scan_code: 0,
            transition,
            time_ms,
            repeat: false,
            injected: false,
            modifiers: Modifiers::default(),
            caps_lock: false,
        }
    }

    pub fn key_down(vk: u8, time_ms: u32) -> Self {
        Self::new(vk, Transition::Down, time_ms)
    }

    pub fn key_up(vk: u8, time_ms: u32) -> Self {
        Self::new(vk, Transition::Up, time_ms)
    }
}

pub const VK_BACK: u8 = 0x08;
pub const VK_RETURN: u8 = 0x0D;
pub const VK_CAPITAL: u8 = 0x14;
pub const VK_SHIFT: u8 = 0x10;
pub const VK_CONTROL: u8 = 0x11;
pub const VK_MENU: u8 = 0x12;
pub const VK_LWIN: u8 = 0x5B;
pub const VK_RWIN: u8 = 0x5C;
pub const VK_LSHIFT: u8 = 0xA0;
pub const VK_RSHIFT: u8 = 0xA1;
pub const VK_LCONTROL: u8 = 0xA2;
pub const VK_RCONTROL: u8 = 0xA3;
pub const VK_LMENU: u8 = 0xA4;
pub const VK_RMENU: u8 = 0xA5;

pub fn key_name(vk: u8) -> String {
    match vk {
        0x08 => "Backspace".to_string(),
        0x09 => "Tab".to_string(),
        0x0D => "Enter".to_string(),
        0x14 => "CapsLock".to_string(),
        0x1B => "Esc".to_string(),
        0x20 => "Space".to_string(),
        0x21 => "PageUp".to_string(),
        0x22 => "PageDown".to_string(),
        0x23 => "End".to_string(),
        0x24 => "Home".to_string(),
        0x25 => "Left".to_string(),
        0x26 => "Up".to_string(),
        0x27 => "Right".to_string(),
        0x28 => "Down".to_string(),
        0x2D => "Insert".to_string(),
        0x2E => "Delete".to_string(),
        0x30..=0x39 | 0x41..=0x5A => (vk as char).to_string(),
        0x60..=0x69 => format!("Num{}", vk - 0x60),
        0x70..=0x87 => format!("F{}", vk - 0x6F),
        VK_SHIFT | VK_LSHIFT | VK_RSHIFT => "Shift".to_string(),
        VK_CONTROL | VK_LCONTROL | VK_RCONTROL => "Ctrl".to_string(),
        VK_MENU | VK_LMENU | VK_RMENU => "Alt".to_string(),
        VK_LWIN | VK_RWIN => "Win".to_string(),
        _ => format!("VK_{vk:02X}"),
    }
}
