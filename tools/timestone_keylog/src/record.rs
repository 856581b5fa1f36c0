use crate::event::{key_name, RawInputEvent, Transition};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// One line of a day's log. Written once, never rewritten.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub seq: u64,
    pub ts: DateTime<Local>,
    pub segment: u32,
    #[serde(flatten)]
    pub entry: RecordEntry,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecordEntry {
    Key {
        key: String,
        vk: u8,
        scan: u32,
        transition: Transition,
        #[serde(default)]
        repeat: bool,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        modifiers: Vec<String>,
        /// Character the key produced in the active layout, if any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },
    SegmentMarker,
    SaveMarker {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        note: Option<String>,
    },
    Paused,
    Resumed,
}

impl RecordEntry {
    pub fn from_event(event: &RawInputEvent, text: Option<String>) -> Self {
        RecordEntry::Key {
            key: key_name(event.vk),
            vk: event.vk,
            scan: event.scan_code,
            transition: event.transition,
            repeat: event.repeat,
            modifiers: event.modifiers.names(),
            text,
        }
    }

    pub fn is_key(&self) -> bool {
        matches!(self, RecordEntry::Key { .. })
    }

    /// Tag for boundary records; `None` for keystrokes.
    pub fn marker_tag(&self) -> Option<&'static str> {
        match self {
            RecordEntry::Key { .. } => None,
            RecordEntry::SegmentMarker => Some("segment"),
            RecordEntry::SaveMarker { .. } => Some("save"),
            RecordEntry::Paused => Some("paused"),
            RecordEntry::Resumed => Some("resumed"),
        }
    }
}
