use chrono::{Local, TimeZone};
use std::fs;
use std::io::Write;
use timestone_keylog::{
    read_log, render_text, typed_text, DurableLogger, LogRecord, RawInputEvent, RecordEntry, UsLayout,
};

fn key_record(seq: u64) -> LogRecord {
    LogRecord {
        seq,
        ts: Local.with_ymd_and_hms(2026, 10, 17, 14, 30, 0).unwrap(),
        segment: 0,
        entry: RecordEntry::from_event(&RawInputEvent::key_down(0x41, 0), Some("a".to_string())),
    }
}

#[test]
fn record_survives_abandoned_logger() {
    let dir = tempfile::tempdir().unwrap();
    let mut logger = DurableLogger::open(dir.path()).unwrap();
    let path = logger.append(&key_record(1)).unwrap();
    // No close, no drop: the bytes must already be on disk.
    std::mem::forget(logger);

    let readout = read_log(&path).unwrap();
    assert_eq!(readout.records, vec![key_record(1)]);
    assert!(!readout.truncated_tail);
}

#[test]
fn reader_tolerates_garbage_and_torn_tail() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("2026-10-17.jsonl");
    let mut file = fs::File::create(&path).unwrap();
    writeln!(file, "{}", serde_json::to_string(&key_record(1)).unwrap()).unwrap();
    writeln!(file, "not json").unwrap();
    writeln!(file, "{}", serde_json::to_string(&key_record(2)).unwrap()).unwrap();
    write!(file, "{{\"seq\":3,\"ts\"").unwrap();
    drop(file);

    let readout = read_log(&path).unwrap();
    assert_eq!(readout.records.len(), 2);
    assert_eq!(readout.skipped_lines, 1);
    assert!(readout.truncated_tail);
}

#[test]
fn key_records_serialize_flat() {
    let line = serde_json::to_value(key_record(7)).unwrap();
    assert_eq!(line["seq"], 7);
    assert_eq!(line["kind"], "key");
    assert_eq!(line["key"], "A");
    assert_eq!(line["transition"], "down");
    assert_eq!(line["text"], "a");
    assert!(line.get("modifiers").is_none());
}

#[test]
fn journal_reads_back_as_typed_text() {
    let dir = tempfile::tempdir().unwrap();
    let mut logger = DurableLogger::open(dir.path()).unwrap();
    let typed = [(0x48, true), (0x49, false), (0x08, false), (0x4F, false), (0x0D, false)];
    let mut path = None;
    for (seq, (vk, shift)) in typed.into_iter().enumerate() {
        let mut event = RawInputEvent::key_down(vk, seq as u32 * 100);
        event.modifiers.shift = shift;
        let record = LogRecord {
            seq: seq as u64 + 1,
            ts: Local.with_ymd_and_hms(2026, 10, 17, 14, 30, seq as u32).unwrap(),
            segment: 0,
            entry: RecordEntry::from_event(&event, typed_text(&event, &UsLayout)),
        };
        path = Some(logger.append(&record).unwrap());
    }
    logger.append(&LogRecord {
        seq: 6,
        ts: Local.with_ymd_and_hms(2026, 10, 17, 14, 31, 0).unwrap(),
        segment: 0,
        entry: RecordEntry::SaveMarker {
            note: Some("draft".into()),
        },
    })
    .unwrap();

    let readout = read_log(&path.unwrap()).unwrap();
    assert_eq!(
        render_text(&readout.records),
        "[14:30:00] Ho\n[14:31:00] --- saved: draft ---\n"
    );
}
