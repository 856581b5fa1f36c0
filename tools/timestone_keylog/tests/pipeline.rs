mod common;

use common::{at, options, start, FailingSource};
use std::fs;
use std::sync::atomic::Ordering;
use timestone_keylog::{read_log, LogRecord, Pipeline, RecordEntry, StartupError};

fn records_in(path: &std::path::Path) -> Vec<LogRecord> {
    read_log(path).unwrap().records
}

#[test]
fn bounce_within_window_logs_once() {
    let dir = tempfile::tempdir().unwrap();
    let run = start(options(dir.path()), at(17, 9, 0, 0));
    run.press(0x41, 0);
    run.press(0x41, 10);
    let status = run.wait_for(|s| s.keys_logged == 1 && s.duplicates_filtered == 1);
    assert_eq!(status.keys_logged, 1);

    let summary = run.pipeline.shutdown().unwrap();
    assert_eq!(summary.records_written, 1);
    assert_eq!(records_in(&dir.path().join("2026-10-17.jsonl")).len(), 1);
}

#[test]
fn presses_outside_window_are_both_logged() {
    let dir = tempfile::tempdir().unwrap();
    let run = start(options(dir.path()), at(17, 9, 0, 0));
    run.press(0x41, 0);
    run.press(0x41, 40);
    run.wait_for(|s| s.keys_logged == 2);

    let summary = run.pipeline.shutdown().unwrap();
    assert_eq!(summary.keys_logged, 2);
    let records = records_in(&dir.path().join("2026-10-17.jsonl"));
    assert_eq!(records.iter().map(|r| r.seq).collect::<Vec<_>>(), vec![1, 2]);
}

#[test]
fn segment_marker_is_ordered_with_keystrokes() {
    let dir = tempfile::tempdir().unwrap();
    let run = start(options(dir.path()), at(17, 9, 0, 0));
    let control = run.pipeline.control();

    run.press(0x41, 0);
    run.wait_for(|s| s.keys_logged == 1);
    control.new_segment().unwrap();
    run.wait_for(|s| s.current_segment == 1);
    run.press(0x42, 100);
    run.wait_for(|s| s.keys_logged == 2);
    run.pipeline.shutdown().unwrap();

    let records = records_in(&dir.path().join("2026-10-17.jsonl"));
    assert_eq!(records.len(), 3);
    assert!(records[0].entry.is_key());
    assert_eq!(records[1].entry, RecordEntry::SegmentMarker);
    assert!(records[2].entry.is_key());
    assert_eq!(
        records.iter().map(|r| (r.seq, r.segment)).collect::<Vec<_>>(),
        vec![(1, 0), (2, 1), (3, 1)]
    );
}

#[test]
fn paused_keystrokes_never_reach_the_log() {
    let dir = tempfile::tempdir().unwrap();
    let run = start(options(dir.path()), at(17, 9, 0, 0));
    let control = run.pipeline.control();

    control.pause().unwrap();
    run.wait_for(|s| s.paused);
    run.press(0x41, 0);
    run.press(0x42, 100);
    run.wait_for(|s| s.filtered_while_paused == 2);
    control.save_marker(Some("ignored".into())).unwrap();
    control.resume().unwrap();
    run.wait_for(|s| !s.paused);
    run.press(0x43, 200);
    run.wait_for(|s| s.keys_logged == 1);

    let summary = run.pipeline.shutdown().unwrap();
    assert_eq!(summary.filtered_while_paused, 2);
    let records = records_in(&dir.path().join("2026-10-17.jsonl"));
    let tags: Vec<_> = records.iter().map(|r| r.entry.marker_tag()).collect();
    assert_eq!(tags, vec![Some("paused"), Some("resumed"), None]);
}

#[test]
fn save_marker_carries_its_note() {
    let dir = tempfile::tempdir().unwrap();
    let run = start(options(dir.path()), at(17, 9, 0, 0));
    run.pipeline.control().save_marker(Some("draft".into())).unwrap();
    run.wait_for(|s| s.next_seq == 2);
    run.pipeline.shutdown().unwrap();

    let records = records_in(&dir.path().join("2026-10-17.jsonl"));
    assert_eq!(
        records[0].entry,
        RecordEntry::SaveMarker {
            note: Some("draft".into())
        }
    );
}

#[test]
fn keystrokes_across_midnight_land_in_separate_files() {
    let dir = tempfile::tempdir().unwrap();
    let run = start(options(dir.path()), at(17, 23, 59, 59));
    run.press(0x41, 0);
    run.wait_for(|s| s.keys_logged == 1);
    run.clock.set(at(18, 0, 0, 1));
    run.press(0x42, 2_000);
    run.wait_for(|s| s.keys_logged == 2);
    run.pipeline.shutdown().unwrap();

    let first = records_in(&dir.path().join("2026-10-17.jsonl"));
    let second = records_in(&dir.path().join("2026-10-18.jsonl"));
    assert_eq!(first.len(), 1);
    assert_eq!(second.len(), 1);
    assert_eq!(first[0].seq + 1, second[0].seq);
}

#[test]
fn shutdown_drains_keystrokes_still_queued() {
    let dir = tempfile::tempdir().unwrap();
    let run = start(options(dir.path()), at(17, 9, 0, 0));
    for index in 0..200u32 {
        run.press(0x30 + (index % 10) as u8, index * 100);
    }
    let summary = run.pipeline.shutdown().unwrap();
    assert_eq!(summary.keys_logged, 200);

    let records = records_in(&dir.path().join("2026-10-17.jsonl"));
    let seqs: Vec<u64> = records.iter().map(|r| r.seq).collect();
    assert_eq!(seqs, (1..=200).collect::<Vec<_>>());
}

#[test]
fn failed_writes_are_retried_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let blocked = dir.path().join("2026-10-17.jsonl");
    fs::create_dir(&blocked).unwrap();

    let run = start(options(dir.path()), at(17, 9, 0, 0));
    run.press(0x41, 0);
    run.press(0x42, 100);
    let status = run.wait_for(|s| s.keys_logged == 2 && s.pending_records == 2);
    assert!(status.write_failures >= 2);
    assert!(status.last_error.is_some());

    fs::remove_dir(&blocked).unwrap();
    run.press(0x43, 200);
    let status = run.wait_for(|s| s.pending_records == 0);
    assert!(status.last_error.is_none());
    run.pipeline.shutdown().unwrap();

    let records = records_in(&blocked);
    assert_eq!(records.iter().map(|r| r.seq).collect::<Vec<_>>(), vec![1, 2, 3]);
}

#[test]
fn numbering_continues_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let run = start(options(dir.path()), at(17, 9, 0, 0));
    run.pipeline.control().new_segment().unwrap();
    run.press(0x41, 0);
    run.wait_for(|s| s.keys_logged == 1);
    run.pipeline.shutdown().unwrap();

    let run = start(options(dir.path()), at(17, 10, 0, 0));
    let status = run.wait_for(|s| s.next_seq == 3);
    assert_eq!(status.current_segment, 1);
    run.press(0x42, 0);
    run.wait_for(|s| s.keys_logged == 1);
    run.pipeline.shutdown().unwrap();

    let records = records_in(&dir.path().join("2026-10-17.jsonl"));
    assert_eq!(records.iter().map(|r| r.seq).collect::<Vec<_>>(), vec![1, 2, 3]);
    assert_eq!(records[2].segment, 1);
}

#[test]
fn hook_failure_is_a_startup_error() {
    let dir = tempfile::tempdir().unwrap();
    let result = Pipeline::start(options(dir.path()), FailingSource);
    assert!(matches!(result, Err(StartupError::HookInstall(_))));
}

#[test]
fn unusable_log_directory_is_a_startup_error() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("not-a-dir");
    fs::write(&file, "x").unwrap();
    let result = Pipeline::start(options(&file), FailingSource);
    assert!(matches!(result, Err(StartupError::BaseDir { .. })));
}

#[test]
fn quit_from_control_unhooks_capture_after_draining() {
    let dir = tempfile::tempdir().unwrap();
    let run = start(options(dir.path()), at(17, 9, 0, 0));
    assert!(run.wait_for(|s| s.capture_active).capture_active);

    run.press(0x41, 0);
    run.wait_for(|s| s.keys_logged == 1);
    run.pipeline.control().quit().unwrap();
    let status = run.wait_for(|s| s.stopped);
    assert!(!status.capture_active);
    assert!(run.capture_stopped.load(Ordering::SeqCst));
    assert_eq!(status.dropped_after_stop, 0);

    let summary = run.pipeline.shutdown().unwrap();
    assert_eq!(summary.records_written, 1);
    assert_eq!(records_in(&dir.path().join("2026-10-17.jsonl")).len(), 1);
}
