//! Append-only, date-named JSON-lines log.
//!
//! `append` returns only after the line has been written and `sync_data` has
//! completed. The rotation check runs inline on every append and compares the
//! record's local date with the active file's date; nothing here runs on a
//! timer.

use crate::error::{LogError, StartupError};
use crate::record::LogRecord;
use chrono::NaiveDate;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const LOG_EXTENSION: &str = "jsonl";
const DATE_FORMAT: &str = "%Y-%m-%d";

struct ActiveFile {
    date: NaiveDate,
    path: PathBuf,
    file: File,
}

pub struct DurableLogger {
    base_dir: PathBuf,
    active: Option<ActiveFile>,
}

/// Where numbering resumes after a restart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveredPosition {
    pub next_seq: u64,
    pub segment: u32,
    pub file: PathBuf,
}

impl DurableLogger {
    /// Creates the base directory if needed. An inaccessible directory is a
    /// startup failure.
    pub fn open(base_dir: impl Into<PathBuf>) -> Result<Self, StartupError> {
        let base_dir = base_dir.into();
        let base_err = |source| StartupError::BaseDir {
            path: base_dir.clone(),
            source,
        };
        fs::create_dir_all(&base_dir).map_err(base_err)?;
        let meta = fs::metadata(&base_dir).map_err(base_err)?;
        if meta.permissions().readonly() {
            return Err(base_err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "log directory is read-only",
            )));
        }
        Ok(Self {
            base_dir,
            active: None,
        })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn log_path(&self, date: NaiveDate) -> PathBuf {
        log_path_in(&self.base_dir, date)
    }

    pub fn current_file(&self) -> Option<&Path> {
        self.active.as_ref().map(|active| active.path.as_path())
    }

    pub fn active_date(&self) -> Option<NaiveDate> {
        self.active.as_ref().map(|active| active.date)
    }

    /// Writes one record and syncs it to stable storage. On failure the handle
    /// is dropped so the next call reopens the file from scratch.
    pub fn append(&mut self, record: &LogRecord) -> Result<PathBuf, LogError> {
        let mut line = serde_json::to_vec(record).map_err(|source| LogError::Encode {
            seq: record.seq,
            source,
        })?;
        line.push(b'\n');

        self.ensure_file(record.ts.date_naive())?;
        let result = match self.active.as_mut() {
            Some(active) => write_synced(&mut active.file, &active.path, &line),
            None => Ok(()),
        };
        match result {
            Ok(()) => Ok(self
                .current_file()
                .map(Path::to_path_buf)
                .unwrap_or_default()),
            Err(err) => {
                self.active = None;
                Err(err)
            }
        }
    }

    fn ensure_file(&mut self, date: NaiveDate) -> Result<(), LogError> {
        if let Some(active) = self.active.as_ref() {
            if active.date == date {
                return Ok(());
            }
            info!(from = %active.date, to = %date, "rotating log file");
        }
        if let Err(err) = self.close() {
            warn!(error = %err, "closing previous log file failed");
        }
        let path = self.log_path(date);
        let file = open_for_append(&path)?;
        debug!(path = %path.display(), "log file opened");
        self.active = Some(ActiveFile { date, path, file });
        Ok(())
    }

    /// Syncs and releases the active handle.
    pub fn close(&mut self) -> io::Result<()> {
        match self.active.take() {
            Some(active) => active.file.sync_all(),
            None => Ok(()),
        }
    }

    /// Dated log files under the base directory, oldest first.
    pub fn log_files(&self) -> io::Result<Vec<(NaiveDate, PathBuf)>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.base_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(LOG_EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            if let Ok(date) = NaiveDate::parse_from_str(stem, DATE_FORMAT) {
                files.push((date, path));
            }
        }
        files.sort();
        Ok(files)
    }

    /// Reads the newest file to continue sequence and segment numbering.
    pub fn recover_position(&self) -> Result<Option<RecoveredPosition>, LogError> {
        let files = self.log_files().map_err(|source| LogError::Read {
            path: self.base_dir.clone(),
            source,
        })?;
        for (_, path) in files.iter().rev() {
            let readout = read_log(path)?;
            if let Some(last) = readout.records.iter().max_by_key(|record| record.seq) {
                return Ok(Some(RecoveredPosition {
                    next_seq: last.seq + 1,
                    segment: last.segment,
                    file: path.clone(),
                }));
            }
        }
        Ok(None)
    }
}

impl Drop for DurableLogger {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

pub fn log_path_in(base_dir: &Path, date: NaiveDate) -> PathBuf {
    base_dir.join(format!("{}.{}", date.format(DATE_FORMAT), LOG_EXTENSION))
}

/// What the logger appends to. A failed append must leave the storage as it
/// found it, or the retry would write the record twice.
pub(crate) trait LogStorage: Write {
    fn end_offset(&self) -> io::Result<u64>;
    fn sync(&mut self) -> io::Result<()>;
    fn truncate_to(&mut self, len: u64) -> io::Result<()>;
}

impl LogStorage for File {
    fn end_offset(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn sync(&mut self) -> io::Result<()> {
        self.sync_data()
    }

    fn truncate_to(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

fn write_synced<S: LogStorage>(storage: &mut S, path: &Path, line: &[u8]) -> Result<(), LogError> {
    let start = storage.end_offset().map_err(|source| LogError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    let result = storage
        .write_all(line)
        .map_err(|source| LogError::Write {
            path: path.to_path_buf(),
            source,
        })
        .and_then(|()| {
            storage.sync().map_err(|source| LogError::Sync {
                path: path.to_path_buf(),
                source,
            })
        });
    if result.is_err() {
        if let Err(err) = storage.truncate_to(start) {
            warn!(path = %path.display(), error = %err, "could not roll back a failed append");
        }
    }
    result
}

/// Opens `path` for appending. A file left with a torn final line gets a
/// newline first so the next record starts on its own line.
fn open_for_append(path: &Path) -> Result<File, LogError> {
    let open_err = |source| LogError::Open {
        path: path.to_path_buf(),
        source,
    };
    let existed = path.exists();
    let mut file = OpenOptions::new()
        .create(true)
        .read(true)
        .append(true)
        .open(path)
        .map_err(open_err)?;

    let len = file.metadata().map_err(open_err)?.len();
    if len > 0 {
        let mut last = [0u8; 1];
        file.seek(SeekFrom::Start(len - 1)).map_err(open_err)?;
        file.read_exact(&mut last).map_err(open_err)?;
        if last[0] != b'\n' {
            warn!(path = %path.display(), "log ends with a partial record; sealing it");
            file.write_all(b"\n").map_err(|source| LogError::Write {
                path: path.to_path_buf(),
                source,
            })?;
            file.sync_data().map_err(|source| LogError::Sync {
                path: path.to_path_buf(),
                source,
            })?;
        }
    }
    if !existed {
        sync_parent_dir(path);
    }
    Ok(file)
}

#[cfg(unix)]
fn sync_parent_dir(path: &Path) {
    if let Some(parent) = path.parent() {
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
    }
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) {}

/// Result of reading a log file that may have been cut short by a crash.
#[derive(Debug, Default)]
pub struct LogReadout {
    pub records: Vec<LogRecord>,
    pub skipped_lines: usize,
    /// Lines repeating the sequence number of the record just before them.
    pub repeated_records: usize,
    pub truncated_tail: bool,
}

pub fn read_log(path: &Path) -> Result<LogReadout, LogError> {
    let bytes = fs::read(path).map_err(|source| LogError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let mut readout = LogReadout::default();
    let ends_clean = bytes.last().map_or(true, |byte| *byte == b'\n');
    let lines: Vec<&[u8]> = bytes.split(|byte| *byte == b'\n').collect();
    let last_index = lines.len().saturating_sub(1);
    for (index, raw) in lines.iter().enumerate() {
        let text = String::from_utf8_lossy(raw);
        let text = text.trim();
        if text.is_empty() {
            continue;
        }
        match serde_json::from_str::<LogRecord>(text) {
            Ok(record) => {
                if readout.records.last().map(|last| last.seq) == Some(record.seq) {
                    readout.repeated_records += 1;
                } else {
                    readout.records.push(record);
                }
            }
            Err(_) if index == last_index && !ends_clean => readout.truncated_tail = true,
            Err(_) => readout.skipped_lines += 1,
        }
    }
    Ok(readout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RecordEntry;
    use chrono::{Local, TimeZone};

    fn record(seq: u64, day: u32) -> LogRecord {
        LogRecord {
            seq,
            ts: Local.with_ymd_and_hms(2026, 10, day, 12, 0, 0).unwrap(),
            segment: 0,
            entry: RecordEntry::SegmentMarker,
        }
    }

    #[test]
    fn file_name_follows_local_date() {
        let dir = tempfile::tempdir().unwrap();
        let mut logger = DurableLogger::open(dir.path()).unwrap();
        let path = logger.append(&record(1, 17)).unwrap();
        assert_eq!(path, dir.path().join("2026-10-17.jsonl"));
        assert_eq!(logger.active_date(), NaiveDate::from_ymd_opt(2026, 10, 17));
    }

    #[test]
    fn torn_tail_is_sealed_on_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = log_path_in(dir.path(), NaiveDate::from_ymd_opt(2026, 10, 17).unwrap());
        let intact = serde_json::to_string(&record(1, 17)).unwrap();
        fs::write(&path, format!("{intact}\n{{\"seq\":2,\"ts\":\"2026-")).unwrap();

        let before = read_log(&path).unwrap();
        assert_eq!(before.records.len(), 1);
        assert!(before.truncated_tail);

        let mut logger = DurableLogger::open(dir.path()).unwrap();
        logger.append(&record(2, 17)).unwrap();
        let after = read_log(&path).unwrap();
        assert_eq!(after.records.iter().map(|r| r.seq).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(after.skipped_lines, 1);
        assert!(!after.truncated_tail);
    }

    #[test]
    fn recovery_uses_newest_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut logger = DurableLogger::open(dir.path()).unwrap();
        logger.append(&record(1, 16)).unwrap();
        let mut later = record(2, 17);
        later.segment = 4;
        logger.append(&later).unwrap();
        logger.close().unwrap();

        let position = logger.recover_position().unwrap().unwrap();
        assert_eq!(position.next_seq, 3);
        assert_eq!(position.segment, 4);
        assert_eq!(position.file, dir.path().join("2026-10-17.jsonl"));
        assert_eq!(logger.log_files().unwrap().len(), 2);
    }

    /// In-memory storage whose syncs fail a set number of times.
    struct FlakyStorage {
        data: Vec<u8>,
        failing_syncs: usize,
    }

    impl Write for FlakyStorage {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl LogStorage for FlakyStorage {
        fn end_offset(&self) -> io::Result<u64> {
            Ok(self.data.len() as u64)
        }

        fn sync(&mut self) -> io::Result<()> {
            if self.failing_syncs > 0 {
                self.failing_syncs -= 1;
                return Err(io::Error::new(io::ErrorKind::Other, "device busy"));
            }
            Ok(())
        }

        fn truncate_to(&mut self, len: u64) -> io::Result<()> {
            self.data.truncate(len as usize);
            Ok(())
        }
    }

    #[test]
    fn failed_sync_rolls_back_so_retry_writes_once() {
        let path = Path::new("2026-10-17.jsonl");
        let mut storage = FlakyStorage {
            data: b"{\"seq\":1}\n".to_vec(),
            failing_syncs: 1,
        };
        let line = b"{\"seq\":2}\n";

        let err = write_synced(&mut storage, path, line).unwrap_err();
        assert!(matches!(err, LogError::Sync { .. }));
        assert_eq!(storage.data, b"{\"seq\":1}\n");

        write_synced(&mut storage, path, line).unwrap();
        assert_eq!(storage.data, b"{\"seq\":1}\n{\"seq\":2}\n");
    }

    #[test]
    fn reader_drops_back_to_back_repeats() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("2026-10-17.jsonl");
        let first = serde_json::to_string(&record(1, 17)).unwrap();
        let second = serde_json::to_string(&record(2, 17)).unwrap();
        fs::write(&path, format!("{first}\n{second}\n{second}\n")).unwrap();

        let readout = read_log(&path).unwrap();
        assert_eq!(readout.records.iter().map(|r| r.seq).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(readout.repeated_records, 1);
    }

    #[test]
    fn empty_directory_has_no_position() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("notes.txt"), "x").unwrap();
        let logger = DurableLogger::open(dir.path()).unwrap();
        assert_eq!(logger.recover_position().unwrap(), None);
    }
}
