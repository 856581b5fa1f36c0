use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use timestone_keylog::config::{load_config, CliOverrides};
use timestone_keylog::logger::log_path_in;
use timestone_keylog::{read_log, render_text, Pipeline, PipelineOptions, StatusSnapshot};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

const LOCK_FILE: &str = "keylog.lock";
const STOP_FILE: &str = "keylog_stop.signal";

fn main() -> Result<()> {
    let mut args = env::args().skip(1);
    match args.next().as_deref() {
        Some("start") => {
            let overrides = parse_start_args(args);
            run_keylog(overrides)?;
        }
        Some("stop") => {
            stop_keylog()?;
        }
        Some("status") => {
            print_status()?;
        }
        Some("read") => {
            let mut date = None;
            let mut json = false;
            for arg in args {
                if arg == "--json" {
                    json = true;
                } else {
                    date = Some(arg);
                }
            }
            read_day(date, json)?;
        }
        _ => {
            print_usage();
        }
    }
    Ok(())
}

fn print_usage() {
    println!("timestone_keylog");
    println!("Usage:");
    println!("  timestone_keylog start [--config PATH] [--log-dir PATH] [--dedup-ms N]");
    println!("                         [--raw-keys down|up|both] [--no-hotkeys]");
    println!("  timestone_keylog stop");
    println!("  timestone_keylog status");
    println!("  timestone_keylog read [YYYY-MM-DD] [--json]");
}

fn parse_start_args(mut args: impl Iterator<Item = String>) -> CliOverrides {
    let mut overrides = CliOverrides::default();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                if let Some(value) = args.next() {
                    overrides.config_path = Some(PathBuf::from(value));
                }
            }
            "--log-dir" => {
                if let Some(value) = args.next() {
                    overrides.log_dir = Some(value);
                }
            }
            "--dedup-ms" => {
                if let Some(value) = args.next() {
                    if let Ok(parsed) = value.parse::<u64>() {
                        overrides.dedup_window_ms = Some(parsed);
                    }
                }
            }
            "--raw-keys" => {
                if let Some(value) = args.next() {
                    overrides.raw_keys_mode = Some(value);
                }
            }
            "--no-hotkeys" => {
                overrides.hotkeys_enabled = Some(false);
            }
            _ => {}
        }
    }
    overrides
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn run_keylog(overrides: CliOverrides) -> Result<()> {
    let base_dir = ensure_app_dir()?;
    let config = load_config(&base_dir, &overrides).context("Failed to load config")?;
    init_logging(&config.log_level);

    let lock_path = base_dir.join(LOCK_FILE);
    if let Some(pid) = read_lock_pid(&lock_path) {
        if is_pid_running(pid) {
            println!("Keylog already running (pid {pid}).");
            return Ok(());
        }
        warn!(pid, "clearing stale lock");
        let _ = fs::remove_file(&lock_path);
    }
    let _ = fs::remove_file(base_dir.join(STOP_FILE));

    let options = PipelineOptions::from_config(&config, &base_dir);
    let status_poll = options.status_poll;
    let pipeline = start_pipeline(options).context("Keyboard capture failed to start")?;

    let session_id = Uuid::new_v4().to_string();
    write_lock(&lock_path, &session_id, pipeline.log_dir())?;
    info!(%session_id, log_dir = %pipeline.log_dir().display(), "keylog running");

    #[cfg(windows)]
    let mut hotkeys = if config.hotkeys_enabled {
        match timestone_keylog::hotkeys::HotkeyListener::spawn(pipeline.control(), pipeline.status()) {
            Ok(listener) => Some(listener),
            Err(err) => {
                warn!(error = %err, "hotkeys unavailable");
                None
            }
        }
    } else {
        None
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    ctrlc::set_handler({
        let shutdown = shutdown.clone();
        move || shutdown.store(true, Ordering::SeqCst)
    })
    .context("Failed to set Ctrl+C handler")?;
    let stop_handle = spawn_stop_watcher(base_dir.join(STOP_FILE), shutdown.clone());

    let mut reader = pipeline.status_reader();
    let mut previous = reader.poll().clone();
    while !shutdown.load(Ordering::SeqCst) && !pipeline.is_finished() {
        thread::sleep(status_poll);
        let current = reader.poll().clone();
        report_changes(&previous, &current);
        previous = current;
    }

    #[cfg(windows)]
    if let Some(listener) = hotkeys.as_mut() {
        listener.stop();
    }
    shutdown.store(true, Ordering::SeqCst);
    stop_handle.join().ok();

    let result = pipeline.shutdown();
    let _ = fs::remove_file(&lock_path);
    match result {
        Ok(summary) => {
            info!(
                records = summary.records_written,
                keys = summary.keys_logged,
                paused_filtered = summary.filtered_while_paused,
                "keylog stopped"
            );
            if let Some(file) = summary.last_file {
                println!("Last log file: {}", file.display());
            }
            Ok(())
        }
        Err(err) => {
            error!(error = %err, "final flush failed");
            Err(err).context("Keylog did not shut down cleanly")
        }
    }
}

#[cfg(windows)]
fn start_pipeline(options: PipelineOptions) -> Result<Pipeline, timestone_keylog::StartupError> {
    Pipeline::start(options, timestone_keylog::hook::WindowsKeyboardHook)
}

#[cfg(not(windows))]
fn start_pipeline(_options: PipelineOptions) -> Result<Pipeline, timestone_keylog::StartupError> {
    Err(timestone_keylog::StartupError::Unsupported)
}

fn report_changes(previous: &StatusSnapshot, current: &StatusSnapshot) {
    if previous.paused != current.paused {
        info!(paused = current.paused, "capture state changed");
    }
    if previous.current_segment != current.current_segment {
        info!(segment = current.current_segment, "segment changed");
    }
    if previous.current_file != current.current_file {
        if let Some(file) = current.current_file.as_ref() {
            info!(file = %file.display(), "writing to");
        }
    }
    if previous.relay_backlog != current.relay_backlog && current.relay_backlog {
        warn!(
            high_water = current.relay_depth_high_water,
            "keystrokes are queueing faster than they are written"
        );
    }
    if previous.capture_active && !current.capture_active {
        info!("keyboard capture stopped");
    }
    if current.dropped_after_stop > previous.dropped_after_stop {
        warn!(
            dropped = current.dropped_after_stop,
            "keystrokes arrived after the coordinator exited and were not logged"
        );
    }
    if previous.last_error != current.last_error {
        match current.last_error.as_deref() {
            Some(message) => warn!(
                pending = current.pending_records,
                failures = current.write_failures,
                "log write failing: {message}"
            ),
            None => info!("log writes healthy again"),
        }
    }
}

fn stop_keylog() -> Result<()> {
    let base_dir = ensure_app_dir()?;
    let lock_path = base_dir.join(LOCK_FILE);
    if !lock_path.exists() {
        println!("No active keylog session found.");
        return Ok(());
    }
    let stop_path = base_dir.join(STOP_FILE);
    fs::write(&stop_path, b"stop").context("Failed to write stop signal")?;
    println!("Stop signal written.");
    if let Some(pid) = read_lock_pid(&lock_path) {
        if !is_pid_running(pid) {
            let _ = fs::remove_file(&lock_path);
            let _ = fs::remove_file(&stop_path);
            println!("Keylog was not running; stale lock cleared.");
        }
    }
    Ok(())
}

fn print_status() -> Result<()> {
    let base_dir = ensure_app_dir()?;
    let lock_path = base_dir.join(LOCK_FILE);
    if !lock_path.exists() {
        println!("Keylog status: stopped");
        return Ok(());
    }
    if let Some(pid) = read_lock_pid(&lock_path) {
        if !is_pid_running(pid) {
            let _ = fs::remove_file(&lock_path);
            println!("Keylog status: stopped (stale lock cleared)");
            return Ok(());
        }
    }
    println!("Keylog status: running");
    let contents = fs::read_to_string(&lock_path).unwrap_or_default();
    if !contents.trim().is_empty() {
        println!("{}", contents.trim_end());
    }
    Ok(())
}

fn read_day(date_arg: Option<String>, json: bool) -> Result<()> {
    let base_dir = ensure_app_dir()?;
    let config = load_config(&base_dir, &CliOverrides::default()).context("Failed to load config")?;
    init_logging(&config.log_level);
    let date = match date_arg {
        Some(value) => NaiveDate::parse_from_str(&value, "%Y-%m-%d")
            .with_context(|| format!("Invalid date: {value}"))?,
        None => Local::now().date_naive(),
    };
    let path = log_path_in(&config.resolve_log_dir(&base_dir), date);
    if !path.exists() {
        println!("No log for {date}.");
        return Ok(());
    }
    let readout = read_log(&path).context("Failed to read log")?;
    if json {
        for record in &readout.records {
            println!("{}", serde_json::to_string(record).context("Failed to encode record")?);
        }
    } else {
        print!("{}", render_text(&readout.records));
    }
    if readout.skipped_lines > 0 || readout.truncated_tail {
        eprintln!(
            "{} damaged line(s) skipped{}",
            readout.skipped_lines,
            if readout.truncated_tail { ", last record truncated" } else { "" }
        );
    }
    if readout.repeated_records > 0 {
        eprintln!("{} repeated record(s) ignored", readout.repeated_records);
    }
    Ok(())
}

fn ensure_app_dir() -> Result<PathBuf> {
    let cwd = env::current_dir().context("Failed to read current dir")?;
    let base_dir = cwd.join("data").join("timestone").join("keylog");
    if !base_dir.exists() {
        fs::create_dir_all(&base_dir).context("Failed to create keylog data dir")?;
    }
    Ok(base_dir)
}

fn write_lock(path: &Path, session_id: &str, log_dir: &Path) -> Result<()> {
    let contents = format!(
        "session_id={}\npid={}\nstart_wall_iso={}\nlog_dir={}\n",
        session_id,
        std::process::id(),
        Local::now().to_rfc3339(),
        log_dir.display()
    );
    fs::write(path, contents).context("Failed to write lock file")?;
    Ok(())
}

fn read_lock_pid(path: &Path) -> Option<u32> {
    let contents = fs::read_to_string(path).ok()?;
    contents.lines().find_map(|line| {
        let (key, value) = line.split_once('=')?;
        if key.trim() == "pid" {
            value.trim().parse::<u32>().ok()
        } else {
            None
        }
    })
}

fn spawn_stop_watcher(stop_path: PathBuf, shutdown: Arc<AtomicBool>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let interval = Duration::from_millis(200);
        while !shutdown.load(Ordering::SeqCst) {
            if stop_path.exists() {
                let _ = fs::remove_file(&stop_path);
                info!("stop signal received");
                shutdown.store(true, Ordering::SeqCst);
                break;
            }
            thread::sleep(interval);
        }
    })
}

#[cfg(windows)]
fn is_pid_running(pid: u32) -> bool {
    use windows::Win32::Foundation::{CloseHandle, STILL_ACTIVE};
    use windows::Win32::System::Threading::{GetExitCodeProcess, OpenProcess, PROCESS_QUERY_LIMITED_INFORMATION};

    let handle = match unsafe { OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, false, pid) } {
        Ok(handle) => handle,
        Err(_) => return false,
    };
    if handle.is_invalid() {
        return false;
    }
    let mut exit_code: u32 = 0;
    let ok = unsafe { GetExitCodeProcess(handle, &mut exit_code) }.is_ok();
    let _ = unsafe { CloseHandle(handle) };
    if !ok {
        return false;
    }
    exit_code == STILL_ACTIVE.0 as u32
}

#[cfg(not(windows))]
fn is_pid_running(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}
