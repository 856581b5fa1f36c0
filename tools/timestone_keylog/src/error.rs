use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failures that abort startup before any keystroke is captured.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to install keyboard hook: {0}")]
    HookInstall(String),

    #[error("keyboard capture is not available on this platform")]
    Unsupported,

    #[error("log directory {path} is not accessible: {source}")]
    BaseDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: io::Error,
    },
}

/// A write-path failure. Non-fatal: the record stays pending and is retried.
#[derive(Debug, Error)]
pub enum LogError {
    #[error("open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("sync {path}: {source}")]
    Sync {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("encode record {seq}: {source}")]
    Encode {
        seq: u64,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ControlError {
    #[error("session coordinator is no longer running")]
    CoordinatorGone,
}

/// Raised by Quit when records could not be made durable.
#[derive(Debug, Error)]
pub enum ShutdownError {
    #[error("{pending} record(s) not flushed at shutdown: {source}")]
    Unflushed {
        pending: usize,
        #[source]
        source: LogError,
    },

    #[error("final close of {path} failed: {source}")]
    Close {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("coordinator thread panicked")]
    Panicked,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config io {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("config parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
